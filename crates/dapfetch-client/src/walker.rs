//! Extraction walker
//!
//! Walks the schema path of the target variable and the fetched data tree in
//! lock-step, applying the request projection at every dimensioned node, and
//! writes converted values to the caller's buffer in row-major order.

use std::collections::HashMap;

use dapfetch_core::convert::{check_conversion, conversion_required, convert};
use dapfetch_core::{AtomicType, NodeKind, Odometer, Projection, SchemaNodeId, SchemaProvider, Segment, Slice};

use crate::remote::{CursorError, CursorMode, DataCursor, DataTree};
use crate::{Error, Result};

/// Write cursor over the caller's output buffer
pub struct OutputBuffer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> OutputBuffer<'b> {
    pub fn new(buf: &'b mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far
    pub fn written(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&mut [u8]> {
        let start = self.pos;
        if start + n > self.buf.len() {
            return Err(Error::OutputTooSmall {
                needed: start + n,
                available: self.buf.len(),
            });
        }
        self.pos += n;
        Ok(&mut self.buf[start..start + n])
    }
}

pub struct ExtractionWalker<'a> {
    schema: &'a dyn SchemaProvider,
    projection: &'a Projection,
    path: Vec<SchemaNodeId>,
    dst_type: AtomicType,
    fill_char: u8,
    /// Field index of each schema node within its parent's data, resolved on
    /// first visit
    field_positions: HashMap<SchemaNodeId, usize>,
}

impl<'a> ExtractionWalker<'a> {
    pub fn new(
        schema: &'a dyn SchemaProvider,
        projection: &'a Projection,
        dst_type: AtomicType,
        fill_char: u8,
    ) -> Self {
        Self {
            schema,
            projection,
            path: schema.resolve_path(projection.target),
            dst_type,
            fill_char,
            field_positions: HashMap::new(),
        }
    }

    /// Extract the projection from `tree` into `out`
    pub fn walk(&mut self, tree: &dyn DataTree, out: &mut OutputBuffer<'_>) -> Result<()> {
        let root = tree.root();
        self.walk_node(0, root.as_ref(), out)
    }

    fn walk_node(&mut self, depth: usize, cursor: &dyn DataCursor, out: &mut OutputBuffer<'_>) -> Result<()> {
        let id = self.path[depth];
        let node = self.schema.node(id);
        match (node.kind, cursor.mode()) {
            (NodeKind::Atomic, CursorMode::Scalar) => self.read_leaf(id, cursor, out),
            (NodeKind::Sequence, CursorMode::Record) => self.walk_records(depth, cursor, out),
            (kind, CursorMode::Array) if kind.is_container() => self.walk_array(depth, cursor, out),
            (kind, CursorMode::Field) if kind.is_container() => self.walk_field(depth, cursor, out),
            (kind, mode) => Err(Error::SchemaMismatch(format!(
                "{} is {:?} in the schema but {} in the response",
                self.schema.full_name(id),
                kind,
                mode.as_str()
            ))),
        }
    }

    fn segment(&self, id: SchemaNodeId) -> Result<&'a Segment> {
        self.projection.segment_for(id).ok_or_else(|| {
            Error::SchemaMismatch(format!("no segment for {}", self.schema.full_name(id)))
        })
    }

    /// Step into the next path node's field. Virtual wrappers have no data of
    /// their own, so the real node below them is looked up directly.
    fn walk_field(&mut self, depth: usize, cursor: &dyn DataCursor, out: &mut OutputBuffer<'_>) -> Result<()> {
        let mut next = depth + 1;
        while next < self.path.len() && self.schema.node(self.path[next]).is_virtual {
            next += 1;
        }
        let child_id = *self
            .path
            .get(next)
            .ok_or_else(|| Error::SchemaMismatch(format!("{} has no data below it", cursor.name())))?;

        let position = match self.field_positions.get(&child_id) {
            Some(p) => *p,
            None => {
                let name = &self.schema.node(child_id).name;
                let p = cursor.field_position(name).ok_or_else(|| {
                    Error::SchemaMismatch(format!("{} missing from response", self.schema.full_name(child_id)))
                })?;
                self.field_positions.insert(child_id, p);
                p
            }
        };
        let child = cursor.nth_field(position)?;
        self.walk_node(next, child.as_ref(), out)
    }

    fn walk_array(&mut self, depth: usize, cursor: &dyn DataCursor, out: &mut OutputBuffer<'_>) -> Result<()> {
        let segment = self.segment(self.path[depth])?;
        let mut odom = Odometer::new(&segment.slices);
        while odom.has_more() {
            let element = cursor.nth_element(odom.current_offset())?;
            self.walk_field(depth, element.as_ref(), out)?;
            odom.advance();
        }
        Ok(())
    }

    /// Records past the end of what the server sent end the walk quietly,
    /// unless not even the first requested record arrived.
    fn walk_records(&mut self, depth: usize, cursor: &dyn DataCursor, out: &mut OutputBuffer<'_>) -> Result<()> {
        let id = self.path[depth];
        let slice = *self.segment(id)?.slices.first().ok_or_else(|| {
            Error::SchemaMismatch(format!("sequence {} has no record axis", self.schema.full_name(id)))
        })?;
        for index in (slice.first..slice.stop).step_by(slice.stride) {
            match cursor.nth_record(index) {
                Ok(record) => self.walk_field(depth, record.as_ref(), out)?,
                Err(CursorError::NoMoreRecords) if index == slice.first => {
                    return Err(Error::ProtocolShortRead(format!(
                        "{} has no record {}",
                        self.schema.full_name(id),
                        index
                    )));
                }
                Err(CursorError::NoMoreRecords) => {
                    tracing::warn!(
                        sequence = %self.schema.full_name(id),
                        received = index,
                        requested = slice.count(),
                        "Server returned fewer records than requested"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_leaf(&mut self, id: SchemaNodeId, cursor: &dyn DataCursor, out: &mut OutputBuffer<'_>) -> Result<()> {
        let src_type = self
            .schema
            .element_type(id)
            .ok_or_else(|| Error::NotALeaf(self.schema.full_name(id)))?;
        let segment = self.segment(id)?;

        if src_type.is_string() {
            let (char_slice, array_slices) = segment.slices.split_last().ok_or_else(|| {
                Error::SchemaMismatch(format!("{} has no character axis", self.schema.full_name(id)))
            })?;
            return self.read_strings(src_type, cursor, array_slices, char_slice, out);
        }

        if segment.rank() == 0 {
            return self.read_one(src_type, cursor, 0, out);
        }

        let rank = segment.rank();
        let mut odom = Odometer::new(&segment.slices);
        match odom.contiguous_prefix_rank() {
            0 => self.read_run(src_type, cursor, 0, segment.segment_size(0, rank), out),
            safe if safe < rank => {
                let count = segment.segment_size(safe, rank);
                let mut outer = Odometer::truncated(&segment.slices, safe);
                while outer.has_more() {
                    self.read_run(src_type, cursor, outer.current_offset(), count, out)?;
                    outer.advance();
                }
                Ok(())
            }
            _ => {
                while odom.has_more() {
                    self.read_one(src_type, cursor, odom.current_offset(), out)?;
                    odom.advance();
                }
                Ok(())
            }
        }
    }

    fn read_one(
        &self,
        src_type: AtomicType,
        cursor: &dyn DataCursor,
        offset: usize,
        out: &mut OutputBuffer<'_>,
    ) -> Result<()> {
        let mut value = [0u8; 16];
        let width = src_type.size_of();
        cursor.read_raw(&mut value[..width], offset, 1)?;
        convert(src_type, self.dst_type, &value[..width], 1, out.take(self.dst_type.size_of())?)
    }

    /// Read `count` contiguous values starting at `offset`
    fn read_run(
        &self,
        src_type: AtomicType,
        cursor: &dyn DataCursor,
        offset: usize,
        count: usize,
        out: &mut OutputBuffer<'_>,
    ) -> Result<()> {
        let dst_bytes = count * self.dst_type.size_of();
        if !conversion_required(src_type, self.dst_type) {
            cursor.read_raw(out.take(dst_bytes)?, offset, count)?;
            return Ok(());
        }

        let src_bytes = count * src_type.size_of();
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(src_bytes)
            .map_err(|_| Error::OutOfMemory(src_bytes))?;
        scratch.resize(src_bytes, 0);
        cursor.read_raw(&mut scratch, offset, count)?;
        convert(src_type, self.dst_type, &scratch, count, out.take(dst_bytes)?)
    }

    /// Copy characters `[first, stop)` by `stride` of each selected string,
    /// padding past the end of shorter strings.
    fn read_strings(
        &self,
        src_type: AtomicType,
        cursor: &dyn DataCursor,
        array_slices: &[Slice],
        chars: &Slice,
        out: &mut OutputBuffer<'_>,
    ) -> Result<()> {
        check_conversion(src_type, self.dst_type)?;
        let mut odom = Odometer::new(array_slices);
        while odom.has_more() {
            let value = cursor.read_string(odom.current_offset())?;
            let bytes = value.as_bytes();
            for k in (chars.first..chars.stop).step_by(chars.stride) {
                out.take(1)?[0] = bytes.get(k).copied().unwrap_or(self.fill_char);
            }
            odom.advance();
        }
        Ok(())
    }
}

/// Walk `tree` for `projection` and write `dst_type` values into `out`.
/// Returns the number of bytes written.
pub fn extract(
    schema: &dyn SchemaProvider,
    tree: &dyn DataTree,
    projection: &Projection,
    dst_type: AtomicType,
    fill_char: u8,
    out: &mut [u8],
) -> Result<usize> {
    let mut buffer = OutputBuffer::new(out);
    ExtractionWalker::new(schema, projection, dst_type, fill_char).walk(tree, &mut buffer)?;
    Ok(buffer.written())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DataNode, DimDecl, MemoryDataset, MemoryRemote};
    use crate::remote::{FetchKind, RemoteFetch};
    use dapfetch_core::{build_vara_projection, PolicyConfig, SchemaTree};

    fn fetch_all(remote: &mut MemoryRemote) -> Box<dyn DataTree> {
        remote.fetch(None, FetchKind::SchemaAndData).unwrap()
    }

    fn ints(out: &[u8]) -> Vec<i32> {
        out.chunks(4).map(|c| i32::from_ne_bytes(c.try_into().unwrap())).collect()
    }

    #[test]
    fn test_batched_and_strided_reads() {
        let values: Vec<i64> = (0..12).collect();
        let ds = MemoryDataset::new(
            "ds",
            vec![DataNode::ints(
                "grid",
                AtomicType::Int,
                vec![DimDecl::new("y", 3), DimDecl::new("x", 4)],
                &values,
            )],
        );
        let mut remote = MemoryRemote::new(ds).unwrap();
        let schema = remote.schema().clone();
        let tree = fetch_all(&mut remote);
        let var = schema.find("grid").unwrap();

        // Whole array in one run
        let p = build_vara_projection(&schema, var, &[0, 0], &[3, 4], &[1, 1]).unwrap();
        let mut out = vec![0u8; 48];
        assert_eq!(extract(&schema, tree.as_ref(), &p, AtomicType::Int, 0, &mut out).unwrap(), 48);
        assert_eq!(ints(&out), values.iter().map(|v| *v as i32).collect::<Vec<_>>());

        // Rows 1..3, whole inner axis
        let p = build_vara_projection(&schema, var, &[1, 0], &[2, 4], &[1, 1]).unwrap();
        let mut out = vec![0u8; 32];
        extract(&schema, tree.as_ref(), &p, AtomicType::Int, 0, &mut out).unwrap();
        assert_eq!(ints(&out), vec![4, 5, 6, 7, 8, 9, 10, 11]);

        // Strided on both axes, converted to double
        let p = build_vara_projection(&schema, var, &[0, 1], &[2, 2], &[2, 2]).unwrap();
        let mut out = vec![0u8; 32];
        extract(&schema, tree.as_ref(), &p, AtomicType::Double, 0, &mut out).unwrap();
        let doubles: Vec<f64> = out.chunks(8).map(|c| f64::from_ne_bytes(c.try_into().unwrap())).collect();
        assert_eq!(doubles, vec![1.0, 3.0, 9.0, 11.0]);
    }

    #[test]
    fn test_string_padding() {
        let ds = MemoryDataset::new("ds", vec![DataNode::strings("name", vec![], &["abc"])]);
        let policy = PolicyConfig::default();
        let mut remote = MemoryRemote::with_policy(ds, &policy).unwrap();
        let schema = remote.schema().clone();
        let tree = fetch_all(&mut remote);
        let var = schema.find("name").unwrap();

        let p = build_vara_projection(&schema, var, &[0], &[6], &[1]).unwrap();
        let mut out = vec![0xffu8; 6];
        extract(&schema, tree.as_ref(), &p, AtomicType::Char, b'_', &mut out).unwrap();
        assert_eq!(&out, b"abc___");
    }

    #[test]
    fn test_output_too_small() {
        let ds = MemoryDataset::new(
            "ds",
            vec![DataNode::ints("v", AtomicType::Short, vec![DimDecl::new("n", 4)], &[1, 2, 3, 4])],
        );
        let mut remote = MemoryRemote::new(ds).unwrap();
        let schema = remote.schema().clone();
        let tree = fetch_all(&mut remote);
        let var = schema.find("v").unwrap();
        let p = build_vara_projection(&schema, var, &[0], &[4], &[1]).unwrap();
        let mut out = vec![0u8; 4];
        let err = extract(&schema, tree.as_ref(), &p, AtomicType::Short, 0, &mut out).unwrap_err();
        assert!(matches!(err, Error::OutputTooSmall { needed: 8, available: 4 }));
    }

    #[test]
    fn test_virtual_wrapper_is_skipped() {
        let ds = MemoryDataset::new(
            "ds",
            vec![DataNode::Grid {
                name: "sst".into(),
                members: vec![
                    DataNode::floats("sst", AtomicType::Float, vec![DimDecl::new("lat", 2)], &[1.5, 2.5]),
                    DataNode::floats("lat", AtomicType::Double, vec![DimDecl::new("lat", 2)], &[-10.0, 10.0]),
                ],
            }],
        );
        let mut schema = SchemaTree::new("ds");
        let root = schema.root();
        let grid = schema.add_grid(root, "sst");
        schema.add_atomic(grid, "sst", AtomicType::Float, vec![dapfetch_core::Dimension::new("lat", 2)], 0);
        let maps = schema.add_virtual(grid, "maps");
        let lat = schema.add_atomic(maps, "lat", AtomicType::Double, vec![dapfetch_core::Dimension::new("lat", 2)], 0);

        let mut remote = MemoryRemote::with_schema(ds, schema.clone());
        let tree = fetch_all(&mut remote);
        let p = build_vara_projection(&schema, lat, &[1], &[1], &[1]).unwrap();
        let mut out = vec![0u8; 8];
        extract(&schema, tree.as_ref(), &p, AtomicType::Double, 0, &mut out).unwrap();
        assert_eq!(f64::from_ne_bytes(out[..8].try_into().unwrap()), 10.0);
    }

    #[test]
    fn test_missing_field_is_schema_mismatch() {
        let ds = MemoryDataset::new("ds", vec![DataNode::ints("a", AtomicType::Int, vec![], &[1])]);
        let mut schema = SchemaTree::new("ds");
        let root = schema.root();
        let b = schema.add_atomic(root, "b", AtomicType::Int, vec![], 0);
        let mut remote = MemoryRemote::with_schema(ds, schema.clone());
        let tree = fetch_all(&mut remote);
        let p = build_vara_projection(&schema, b, &[], &[], &[]).unwrap();
        let mut out = vec![0u8; 4];
        let err = extract(&schema, tree.as_ref(), &p, AtomicType::Int, 0, &mut out).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }
}
