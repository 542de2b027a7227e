//! In-memory data source
//!
//! Serves a JSON-described dataset the way a DAP server would: constraint
//! expressions select variables and index ranges, and the response arrays are
//! re-addressed from zero. Used by the CLI and by tests, which can count and
//! inspect every request made against it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use dapfetch_core::{AtomicType, Dimension, Odometer, PolicyConfig, SchemaNodeId, SchemaProvider, SchemaTree, Slice};

use crate::remote::{CursorError, CursorMode, DataCursor, DataTree, FetchError, FetchKind, RemoteFetch};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimDecl {
    pub name: String,
    pub size: usize,
}

impl DimDecl {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataNode {
    Atomic {
        name: String,
        #[serde(rename = "type")]
        element_type: AtomicType,
        #[serde(default)]
        shape: Vec<DimDecl>,
        values: Vec<Value>,
    },
    Structure {
        name: String,
        fields: Vec<DataNode>,
    },
    /// Array of records, elements in row-major order
    StructureArray {
        name: String,
        shape: Vec<DimDecl>,
        elements: Vec<Vec<DataNode>>,
    },
    /// Array variable first, then its coordinate maps
    Grid {
        name: String,
        members: Vec<DataNode>,
    },
    /// `fields` describes the record layout; `records` holds the data
    Sequence {
        name: String,
        fields: Vec<DataNode>,
        records: Vec<Vec<DataNode>>,
    },
}

impl DataNode {
    pub fn name(&self) -> &str {
        match self {
            DataNode::Atomic { name, .. }
            | DataNode::Structure { name, .. }
            | DataNode::StructureArray { name, .. }
            | DataNode::Grid { name, .. }
            | DataNode::Sequence { name, .. } => name,
        }
    }

    /// Atomic node with integer values
    pub fn ints(name: &str, element_type: AtomicType, shape: Vec<DimDecl>, values: &[i64]) -> Self {
        DataNode::Atomic {
            name: name.to_string(),
            element_type,
            shape,
            values: values.iter().map(|v| Value::Int(*v)).collect(),
        }
    }

    /// Atomic node with floating point values
    pub fn floats(name: &str, element_type: AtomicType, shape: Vec<DimDecl>, values: &[f64]) -> Self {
        DataNode::Atomic {
            name: name.to_string(),
            element_type,
            shape,
            values: values.iter().map(|v| Value::Float(*v)).collect(),
        }
    }

    /// String node
    pub fn strings(name: &str, shape: Vec<DimDecl>, values: &[&str]) -> Self {
        DataNode::Atomic {
            name: name.to_string(),
            element_type: AtomicType::String,
            shape,
            values: values.iter().map(|v| Value::Text(v.to_string())).collect(),
        }
    }

    fn strip_values(&mut self) {
        match self {
            DataNode::Atomic { values, .. } => values.clear(),
            DataNode::Structure { fields, .. } | DataNode::Grid { members: fields, .. } => {
                fields.iter_mut().for_each(DataNode::strip_values)
            }
            DataNode::StructureArray { elements, .. } => elements
                .iter_mut()
                .flat_map(|e| e.iter_mut())
                .for_each(DataNode::strip_values),
            DataNode::Sequence { fields, records, .. } => {
                records.clear();
                fields.iter_mut().for_each(DataNode::strip_values)
            }
        }
    }
}

/// A whole dataset: a named list of top-level variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDataset {
    pub name: String,
    pub variables: Vec<DataNode>,
}

impl MemoryDataset {
    pub fn new(name: impl Into<String>, variables: Vec<DataNode>) -> Self {
        Self {
            name: name.into(),
            variables,
        }
    }

    /// Load a dataset from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let dataset = serde_json::from_str(&content)?;
        Ok(dataset)
    }

    /// Save the dataset as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Derive the schema tree. String lengths and sequence limits come from
    /// `policy`.
    pub fn schema(&self, policy: &PolicyConfig) -> Result<SchemaTree> {
        let mut tree = SchemaTree::new(self.name.clone());
        let root = tree.root();
        for var in &self.variables {
            add_schema_node(&mut tree, root, "", var, policy)?;
        }
        Ok(tree)
    }
}

fn add_schema_node(
    tree: &mut SchemaTree,
    parent: SchemaNodeId,
    prefix: &str,
    node: &DataNode,
    policy: &PolicyConfig,
) -> Result<()> {
    let full_name = if prefix.is_empty() {
        node.name().to_string()
    } else {
        format!("{}.{}", prefix, node.name())
    };
    let dims = |shape: &[DimDecl]| -> Vec<Dimension> {
        shape.iter().map(|d| Dimension::new(d.name.clone(), d.size)).collect()
    };

    match node {
        DataNode::Atomic {
            name,
            element_type,
            shape,
            values,
        } => {
            let expected: usize = shape.iter().map(|d| d.size).product();
            if values.len() != expected {
                return Err(Error::SchemaMismatch(format!(
                    "{} declares {} values but holds {}",
                    full_name,
                    expected,
                    values.len()
                )));
            }
            tree.add_atomic(
                parent,
                name.clone(),
                *element_type,
                dims(shape),
                policy.string_length_for(&full_name),
            );
        }
        DataNode::Structure { name, fields } => {
            let id = tree.add_structure(parent, name.clone(), Vec::new());
            for field in fields {
                add_schema_node(tree, id, &full_name, field, policy)?;
            }
        }
        DataNode::StructureArray { name, shape, elements } => {
            let expected: usize = shape.iter().map(|d| d.size).product();
            let template = elements
                .first()
                .filter(|_| elements.len() == expected)
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!(
                        "{} declares {} elements but holds {}",
                        full_name,
                        expected,
                        elements.len()
                    ))
                })?;
            let id = tree.add_structure(parent, name.clone(), dims(shape));
            for field in template {
                add_schema_node(tree, id, &full_name, field, policy)?;
            }
        }
        DataNode::Grid { name, members } => {
            let id = tree.add_grid(parent, name.clone());
            for member in members {
                add_schema_node(tree, id, &full_name, member, policy)?;
            }
        }
        DataNode::Sequence { name, fields, .. } => {
            let id = tree.add_sequence(parent, name.clone(), policy.sequence_limit_for(&full_name));
            for field in fields {
                add_schema_node(tree, id, &full_name, field, policy)?;
            }
        }
    }
    Ok(())
}

/// One `name[first:stride:last]...` component of a projection path
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathSegment {
    name: String,
    /// (first, stride, last) per rendered axis
    ranges: Vec<(usize, usize, usize)>,
}

/// Split a constraint expression into projection paths and selection clauses
fn parse_constraint(text: &str) -> std::result::Result<(Vec<Vec<PathSegment>>, Vec<String>), FetchError> {
    let mut parts = text.split('&');
    let projection_text = parts.next().unwrap_or("");
    let selections: Vec<String> = parts.map(str::to_string).collect();

    let mut projections = Vec::new();
    for projection in projection_text.split(',').filter(|p| !p.trim().is_empty()) {
        let path = projection
            .trim()
            .split('.')
            .map(parse_segment)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        projections.push(path);
    }
    Ok((projections, selections))
}

fn parse_segment(text: &str) -> std::result::Result<PathSegment, FetchError> {
    let bad = || FetchError::Constraint(text.to_string());
    let (name, mut rest) = match text.find('[') {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };
    if name.is_empty() {
        return Err(bad());
    }
    let mut ranges = Vec::new();
    while !rest.is_empty() {
        let close = rest.find(']').ok_or_else(bad)?;
        if !rest.starts_with('[') {
            return Err(bad());
        }
        let numbers = rest[1..close]
            .split(':')
            .map(|n| n.trim().parse::<usize>().map_err(|_| bad()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let range = match numbers.as_slice() {
            [i] => (*i, 1, *i),
            [first, last] => (*first, 1, *last),
            [first, stride, last] => (*first, *stride, *last),
            _ => return Err(bad()),
        };
        if range.1 == 0 || range.0 > range.2 {
            return Err(bad());
        }
        ranges.push(range);
        rest = &rest[close + 1..];
    }
    Ok(PathSegment {
        name: name.to_string(),
        ranges,
    })
}

/// Offsets selected by `ranges` over an array of `shape`, plus the new shape
fn select(
    name: &str,
    shape: &[DimDecl],
    ranges: &[(usize, usize, usize)],
) -> std::result::Result<(Vec<usize>, Vec<DimDecl>), FetchError> {
    if ranges.is_empty() {
        let total = shape.iter().map(|d| d.size).product();
        return Ok(((0..total).collect(), shape.to_vec()));
    }
    if ranges.len() != shape.len() {
        return Err(FetchError::Constraint(format!(
            "{} has rank {}, constraint gives {}",
            name,
            shape.len(),
            ranges.len()
        )));
    }
    let mut slices = Vec::with_capacity(shape.len());
    for (dim, &(first, stride, last)) in shape.iter().zip(ranges) {
        if last >= dim.size {
            return Err(FetchError::Constraint(format!(
                "{}: index {} beyond dimension {} of size {}",
                name, last, dim.name, dim.size
            )));
        }
        slices.push(Slice {
            first,
            stride,
            stop: last + 1,
            declared_size: dim.size,
        });
    }
    let new_shape = shape
        .iter()
        .zip(&slices)
        .map(|(d, s)| DimDecl::new(d.name.clone(), s.count()))
        .collect();
    let mut odom = Odometer::new(&slices);
    let mut offsets = Vec::with_capacity(odom.size());
    while odom.has_more() {
        offsets.push(odom.current_offset());
        odom.advance();
    }
    Ok((offsets, new_shape))
}

fn find_field<'a>(fields: &'a [DataNode], name: &str) -> std::result::Result<&'a DataNode, FetchError> {
    fields
        .iter()
        .find(|f| f.name() == name)
        .ok_or_else(|| FetchError::Constraint(format!("no such variable: {}", name)))
}

/// Copy of `node` restricted to the projection path `seg` + `rest`
fn prune(node: &DataNode, seg: &PathSegment, rest: &[PathSegment]) -> std::result::Result<DataNode, FetchError> {
    let no_ranges = |kind: &str| {
        if seg.ranges.is_empty() {
            Ok(())
        } else {
            Err(FetchError::Constraint(format!("{} {} cannot be indexed", kind, seg.name)))
        }
    };
    let descend = |fields: &[DataNode]| -> std::result::Result<Vec<DataNode>, FetchError> {
        match rest.split_first() {
            None => Ok(fields.to_vec()),
            Some((next, tail)) => Ok(vec![prune(find_field(fields, &next.name)?, next, tail)?]),
        }
    };

    match node {
        DataNode::Atomic {
            name,
            element_type,
            shape,
            values,
        } => {
            if !rest.is_empty() {
                return Err(FetchError::Constraint(format!("{} has no fields", name)));
            }
            let (offsets, shape) = select(name, shape, &seg.ranges)?;
            Ok(DataNode::Atomic {
                name: name.clone(),
                element_type: *element_type,
                shape,
                values: offsets.into_iter().map(|i| values[i].clone()).collect(),
            })
        }
        DataNode::Structure { name, fields } => {
            no_ranges("structure")?;
            Ok(DataNode::Structure {
                name: name.clone(),
                fields: descend(fields.as_slice())?,
            })
        }
        DataNode::Grid { name, members } => {
            no_ranges("grid")?;
            Ok(DataNode::Grid {
                name: name.clone(),
                members: descend(members.as_slice())?,
            })
        }
        DataNode::StructureArray { name, shape, elements } => {
            let (offsets, shape) = select(name, shape, &seg.ranges)?;
            let elements = offsets
                .into_iter()
                .map(|i| descend(elements[i].as_slice()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(DataNode::StructureArray {
                name: name.clone(),
                shape,
                elements,
            })
        }
        DataNode::Sequence { name, fields, records } => {
            no_ranges("sequence")?;
            Ok(DataNode::Sequence {
                name: name.clone(),
                fields: descend(fields.as_slice())?,
                records: records
                    .iter()
                    .map(|r| descend(r.as_slice()))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            })
        }
    }
}

fn merge_fields(into: &mut Vec<DataNode>, from: Vec<DataNode>) -> std::result::Result<(), FetchError> {
    for node in from {
        match into.iter_mut().find(|n| n.name() == node.name()) {
            Some(existing) => merge_node(existing, node)?,
            None => into.push(node),
        }
    }
    Ok(())
}

fn conflict(name: &str) -> FetchError {
    FetchError::Constraint(format!("conflicting projections of {}", name))
}

fn merge_node(into: &mut DataNode, from: DataNode) -> std::result::Result<(), FetchError> {
    match (into, from) {
        (DataNode::Structure { fields: a, .. }, DataNode::Structure { fields: b, .. })
        | (DataNode::Grid { members: a, .. }, DataNode::Grid { members: b, .. }) => merge_fields(a, b),
        (
            DataNode::StructureArray { name, elements: a, .. },
            DataNode::StructureArray { elements: b, .. },
        ) => {
            if a.len() != b.len() {
                return Err(conflict(name));
            }
            for (ea, eb) in a.iter_mut().zip(b) {
                merge_fields(ea, eb)?;
            }
            Ok(())
        }
        (
            DataNode::Sequence {
                name,
                fields: fa,
                records: ra,
            },
            DataNode::Sequence {
                fields: fb,
                records: rb,
                ..
            },
        ) => {
            if ra.len() != rb.len() {
                return Err(conflict(name));
            }
            merge_fields(fa, fb)?;
            for (a, b) in ra.iter_mut().zip(rb) {
                merge_fields(a, b)?;
            }
            Ok(())
        }
        (a, b) => {
            if *a == b {
                Ok(())
            } else {
                Err(conflict(a.name()))
            }
        }
    }
}

/// One response from a [`MemoryRemote`]
#[derive(Debug, Clone)]
pub struct MemoryTree {
    name: String,
    fields: Vec<DataNode>,
    size: usize,
}

impl MemoryTree {
    fn new(name: String, fields: Vec<DataNode>) -> std::result::Result<Self, FetchError> {
        let size = bincode::serialized_size(&fields)
            .map_err(|e| FetchError::Transport(format!("cannot size response: {}", e)))? as usize;
        Ok(Self { name, fields, size })
    }
}

impl DataTree for MemoryTree {
    fn root(&self) -> Box<dyn DataCursor + '_> {
        Box::new(MemoryCursor::Fields {
            name: &self.name,
            fields: &self.fields,
        })
    }

    fn payload_byte_size(&self) -> usize {
        self.size
    }
}

enum MemoryCursor<'a> {
    Fields {
        name: &'a str,
        fields: &'a [DataNode],
    },
    Array {
        name: &'a str,
        elements: &'a [Vec<DataNode>],
    },
    Records {
        name: &'a str,
        records: &'a [Vec<DataNode>],
    },
    Values {
        name: &'a str,
        element_type: AtomicType,
        values: &'a [Value],
    },
}

impl<'a> MemoryCursor<'a> {
    fn over(node: &'a DataNode) -> Self {
        match node {
            DataNode::Atomic {
                name,
                element_type,
                values,
                ..
            } => MemoryCursor::Values {
                name,
                element_type: *element_type,
                values,
            },
            DataNode::Structure { name, fields } => MemoryCursor::Fields { name, fields },
            DataNode::Grid { name, members } => MemoryCursor::Fields { name, fields: members },
            DataNode::StructureArray { name, elements, .. } => MemoryCursor::Array { name, elements },
            DataNode::Sequence { name, records, .. } => MemoryCursor::Records { name, records },
        }
    }

    fn wrong_mode(&self, expected: CursorMode) -> CursorError {
        CursorError::WrongMode {
            name: self.name().to_string(),
            expected: expected.as_str(),
        }
    }
}

macro_rules! put {
    ($out:expr, $ty:expr, $v:expr) => {
        match $ty {
            AtomicType::Byte => $out.copy_from_slice(&($v as i8).to_ne_bytes()),
            AtomicType::Char | AtomicType::UByte | AtomicType::String | AtomicType::Url => {
                $out.copy_from_slice(&($v as u8).to_ne_bytes())
            }
            AtomicType::Short => $out.copy_from_slice(&($v as i16).to_ne_bytes()),
            AtomicType::UShort => $out.copy_from_slice(&($v as u16).to_ne_bytes()),
            AtomicType::Int => $out.copy_from_slice(&($v as i32).to_ne_bytes()),
            AtomicType::UInt => $out.copy_from_slice(&($v as u32).to_ne_bytes()),
            AtomicType::Int64 => $out.copy_from_slice(&($v as i64).to_ne_bytes()),
            AtomicType::UInt64 => $out.copy_from_slice(&($v as u64).to_ne_bytes()),
            AtomicType::Float => $out.copy_from_slice(&($v as f32).to_ne_bytes()),
            AtomicType::Double => $out.copy_from_slice(&($v as f64).to_ne_bytes()),
        }
    };
}

fn encode_value(ty: AtomicType, value: &Value, out: &mut [u8]) {
    match value {
        Value::Int(v) => put!(out, ty, *v),
        Value::Float(v) => put!(out, ty, *v),
        Value::Text(s) => {
            let first = s.bytes().next().unwrap_or(0);
            put!(out, ty, first)
        }
    }
}

impl<'a> DataCursor for MemoryCursor<'a> {
    fn mode(&self) -> CursorMode {
        match self {
            MemoryCursor::Fields { .. } => CursorMode::Field,
            MemoryCursor::Array { .. } => CursorMode::Array,
            MemoryCursor::Records { .. } => CursorMode::Record,
            MemoryCursor::Values { .. } => CursorMode::Scalar,
        }
    }

    fn name(&self) -> &str {
        match self {
            MemoryCursor::Fields { name, .. }
            | MemoryCursor::Array { name, .. }
            | MemoryCursor::Records { name, .. }
            | MemoryCursor::Values { name, .. } => name,
        }
    }

    fn field_position(&self, name: &str) -> Option<usize> {
        match self {
            MemoryCursor::Fields { fields, .. } => fields.iter().position(|f| f.name() == name),
            _ => None,
        }
    }

    fn nth_field(&self, index: usize) -> std::result::Result<Box<dyn DataCursor + '_>, CursorError> {
        match self {
            MemoryCursor::Fields { fields, .. } => fields
                .get(index)
                .map(|f| Box::new(MemoryCursor::over(f)) as Box<dyn DataCursor + '_>)
                .ok_or(CursorError::NoSuchField(index)),
            _ => Err(self.wrong_mode(CursorMode::Field)),
        }
    }

    fn nth_element(&self, offset: usize) -> std::result::Result<Box<dyn DataCursor + '_>, CursorError> {
        match self {
            MemoryCursor::Array { name, elements } => elements
                .get(offset)
                .map(|e| Box::new(MemoryCursor::Fields { name, fields: e }) as Box<dyn DataCursor + '_>)
                .ok_or(CursorError::OutOfRange {
                    index: offset,
                    len: elements.len(),
                }),
            _ => Err(self.wrong_mode(CursorMode::Array)),
        }
    }

    fn nth_record(&self, index: usize) -> std::result::Result<Box<dyn DataCursor + '_>, CursorError> {
        match self {
            MemoryCursor::Records { name, records } => records
                .get(index)
                .map(|r| Box::new(MemoryCursor::Fields { name, fields: r }) as Box<dyn DataCursor + '_>)
                .ok_or(CursorError::NoMoreRecords),
            _ => Err(self.wrong_mode(CursorMode::Record)),
        }
    }

    fn read_raw(&self, dst: &mut [u8], offset: usize, count: usize) -> std::result::Result<(), CursorError> {
        let MemoryCursor::Values {
            element_type,
            values,
            ..
        } = self
        else {
            return Err(self.wrong_mode(CursorMode::Scalar));
        };
        let width = element_type.size_of();
        if offset + count > values.len() {
            return Err(CursorError::OutOfRange {
                index: offset + count,
                len: values.len(),
            });
        }
        if dst.len() < count * width {
            return Err(CursorError::OutOfRange {
                index: count * width,
                len: dst.len(),
            });
        }
        for (i, value) in values[offset..offset + count].iter().enumerate() {
            encode_value(*element_type, value, &mut dst[i * width..(i + 1) * width]);
        }
        Ok(())
    }

    fn read_string(&self, offset: usize) -> std::result::Result<String, CursorError> {
        let MemoryCursor::Values { values, .. } = self else {
            return Err(self.wrong_mode(CursorMode::Scalar));
        };
        match values.get(offset) {
            Some(Value::Text(s)) => Ok(s.clone()),
            Some(Value::Int(v)) => Ok(v.to_string()),
            Some(Value::Float(v)) => Ok(v.to_string()),
            None => Err(CursorError::OutOfRange {
                index: offset,
                len: values.len(),
            }),
        }
    }
}

/// A [`RemoteFetch`] serving a [`MemoryDataset`]
#[derive(Debug)]
pub struct MemoryRemote {
    dataset: MemoryDataset,
    schema: SchemaTree,
    constrainable: bool,
    requests: Vec<Option<String>>,
    fail_next: Option<String>,
}

impl MemoryRemote {
    /// Serve `dataset` with a schema derived under default policy
    pub fn new(dataset: MemoryDataset) -> Result<Self> {
        Self::with_policy(dataset, &PolicyConfig::default())
    }

    pub fn with_policy(dataset: MemoryDataset, policy: &PolicyConfig) -> Result<Self> {
        let schema = dataset.schema(policy)?;
        Ok(Self::with_schema(dataset, schema))
    }

    /// Serve `dataset` but advertise a caller-built schema
    pub fn with_schema(dataset: MemoryDataset, schema: SchemaTree) -> Self {
        Self {
            dataset,
            schema,
            constrainable: true,
            requests: Vec::new(),
            fail_next: None,
        }
    }

    /// Reject every constraint, as some older servers do
    pub fn unconstrainable(mut self) -> Self {
        self.constrainable = false;
        self
    }

    pub fn schema(&self) -> &SchemaTree {
        &self.schema
    }

    pub fn dataset(&self) -> &MemoryDataset {
        &self.dataset
    }

    /// Number of fetches served so far, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.requests.len()
    }

    /// Constraint strings received, in order
    pub fn requests(&self) -> &[Option<String>] {
        &self.requests
    }

    /// Make the next fetch fail with a transport error
    pub fn fail_next(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    fn respond(&self, constraint: Option<&str>) -> std::result::Result<Vec<DataNode>, FetchError> {
        let text = constraint.unwrap_or("").trim();
        let (projections, selections) = parse_constraint(text)?;
        if !selections.is_empty() {
            tracing::debug!(count = selections.len(), "Selections are not evaluated");
        }
        if projections.is_empty() {
            return Ok(self.dataset.variables.clone());
        }
        let mut fields = Vec::new();
        for path in projections {
            if let Some((first, rest)) = path.split_first() {
                let node = find_field(&self.dataset.variables, &first.name)?;
                merge_fields(&mut fields, vec![prune(node, first, rest)?])?;
            }
        }
        Ok(fields)
    }
}

impl RemoteFetch for MemoryRemote {
    fn fetch(&mut self, constraint: Option<&str>, kind: FetchKind) -> std::result::Result<Box<dyn DataTree>, FetchError> {
        self.requests.push(constraint.map(str::to_string));
        if let Some(message) = self.fail_next.take() {
            return Err(FetchError::Transport(message));
        }
        if !self.constrainable {
            if let Some(text) = constraint.filter(|c| !c.is_empty()) {
                return Err(FetchError::Unconstrainable(text.to_string()));
            }
        }

        let mut fields = self.respond(constraint)?;
        if kind == FetchKind::SchemaOnly {
            fields.iter_mut().for_each(DataNode::strip_values);
        }
        let tree = MemoryTree::new(self.dataset.name.clone(), fields)?;
        tracing::debug!(
            constraint = constraint.unwrap_or(""),
            bytes = tree.payload_byte_size(),
            "Served in-memory fetch"
        );
        Ok(Box::new(tree))
    }

    fn is_constrainable(&self) -> bool {
        self.constrainable
    }
}
