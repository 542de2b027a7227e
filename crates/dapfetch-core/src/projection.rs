//! Projections, selections and constraints
//!
//! A [`Projection`] names a target variable and carries one [`Segment`] per
//! node on its path below the dataset root (virtual wrappers excluded). It is
//! the unit consumed both by the constraint renderer and by the extraction
//! walker.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::schema::{NodeKind, SchemaNodeId, SchemaProvider};
use crate::slice::{Segment, Slice};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub target: SchemaNodeId,
    pub segments: Vec<Segment>,
}

/// Opaque value-filter clause, forwarded to the server untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub projections: Vec<Projection>,
    pub selections: Vec<Selection>,
}

/// Path nodes that get a segment: everything below the root except virtual wrappers
fn segment_nodes(schema: &dyn SchemaProvider, target: SchemaNodeId) -> Vec<SchemaNodeId> {
    schema
        .resolve_path(target)
        .into_iter()
        .skip(1)
        .filter(|n| !schema.node(*n).is_virtual)
        .collect()
}

impl Projection {
    /// Projection selecting all of `target`
    pub fn make_whole(schema: &dyn SchemaProvider, target: SchemaNodeId) -> Self {
        let segments = segment_nodes(schema, target)
            .into_iter()
            .map(|n| Segment::make_whole_segment(schema, n))
            .collect();
        Self { target, segments }
    }

    pub fn is_whole_projection(&self) -> bool {
        self.segments.iter().all(Segment::is_whole_segment)
    }

    /// Same target, every segment widened to its full range
    pub fn to_whole(&self, schema: &dyn SchemaProvider) -> Self {
        Self::make_whole(schema, self.target)
    }

    /// Drop the string and sequence axes, which the server never sees
    pub fn remove_pseudo_dims(&self, schema: &dyn SchemaProvider) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|seg| {
                let dims = schema.dimensions(seg.node);
                if seg.rank() != dims.len() {
                    return seg.clone();
                }
                let slices = seg
                    .slices
                    .iter()
                    .zip(dims)
                    .filter(|(_, d)| !d.is_pseudo())
                    .map(|(s, _)| *s)
                    .collect();
                Segment::new(seg.node, slices)
            })
            .collect();
        Self {
            target: self.target,
            segments,
        }
    }

    /// Widen this projection to also cover `other` (same target)
    pub fn merge(&mut self, other: &Projection) -> Result<()> {
        if self.target != other.target || self.segments.len() != other.segments.len() {
            return Err(Error::InvalidConstraint(
                "cannot merge projections of different variables".to_string(),
            ));
        }
        for (mine, theirs) in self.segments.iter_mut().zip(&other.segments) {
            mine.merge(theirs);
        }
        Ok(())
    }

    /// Re-address this full-rank projection relative to `window`, the
    /// pseudo-less projection actually sent to the server. Pseudo axes are
    /// kept as-is since the server returns them in full.
    pub fn rebase_onto(&self, schema: &dyn SchemaProvider, window: &Projection) -> Result<Self> {
        let mut segments = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            let window_seg = window
                .segments
                .iter()
                .find(|w| w.node == seg.node)
                .ok_or_else(|| Error::SchemaMismatch(format!("no window segment for {}", schema.node(seg.node).name)))?;
            let dims = schema.dimensions(seg.node);
            let mut window_slices = window_seg.slices.iter();
            let mut slices = Vec::with_capacity(seg.rank());
            for (j, slice) in seg.slices.iter().enumerate() {
                if dims.get(j).map(|d| d.is_pseudo()).unwrap_or(false) {
                    slices.push(*slice);
                    continue;
                }
                let w = window_slices
                    .next()
                    .ok_or_else(|| Error::SchemaMismatch("window rank too small".to_string()))?;
                let rebased = slice.rebase_onto(w).ok_or_else(|| {
                    Error::InvalidConstraint(format!(
                        "fetched window does not cover request on {}",
                        schema.node(seg.node).name
                    ))
                })?;
                slices.push(rebased);
            }
            segments.push(Segment::new(seg.node, slices));
        }
        Ok(Self {
            target: self.target,
            segments,
        })
    }

    /// Segment addressing `node`, if it lies on this projection's path
    pub fn segment_for(&self, node: SchemaNodeId) -> Option<&Segment> {
        self.segments.iter().find(|s| s.node == node)
    }

    /// Total number of elements this projection selects
    pub fn element_count(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.segment_size(0, s.rank()))
            .product()
    }
}

impl Constraint {
    pub fn new(projections: Vec<Projection>, selections: Vec<Selection>) -> Self {
        Self {
            projections,
            selections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty() && self.selections.is_empty()
    }

    /// Whole iff no selections and every projection is whole
    pub fn is_whole_constraint(&self) -> bool {
        self.selections.is_empty() && self.projections.iter().all(Projection::is_whole_projection)
    }
}

/// Build the projection for a `get_vara` request. Coordinates are given for
/// every dimension on the target's path, pseudo dimensions included.
pub fn build_vara_projection(
    schema: &dyn SchemaProvider,
    target: SchemaNodeId,
    start: &[usize],
    count: &[usize],
    stride: &[usize],
) -> Result<Projection> {
    let node = schema.node(target);
    if node.kind != NodeKind::Atomic {
        return Err(Error::NotALeaf(schema.full_name(target)));
    }

    let dims = schema.all_dimensions(target);
    let rank = dims.len();
    if start.len() != rank || count.len() != rank || stride.len() != rank {
        return Err(Error::InvalidConstraint(format!(
            "{} has rank {}, got start/count/stride of length {}/{}/{}",
            schema.full_name(target),
            rank,
            start.len(),
            count.len(),
            stride.len()
        )));
    }

    for (axis, dim) in dims.iter().enumerate() {
        let (s, c, st) = (start[axis], count[axis], stride[axis]);
        let declared = dim.declared_size;
        // Oversized coordinates overflow rather than wrap into range
        let end = s.checked_add(c);
        let last = match c {
            0 => Some(s),
            _ => (c - 1).checked_mul(st).and_then(|span| s.checked_add(span)),
        };
        let in_range = match (end, last) {
            (Some(end), Some(last)) => end <= declared && (c == 0 || last < declared),
            _ => false,
        };
        if st == 0 || s > declared || !in_range {
            return Err(Error::InvalidCoordinates {
                axis,
                start: s,
                count: c,
                stride: st,
                declared,
            });
        }
    }

    let mut axis = 0;
    let mut segments = Vec::new();
    for n in segment_nodes(schema, target) {
        let slices = schema
            .dimensions(n)
            .iter()
            .map(|d| {
                let slice = Slice::from_request(start[axis], count[axis], stride[axis], d.declared_size);
                axis += 1;
                slice
            })
            .collect();
        segments.push(Segment::new(n, slices));
    }

    Ok(Projection { target, segments })
}

/// Restrict `projections` to those relevant to `targets`.
///
/// Projections that neither contain nor are contained by a target are
/// dropped, then any projection whose subtree lies inside another survivor's
/// subtree is dropped. If nothing survives, one whole projection is
/// synthesised per group of targets, coalescing complete sets of siblings
/// into their container.
pub fn restrict_projections(
    schema: &dyn SchemaProvider,
    targets: &[SchemaNodeId],
    projections: &[Projection],
) -> Vec<Projection> {
    let mut kept: Vec<Projection> = projections
        .iter()
        .filter(|p| {
            targets
                .iter()
                .any(|t| schema.is_ancestor(p.target, *t) || schema.is_ancestor(*t, p.target))
        })
        .cloned()
        .collect();

    loop {
        let mut removed = false;
        'outer: for i in 0..kept.len() {
            for j in 0..kept.len() {
                if i != j && schema.is_ancestor(kept[i].target, kept[j].target) {
                    kept.remove(j);
                    removed = true;
                    break 'outer;
                }
            }
        }
        if !removed {
            break;
        }
    }

    if !kept.is_empty() || targets.is_empty() {
        return kept;
    }

    unify_nodes(schema, targets)
        .into_iter()
        .map(|n| Projection::make_whole(schema, n))
        .collect()
}

/// Replace every container whose children are all present by the container
/// itself, repeating until stable.
fn unify_nodes(schema: &dyn SchemaProvider, targets: &[SchemaNodeId]) -> Vec<SchemaNodeId> {
    let mut nodes: BTreeSet<SchemaNodeId> = targets.iter().copied().collect();

    loop {
        let containers: BTreeSet<SchemaNodeId> = nodes
            .iter()
            .filter_map(|n| schema.node(*n).container)
            .collect();
        let complete = containers.into_iter().find(|c| {
            let children = schema.children(*c);
            !children.is_empty() && children.iter().all(|child| nodes.contains(child))
        });
        match complete {
            Some(container) => {
                for child in schema.children(container) {
                    nodes.remove(child);
                }
                nodes.insert(container);
            }
            None => break,
        }
    }

    if nodes.len() == 1 && nodes.contains(&schema.root()) {
        return Vec::new();
    }
    nodes.into_iter().collect()
}
