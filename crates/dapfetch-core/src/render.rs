//! Constraint expression rendering

use std::fmt::Write;

use crate::projection::{Constraint, Projection};
use crate::schema::SchemaProvider;
use crate::slice::{Segment, Slice};

/// Turns a structured constraint into the text sent to the server
pub trait ConstraintRenderer {
    fn render(&self, schema: &dyn SchemaProvider, constraint: &Constraint) -> String;
}

/// DAP2 constraint syntax: `a.b[0:9],c[2:2:8]&c>1`
#[derive(Debug, Clone, Copy, Default)]
pub struct DapRenderer;

impl DapRenderer {
    fn slice(out: &mut String, slice: &Slice) {
        let last = slice.last().unwrap_or(slice.first);
        // write! into a String cannot fail
        let _ = if slice.count() == 1 {
            write!(out, "[{}]", slice.first)
        } else if slice.stride == 1 {
            write!(out, "[{}:{}]", slice.first, last)
        } else {
            write!(out, "[{}:{}:{}]", slice.first, slice.stride, last)
        };
    }

    fn segment(out: &mut String, schema: &dyn SchemaProvider, segment: &Segment) {
        out.push_str(&schema.node(segment.node).name);
        if !segment.is_whole_segment() {
            for slice in &segment.slices {
                Self::slice(out, slice);
            }
        }
    }

    pub fn projection(schema: &dyn SchemaProvider, projection: &Projection) -> String {
        let mut out = String::new();
        for (i, segment) in projection.segments.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            Self::segment(&mut out, schema, segment);
        }
        out
    }
}

impl ConstraintRenderer for DapRenderer {
    fn render(&self, schema: &dyn SchemaProvider, constraint: &Constraint) -> String {
        let mut out = constraint
            .projections
            .iter()
            .map(|p| Self::projection(schema, p))
            .collect::<Vec<_>>()
            .join(",");
        for selection in &constraint.selections {
            out.push('&');
            out.push_str(&selection.0);
        }
        out
    }
}
