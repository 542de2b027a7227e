//! dapfetch-core: value types and pure algorithms for a DAP data client
//!
//! This crate holds everything that does not talk to a server:
//! - the read-only schema tree and the [`SchemaProvider`] view of it
//! - slice algebra over request windows ([`Slice`], [`Segment`], [`Projection`])
//! - the [`Odometer`] used to enumerate multi-dimensional index tuples
//! - element type conversion
//! - constraint rendering and the connection [`PolicyConfig`]
//!
//! The stateful parts (cache, planner, extraction walker) live in
//! `dapfetch-client`.

mod error;

pub mod config;
pub mod convert;
pub mod odometer;
pub mod projection;
pub mod render;
pub mod schema;
pub mod slice;
pub mod types;

pub use config::PolicyConfig;
pub use error::Error;
pub use odometer::Odometer;
pub use projection::{build_vara_projection, restrict_projections, Constraint, Projection, Selection};
pub use render::{ConstraintRenderer, DapRenderer};
pub use schema::{Dimension, NodeKind, PseudoDim, SchemaNode, SchemaNodeId, SchemaProvider, SchemaTree};
pub use slice::{merge_slice, Segment, Slice};
pub use types::AtomicType;

pub type Result<T> = std::result::Result<T, Error>;
