//! Error types for dapfetch-core

use thiserror::Error;

use crate::types::AtomicType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid coordinates on axis {axis}: start={start} count={count} stride={stride}, declared size {declared}")]
    InvalidCoordinates {
        axis: usize,
        start: usize,
        count: usize,
        stride: usize,
        declared: usize,
    },

    #[error("Disallowed conversion: {from} -> {to}")]
    DisallowedConversion { from: AtomicType, to: AtomicType },

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Out of memory: could not allocate {0} bytes")]
    OutOfMemory(usize),

    #[error("Short read from server: {0}")]
    ProtocolShortRead(String),

    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    OutputTooSmall { needed: usize, available: usize },

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Not an atomic variable: {0}")]
    NotALeaf(String),

    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),
}
