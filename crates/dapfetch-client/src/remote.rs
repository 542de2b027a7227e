//! Remote data source interface
//!
//! A [`RemoteFetch`] turns a constraint string into a fetched [`DataTree`].
//! The tree is then read through [`DataCursor`]s, which mirror the shape of
//! the response: field lists, arrays of records, sequence record streams and
//! atomic value arrays.

use thiserror::Error;

/// What to ask the server for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    SchemaOnly,
    SchemaAndData,
}

/// Transport and protocol failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Malformed constraint: {0}")]
    Constraint(String),

    #[error("Source does not accept constraints: {0}")]
    Unconstrainable(String),
}

/// Failures while navigating fetched data
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CursorError {
    #[error("no more records")]
    NoMoreRecords,

    #[error("no field at position {0}")]
    NoSuchField(usize),

    #[error("index {index} out of range for {len} elements")]
    OutOfRange { index: usize, len: usize },

    #[error("cursor on {name} is not in {expected} mode")]
    WrongMode { name: String, expected: &'static str },
}

/// How a cursor's children are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Named fields of a structure, grid, dataset or record
    Field,
    /// Elements of an array of records
    Array,
    /// Records of a sequence
    Record,
    /// Values of an atomic variable
    Scalar,
}

impl CursorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorMode::Field => "field",
            CursorMode::Array => "array",
            CursorMode::Record => "record",
            CursorMode::Scalar => "scalar",
        }
    }
}

pub trait DataCursor {
    fn mode(&self) -> CursorMode;

    fn name(&self) -> &str;

    /// Position of the field called `name`, in field mode
    fn field_position(&self, name: &str) -> Option<usize>;

    fn nth_field(&self, index: usize) -> Result<Box<dyn DataCursor + '_>, CursorError>;

    /// Element at a row-major offset, in array mode
    fn nth_element(&self, offset: usize) -> Result<Box<dyn DataCursor + '_>, CursorError>;

    /// Record of a sequence; `NoMoreRecords` once past the last one received
    fn nth_record(&self, index: usize) -> Result<Box<dyn DataCursor + '_>, CursorError>;

    /// Copy `count` values starting at `offset` into `dst`, native-endian,
    /// laid out as the variable's own element type.
    fn read_raw(&self, dst: &mut [u8], offset: usize, count: usize) -> Result<(), CursorError>;

    fn read_string(&self, offset: usize) -> Result<String, CursorError>;
}

/// One fetched response
pub trait DataTree {
    fn root(&self) -> Box<dyn DataCursor + '_>;

    /// Bytes attributed to this response for cache accounting
    fn payload_byte_size(&self) -> usize;
}

pub trait RemoteFetch {
    /// Fetch with an optional constraint expression
    fn fetch(&mut self, constraint: Option<&str>, kind: FetchKind) -> Result<Box<dyn DataTree>, FetchError>;

    /// Whether the server honours constraint expressions
    fn is_constrainable(&self) -> bool {
        true
    }
}

impl From<FetchError> for dapfetch_core::Error {
    fn from(err: FetchError) -> Self {
        dapfetch_core::Error::FetchFailed(err.to_string())
    }
}

impl From<CursorError> for dapfetch_core::Error {
    fn from(err: CursorError) -> Self {
        match err {
            CursorError::NoMoreRecords | CursorError::OutOfRange { .. } => {
                dapfetch_core::Error::ProtocolShortRead(err.to_string())
            }
            CursorError::NoSuchField(_) | CursorError::WrongMode { .. } => {
                dapfetch_core::Error::SchemaMismatch(err.to_string())
            }
        }
    }
}
