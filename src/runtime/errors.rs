//! Error types for the graph runtime
//!
//! Two disjoint classes: programmer/usage errors surface as [`GraphError`]
//! results; data-dependent connection outcomes are encoded in the edge state
//! machine and in [`ConnectionResult`], never as errors.

use crossbeam_channel::{RecvError, SendError};

/// Outcome of a dynamic (runtime-checked) connection declaration.
///
/// The dynamic tier is typically driven by untrusted topology descriptions
/// (deserialized graphs), where failure is expected and recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResult {
    Success,
    Failed,
}

/// Error type for port lookups on a block
#[derive(Debug, thiserror::Error)]
pub enum PortLookupError {
    #[error("port '{port}' not found on block '{block}'")]
    NotFound { block: String, port: String },

    #[error("port index {index} out of range on block '{block}'")]
    IndexOutOfRange { block: String, index: usize },

    #[error("sub-index {sub_index} out of range for port collection '{port}' on block '{block}'")]
    SubIndexOutOfRange {
        block: String,
        port: String,
        sub_index: usize,
    },

    #[error("port '{port}' on block '{block}' is a collection; a sub-index is required")]
    MissingSubIndex { block: String, port: String },
}

/// Error type for buffer binding operations on a dynamic port
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("output port has no sized buffer yet")]
    UnsizedWriter,

    #[error("buffer is already bound; its size can only change after a full disconnect")]
    AlreadySized,

    #[error("input port is already bound to an upstream writer")]
    AlreadyBound,

    #[error("port direction does not permit this binding")]
    WrongDirection,
}

/// Programmer/usage errors: referencing names that were never registered,
/// instantiating unknown block types, invalid lifecycle transitions. These
/// indicate a caller defect and propagate instead of being absorbed.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("block '{block}' not found in graph '{graph}'")]
    BlockNotFound { block: String, graph: String },

    #[error(transparent)]
    PortLookup(#[from] PortLookupError),

    #[error("port '{port}' on block '{block}' carries {actual}, not {requested}")]
    PortTypeMismatch {
        block: String,
        port: String,
        actual: String,
        requested: String,
    },

    #[error("cannot construct block of type '{0}'")]
    UnknownBlockType(String),

    #[error("port '{port}' in block '{block}' export status already as desired ({export})")]
    ExportStateUnchanged {
        block: String,
        port: String,
        export: bool,
    },

    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("unknown message endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("malformed message for endpoint '{endpoint}': missing or invalid field '{field}'")]
    MalformedMessage { endpoint: String, field: String },
}

/// Error type for block transform (work) functions
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("failed to receive from input channel: {0}")]
    Recv(#[from] RecvError),

    #[error("failed to send to output channel: {0}")]
    Send(String),

    #[error("block-specific error: {0}")]
    Block(String),

    #[error("shutdown signal received")]
    Shutdown,
}

impl<T> From<SendError<T>> for WorkError {
    fn from(e: SendError<T>) -> Self {
        WorkError::Send(format!("{}", e))
    }
}

/// Result type for block transform functions
pub type WorkResult<T = ()> = Result<T, WorkError>;
