use std::path::PathBuf;

/// Errors raised while editing graphs or generating code.
///
/// The messages are the rejection messages shown to the user, so they are kept short.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot find graph {0}")]
    GraphNotFound(String),
    #[error("{0} not found")]
    BlockNotFound(String),
    #[error("block id {0} duplicated")]
    DuplicateBlock(String),
    #[error("cannot find slot {0}")]
    SlotNotFound(String),
    #[error("malformed edge endpoint {0:?}")]
    MalformedEndpoint(String),
    #[error("type mismatch: {from} cannot feed {to}")]
    TypeMismatch { from: String, to: String },
    #[error("argument {value:?} rejected by {target}")]
    ArgumentRejected { target: String, value: String },
    #[error("block {0} doesn't accept edges")]
    NotAcceptingEdges(String),
    #[error("slot {0} has no incoming edge")]
    NoIncomingEdge(String),
    #[error("edges must be removed in reverse order of adding them")]
    EdgeOrder,
    #[error("please delete out-degree edges of {0} first")]
    HasOutgoingEdges(String),
    #[error("output {slot} of {block} is out of range")]
    SlotOutOfRange { block: String, slot: String },
    #[error("cannot find submodule {0}")]
    ModuleNotFound(String),
    #[error("cannot find class/function {name} in {module}")]
    SymbolNotFound { module: String, name: String },
    #[error("invalid type annotation {annotation}: {reason}")]
    InvalidAnnotation { annotation: String, reason: String },
    #[error("Detects rings in the graph")]
    Cycle,
    #[error("Node {0} does not have enough arguments")]
    MissingArguments(String),
    #[error("{what} not ready")]
    NotReady {
        what: String,
        #[source]
        cause: Option<Box<Error>>,
    },
    #[error("{0}")]
    Validation(String),
    #[error("dataset {0} not found")]
    DatasetNotFound(String),
    #[error("{0}")]
    InvalidUdb(String),
    #[error("parse error in {module} at line {line}: {reason}")]
    Parse {
        module: String,
        line: usize,
        reason: String,
    },
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
