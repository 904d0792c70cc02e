//! Error type shared by the codec, the descriptor pool and the message runtime.

/// Every recoverable failure surfaced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The input bytes are not a valid tag/varint/length-delimited structure,
    /// or a `string` field is not valid UTF-8.
    #[error("malformed input: {0}")]
    Malformed(&'static str),

    #[error("nesting exceeds the recursion limit of {limit}")]
    MaxDepthExceeded { limit: u32 },

    #[error("arena allocation of {size} bytes failed")]
    OutOfMemory { size: usize },

    /// Required fields are unset. Paths use the `a.b`, `rep[0].c`,
    /// `map[key].d` and `(ext.name).e` forms.
    #[error("message {message} is missing required fields: {}", .missing_paths.join(","))]
    MissingRequired {
        message: String,
        missing_paths: Vec<String>,
    },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("field {field} does not track presence")]
    NoPresenceTracking { field: String },

    #[error("no field named {0}")]
    UnknownFieldName(String),

    #[error("no type named {0}")]
    UnknownTypeName(String),

    #[error("dependency {0} is not in the pool")]
    DependencyNotFound(String),

    #[error("attempt to mutate a frozen object")]
    Frozen,

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("extension {extendee}:{number} is already registered with a different descriptor")]
    DuplicateExtension { extendee: String, number: u32 },

    #[error("json: {0}")]
    Json(String),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
