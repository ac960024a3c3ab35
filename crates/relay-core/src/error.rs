use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Missing API key for provider: {0}")]
    MissingApiKey(String),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

/// Failures of a document mutation. Validation, range and invariant errors
/// are recoverable: they go back to the agent as an `isError` tool result.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Section index {index} out of range (valid: {valid})")]
    Range { index: usize, valid: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Document update not delivered: {0}")]
    Transport(#[from] TransportError),
}

impl DocumentError {
    /// True for errors the agent can fix by retrying with other arguments.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("stream already ended")]
    Ended,

    #[error("write failed: {0}")]
    Io(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Client-side failures while reading a wire stream. Distinct from an
/// `error` wire event, which is a well-formed signal from the source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("too many malformed frames ({count}, budget {budget})")]
    TooManyMalformedFrames { count: usize, budget: usize },

    #[error("stream read failed: {0}")]
    Read(String),

    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    File(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Rejections raised before any wire event is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("working directory not found: {0}")]
    WorkingDir(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("no API key configured")]
    MissingApiKey,
}
