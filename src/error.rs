//! Error types for the agent core.

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the agent core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Argument Errors
    // =========================================================================
    /// Required container id missing from the request.
    #[error("no id provided")]
    NoId,

    /// Required image ref missing from the request.
    #[error("no ref provided")]
    NoRef,

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    /// No peer carries the master label.
    #[error("unable to find master in cluster")]
    NoMaster,

    /// Migration target already hosts the container.
    #[error("service {0} exists on target")]
    ServiceExistsOnTarget(String),

    // =========================================================================
    // Container Errors
    // =========================================================================
    /// Create on an existing id without `update`.
    #[error("container {0} already exists")]
    AlreadyExists(String),

    /// Unknown container or image.
    #[error("not found: {0}")]
    NotFound(String),

    /// Container extension does not decode to a known config.
    #[error("old config format on container {0}")]
    OldConfigFormat(String),

    // =========================================================================
    // Checkpoint Errors
    // =========================================================================
    /// Expected descriptor missing from a checkpoint index.
    #[error("media type {0} not found in index")]
    MediaTypeNotFound(String),

    // =========================================================================
    // Wrapped Lower Layers
    // =========================================================================
    /// Replicated store I/O failed.
    #[error("store: {0}")]
    Store(#[from] redis::RedisError),

    /// RPC channel to a peer agent failed.
    #[error("{op}: {reason}")]
    Transport { op: String, reason: String },

    /// Container runtime call failed.
    #[error("{op}: {reason}")]
    Runtime { op: String, reason: String },

    /// Filesystem I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Node configuration invalid or unreadable.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Wraps a runtime-layer failure, annotated with the operation name.
    pub fn runtime(op: impl Into<String>, err: impl ToString) -> Self {
        Self::Runtime {
            op: op.into(),
            reason: err.to_string(),
        }
    }

    /// Wraps a transport-layer failure, annotated with the operation name.
    pub fn transport(op: impl Into<String>, err: impl ToString) -> Self {
        Self::Transport {
            op: op.into(),
            reason: err.to_string(),
        }
    }

    /// True when the error is a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
