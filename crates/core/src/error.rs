/// Result alias that carries the custom [`TrackerError`] type.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Free-form failure surfaced by a collaborator that has no dedicated
    /// variant.
    #[error("{0}")]
    Message(String),
    /// The skeleton middleware could not be brought up. Nothing in the
    /// tracker works without it, so callers are expected to abort.
    #[error("middleware initialization failed: {0}")]
    MiddlewareInit(String),
    /// A single frame could not be read from the middleware.
    #[error("frame read failed: {0}")]
    FrameRead(String),
    /// A shared lock was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration could not be (de)serialised.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for TrackerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TrackerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
