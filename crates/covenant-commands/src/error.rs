/// Errors raised while building a [`CommandRegistry`](crate::CommandRegistry).
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A command was declared without a trigger.
    #[error("command trigger must not be empty")]
    EmptyTrigger,

    /// A trigger or alias contains whitespace and could never match.
    #[error("invalid trigger or alias {0:?}: must be a single word")]
    InvalidTrigger(String),

    /// `min_args` is greater than `max_args`.
    #[error("command {trigger:?} requires at least {min} arguments but accepts at most {max}")]
    InvalidArgBounds {
        trigger: String,
        min: usize,
        max: usize,
    },
}

/// Errors a [`ChatSink`](crate::ChatSink) reports when it can't deliver.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// There is currently no way to reach the platform.
    #[error("chat sink unavailable")]
    Unavailable,

    /// Delivery was attempted and failed.
    #[error("chat sink failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}
