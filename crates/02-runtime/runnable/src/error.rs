use thiserror::Error;

/// Convenience result alias for runnable lifecycle operations.
pub type RunnableResult<T> = Result<T, RunnableError>;

/// Errors surfaced while starting a runnable.
#[derive(Debug, Error)]
pub enum RunnableError {
    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        /// Name of the runnable whose thread failed to spawn.
        name: String,
        /// Underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
}
