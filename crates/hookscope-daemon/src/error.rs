//! Error types for the hookscope binary.
//!
//! [`DaemonError`] is the top-level error type that wraps every failure
//! that may stop the process. Only startup and server failures end up
//! here; per-line and per-event problems are logged and skipped.

/// Top-level error for the hookscope binary.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: hookscope_core::ConfigError,
    },

    /// The observer server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: hookscope_observer::ServerError,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {message}")]
    Task {
        /// Which task failed and why.
        message: String,
    },
}
