use thiserror::Error;

/// Relay processor errors covering configuration, construction, and worker failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelayError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A stats counter name is not known to the shared store.
    #[error("unknown stats counter: {0}")]
    UnknownCounter(String),

    /// The control queue has no consumer or no producers left.
    #[error("control queue closed")]
    QueueClosed,

    /// The scheduler worker thread could not be started.
    #[error("failed to spawn scheduler thread: {0}")]
    ThreadSpawn(String),

    /// The network I/O context failed to initialize.
    #[error("network I/O error: {0}")]
    NetIo(String),

    /// Descriptor readiness polling failed.
    #[error("poll error: {0}")]
    Poll(String),

    /// Real-time scheduling setup for the worker failed.
    #[error("realtime setup error: {0}")]
    Realtime(String),
}

/// Convenience type alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
