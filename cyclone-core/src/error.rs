/// The crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// The crate error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// malformed wire message; the caller still owes a reply
    #[error("decode error: {0}")]
    Decode(String),
    /// undefined dispatch state or an unknown `tid` on `TASK_FINISHED`
    #[error("inconsistency: {0}")]
    Inconsistency(String),
    /// send/receive failure on a comm endpoint
    #[error("transport error: {0}")]
    Transport(String),
    /// the queue is full and the value can not be pushed
    #[error("queue full")]
    QueueFull,
    /// lock/receive attempt timed out
    #[error("timed out")]
    Timeout,
    /// all senders or receivers of a queue/endpoint are gone
    #[error("closed")]
    Closed,
    /// standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// PID file already locked by another instance, or bind failed
    #[error("resource acquisition failed: {0}")]
    ResourceAcquisition(String),
    /// missing/invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Creates a new decode error
    pub fn decode<S: std::fmt::Display>(msg: S) -> Self {
        Error::Decode(msg.to_string())
    }
    /// Creates a new inconsistency error
    pub fn inconsistency<S: std::fmt::Display>(msg: S) -> Self {
        Error::Inconsistency(msg.to_string())
    }
    /// Creates a new transport error
    pub fn transport<S: std::fmt::Display>(msg: S) -> Self {
        Error::Transport(msg.to_string())
    }
    /// Creates a new config error
    pub fn config<S: std::fmt::Display>(msg: S) -> Self {
        Error::Config(msg.to_string())
    }
    /// Creates a new resource acquisition error
    pub fn resource<S: std::fmt::Display>(msg: S) -> Self {
        Error::ResourceAcquisition(msg.to_string())
    }
    /// True if the error is a timeout (lock contention, poll-timeout, ...)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
