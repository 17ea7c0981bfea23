/// The master's result type
pub type Result<T> = std::result::Result<T, Error>;

/// The master's error type. Mirrors `cyclone_core::error::Error`'s shape,
/// adding the startup-only kinds a binary needs on top of what the shared
/// library already covers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] cyclone_core::error::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: std::fmt::Display>(msg: S) -> Self {
        Error::Config(msg.to_string())
    }
}
