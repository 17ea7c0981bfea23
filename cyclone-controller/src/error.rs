/// The controller's result type
pub type Result<T> = std::result::Result<T, Error>;

/// The controller's error type, mirroring `cyclone_core::error::Error`'s
/// shape with the startup-only kinds a binary needs added on top.
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
