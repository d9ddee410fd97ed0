/*!
 * Error types for the devrelay core.
 *
 * Display strings double as the on-wire `ErrorMessage` field, so the
 * protocol-facing variants render the bare message without a prefix.
 */
use thiserror::Error;

/// Error type for devrelay operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A device or scanning operation failed
    #[error("{0}")]
    Device(String),

    /// The inbound message is of a kind this core does not handle
    #[error("{0}")]
    Message(String),

    /// The addressed device index is not in the registry
    #[error("unknown device index {0}")]
    UnknownDevice(u32),

    /// The device call was cancelled before completing
    #[error("operation was cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Runtime error (logging setup, task plumbing)
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type for devrelay operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new device error
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Error::Device(msg.into())
    }

    /// Create a new message error
    pub fn message<S: Into<String>>(msg: S) -> Self {
        Error::Message(msg.into())
    }

    /// Create a new unknown-device error
    pub fn unknown_device(index: u32) -> Self {
        Error::UnknownDevice(index)
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new runtime error
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        Error::Runtime(msg.into())
    }
}
