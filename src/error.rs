//! Error types for sigmail

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// An `ERROR|...` response from the server, carrying the
    /// human-readable message after the status token.
    #[error("{0}")]
    Server(String),

    /// A client operation that needs an authenticated user was called
    /// before login.
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
