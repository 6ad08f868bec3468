//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Service control error: {0}")]
    Service(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Property error: {0}")]
    Property(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A sideload session is already in progress")]
    SessionBusy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
