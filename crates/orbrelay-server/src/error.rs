//! Server-level error types.

use thiserror::Error;

/// Errors that can surface from the running server's components.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration could not be loaded or resolved.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A socket failed outright (bind, accept, read, write). The owning
    /// component shuts down; the Supervisor logs and may exit.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
