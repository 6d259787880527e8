//! Container runtime errors.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot reach container runtime: {0}")]
    Connect(String),

    #[error("runtime transport error: {0}")]
    Http(String),

    #[error("no such container or object: {0}")]
    NotFound(String),

    #[error("runtime API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode runtime response: {0}")]
    Decode(String),
}
