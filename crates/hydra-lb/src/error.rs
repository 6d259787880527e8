//! Load-balancer control errors.

use thiserror::Error;

pub type LbResult<T> = Result<T, LbError>;

#[derive(Debug, Error)]
pub enum LbError {
    /// Connection failure, broken socket, or a response that is not text.
    #[error("load balancer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Naming(#[from] hydra_core::NamingError),
}
