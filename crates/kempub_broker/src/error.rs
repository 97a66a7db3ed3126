use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("client '{0}' is already connected")]
    ClientExists(String),
    #[error("client '{0}' not found")]
    ClientNotFound(String),
    #[error("invalid topic pattern '{0}'")]
    InvalidPattern(String),
}
