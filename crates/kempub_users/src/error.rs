use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user '{0}' already exists")]
    AlreadyExists(String),
    #[error("user '{0}' does not exist")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] kempub_persistence::StoreError),
    #[error(transparent)]
    Key(#[from] kempub_protocol::ProtocolError),
}
