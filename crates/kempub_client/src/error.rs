use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("expected {expected}, got {got:?}")]
    UnexpectedKind {
        expected: &'static str,
        got: kempub_protocol::MessageKind,
    },
    #[error(transparent)]
    Protocol(#[from] kempub_protocol::ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
