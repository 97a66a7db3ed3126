use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("expected {expected} during handshake, got {got}")]
    UnexpectedKind {
        expected: &'static str,
        got: &'static str,
    },
    #[error("user '{0}' not found")]
    UnknownUser(String),
    #[error("user '{0}' has no usable public key")]
    UnusableKey(String),
    #[error("empty client id")]
    EmptyClientId,
    #[error(transparent)]
    Broker(#[from] kempub_broker::BrokerError),
    #[error(transparent)]
    Protocol(#[from] kempub_protocol::ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
