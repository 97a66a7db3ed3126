//! kempub_protocol
//!
//! Wire-level building blocks shared by the broker and its clients:
//!
//! - `codec`: the framed binary message format (`Message`, `MessageKind`,
//!   `Properties`) and async send/receive over any byte stream
//! - `cipher`: the three cipher stages a connection moves through
//!   (pass-through, KEM handshake, symmetric session)
//! - `keys`: Kyber768 key pairs and their PEM representation
//! - `net`: tcp/unix stream and listener wrappers so both socket families
//!   share one surface

pub mod cipher;
pub mod codec;
pub mod error;
pub mod keys;
pub mod net;

pub use cipher::{Cipher, KemCipher, PlainCipher, SessionCipher};
pub use codec::{receive, Message, MessageKind, Properties};
pub use error::ProtocolError;
pub use keys::{KyberPrivateKey, KyberPublicKey};

#[cfg(test)]
mod tests;
