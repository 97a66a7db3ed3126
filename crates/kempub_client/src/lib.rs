//! kempub_client
//!
//! The peer side of the two-channel session: a command channel for
//! publish/subscribe/admin calls and a read-only publish channel the
//! broker pushes matching messages down. Used by the demo client and the
//! end-to-end tests; external tooling builds on the same type.

pub mod client;
pub mod error;

pub use client::{Client, ClientOptions};
pub use error::ClientError;
