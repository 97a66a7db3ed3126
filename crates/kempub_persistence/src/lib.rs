//! kempub_persistence
//!
//! Durable storage for user records and retained/persistent messages,
//! backed by a single embedded sled database with two trees. Message
//! writes are funneled through bounded channels into an in-memory cache
//! and flushed as one atomic batch on a timer; user writes are synchronous.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{Store, StoredMessage, StoredUser};

#[cfg(test)]
mod tests;
