//! kempub_broker
//!
//! The central broker: the table of live clients, the subscription side
//! table, the topic index and the retained-message cache, plus the
//! pattern-matched fan-out that connects them.
//!
//! The public API is synchronous apart from `publish`, which may briefly
//! suspend while handing a persistent message to the store's bounded add
//! channel. All state lives behind one reader/writer lock that is never
//! held across I/O.

pub mod client;
pub mod engine;
pub mod error;
pub mod topic;

pub use client::ClientHandle;
pub use engine::{Broker, Subscription};
pub use error::BrokerError;
pub use topic::{topic_matches, TopicRecord};
