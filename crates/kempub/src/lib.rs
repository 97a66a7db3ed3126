//! kempub
//!
//! Application wiring for the broker binary: ordered startup and shutdown
//! of the store, user directory, broker core and transport. The `App` type
//! is public so integration tests can run a full broker on ephemeral
//! addresses.

pub mod app;

pub use app::{App, AppError};
