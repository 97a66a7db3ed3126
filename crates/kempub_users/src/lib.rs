//! kempub_users
//!
//! The in-memory user directory: name -> public key + admin flag, loaded
//! from the persistence store at startup and mutated by administrative
//! commands.

pub mod directory;
pub mod error;

pub use directory::{User, UserDirectory};
pub use error::UserError;
