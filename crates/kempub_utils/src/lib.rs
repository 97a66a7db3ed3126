//! kempub_utils
//!
//! Small shared helpers for the kempub workspace. Currently only logging
//! initialization lives here.

pub mod logging;
