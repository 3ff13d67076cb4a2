//! Shared types for the Kobold proxy workspace
//!
//! `Secret` keeps provider keys out of logs and debug output; `Error` is the
//! configuration-loading error shared by the binary and its tests.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
