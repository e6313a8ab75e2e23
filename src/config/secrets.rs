//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the store URL.

pub use secrecy::{ExposeSecret, SecretString};
