//! # Codehive Core
//!
//! Configuration, the shared error type, and the operation catalogue used
//! by the tracking and queue crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::CodehiveConfig;
pub use error::{CodehiveError, Result};
pub use types::{Operation, TrackableType};
