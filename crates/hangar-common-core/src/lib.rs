//! Hangar common core types and utilities.

pub mod error;
pub mod timestamp;

pub use error::{Error, ErrorCategory, ErrorCode, Result};
pub use timestamp::Timestamp;
