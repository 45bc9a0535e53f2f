//! Domain result type

use super::error::PhoneError;

/// Standard result type for phone operations
pub type Result<T> = std::result::Result<T, PhoneError>;
