//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! mostly validation failures of identifiers.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid table name
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// Invalid user identifier
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
