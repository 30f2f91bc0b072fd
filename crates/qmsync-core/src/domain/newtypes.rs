//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for table names, user
//! identifiers and the composite key that namespaces every persisted value.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// Maximum accepted length of a table name
const MAX_TABLE_NAME_LEN: usize = 64;

/// Maximum accepted length of a user id
const MAX_USER_ID_LEN: usize = 128;

// ============================================================================
// TableName
// ============================================================================

/// Name of a logical table (e.g. "documents", "membres", "exigences")
///
/// Format: 1-64 characters, ASCII alphanumerics, `-` or `_`. The name is
/// also used to build endpoint paths and the JSON key of pushed payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Create a new TableName
    ///
    /// # Errors
    /// Returns error if the name is empty, too long or has invalid characters
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::InvalidTableName(
                "Table name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_TABLE_NAME_LEN {
            return Err(DomainError::InvalidTableName(format!(
                "Table name exceeds {MAX_TABLE_NAME_LEN} characters: {name}"
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidTableName(format!(
                "Table name contains invalid characters: {name}"
            )));
        }

        Ok(Self(name))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<TableName> for String {
    fn from(name: TableName) -> Self {
        name.0
    }
}

// ============================================================================
// UserId
// ============================================================================

/// Identifier of the user owning a local copy of a table
///
/// Opaque to the engine; it only has to be non-empty, reasonably short and
/// free of whitespace and control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId
    ///
    /// # Errors
    /// Returns error if the id is empty, too long or contains whitespace
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidUserId(
                "User id cannot be empty".to_string(),
            ));
        }

        if id.len() > MAX_USER_ID_LEN {
            return Err(DomainError::InvalidUserId(format!(
                "User id exceeds {MAX_USER_ID_LEN} characters"
            )));
        }

        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::InvalidUserId(format!(
                "User id contains whitespace or control characters: {id:?}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

// ============================================================================
// TableKey
// ============================================================================

/// Composite key identifying one local copy: a table scoped by a user
///
/// Every persisted value, every sync guard and every diagnostics entry is
/// keyed by a `TableKey`, so tables of different users never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    table: TableName,
    user: UserId,
}

impl TableKey {
    /// Create a key from already validated parts
    #[must_use]
    pub fn new(table: TableName, user: UserId) -> Self {
        Self { table, user }
    }

    /// Validate and build a key from raw strings
    ///
    /// # Errors
    /// Returns error if either part fails validation
    pub fn parse(table: &str, user: &str) -> Result<Self, DomainError> {
        Ok(Self::new(TableName::new(table)?, UserId::new(user)?))
    }

    /// The table part of the key
    #[must_use]
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// The user part of the key
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Flat `table_user` form used in logs and diagnostics output
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}_{}", self.table, self.user)
    }
}

impl Display for TableKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.table, self.user)
    }
}

// ============================================================================
// ContextId
// ============================================================================

/// Identifier of one running engine instance (a "browsing context")
///
/// Used to tag change notices so a context can ignore its own markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random ContextId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a ContextId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContextId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid UUID: {e}")))
    }
}
