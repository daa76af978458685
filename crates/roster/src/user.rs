//! User and role records.
//!
//! A [`User`] is created once, the first time its username is submitted, and
//! is never updated or deleted afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier assigned by the registry.
    pub id: i64,

    /// Unique identity key. Matching is case-sensitive.
    pub username: String,

    /// Institutional record number ("prontuário"). Free text.
    pub record_number: String,

    /// Contact address, if one was submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Optional reference into the roles table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i64>,

    /// When the registration was committed.
    pub created_at: DateTime<Utc>,
}

/// The fields needed to create a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Unique identity key.
    pub username: String,
    /// Institutional record number.
    pub record_number: String,
    /// Contact address.
    pub email: Option<String>,
}

impl NewUser {
    /// Build a new user from submitted values.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        record_number: impl Into<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            record_number: record_number.into(),
            email,
        }
    }
}

/// A role users may be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Identifier assigned by the registry.
    pub id: i64,
    /// Unique role name.
    pub name: String,
}
