//! Domain model types for credrotor.
//!
//! This module defines the core types used throughout credrotor:
//! - [`TenantId`] - Identifier of the directory tenant
//! - [`ClientId`] - Application (client) id of the registered application
//! - [`CredentialId`] - Directory-assigned key id of a password credential
//! - [`CredentialRecord`] - Read-only copy of a password credential
//! - [`ApplicationHandle`] - A resolved application registration
//! - [`ApplicationLookup`] - Outcome of resolving a client id
//! - [`CreatedCredential`] - A freshly created credential and its secret value

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::store::Secret;

/// Identifier for a directory tenant.
///
/// The tenant id doubles as the key of the locally cached secret.
///
/// # Examples
///
/// ```
/// use credrotor_core::TenantId;
///
/// let tenant = TenantId::new("52f884f5-dd61-4b1e-9f6a-81eb9ca2c89a");
/// assert_eq!(tenant.as_str(), "52f884f5-dd61-4b1e-9f6a-81eb9ca2c89a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Application (client) id of a registered application.
///
/// This is the `appId` of the registration, not its directory object id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Create a new client ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the client ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Directory-assigned identifier of a password credential.
///
/// This is the only key used for credential identity; display names are
/// informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(Uuid);

impl CredentialId {
    /// Wrap a directory key id.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random id. Used by in-memory directories.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A password credential registered on an application.
///
/// Owned by the directory service; the engine only holds transient copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Directory-assigned key id.
    pub id: CredentialId,

    /// Human-readable name. Empty when the directory has none.
    pub display_name: String,

    /// Start of the validity window.
    pub start_time: Option<DateTime<Utc>>,

    /// End of the validity window (`None` for non-expiring credentials).
    pub end_time: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Create a new credential record.
    pub fn new(
        id: CredentialId,
        display_name: impl Into<String>,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            start_time,
            end_time,
        }
    }

    /// Whether the credential ended strictly before `now`.
    ///
    /// Credentials without an end time never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time.map(|end| end < now).unwrap_or(false)
    }

    /// Time left until the credential ends, relative to `now`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - now)
    }
}

/// A resolved application registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationHandle {
    /// Directory object id, used to address the application in write calls.
    pub object_id: String,

    /// Application (client) id.
    pub client_id: ClientId,

    /// Display name of the registration, if any.
    pub display_name: Option<String>,
}

/// Outcome of resolving a configured client id against the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationLookup {
    /// Exactly one application matched.
    Found(ApplicationHandle),

    /// No application has this client id.
    NotFound,

    /// More than one application claims this client id.
    Ambiguous { matches: usize },
}

/// A credential returned by a successful creation call.
///
/// The secret value is only ever visible in this response.
#[derive(Debug, Clone)]
pub struct CreatedCredential {
    /// The new credential's record.
    pub record: CredentialRecord,

    /// The secret value of the new credential.
    pub secret: Secret,
}
