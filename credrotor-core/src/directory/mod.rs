//! Remote directory access.
//!
//! This module provides:
//! - [`DirectoryClient`] - Trait for listing, creating and deleting password
//!   credentials on a registered application
//! - [`DirectoryError`] - Failures of directory calls
//! - [`InMemoryDirectory`] - In-process directory for tests and dry runs
//! - [`GraphDirectoryClient`] - Microsoft Graph implementation (with `graph` feature)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    ApplicationHandle, ApplicationLookup, ClientId, CreatedCredential, CredentialId,
    CredentialRecord,
};
use crate::token::TokenError;

mod memory;
#[cfg(feature = "graph")]
mod graph;

pub use memory::{CallCounts, InMemoryDirectory};
#[cfg(feature = "graph")]
pub use graph::GraphDirectoryClient;

/// Error type for directory operations.
///
/// Every variant is transient from the engine's point of view: the call is
/// retried on the next cycle.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory rejected the caller's credentials.
    #[error("directory rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// The directory answered with an unexpected status.
    #[error("directory returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never completed.
    #[error("directory transport error: {message}")]
    Transport { message: String },

    /// The response could not be understood.
    #[error("invalid directory response: {message}")]
    InvalidResponse { message: String },

    /// The client is misconfigured (e.g. an unparsable endpoint).
    #[error("invalid directory configuration: {message}")]
    InvalidConfig { message: String },

    /// No access token could be obtained for the call.
    #[error("token acquisition failed: {0}")]
    Token(#[from] TokenError),
}

/// Operations the rotation engine needs from the remote directory.
///
/// Authentication for these calls depends on the currently bound secret;
/// implementations must pick up secret swaps on their next call.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Resolve the application registration for `client_id`.
    ///
    /// Doubles as the validation probe: a successful call proves the active
    /// secret works.
    async fn find_application(&self, client_id: &ClientId)
        -> Result<ApplicationLookup, DirectoryError>;

    /// List the password credentials of `app`, in directory order.
    async fn list_credentials(
        &self,
        app: &ApplicationHandle,
    ) -> Result<Vec<CredentialRecord>, DirectoryError>;

    /// Create a password credential valid from `start` to `end`.
    async fn create_credential(
        &self,
        app: &ApplicationHandle,
        display_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CreatedCredential, DirectoryError>;

    /// Remove the password credential `credential_id` from `app`.
    async fn delete_credential(
        &self,
        app: &ApplicationHandle,
        credential_id: &CredentialId,
    ) -> Result<(), DirectoryError>;
}
