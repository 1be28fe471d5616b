//! # credrotor Core
//!
//! Core library for rotating the password credentials of a registered
//! directory application.
//!
//! This crate provides:
//! - Domain types for tenants, applications, and credentials
//! - Traits for secret storage, directory access, and token acquisition
//! - File, in-memory and (optionally) keyring-based secret stores
//! - The [`RotationEngine`] control loop and its pure [`selector`]
//! - A Microsoft Graph directory client (with the `graph` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use credrotor_core::{config, Services};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn rotate_forever(path: &std::path::Path) -> Result<(), credrotor_core::CredrotorError> {
//!     let services = Services::from_config(config::load_from_path(path)?)?;
//!     let mut engine = services.engine();
//!     engine.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod model;
pub mod store;
pub mod selector;
pub mod binding;
pub mod token;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;

#[cfg(feature = "graph")]
pub mod token_provider;

#[cfg(feature = "graph")]
pub mod services;

// Re-export commonly used types at crate root
pub use model::{
    TenantId,
    ClientId,
    CredentialId,
    CredentialRecord,
    ApplicationHandle,
    ApplicationLookup,
    CreatedCredential,
};

pub use store::{
    Secret,
    SecretStore,
    StoreError,
    MemoryStore,
    FileSecretStore,
    open_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use selector::{select, ActiveCandidate, Selection};

pub use binding::SecretBinding;

pub use token::{
    Token,
    TokenError,
    TokenProvider,
    StaticTokenProvider,
};

pub use config::{
    CredrotorConfig,
    AppRegistrationConfig,
    RotationConfig,
    StoreConfig,
    StoreBackend,
    IdentitySnapshot,
    ConfigError,
};

pub use directory::{
    DirectoryClient,
    DirectoryError,
    InMemoryDirectory,
};

#[cfg(feature = "graph")]
pub use directory::GraphDirectoryClient;

pub use engine::{
    RotationEngine,
    EngineState,
    EngineError,
    TickOutcome,
    TickReport,
};

pub use error::CredrotorError;

#[cfg(feature = "graph")]
pub use token_provider::ClientCredentialsTokenProvider;

#[cfg(feature = "graph")]
pub use services::Services;
