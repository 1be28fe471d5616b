//! credrotor Daemon Library
//!
//! This library exposes the daemon's configuration handling and supervisor
//! for testing and potential embedding in other applications.

pub mod config;
pub mod supervisor;

pub use config::{load_config, resolve_config_path};
pub use supervisor::Daemon;
