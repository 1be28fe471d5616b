//! Runs the rotation engine and applies configuration reloads.

use anyhow::{Context, Result};
use credrotor_core::Services;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::load_config;

/// The daemon: live services plus the file they were loaded from.
pub struct Daemon {
    services: Services,
    config_path: PathBuf,
}

impl Daemon {
    /// Load the configuration at `config_path` and build the services.
    pub fn from_path(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config = load_config(&config_path)?;
        let services =
            Services::from_config(config).context("Failed to initialise credrotor services")?;
        Ok(Self {
            services,
            config_path,
        })
    }

    /// The live services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The configuration file this daemon reloads from.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Re-read the configuration file and apply the identity settings.
    ///
    /// A file that fails to load leaves the running configuration untouched.
    pub fn reload(&mut self) {
        match load_config(&self.config_path) {
            Ok(config) => {
                self.services.reload(config);
                info!("Configuration reloaded from {:?}", self.config_path);
            }
            Err(e) => warn!("Keeping current configuration: {:#}", e),
        }
    }

    /// Run the engine until `shutdown` fires or it fails fatally.
    ///
    /// Every message on `reload` triggers [`reload`](Self::reload).
    pub async fn run(
        mut self,
        shutdown: CancellationToken,
        mut reload: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut engine = self.services.engine();
        let engine_cancel = shutdown.child_token();
        let mut task = tokio::spawn(async move { engine.run(engine_cancel).await });

        info!(
            "Rotating secrets for client {} in tenant {}",
            self.services.config().app_registration.client_id,
            self.services.config().app_registration.tenant_id
        );

        loop {
            tokio::select! {
                joined = &mut task => {
                    let result = joined.context("Rotation engine task panicked")?;
                    return match result {
                        Ok(()) => {
                            info!("Rotation engine stopped");
                            Ok(())
                        }
                        Err(e) => {
                            error!("Rotation engine failed: {}", e);
                            Err(anyhow::Error::new(e).context("Rotation engine stopped"))
                        }
                    };
                }
                Some(()) = reload.recv() => self.reload(),
            }
        }
    }
}
