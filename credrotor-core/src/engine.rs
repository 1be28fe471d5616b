//! The secret rotation engine.
//!
//! [`RotationEngine`] owns the control loop that keeps one application's
//! password credentials fresh:
//!
//! ```text
//! start:  stored secret? ──no──► BOOTSTRAP ─► create ─► persist ─► bind ─► probe ─► STEADY
//!              │yes                                                    └─fail─► fatal
//!              ▼
//!         bind ─► probe ─ok─► STEADY
//!                   └fail─► RECOVERING ─► restore previous ─► probe ─ok─► STEADY
//!                                                              └fail─► BOOTSTRAP
//!
//! tick:   resolve app ─► list ─► select ─► delete expired
//!              ─► no candidate      ─► create (ROTATING)
//!              ─► remaining < limit ─► create (ROTATING)
//!              ─► otherwise         ─► no action
//! ```
//!
//! Every rotation is validated with a probe. A new secret that fails its
//! probe is swapped back out of the [`SecretBinding`] for the one it
//! replaced; it stays persisted and is retried at the start of later ticks
//! until it either validates or expires.
//!
//! Exactly one engine may run per tenant/application pair. Nothing enforces
//! this.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::binding::SecretBinding;
use crate::config::RotationConfig;
use crate::directory::{DirectoryClient, DirectoryError};
use crate::model::{
    ApplicationHandle, ApplicationLookup, ClientId, CreatedCredential, CredentialId,
    CredentialRecord, TenantId,
};
use crate::selector::{select, ActiveCandidate};
use crate::store::{Secret, SecretStore};

/// Error type for the rotation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configured client id matches no application.
    #[error("no application registered with client id {client_id}")]
    ApplicationNotFound { client_id: String },

    /// The configured client id matches several applications.
    #[error("client id {client_id} matches {matches} applications")]
    AmbiguousApplication { client_id: String, matches: usize },

    /// No working credential could be established at startup.
    #[error("bootstrap failed: {message}")]
    Bootstrap { message: String },

    /// Rotation parameters produced an out-of-range timestamp.
    #[error("invalid rotation configuration: {message}")]
    Config { message: String },

    /// A directory call failed. Retried on the next tick.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
}

impl EngineError {
    /// Whether the error must stop the engine.
    ///
    /// Directory failures are contained in the tick they happen in; everything
    /// else needs operator attention.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Directory(_))
    }
}

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No validated secret; the next step creates one.
    Bootstrap,
    /// A freshly bound secret is being probed.
    Validating,
    /// The bound secret is known to work.
    Steady,
    /// A new credential is being created.
    Rotating,
    /// A probe failed; falling back to the previous secret.
    Recovering,
}

/// What a tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The active credential has at least the threshold left.
    NoAction { remaining: chrono::Duration },
    /// A new credential was created, persisted, bound and validated.
    Rotated { credential_id: CredentialId },
    /// A new credential failed validation; the previous secret is bound again
    /// and validated.
    RolledBack { credential_id: CredentialId },
    /// Neither the new nor the previous secret validated.
    Unvalidated { credential_id: CredentialId },
    /// The directory refused to create a credential; retried next tick.
    CreateFailed,
    /// A directory read failed; retried next tick.
    Transient,
    /// Cancellation was observed between steps.
    Cancelled,
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// The tick's decision.
    pub outcome: TickOutcome,
    /// Expired credentials removed.
    pub deleted: usize,
    /// Expired credentials whose removal failed.
    pub delete_failures: usize,
    /// A previously unvalidated secret became active at the start of the tick.
    pub promoted: bool,
}

impl TickReport {
    fn new(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            deleted: 0,
            delete_failures: 0,
            promoted: false,
        }
    }
}

/// A persisted secret that failed validation and is not bound.
#[derive(Debug, Clone)]
struct PendingSecret {
    credential_id: CredentialId,
    secret: Secret,
    end_time: Option<DateTime<Utc>>,
}

/// The control loop keeping one application's secret rotated.
pub struct RotationEngine {
    directory: Arc<dyn DirectoryClient>,
    store: Arc<dyn SecretStore>,
    binding: SecretBinding,
    tenant_id: TenantId,
    client_id: ClientId,
    config: RotationConfig,
    state: EngineState,
    rotation_counter: u64,
    pending: Option<PendingSecret>,
}

impl RotationEngine {
    /// Create an engine.
    ///
    /// `binding` may already hold a secret (e.g. one from configuration); it
    /// is what startup falls back to if the stored secret does not validate.
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        store: Arc<dyn SecretStore>,
        binding: SecretBinding,
        tenant_id: TenantId,
        client_id: ClientId,
        config: RotationConfig,
    ) -> Self {
        Self {
            directory,
            store,
            binding,
            tenant_id,
            client_id,
            config,
            state: EngineState::Bootstrap,
            rotation_counter: 0,
            pending: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The binding the engine pushes secrets into.
    pub fn binding(&self) -> &SecretBinding {
        &self.binding
    }

    /// The rotation parameters.
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Key id of a persisted secret still waiting to validate.
    pub fn pending_credential(&self) -> Option<CredentialId> {
        self.pending.as_ref().map(|p| p.credential_id)
    }

    /// Run startup, then tick every `refresh_cycle` until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation and `Err` only for fatal errors.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), EngineError> {
        tokio::select! {
            result = self.start() => result?,
            _ = cancel.cancelled() => {
                info!("Cancelled during startup");
                return Ok(());
            }
        }

        let period = self.config.refresh_cycle;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Rotation loop running every {:?}", period);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = cancel.cancelled() => {
                    info!("Rotation loop stopped");
                    return Ok(());
                }
            }

            let report = self.tick(&cancel).await?;
            debug!(?report, state = ?self.state, "Tick complete");
        }
    }

    /// Establish a working secret.
    ///
    /// Loads the stored secret and validates it, falling back to the secret
    /// the binding held before, and finally to creating a new credential.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        let stored = match self.store.get(self.tenant_id.as_str()).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Could not read stored secret for {}: {}", self.tenant_id, e);
                None
            }
        };

        let Some(secret) = stored else {
            info!("No stored secret for tenant {}, bootstrapping", self.tenant_id);
            return self.bootstrap().await;
        };

        trace!("Loaded stored secret {}", secret.obscured());
        self.state = EngineState::Validating;
        let previous = self.binding.set_secret(secret);
        if self.probe().await {
            self.state = EngineState::Steady;
            info!("Stored secret for tenant {} is valid", self.tenant_id);
            return Ok(());
        }

        warn!("Stored secret for tenant {} failed validation", self.tenant_id);
        if self.recover(previous).await {
            return Ok(());
        }
        self.bootstrap().await
    }

    /// Run one pass of the control loop.
    ///
    /// Directory failures end the tick with [`TickOutcome::Transient`]; only
    /// fatal errors are returned.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<TickReport, EngineError> {
        let mut report = TickReport::new(TickOutcome::Transient);
        match self.tick_inner(cancel, &mut report).await {
            Ok(outcome) => {
                report.outcome = outcome;
                Ok(report)
            }
            Err(e) if !e.is_fatal() => {
                warn!("Tick failed, retrying next cycle: {}", e);
                Ok(report)
            }
            Err(e) => {
                error!("Tick failed fatally: {}", e);
                Err(e)
            }
        }
    }

    /// Create and activate a new credential regardless of the current one.
    pub async fn rotate_now(&mut self) -> Result<TickOutcome, EngineError> {
        let app = self.resolve_application().await?;
        self.rotate(&app).await
    }

    async fn tick_inner(
        &mut self,
        cancel: &CancellationToken,
        report: &mut TickReport,
    ) -> Result<TickOutcome, EngineError> {
        if cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        report.promoted = self.promote_pending().await;

        let app = self.resolve_application().await?;
        let records = self.directory.list_credentials(&app).await?;
        if cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        let now = Utc::now();
        let selection = select(&records, now, &self.config.display_name_prefix);
        debug!(
            "Application {} has {} credential(s), {} expired",
            app.object_id,
            records.len(),
            selection.expired.len()
        );

        let (deleted, failures) = self.remove_expired(&app, &selection.expired).await;
        report.deleted = deleted;
        report.delete_failures = failures;
        if cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        match selection.active {
            ActiveCandidate::NoCandidate => {
                warn!(
                    "No managed credential with prefix {:?} found, creating one",
                    self.config.display_name_prefix
                );
                self.state = EngineState::Bootstrap;
                self.rotate(&app).await
            }
            ActiveCandidate::Selected { record, remaining } => {
                trace!(
                    "Credential {:?} runs out in {} day(s) {} minute(s)",
                    record.display_name,
                    remaining.num_days(),
                    remaining.num_minutes() % (24 * 60)
                );
                if remaining >= self.config.threshold() {
                    self.state = EngineState::Steady;
                    return Ok(TickOutcome::NoAction { remaining });
                }
                info!(
                    "Credential {:?} expires within {:?}, rotating",
                    record.display_name, self.config.threshold_end_lifetime
                );
                self.rotate(&app).await
            }
        }
    }

    /// Try to make a previously unvalidated secret active.
    async fn promote_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        if pending.end_time.is_some_and(|end| end < Utc::now()) {
            info!(
                "Abandoning unvalidated credential {}: it has expired",
                pending.credential_id
            );
            return false;
        }

        self.state = EngineState::Validating;
        let previous = self.binding.set_secret(pending.secret.clone());
        if self.probe().await {
            self.state = EngineState::Steady;
            info!("Credential {} validated and is now active", pending.credential_id);
            return true;
        }

        debug!("Credential {} still fails validation", pending.credential_id);
        if let Some(previous) = previous {
            self.binding.set_secret(previous);
        }
        self.state = EngineState::Recovering;
        self.pending = Some(pending);
        false
    }

    /// Creation procedure: create, persist, bind, validate, fall back.
    async fn rotate(&mut self, app: &ApplicationHandle) -> Result<TickOutcome, EngineError> {
        self.state = EngineState::Rotating;
        let created = match self.create_credential(app).await {
            Ok(created) => created,
            Err(EngineError::Directory(e)) => {
                warn!("Failed to create a new credential, keeping the current one: {}", e);
                self.state = EngineState::Steady;
                return Ok(TickOutcome::CreateFailed);
            }
            Err(e) => return Err(e),
        };
        let credential_id = created.record.id;

        self.persist(&created.secret).await;
        self.state = EngineState::Validating;
        let previous = self.binding.set_secret(created.secret.clone());

        if self.probe().await {
            self.pending = None;
            self.state = EngineState::Steady;
            info!(
                "Rotated to credential {} ({:?})",
                credential_id, created.record.display_name
            );
            return Ok(TickOutcome::Rotated { credential_id });
        }

        warn!("New credential {} failed validation", credential_id);
        self.state = EngineState::Recovering;
        let Some(previous) = previous else {
            warn!("No previous secret to fall back to");
            self.state = EngineState::Bootstrap;
            return Ok(TickOutcome::Unvalidated { credential_id });
        };

        self.binding.set_secret(previous);
        self.pending = Some(PendingSecret {
            credential_id,
            secret: created.secret,
            end_time: created.record.end_time,
        });
        if self.probe().await {
            self.state = EngineState::Steady;
            info!("Restored previous secret after failed rotation");
            Ok(TickOutcome::RolledBack { credential_id })
        } else {
            warn!("Previous secret fails validation too");
            self.state = EngineState::Bootstrap;
            Ok(TickOutcome::Unvalidated { credential_id })
        }
    }

    /// Startup bootstrap. Any failure here is fatal.
    async fn bootstrap(&mut self) -> Result<(), EngineError> {
        self.state = EngineState::Bootstrap;
        let app = self.resolve_application().await.map_err(|e| match e {
            EngineError::Directory(e) => EngineError::Bootstrap {
                message: format!("cannot resolve application: {}", e),
            },
            fatal => fatal,
        })?;
        let created = self.create_credential(&app).await.map_err(|e| match e {
            EngineError::Directory(e) => EngineError::Bootstrap {
                message: format!("cannot create credential: {}", e),
            },
            fatal => fatal,
        })?;

        self.persist(&created.secret).await;
        self.state = EngineState::Validating;
        self.binding.set_secret(created.secret);

        if self.probe().await {
            self.state = EngineState::Steady;
            info!("Bootstrapped credential {}", created.record.id);
            Ok(())
        } else {
            error!("Bootstrapped credential {} failed validation", created.record.id);
            Err(EngineError::Bootstrap {
                message: format!("new credential {} does not validate", created.record.id),
            })
        }
    }

    /// Restore `previous` after a failed probe and validate it.
    async fn recover(&mut self, previous: Option<Secret>) -> bool {
        self.state = EngineState::Recovering;
        let Some(previous) = previous else {
            debug!("No previous secret to recover with");
            self.state = EngineState::Bootstrap;
            return false;
        };

        self.binding.set_secret(previous);
        if self.probe().await {
            self.state = EngineState::Steady;
            info!("Recovered with the previous secret");
            true
        } else {
            warn!("Previous secret failed validation too");
            self.state = EngineState::Bootstrap;
            false
        }
    }

    async fn resolve_application(&self) -> Result<ApplicationHandle, EngineError> {
        match self.directory.find_application(&self.client_id).await? {
            ApplicationLookup::Found(app) => Ok(app),
            ApplicationLookup::NotFound => Err(EngineError::ApplicationNotFound {
                client_id: self.client_id.to_string(),
            }),
            ApplicationLookup::Ambiguous { matches } => Err(EngineError::AmbiguousApplication {
                client_id: self.client_id.to_string(),
                matches,
            }),
        }
    }

    /// One authenticated read with the bound secret.
    async fn probe(&self) -> bool {
        match self.directory.find_application(&self.client_id).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Validation probe failed: {}", e);
                false
            }
        }
    }

    async fn create_credential(
        &mut self,
        app: &ApplicationHandle,
    ) -> Result<CreatedCredential, EngineError> {
        self.rotation_counter += 1;
        let display_name = format!(
            "{} {}",
            self.config.display_name_prefix.trim_end(),
            self.rotation_counter
        );
        let start = Utc::now();
        let end = start
            .checked_add_signed(self.config.lifetime())
            .ok_or_else(|| EngineError::Config {
                message: format!(
                    "credential lifetime {:?} overflows",
                    self.config.credential_lifetime
                ),
            })?;

        let created = self
            .directory
            .create_credential(app, &display_name, start, end)
            .await?;
        debug!("Created credential {} ({:?})", created.record.id, display_name);
        Ok(created)
    }

    async fn persist(&self, secret: &Secret) {
        match self.store.set(self.tenant_id.as_str(), secret).await {
            Ok(()) => trace!("Persisted secret {}", secret.obscured()),
            Err(e) => warn!(
                "Failed to persist secret for {}, continuing with the in-memory secret only: {}",
                self.tenant_id, e
            ),
        }
    }

    /// Best-effort removal. Returns `(deleted, failed)`.
    async fn remove_expired(
        &self,
        app: &ApplicationHandle,
        expired: &[CredentialRecord],
    ) -> (usize, usize) {
        let mut deleted = 0;
        let mut failed = 0;
        for record in expired {
            warn!(
                "Removing credential {:?} ({}) as it expired on {:?}",
                record.display_name, record.id, record.end_time
            );
            match self.directory.delete_credential(app, &record.id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!("Failed to remove expired credential {}: {}", record.id, e);
                    failed += 1;
                }
            }
        }
        (deleted, failed)
    }
}
