//! In-process directory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use uuid::Uuid;

use super::{DirectoryClient, DirectoryError};
use crate::binding::SecretBinding;
use crate::model::{
    ApplicationHandle, ApplicationLookup, ClientId, CreatedCredential, CredentialId,
    CredentialRecord,
};
use crate::store::Secret;

/// Number of calls made to each directory operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub find: usize,
    pub list: usize,
    pub create: usize,
    pub delete: usize,
}

struct StoredCredential {
    record: CredentialRecord,
    secret: Secret,
}

struct StoredApplication {
    handle: ApplicationHandle,
    credentials: Vec<StoredCredential>,
}

#[derive(Default)]
struct DirectoryState {
    applications: Vec<StoredApplication>,
    rejected_secrets: HashSet<String>,
    reject_next_created: bool,
    revoke_on_next_create: Option<String>,
    failing_reads: usize,
    failing_creates: usize,
    failing_deletes: bool,
    issued_secrets: u64,
    calls: CallCounts,
}

/// Directory held entirely in process memory.
///
/// When constructed [`with_binding`](Self::with_binding), every call is
/// authenticated against the binding's current secret: an empty binding or a
/// secret marked with [`reject_secret`](Self::reject_secret) yields
/// [`DirectoryError::Unauthorized`]. Failures can be injected per operation
/// to exercise the engine's recovery paths.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
    binding: Option<SecretBinding>,
}

impl InMemoryDirectory {
    /// Create a directory that accepts every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory that authenticates calls against `binding`.
    pub fn with_binding(binding: SecretBinding) -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            binding: Some(binding),
        }
    }

    /// Register an application.
    pub fn add_application(&self, client_id: &str, display_name: &str) -> ApplicationHandle {
        let handle = ApplicationHandle {
            object_id: Uuid::new_v4().to_string(),
            client_id: ClientId::new(client_id),
            display_name: Some(display_name.to_string()),
        };
        self.state.lock().applications.push(StoredApplication {
            handle: handle.clone(),
            credentials: Vec::new(),
        });
        handle
    }

    /// Add a credential out of band, as a human or other tooling would.
    pub fn insert_credential(
        &self,
        app: &ApplicationHandle,
        display_name: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> CreatedCredential {
        let mut state = self.state.lock();
        let secret = next_secret(&mut state);
        let record = CredentialRecord::new(CredentialId::generate(), display_name, start, end);
        if let Some(stored) = find_app_mut(&mut state, app) {
            stored.credentials.push(StoredCredential {
                record: record.clone(),
                secret: secret.clone(),
            });
        }
        CreatedCredential { record, secret }
    }

    /// Remove every credential of `app` out of band.
    pub fn clear_credentials(&self, app: &ApplicationHandle) {
        if let Some(stored) = find_app_mut(&mut self.state.lock(), app) {
            stored.credentials.clear();
        }
    }

    /// Current credentials of `app`.
    pub fn credentials(&self, app: &ApplicationHandle) -> Vec<CredentialRecord> {
        let mut state = self.state.lock();
        find_app_mut(&mut state, app)
            .map(|stored| stored.credentials.iter().map(|c| c.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Secret value of a credential.
    pub fn secret_of(&self, credential_id: &CredentialId) -> Option<Secret> {
        let state = self.state.lock();
        state
            .applications
            .iter()
            .flat_map(|app| app.credentials.iter())
            .find(|c| &c.record.id == credential_id)
            .map(|c| c.secret.clone())
    }

    /// Refuse to authenticate calls made with `secret`.
    pub fn reject_secret(&self, secret: &Secret) {
        self.state
            .lock()
            .rejected_secrets
            .insert(secret.expose().to_string());
    }

    /// Accept `secret` again after [`reject_secret`](Self::reject_secret).
    pub fn accept_secret(&self, secret: &Secret) {
        self.state.lock().rejected_secrets.remove(secret.expose());
    }

    /// Make the secret of the next created credential unusable.
    pub fn reject_next_created(&self) {
        self.state.lock().reject_next_created = true;
    }

    /// Stop accepting `secret` once the next credential has been created.
    pub fn revoke_on_next_create(&self, secret: &Secret) {
        self.state.lock().revoke_on_next_create = Some(secret.expose().to_string());
    }

    /// Fail the next `count` find/list calls with a transport error.
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().failing_reads = count;
    }

    /// Fail the next `count` create calls with a transport error.
    pub fn fail_next_creates(&self, count: usize) {
        self.state.lock().failing_creates = count;
    }

    /// Fail every delete call until switched off.
    pub fn fail_deletes(&self, failing: bool) {
        self.state.lock().failing_deletes = failing;
    }

    /// Calls made so far.
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    fn authorize(&self, state: &DirectoryState) -> Result<(), DirectoryError> {
        let Some(binding) = &self.binding else {
            return Ok(());
        };
        match binding.secret() {
            Some(secret) if !state.rejected_secrets.contains(secret.expose()) => Ok(()),
            _ => Err(DirectoryError::Unauthorized { status: 401 }),
        }
    }
}

fn next_secret(state: &mut DirectoryState) -> Secret {
    state.issued_secrets += 1;
    Secret::new(format!(
        "secret-{}-{}",
        state.issued_secrets,
        Uuid::new_v4().simple()
    ))
}

fn find_app_mut<'a>(
    state: &'a mut DirectoryState,
    app: &ApplicationHandle,
) -> Option<&'a mut StoredApplication> {
    state
        .applications
        .iter_mut()
        .find(|stored| stored.handle.object_id == app.object_id)
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn injected(operation: &str) -> DirectoryError {
    DirectoryError::Transport {
        message: format!("injected {} failure", operation),
    }
}

fn missing(app: &ApplicationHandle) -> DirectoryError {
    DirectoryError::Status {
        status: 404,
        message: format!("application {} does not exist", app.object_id),
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn find_application(
        &self,
        client_id: &ClientId,
    ) -> Result<ApplicationLookup, DirectoryError> {
        let mut state = self.state.lock();
        state.calls.find += 1;
        self.authorize(&state)?;
        if take_failure(&mut state.failing_reads) {
            return Err(injected("find"));
        }

        let matches: Vec<_> = state
            .applications
            .iter()
            .filter(|app| &app.handle.client_id == client_id)
            .collect();
        Ok(match matches.as_slice() {
            [] => ApplicationLookup::NotFound,
            [only] => ApplicationLookup::Found(only.handle.clone()),
            many => ApplicationLookup::Ambiguous {
                matches: many.len(),
            },
        })
    }

    async fn list_credentials(
        &self,
        app: &ApplicationHandle,
    ) -> Result<Vec<CredentialRecord>, DirectoryError> {
        let mut state = self.state.lock();
        state.calls.list += 1;
        self.authorize(&state)?;
        if take_failure(&mut state.failing_reads) {
            return Err(injected("list"));
        }

        find_app_mut(&mut state, app)
            .map(|stored| stored.credentials.iter().map(|c| c.record.clone()).collect())
            .ok_or_else(|| missing(app))
    }

    async fn create_credential(
        &self,
        app: &ApplicationHandle,
        display_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CreatedCredential, DirectoryError> {
        let mut state = self.state.lock();
        state.calls.create += 1;
        self.authorize(&state)?;
        if take_failure(&mut state.failing_creates) {
            return Err(injected("create"));
        }

        let secret = next_secret(&mut state);
        if std::mem::take(&mut state.reject_next_created) {
            state.rejected_secrets.insert(secret.expose().to_string());
        }
        if let Some(revoked) = state.revoke_on_next_create.take() {
            state.rejected_secrets.insert(revoked);
        }
        let record =
            CredentialRecord::new(CredentialId::generate(), display_name, Some(start), Some(end));
        let stored = find_app_mut(&mut state, app).ok_or_else(|| missing(app))?;
        stored.credentials.push(StoredCredential {
            record: record.clone(),
            secret: secret.clone(),
        });
        Ok(CreatedCredential { record, secret })
    }

    async fn delete_credential(
        &self,
        app: &ApplicationHandle,
        credential_id: &CredentialId,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.lock();
        state.calls.delete += 1;
        self.authorize(&state)?;
        if state.failing_deletes {
            return Err(injected("delete"));
        }

        let stored = find_app_mut(&mut state, app).ok_or_else(|| missing(app))?;
        let before = stored.credentials.len();
        stored.credentials.retain(|c| &c.record.id != credential_id);
        if stored.credentials.len() == before {
            return Err(DirectoryError::Status {
                status: 404,
                message: format!("credential {} does not exist", credential_id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_lookup_outcomes() {
        let directory = InMemoryDirectory::new();
        let client = ClientId::new("client-a");

        assert_eq!(
            directory.find_application(&client).await.unwrap(),
            ApplicationLookup::NotFound
        );

        let app = directory.add_application("client-a", "App A");
        assert_eq!(
            directory.find_application(&client).await.unwrap(),
            ApplicationLookup::Found(app)
        );

        directory.add_application("client-a", "Duplicate");
        assert_eq!(
            directory.find_application(&client).await.unwrap(),
            ApplicationLookup::Ambiguous { matches: 2 }
        );
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let directory = InMemoryDirectory::new();
        let app = directory.add_application("client-a", "App A");
        let now = Utc::now();

        let created = directory
            .create_credential(&app, "By credrotor 1", now, now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(directory.secret_of(&created.record.id), Some(created.secret.clone()));

        let listed = directory.list_credentials(&app).await.unwrap();
        assert_eq!(listed, vec![created.record.clone()]);

        directory.delete_credential(&app, &created.record.id).await.unwrap();
        assert!(directory.list_credentials(&app).await.unwrap().is_empty());

        let again = directory.delete_credential(&app, &created.record.id).await;
        assert!(matches!(again, Err(DirectoryError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_authenticates_against_binding() {
        let binding = SecretBinding::new();
        let directory = InMemoryDirectory::with_binding(binding.clone());
        let client = ClientId::new("client-a");

        assert!(matches!(
            directory.find_application(&client).await,
            Err(DirectoryError::Unauthorized { .. })
        ));

        let secret = Secret::new("good");
        binding.set_secret(secret.clone());
        assert!(directory.find_application(&client).await.is_ok());

        directory.reject_secret(&secret);
        assert!(directory.find_application(&client).await.is_err());

        directory.accept_secret(&secret);
        assert!(directory.find_application(&client).await.is_ok());
        assert_eq!(directory.calls().find, 4);
    }

    #[tokio::test]
    async fn test_revoke_on_next_create() {
        let binding = SecretBinding::with_secret(Secret::new("old"));
        let directory = InMemoryDirectory::with_binding(binding.clone());
        let app = directory.add_application("client-a", "App A");
        let now = Utc::now();

        directory.revoke_on_next_create(&Secret::new("old"));
        assert!(directory.list_credentials(&app).await.is_ok());

        let created = directory
            .create_credential(&app, "x", now, now + Duration::hours(1))
            .await
            .unwrap();
        assert!(matches!(
            directory.list_credentials(&app).await,
            Err(DirectoryError::Unauthorized { .. })
        ));

        binding.set_secret(created.secret);
        assert!(directory.list_credentials(&app).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let directory = InMemoryDirectory::new();
        let app = directory.add_application("client-a", "App A");
        let now = Utc::now();

        directory.fail_next_creates(1);
        assert!(directory
            .create_credential(&app, "x", now, now + Duration::hours(1))
            .await
            .is_err());
        assert!(directory
            .create_credential(&app, "x", now, now + Duration::hours(1))
            .await
            .is_ok());

        directory.fail_next_reads(1);
        assert!(directory.list_credentials(&app).await.is_err());
        assert!(directory.list_credentials(&app).await.is_ok());
    }
}
