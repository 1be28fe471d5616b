//! Microsoft Graph directory client.
//!
//! Talks to the `applications` collection of the Graph v1.0 API:
//!
//! | Operation           | Request                                                      |
//! |---------------------|--------------------------------------------------------------|
//! | `find_application`  | `GET /v1.0/applications?$filter=appId eq '{client_id}'`      |
//! | `list_credentials`  | `GET /v1.0/applications/{id}?$select=id,appId,passwordCredentials` |
//! | `create_credential` | `POST /v1.0/applications/{id}/addPassword`                   |
//! | `delete_credential` | `POST /v1.0/applications/{id}/removePassword`                |
//!
//! The write calls require the `Application.ReadWrite.OwnedBy` application
//! permission. A bearer token is requested from the [`TokenProvider`] for
//! every call, so a secret swap is picked up immediately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use super::{DirectoryClient, DirectoryError};
use crate::model::{
    ApplicationHandle, ApplicationLookup, ClientId, CreatedCredential, CredentialId,
    CredentialRecord,
};
use crate::store::Secret;
use crate::token::TokenProvider;

/// Longest error body kept in [`DirectoryError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct ApplicationPage {
    #[serde(default)]
    value: Vec<GraphApplication>,

    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphApplication {
    id: String,
    app_id: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    password_credentials: Vec<GraphPasswordCredential>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphPasswordCredential {
    key_id: Option<Uuid>,
    display_name: Option<String>,
    start_date_time: Option<DateTime<Utc>>,
    end_date_time: Option<DateTime<Utc>>,
    secret_text: Option<String>,
}

impl GraphPasswordCredential {
    fn into_record(self) -> Option<(CredentialRecord, Option<String>)> {
        let key_id = self.key_id?;
        let record = CredentialRecord::new(
            CredentialId::new(key_id),
            self.display_name.unwrap_or_default(),
            self.start_date_time,
            self.end_date_time,
        );
        Some((record, self.secret_text))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddPasswordRequest<'a> {
    password_credential: NewPasswordCredential<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewPasswordCredential<'a> {
    display_name: &'a str,
    start_date_time: DateTime<Utc>,
    end_date_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovePasswordRequest {
    key_id: Uuid,
}

/// Directory client backed by the Microsoft Graph REST API.
pub struct GraphDirectoryClient {
    http: reqwest::Client,
    base_url: String,
    scopes: Vec<String>,
    tokens: Arc<dyn TokenProvider>,
}

impl GraphDirectoryClient {
    /// Create a client for the Graph endpoint at `graph_url`.
    ///
    /// Tokens are requested for the `{graph_url}/.default` scope.
    pub fn new(graph_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self, DirectoryError> {
        let parsed = Url::parse(graph_url).map_err(|e| DirectoryError::InvalidConfig {
            message: format!("invalid graph URL {:?}: {}", graph_url, e),
        })?;
        let base_url = parsed.as_str().trim_end_matches('/').to_string();
        let scopes = vec![format!("{}/.default", base_url)];
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            scopes,
            tokens,
        })
    }

    /// Override the token scopes (e.g. when `graph_url` points at a proxy).
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    fn application_url(&self, app: &ApplicationHandle) -> String {
        format!("{}/v1.0/applications/{}", self.base_url, app.object_id)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DirectoryError> {
        let token = self.tokens.access_token(&self.scopes).await?;
        let response = request
            .bearer_auth(token.access_token.expose())
            .send()
            .await
            .map_err(|e| DirectoryError::Transport {
                message: e.to_string(),
            })?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, DirectoryError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| DirectoryError::InvalidResponse {
                message: e.to_string(),
            })
    }
}

async fn check_status(response: Response) -> Result<Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DirectoryError::Unauthorized {
            status: status.as_u16(),
        });
    }
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Err(DirectoryError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Escape a value for use inside a single-quoted OData string literal.
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl DirectoryClient for GraphDirectoryClient {
    async fn find_application(
        &self,
        client_id: &ClientId,
    ) -> Result<ApplicationLookup, DirectoryError> {
        let filter = format!("appId eq '{}'", odata_literal(client_id.as_str()));
        let mut request = self
            .http
            .get(format!("{}/v1.0/applications", self.base_url))
            .query(&[("$filter", filter.as_str()), ("$select", "id,appId,displayName")]);

        let mut matches = Vec::new();
        loop {
            let page: ApplicationPage = self.send_json(request).await?;
            matches.extend(
                page.value
                    .into_iter()
                    .filter(|app| app.app_id.as_deref() == Some(client_id.as_str())),
            );
            match page.next_link {
                Some(next) => request = self.http.get(next),
                None => break,
            }
        }

        tracing::debug!("Directory lookup for {} matched {} application(s)", client_id, matches.len());

        let count = matches.len();
        let mut matches = matches.into_iter();
        Ok(match (matches.next(), count) {
            (None, _) => ApplicationLookup::NotFound,
            (Some(app), 1) => ApplicationLookup::Found(ApplicationHandle {
                object_id: app.id,
                client_id: client_id.clone(),
                display_name: app.display_name,
            }),
            (Some(_), matches) => ApplicationLookup::Ambiguous { matches },
        })
    }

    async fn list_credentials(
        &self,
        app: &ApplicationHandle,
    ) -> Result<Vec<CredentialRecord>, DirectoryError> {
        let request = self
            .http
            .get(self.application_url(app))
            .query(&[("$select", "id,appId,passwordCredentials")]);
        let application: GraphApplication = self.send_json(request).await?;

        let mut records = Vec::with_capacity(application.password_credentials.len());
        for credential in application.password_credentials {
            match credential.into_record() {
                Some((record, _)) => records.push(record),
                None => tracing::debug!("Skipping password credential without key id"),
            }
        }
        Ok(records)
    }

    async fn create_credential(
        &self,
        app: &ApplicationHandle,
        display_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CreatedCredential, DirectoryError> {
        let body = AddPasswordRequest {
            password_credential: NewPasswordCredential {
                display_name,
                start_date_time: start,
                end_date_time: end,
            },
        };
        let request = self
            .http
            .post(format!("{}/addPassword", self.application_url(app)))
            .json(&body);
        let created: GraphPasswordCredential = self.send_json(request).await?;

        let (record, secret_text) =
            created
                .into_record()
                .ok_or_else(|| DirectoryError::InvalidResponse {
                    message: "addPassword response has no keyId".to_string(),
                })?;
        let secret = secret_text
            .filter(|text| !text.is_empty())
            .map(Secret::new)
            .ok_or_else(|| DirectoryError::InvalidResponse {
                message: "addPassword response has no secretText".to_string(),
            })?;

        tracing::trace!("Created credential {} with secret {}", record.id, secret.obscured());
        Ok(CreatedCredential { record, secret })
    }

    async fn delete_credential(
        &self,
        app: &ApplicationHandle,
        credential_id: &CredentialId,
    ) -> Result<(), DirectoryError> {
        let request = self
            .http
            .post(format!("{}/removePassword", self.application_url(app)))
            .json(&RemovePasswordRequest {
                key_id: *credential_id.as_uuid(),
            });
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odata_literal_escapes_quotes() {
        assert_eq!(odata_literal("o'brien"), "o''brien");
        assert_eq!(odata_literal("plain"), "plain");
    }

    #[test]
    fn test_add_password_body_shape() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let body = AddPasswordRequest {
            password_credential: NewPasswordCredential {
                display_name: "By credrotor 1",
                start_date_time: start,
                end_date_time: start + chrono::Duration::days(1),
            },
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["passwordCredential"]["displayName"], "By credrotor 1");
        assert_eq!(json["passwordCredential"]["startDateTime"], "2024-01-01T00:00:00Z");
        assert_eq!(json["passwordCredential"]["endDateTime"], "2024-01-02T00:00:00Z");
    }

    #[test]
    fn test_password_credential_parses_graph_timestamps() {
        let parsed: GraphPasswordCredential = serde_json::from_value(serde_json::json!({
            "keyId": "3f0b5c52-8b0f-4f0e-9a59-8a9d6d1c9d11",
            "displayName": null,
            "startDateTime": "2024-05-05T10:00:00.1234567Z",
            "endDateTime": "2024-06-05T10:00:00Z",
            "hint": "abc",
            "secretText": null
        }))
        .unwrap();

        let (record, secret) = parsed.into_record().unwrap();
        assert_eq!(record.display_name, "");
        assert!(record.start_time.is_some());
        assert!(secret.is_none());
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let tokens: Arc<dyn TokenProvider> = Arc::new(crate::token::StaticTokenProvider::new("t"));
        assert!(matches!(
            GraphDirectoryClient::new("not a url", tokens),
            Err(DirectoryError::InvalidConfig { .. })
        ));
    }
}
