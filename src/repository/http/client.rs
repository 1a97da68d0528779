use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use crate::domain::session::UserIdentity;
use crate::repository::errors::ApiError;
use crate::usecase::contracts::AccessTokenSource;

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    version: u64,
}

/// Credentials of the active session, shared by the REST layer and the
/// push channel. `version` changes on every login, rotation and logout.
#[derive(Debug, Default)]
pub struct SessionCredentials {
    state: RwLock<TokenState>,
}

impl SessionCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, access_token: String, refresh_token: Option<String>) {
        let mut state = self.state.write();
        state.access_token = Some(access_token);
        state.refresh_token = refresh_token;
        state.version += 1;
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.access_token = None;
        state.refresh_token = None;
        state.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    fn current(&self) -> Option<(String, u64)> {
        let state = self.state.read();
        state
            .access_token
            .clone()
            .map(|token| (token, state.version))
    }

    fn refresh_token(&self) -> Option<String> {
        self.state.read().refresh_token.clone()
    }

    fn rotate(&self, access_token: String, refresh_token: Option<String>) {
        let mut state = self.state.write();
        state.access_token = Some(access_token);
        if refresh_token.is_some() {
            state.refresh_token = refresh_token;
        }
        state.version += 1;
    }
}

impl AccessTokenSource for SessionCredentials {
    fn access_token(&self) -> Option<String> {
        self.state.read().access_token.clone()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// HTTP client that attaches session credentials, refreshes them once on
/// expiry and ends the session when the refresh fails.
pub struct AuthorizedClient {
    http: Client,
    base_url: Url,
    credentials: Arc<SessionCredentials>,
    refresh_lock: Mutex<()>,
    auth_state: watch::Sender<Option<UserIdentity>>,
}

impl AuthorizedClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credentials: Arc<SessionCredentials>,
        auth_state: watch::Sender<Option<UserIdentity>>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent("storefront-notify/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Transport(format!("invalid api base url '{}': {}", base_url, e)))?;

        tracing::info!(%base_url, "AuthorizedClient created");

        Ok(Self {
            http,
            base_url,
            credentials,
            refresh_lock: Mutex::new(()),
            auth_state,
        })
    }

    pub fn credentials(&self) -> &Arc<SessionCredentials> {
        &self.credentials
    }

    /// Builds `{base}/{segments...}`, percent-encoding each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("api base url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request built by `build` with the current access token.
    ///
    /// A `401` triggers one credential refresh (shared with any concurrent
    /// caller) and one retry. A second `401` or a failed refresh ends the
    /// session.
    pub async fn send<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let (token, version) = self
            .credentials
            .current()
            .ok_or_else(|| ApiError::SessionEnded("no credentials".to_string()))?;

        let response = build(&self.http).bearer_auth(token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        tracing::debug!(url = %response.url(), "access token rejected, refreshing");
        self.refresh(version).await?;

        let (token, _) = self
            .credentials
            .current()
            .ok_or_else(|| ApiError::SessionEnded("credentials cleared during refresh".to_string()))?;

        let response = build(&self.http).bearer_auth(token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(self.end_session("request rejected after credential refresh"));
        }
        check_status(response).await
    }

    async fn refresh(&self, seen_version: u64) -> Result<(), ApiError> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller refreshed (or logged out) while we waited.
        if self.credentials.version() != seen_version {
            return match self.credentials.current() {
                Some(_) => Ok(()),
                None => Err(ApiError::SessionEnded("session ended during refresh".to_string())),
            };
        }

        let Some(refresh_token) = self.credentials.refresh_token() else {
            return Err(self.end_session("no refresh token"));
        };

        let url = self.endpoint(&["auth", "refresh"])?;
        let result = self
            .http
            .post(url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "credential refresh rejected");
                return Err(self.end_session("credential refresh rejected"));
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential refresh failed");
                return Err(self.end_session("credential refresh failed"));
            }
        };

        match response.json::<RefreshResponse>().await {
            Ok(tokens) => {
                self.credentials.rotate(tokens.access_token, tokens.refresh_token);
                tracing::info!("credentials refreshed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential refresh returned an unreadable body");
                Err(self.end_session("credential refresh returned an unreadable body"))
            }
        }
    }

    fn end_session(&self, reason: &str) -> ApiError {
        tracing::warn!(reason, "ending session after terminal authentication failure");
        self.credentials.clear();
        self.auth_state.send_replace(None);
        ApiError::SessionEnded(reason.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%status, %body, "server returned error");
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}
