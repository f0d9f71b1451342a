//! Auth and storage against a GoTrue/Storage style REST backend.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::backend::{AuthEvent, AuthEventKind, AuthProvider, AuthUser, ObjectStore, Session, UploadOptions};
use super::error::{AuthError, AuthErrorKind, ClientError, UploadError};
use super::feed::AuthSubscription;

/// Parse the backend base URL and append `segments` as escaped path segments.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        for segment in segments {
            // Object paths may contain '/', which stay separators
            path.extend(segment.split('/'));
        }
    }
    url
}

fn parse_base(base_url: &str) -> Result<Url, ClientError> {
    let url = Url::parse(base_url)
        .map_err(|e| ClientError::Validation(format!("Invalid backend URL {}: {}", base_url, e)))?;
    if url.cannot_be_a_base() {
        return Err(ClientError::Validation(format!("Invalid backend URL {}", base_url)));
    }
    Ok(url)
}

/// First non-empty message field of an error body.
fn error_message(body: &Value) -> Option<String> {
    ["msg", "error_description", "message", "error"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .find(|msg| !msg.is_empty())
        .map(str::to_string)
}

fn classify_auth_error(status: StatusCode, message: &str) -> AuthErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("already registered") || lower.contains("already exists") {
        AuthErrorKind::AlreadyRegistered
    } else if lower.contains("not confirmed") {
        AuthErrorKind::EmailNotConfirmed
    } else if lower.contains("invalid login") || status == StatusCode::UNAUTHORIZED {
        AuthErrorKind::InvalidCredentials
    } else if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
        AuthErrorKind::InvalidInput
    } else {
        AuthErrorKind::Other
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self, fallback_email: &str) -> Session {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => Utc.timestamp_opt(at, 0).single(),
            (None, Some(secs)) => Some(Utc::now() + Duration::seconds(secs)),
            (None, None) => None,
        };
        Session {
            user: AuthUser {
                id: self.user.id,
                email: self.user.email.unwrap_or_else(|| fallback_email.to_string()),
            },
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

pub struct RestAuth {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestAuth {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_client(reqwest::Client::new(), base_url, anon_key)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        anon_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            http,
            base: parse_base(base_url)?,
            anon_key: anon_key.into(),
            session: Mutex::new(None),
            events,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, kind: AuthEventKind, session: Option<Session>) {
        *self.lock() = session.clone();
        let _ = self.events.send(AuthEvent { kind, session });
    }

    async fn refresh(&self, expired: Session) -> Result<Option<Session>, AuthError> {
        let Some(refresh_token) = expired.refresh_token.as_deref() else {
            warn!("Session for {} expired and cannot be refreshed", expired.user.email);
            self.store(AuthEventKind::SignedOut, None);
            return Ok(None);
        };

        let mut url = endpoint(&self.base, &["auth", "v1", "token"]);
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");
        let body = match self
            .post(url, &self.anon_key, &json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(body) => body,
            // Offline: keep the session and let the caller retry
            Err(e) if e.kind == AuthErrorKind::Network => return Err(e),
            Err(e) => {
                warn!("Refresh for {} rejected: {}", expired.user.email, e);
                self.store(AuthEventKind::SignedOut, None);
                return Ok(None);
            }
        };

        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::new(AuthErrorKind::Other, format!("Malformed refresh response: {}", e)))?;
        let session = token.into_session(&expired.user.email);
        debug!("Refreshed session for {}", session.user.email);
        self.store(AuthEventKind::TokenRefreshed, Some(session.clone()));
        Ok(Some(session))
    }

    async fn post(&self, url: Url, bearer: &str, body: &Value) -> Result<Value, AuthError> {
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() {
            return Ok(body);
        }
        let message = error_message(&body).unwrap_or_else(|| format!("Auth request failed with {}", status));
        debug!("Auth request failed ({}): {}", status, message);
        Err(AuthError::new(classify_auth_error(status, &message), message))
    }
}

#[async_trait]
impl AuthProvider for RestAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        let url = endpoint(&self.base, &["auth", "v1", "signup"]);
        let body = self
            .post(url, &self.anon_key, &json!({ "email": email, "password": password }))
            .await?;

        // Without a session in the response the account awaits confirmation
        if body.get("access_token").is_none() {
            return Ok(None);
        }
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::new(AuthErrorKind::Other, format!("Malformed sign-up response: {}", e)))?;
        let session = token.into_session(email);
        self.store(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let mut url = endpoint(&self.base, &["auth", "v1", "token"]);
        url.query_pairs_mut().append_pair("grant_type", "password");
        let body = self
            .post(url, &self.anon_key, &json!({ "email": email, "password": password }))
            .await?;

        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::new(AuthErrorKind::Other, format!("Malformed sign-in response: {}", e)))?;
        let session = token.into_session(email);
        self.store(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = match self.lock().as_ref() {
            Some(session) => session.access_token.clone(),
            None => return Ok(()),
        };
        let url = endpoint(&self.base, &["auth", "v1", "logout"]);
        self.post(url, &token, &json!({})).await?;
        self.store(AuthEventKind::SignedOut, None);
        Ok(())
    }

    /// The stored session; an expired one is exchanged through the refresh
    /// grant first. A rejected refresh signs the user out.
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let current = self.lock().clone();
        match current {
            Some(session) if session.is_expired(Utc::now()) => self.refresh(session).await,
            other => Ok(other),
        }
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }
}

pub struct RestStorage {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    access_token: Option<String>,
}

impl RestStorage {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: parse_base(base_url)?,
            anon_key: anon_key.into(),
            access_token: None,
        })
    }

    /// Upload as the signed-in user instead of the anonymous role.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

#[async_trait]
impl ObjectStore for RestStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<(), UploadError> {
        let url = endpoint(&self.base, &["storage", "v1", "object", bucket, path]);
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header("x-upsert", options.upsert.to_string())
            .header("cache-control", format!("max-age={}", options.cache_control_secs))
            .header(
                "content-type",
                options.content_type.as_deref().unwrap_or("application/octet-stream"),
            )
            .body(bytes)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let message = error_message(&body).unwrap_or_else(|| format!("Upload failed with {}", status));
        let duplicate = status == StatusCode::CONFLICT
            || body.get("statusCode").and_then(Value::as_str) == Some("409")
            || message.to_lowercase().contains("duplicate")
            || message.to_lowercase().contains("already exists");
        warn!("Upload to {}/{} failed ({}): {}", bucket, path, status, message);

        if duplicate {
            Err(UploadError::AlreadyExists(format!("{}/{}", bucket, path)))
        } else {
            Err(UploadError::Storage(message))
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        endpoint(&self.base, &["storage", "v1", "object", "public", bucket, path]).to_string()
    }
}
