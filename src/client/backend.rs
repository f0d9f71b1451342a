//! Contracts of the managed backend the task client talks to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AuthError, ClientError, UploadError};
use super::feed::{AuthSubscription, ChangeFeed, EventFilter};
use crate::database::models::{NewTask, Task};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

/// Authenticated user plus token material the client never inspects beyond expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: AuthUser,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// `Ok(None)` means the account exists but awaits email confirmation.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    fn on_auth_state_change(&self) -> AuthSubscription;
}

#[async_trait]
pub trait TaskTable: Send + Sync {
    /// All tasks, newest `created_at` first.
    async fn list_ordered(&self) -> Result<Vec<Task>, ClientError>;

    async fn insert(&self, task: &NewTask) -> Result<Task, ClientError>;

    async fn update_description(&self, id: i64, description: &str) -> Result<Task, ClientError>;

    /// Deleting an id that is already gone is not an error.
    async fn delete(&self, id: i64) -> Result<(), ClientError>;
}

#[async_trait]
pub trait Realtime: Send + Sync {
    async fn subscribe(&self, table: &str, filter: EventFilter) -> Result<ChangeFeed, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Replace an existing object at the same path
    pub upsert: bool,
    pub cache_control_secs: u32,
    pub content_type: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self { upsert: false, cache_control_secs: 3600, content_type: None }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<(), UploadError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;
}
