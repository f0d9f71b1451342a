//! In-process backend implementing auth, the tasks table, its change feed and
//! object storage. Used by `crudctl` without a backend URL and by the tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, decode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::backend::{
    AuthEvent, AuthEventKind, AuthProvider, AuthUser, ObjectStore, Realtime, Session, TaskTable,
    UploadOptions,
};
use super::error::{AuthError, AuthErrorKind, ClientError, UploadError};
use super::feed::{AuthSubscription, ChangeFeed, ChangeKind, EventFilter, RawChange};
use crate::database::models::{NewTask, Task};

const SESSION_LIFETIME_SECS: i64 = 3600;
const MIN_PASSWORD_LEN: usize = 6;
const PUBLIC_URL_BASE: &str = "memory://storage/v1/object/public";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    role: String,
    iat: i64,
    exp: i64,
}

struct Account {
    id: Uuid,
    salt: String,
    password_hash: String,
    confirmed: bool,
}

struct Subscriber {
    table: String,
    filter: EventFilter,
    tx: mpsc::UnboundedSender<RawChange>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    tasks: BTreeMap<i64, Task>,
    next_task_id: i64,
    last_created_at: Option<DateTime<Utc>>,
    subscribers: Vec<Subscriber>,
    objects: HashMap<(String, String), Vec<u8>>,
    offline: bool,
    require_confirmation: bool,
}

pub struct MemoryBackend {
    table: String,
    secret: Vec<u8>,
    events: broadcast::Sender<AuthEvent>,
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_table("tasks")
    }

    pub fn with_table(table: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            table: table.into(),
            secret: Uuid::new_v4().as_bytes().to_vec(),
            events,
            state: Mutex::new(State { next_task_id: 1, ..State::default() }),
        }
    }

    /// New sign-ups wait for `confirm_email` before they can sign in.
    pub fn require_email_confirmation(self, required: bool) -> Self {
        self.lock().require_confirmation = required;
        self
    }

    pub fn confirm_email(&self, email: &str) -> bool {
        match self.lock().accounts.get_mut(&email.to_lowercase()) {
            Some(account) => {
                account.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// While offline every call fails as a transport error would.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// End the current session from the server side, as token expiry or a
    /// sign-out on another device would.
    pub fn expire_session(&self) {
        let ended = self.lock().session.take();
        if ended.is_some() {
            self.emit(AuthEventKind::SignedOut, None);
        }
    }

    /// Issue a fresh access token for the current session.
    pub fn refresh_session(&self) -> Result<Session, AuthError> {
        let user = {
            let state = self.lock();
            state
                .session
                .as_ref()
                .map(|s| s.user.clone())
                .ok_or_else(|| AuthError::new(AuthErrorKind::Other, "No active session"))?
        };
        let session = self.issue_session(user)?;
        self.lock().session = Some(session.clone());
        self.emit(AuthEventKind::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    /// Check an access token issued by this backend.
    pub fn verify_access_token(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &Validation::default())
            .map_err(|e| AuthError::new(AuthErrorKind::InvalidCredentials, format!("Invalid token: {}", e)))?;
        let id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AuthError::new(AuthErrorKind::InvalidCredentials, "Invalid token subject"))?;
        Ok(AuthUser { id, email: data.claims.email })
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(&(bucket.to_string(), path.to_string())).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> Result<(), ClientError> {
        if self.lock().offline {
            return Err(ClientError::DataAccess("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn ensure_auth_online(&self) -> Result<(), AuthError> {
        if self.lock().offline {
            return Err(AuthError::network("Failed to reach the auth service"));
        }
        Ok(())
    }

    fn issue_session(&self, user: AuthUser) -> Result<Session, AuthError> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(SESSION_LIFETIME_SECS);
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: "authenticated".to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let access_token = encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| AuthError::new(AuthErrorKind::Other, format!("Failed to sign session: {}", e)))?;

        Ok(Session {
            user,
            access_token,
            refresh_token: Some(Uuid::new_v4().simple().to_string()),
            expires_at: Some(expires_at),
        })
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        // No receivers is fine
        let _ = self.events.send(AuthEvent { kind, session });
    }

    fn publish(state: &mut State, table: &str, change: RawChange) {
        state.subscribers.retain(|sub| {
            if sub.table != table || !sub.filter.accepts(change.event) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(change.clone()).is_ok()
        });
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn row(task: &Task) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(task).map_err(|e| ClientError::DataAccess(e.to_string()))
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        self.ensure_auth_online()?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::new(
                AuthErrorKind::InvalidInput,
                format!("Password should be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }

        let key = email.to_lowercase();
        let (user, confirmed) = {
            let mut state = self.lock();
            if state.accounts.contains_key(&key) {
                return Err(AuthError::already_registered());
            }
            let salt = Uuid::new_v4().simple().to_string();
            let account = Account {
                id: Uuid::new_v4(),
                password_hash: hash_password(&salt, password),
                salt,
                confirmed: !state.require_confirmation,
            };
            let user = AuthUser { id: account.id, email: key.clone() };
            let confirmed = account.confirmed;
            state.accounts.insert(key, account);
            (user, confirmed)
        };
        debug!("Registered {}", user.email);

        if !confirmed {
            return Ok(None);
        }
        let session = self.issue_session(user)?;
        self.lock().session = Some(session.clone());
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.ensure_auth_online()?;
        let user = {
            let state = self.lock();
            let key = email.to_lowercase();
            let account = state.accounts.get(&key).ok_or_else(AuthError::invalid_credentials)?;
            if hash_password(&account.salt, password) != account.password_hash {
                return Err(AuthError::invalid_credentials());
            }
            if !account.confirmed {
                return Err(AuthError::new(AuthErrorKind::EmailNotConfirmed, "Email not confirmed"));
            }
            AuthUser { id: account.id, email: key }
        };

        let session = self.issue_session(user)?;
        self.lock().session = Some(session.clone());
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.ensure_auth_online()?;
        let ended = self.lock().session.take();
        if ended.is_some() {
            self.emit(AuthEventKind::SignedOut, None);
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        self.ensure_auth_online()?;
        Ok(self.lock().session.clone())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }
}

#[async_trait]
impl TaskTable for MemoryBackend {
    async fn list_ordered(&self) -> Result<Vec<Task>, ClientError> {
        self.ensure_online()?;
        let mut tasks: Vec<Task> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }

    async fn insert(&self, task: &NewTask) -> Result<Task, ClientError> {
        self.ensure_online()?;
        let mut state = self.lock();

        let mut created_at = Utc::now();
        if let Some(last) = state.last_created_at {
            if created_at <= last {
                created_at = last + Duration::microseconds(1);
            }
        }
        state.last_created_at = Some(created_at);

        let id = state.next_task_id;
        state.next_task_id += 1;
        let task = Task {
            id,
            title: task.title.clone(),
            description: task.description.clone(),
            email: task.email.clone(),
            image_url: task.image_url.clone(),
            created_at,
        };
        state.tasks.insert(id, task.clone());

        let change = RawChange { event: ChangeKind::Insert, new: Some(row(&task)?), old: None };
        Self::publish(&mut state, &self.table, change);
        Ok(task)
    }

    async fn update_description(&self, id: i64, description: &str) -> Result<Task, ClientError> {
        self.ensure_online()?;
        let mut state = self.lock();
        let task = match state.tasks.get_mut(&id) {
            Some(task) => {
                task.description = description.to_string();
                task.clone()
            }
            None => return Err(ClientError::NotFound(format!("Task {} not found", id))),
        };

        let change = RawChange {
            event: ChangeKind::Update,
            new: Some(row(&task)?),
            old: Some(json!({ "id": id })),
        };
        Self::publish(&mut state, &self.table, change);
        Ok(task)
    }

    async fn delete(&self, id: i64) -> Result<(), ClientError> {
        self.ensure_online()?;
        let mut state = self.lock();
        if state.tasks.remove(&id).is_some() {
            let change = RawChange { event: ChangeKind::Delete, new: None, old: Some(json!({ "id": id })) };
            Self::publish(&mut state, &self.table, change);
        }
        Ok(())
    }
}

#[async_trait]
impl Realtime for MemoryBackend {
    async fn subscribe(&self, table: &str, filter: EventFilter) -> Result<ChangeFeed, ClientError> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(Subscriber { table: table.to_string(), filter, tx });
        debug!("Subscribed to {} changes", table);
        Ok(ChangeFeed::new(table, rx))
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<(), UploadError> {
        let mut state = self.lock();
        if state.offline {
            return Err(UploadError::Storage("storage unreachable".to_string()));
        }
        let key = (bucket.to_string(), path.to_string());
        if state.objects.contains_key(&key) && !options.upsert {
            return Err(UploadError::AlreadyExists(format!("{}/{}", bucket, path)));
        }
        state.objects.insert(key, bytes);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", PUBLIC_URL_BASE, bucket, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: "d".to_string(),
            email: "harry@hogwarts".to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected() {
        let backend = MemoryBackend::new();
        backend.sign_up("harry@hogwarts", "secret").await.unwrap();
        let err = backend.sign_up("harry@hogwarts", "secret").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::AlreadyRegistered);
        assert_eq!(err.message, "User already registered");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let backend = MemoryBackend::new();
        backend.sign_up("harry@hogwarts", "secret").await.unwrap();
        let err = backend.sign_in_with_password("harry@hogwarts", "nope!!").await.unwrap_err();
        assert_eq!(err.message, "Invalid login credentials");
    }

    #[tokio::test]
    async fn tokens_verify() {
        let backend = MemoryBackend::new();
        let session = backend.sign_up("harry@hogwarts", "secret").await.unwrap().unwrap();
        let user = backend.verify_access_token(&session.access_token).unwrap();
        assert_eq!(user, session.user);
    }

    #[tokio::test]
    async fn confirmation_gate() {
        let backend = MemoryBackend::new().require_email_confirmation(true);
        assert!(backend.sign_up("ron@hogwarts", "secret").await.unwrap().is_none());
        let err = backend.sign_in_with_password("ron@hogwarts", "secret").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::EmailNotConfirmed);
        assert!(backend.confirm_email("ron@hogwarts"));
        assert!(backend.sign_in_with_password("ron@hogwarts", "secret").await.is_ok());
    }

    #[tokio::test]
    async fn created_at_is_strictly_increasing() {
        let backend = MemoryBackend::new();
        let a = backend.insert(&new_task("a")).await.unwrap();
        let b = backend.insert(&new_task("b")).await.unwrap();
        assert!(b.created_at > a.created_at);
        let listed = backend.list_ordered().await.unwrap();
        assert_eq!(listed[0].id, b.id);
    }

    #[tokio::test]
    async fn feed_respects_filter_and_table() {
        let backend = MemoryBackend::new();
        let mut deletes = backend.subscribe("tasks", EventFilter::only(&[ChangeKind::Delete])).await.unwrap();
        let mut other = backend.subscribe("notes", EventFilter::all()).await.unwrap();

        let task = backend.insert(&new_task("a")).await.unwrap();
        backend.delete(task.id).await.unwrap();

        let change = deletes.try_next().unwrap();
        assert_eq!(change.event, ChangeKind::Delete);
        assert!(deletes.try_next().is_none());
        assert!(other.try_next().is_none());
    }

    #[tokio::test]
    async fn dropped_feeds_are_pruned() {
        let backend = MemoryBackend::new();
        let feed = backend.subscribe("tasks", EventFilter::all()).await.unwrap();
        assert_eq!(backend.subscriber_count(), 1);
        drop(feed);
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn uploads_never_overwrite_without_upsert() {
        let backend = MemoryBackend::new();
        let options = UploadOptions::default();
        backend.upload("b", "p", vec![1], &options).await.unwrap();
        let err = backend.upload("b", "p", vec![2], &options).await.unwrap_err();
        assert!(matches!(err, UploadError::AlreadyExists(_)));
        assert_eq!(backend.object("b", "p"), Some(vec![1]));
    }
}
