//! Task manager: CRUD on the remote tasks table plus a live local mirror.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::{ObjectStore, Realtime, Session, TaskTable, UploadOptions};
use super::error::{ClientError, UploadError};
use super::feed::{ChangeFeed, EventFilter, RawChange};
use super::mirror::{TaskChange, TaskMirror};
use crate::config::BackendConfig;
use crate::database::models::{NewTask, Task};

/// A picked file, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), bytes, content_type: None }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Clone)]
pub struct TaskBackends {
    pub table: Arc<dyn TaskTable>,
    pub realtime: Arc<dyn Realtime>,
    pub storage: Arc<dyn ObjectStore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskManagerConfig {
    pub table: String,
    pub bucket: String,
    pub cache_control_secs: u32,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            table: "tasks".to_string(),
            bucket: "tasks-images".to_string(),
            cache_control_secs: 3600,
        }
    }
}

impl From<&BackendConfig> for TaskManagerConfig {
    fn from(config: &BackendConfig) -> Self {
        Self {
            table: config.tasks_table.clone(),
            bucket: config.images_bucket.clone(),
            cache_control_secs: config.cache_control_secs,
        }
    }
}

/// Object path for an upload: the file name (path separators replaced) with
/// the upload time in unix milliseconds appended.
pub fn derive_object_path(file_name: &str, at: DateTime<Utc>) -> String {
    let name: String = file_name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let name = if name.is_empty() { "image".to_string() } else { name };
    format!("{}-{}", name, at.timestamp_millis())
}

pub struct TaskManager {
    backends: TaskBackends,
    config: TaskManagerConfig,
    session: Session,
    mirror: TaskMirror,
    feed: Option<ChangeFeed>,
}

impl TaskManager {
    /// Subscribe to the table, then load it. Changes landing between the two
    /// are queued in the feed and merge idempotently afterwards.
    pub async fn mount(
        backends: TaskBackends,
        config: TaskManagerConfig,
        session: Session,
    ) -> Result<Self, ClientError> {
        let feed = backends.realtime.subscribe(&config.table, EventFilter::all()).await?;
        let mut manager = Self {
            backends,
            config,
            session,
            mirror: TaskMirror::new(),
            feed: Some(feed),
        };
        manager.list_tasks().await?;
        info!("Task manager mounted with {} tasks", manager.mirror.len());
        Ok(manager)
    }

    /// Refetch the whole table into the mirror. On failure the mirror is kept.
    pub async fn list_tasks(&mut self) -> Result<Vec<Task>, ClientError> {
        let tasks = self.backends.table.list_ordered().await?;
        self.mirror.replace_all(tasks);
        Ok(self.mirror.tasks())
    }

    /// Create a task owned by the signed-in user. A failed image upload does
    /// not block creation; the task is stored without an image.
    pub async fn create_task(
        &mut self,
        title: &str,
        description: &str,
        image: Option<ImageFile>,
    ) -> Result<Task, ClientError> {
        let title = title.trim();
        let description = description.trim();
        if title.is_empty() {
            return Err(ClientError::Validation("Title is required".to_string()));
        }
        if description.is_empty() {
            return Err(ClientError::Validation("Description is required".to_string()));
        }

        let image_url = match image {
            Some(file) => self.upload_image(file).await,
            None => None,
        };

        let task = self
            .backends
            .table
            .insert(&NewTask {
                title: title.to_string(),
                description: description.to_string(),
                email: self.session.user.email.clone(),
                image_url,
            })
            .await?;
        info!("Created task {}", task.id);

        self.refresh_after_mutation().await;
        Ok(task)
    }

    pub async fn update_task(&mut self, id: i64, description: &str) -> Result<Task, ClientError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ClientError::Validation("Description is required".to_string()));
        }
        let task = self.backends.table.update_description(id, description).await?;
        info!("Updated task {}", id);

        self.refresh_after_mutation().await;
        Ok(task)
    }

    pub async fn delete_task(&mut self, id: i64) -> Result<(), ClientError> {
        self.backends.table.delete(id).await?;
        info!("Deleted task {}", id);

        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Upload under a fresh path and return the public URL.
    pub async fn try_upload_image(&self, file: ImageFile, at: DateTime<Utc>) -> Result<String, UploadError> {
        let path = derive_object_path(&file.name, at);
        let options = UploadOptions {
            upsert: false,
            cache_control_secs: self.config.cache_control_secs,
            content_type: file.content_type,
        };
        self.backends
            .storage
            .upload(&self.config.bucket, &path, file.bytes, &options)
            .await?;
        debug!("Uploaded {}/{}", self.config.bucket, path);
        Ok(self.backends.storage.public_url(&self.config.bucket, &path))
    }

    /// Like `try_upload_image` at the current time, but failures are logged
    /// and reported as `None`.
    pub async fn upload_image(&self, file: ImageFile) -> Option<String> {
        let name = file.name.clone();
        match self.try_upload_image(file, Utc::now()).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Image upload for {} failed: {}", name, e);
                None
            }
        }
    }

    /// Merge every change already delivered by the feed. Returns how many
    /// were applied.
    pub fn apply_pending(&mut self) -> usize {
        let mut changes = Vec::new();
        if let Some(feed) = self.feed.as_mut() {
            while let Some(raw) = feed.try_next() {
                changes.push(raw);
            }
        }
        let mut applied = 0;
        for raw in changes {
            if self.merge(raw) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for one change and merge it. `None` after teardown or when the
    /// transport closes.
    pub async fn next_change(&mut self) -> Option<TaskChange> {
        loop {
            let raw = self.feed.as_mut()?.next().await?;
            match TaskChange::from_raw(raw) {
                Ok(change) => {
                    self.mirror.apply(change.clone());
                    return Some(change);
                }
                Err(e) => warn!("Skipping change: {}", e),
            }
        }
    }

    fn merge(&mut self, raw: RawChange) -> bool {
        match TaskChange::from_raw(raw) {
            Ok(change) => {
                self.mirror.apply(change);
                true
            }
            Err(e) => {
                warn!("Skipping change: {}", e);
                false
            }
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.mirror.tasks()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_subscribed(&self) -> bool {
        self.feed.is_some()
    }

    /// Cancel the change feed. Nothing reaches the mirror afterwards.
    pub fn teardown(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.unsubscribe();
            info!("Task manager torn down");
        }
    }

    async fn refresh_after_mutation(&mut self) {
        if let Err(e) = self.list_tasks().await {
            warn!("Refetch after mutation failed: {}", e);
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
