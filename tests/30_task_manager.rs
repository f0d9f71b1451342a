use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crudsync::client::{
    AuthProvider, ClientError, ImageFile, MemoryBackend, ObjectStore, TaskBackends, TaskChange,
    TaskManager, TaskManagerConfig, TaskTable, UploadError, UploadOptions,
};
use crudsync::database::models::NewTask;

async fn mounted(backend: &Arc<MemoryBackend>) -> Result<TaskManager> {
    let session = match backend.sign_up("harry@hogwarts", "secret").await? {
        Some(session) => session,
        None => anyhow::bail!("sign-up did not return a session"),
    };
    let backends = TaskBackends {
        table: backend.clone(),
        realtime: backend.clone(),
        storage: backend.clone(),
    };
    Ok(TaskManager::mount(backends, TaskManagerConfig::default(), session).await?)
}

fn external(title: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        description: "from another client".to_string(),
        email: "hermione@hogwarts".to_string(),
        image_url: None,
    }
}

#[tokio::test]
async fn lists_newest_first() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;

    manager.create_task("first", "a", None).await?;
    manager.create_task("second", "b", None).await?;
    manager.create_task("third", "c", None).await?;

    let titles: Vec<String> = manager.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, vec!["third", "second", "first"]);
    Ok(())
}

#[tokio::test]
async fn created_task_belongs_to_session_user() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;

    let task = manager.create_task("Feed owl", "Hedwig is hungry", None).await?;
    assert_eq!(task.email, "harry@hogwarts");
    assert!(task.image_url.is_none());
    Ok(())
}

#[tokio::test]
async fn own_mutation_echo_is_idempotent() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;

    manager.create_task("once", "only once", None).await?;
    // The refetch already holds the row; the echoed INSERT must not duplicate it
    assert_eq!(manager.apply_pending(), 1);
    assert_eq!(manager.tasks().len(), 1);
    Ok(())
}

#[tokio::test]
async fn remote_insert_arrives_through_feed() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;
    manager.create_task("mine", "local", None).await?;
    manager.apply_pending();

    backend.insert(&external("theirs")).await?;
    match manager.next_change().await {
        Some(TaskChange::Inserted(task)) => assert_eq!(task.title, "theirs"),
        other => panic!("unexpected change {:?}", other),
    }
    assert_eq!(manager.tasks()[0].title, "theirs");

    let mut refetched = mounted_view(&backend).await?;
    assert_eq!(refetched.list_tasks().await?, manager.tasks());
    Ok(())
}

async fn mounted_view(backend: &Arc<MemoryBackend>) -> Result<TaskManager> {
    let session = backend.sign_in_with_password("harry@hogwarts", "secret").await?;
    let backends = TaskBackends {
        table: backend.clone(),
        realtime: backend.clone(),
        storage: backend.clone(),
    };
    Ok(TaskManager::mount(backends, TaskManagerConfig::default(), session).await?)
}

#[tokio::test]
async fn remote_delete_removes_only_that_task() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;
    let keep = manager.create_task("keep", "stays", None).await?;
    let gone = manager.create_task("gone", "goes", None).await?;
    manager.apply_pending();

    backend.delete(gone.id).await?;
    assert_eq!(manager.next_change().await, Some(TaskChange::Deleted { id: gone.id }));

    let ids: Vec<i64> = manager.tasks().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![keep.id]);
    Ok(())
}

#[tokio::test]
async fn update_changes_description_only() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;
    let task = manager.create_task("Quidditch", "practice at 5", None).await?;

    let updated = manager.update_task(task.id, "practice at 6").await?;
    assert_eq!(updated.title, "Quidditch");
    assert_eq!(updated.description, "practice at 6");
    assert_eq!(updated.created_at, task.created_at);
    assert_eq!(manager.tasks()[0].description, "practice at 6");
    Ok(())
}

#[tokio::test]
async fn update_of_missing_task_is_not_found() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;

    let err = manager.update_task(404, "nothing").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn blank_title_is_rejected() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;

    let err = manager.create_task("  ", "desc", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(manager.tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn image_upload_sets_public_url() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;

    let image = ImageFile::new("owl.png", vec![0x89, 0x50, 0x4e, 0x47]).with_content_type("image/png");
    let task = manager.create_task("Owl post", "send letter", Some(image)).await?;

    let url = task.image_url.expect("image url");
    assert!(url.starts_with("memory://storage/v1/object/public/tasks-images/owl.png-"));
    let path = url.rsplit("tasks-images/").next().unwrap();
    assert_eq!(backend.object("tasks-images", path), Some(vec![0x89, 0x50, 0x4e, 0x47]));
    Ok(())
}

#[tokio::test]
async fn upload_path_collision_is_rejected() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let manager = mounted(&backend).await?;
    let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

    manager.try_upload_image(ImageFile::new("cat.png", vec![1]), at).await?;
    let err = manager
        .try_upload_image(ImageFile::new("cat.png", vec![2]), at)
        .await
        .unwrap_err();
    assert_eq!(err, UploadError::AlreadyExists("tasks-images/cat.png-1700000000000".to_string()));
    assert_eq!(backend.object("tasks-images", "cat.png-1700000000000"), Some(vec![1]));
    Ok(())
}

#[tokio::test]
async fn failed_list_leaves_mirror_unchanged() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;
    manager.create_task("survivor", "still here", None).await?;
    let before = manager.tasks();

    backend.set_offline(true);
    assert!(manager.list_tasks().await.is_err());
    assert!(manager.delete_task(before[0].id).await.is_err());
    assert_eq!(manager.tasks(), before);
    Ok(())
}

struct FailingStorage;

#[async_trait::async_trait]
impl ObjectStore for FailingStorage {
    async fn upload(
        &self,
        _bucket: &str,
        _path: &str,
        _bytes: Vec<u8>,
        _options: &UploadOptions,
    ) -> Result<(), UploadError> {
        Err(UploadError::Storage("bucket not found".to_string()))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("unused://{}/{}", bucket, path)
    }
}

#[tokio::test]
async fn failed_upload_still_creates_task() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let session = match backend.sign_up("harry@hogwarts", "secret").await? {
        Some(session) => session,
        None => anyhow::bail!("sign-up did not return a session"),
    };
    let backends = TaskBackends {
        table: backend.clone(),
        realtime: backend.clone(),
        storage: Arc::new(FailingStorage),
    };
    let mut manager = TaskManager::mount(backends, TaskManagerConfig::default(), session).await?;

    assert!(manager.upload_image(ImageFile::new("map.png", vec![1])).await.is_none());
    let task = manager
        .create_task("Marauders", "mischief", Some(ImageFile::new("map.png", vec![1])))
        .await?;
    assert!(task.image_url.is_none());
    assert_eq!(manager.tasks().len(), 1);
    Ok(())
}

#[tokio::test]
async fn teardown_stops_merging() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;
    manager.apply_pending();

    manager.teardown();
    assert!(!manager.is_subscribed());
    assert_eq!(backend.subscriber_count(), 0);

    backend.insert(&external("late")).await?;
    assert_eq!(manager.apply_pending(), 0);
    assert!(manager.next_change().await.is_none());
    assert!(manager.tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_removes_task_from_mirror_and_refetch() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;
    let keep = manager.create_task("keep", "stays", None).await?;
    let gone = manager.create_task("gone", "goes", None).await?;

    manager.delete_task(gone.id).await?;
    assert!(manager.tasks().iter().all(|t| t.id != gone.id));

    // Both INSERT echoes and the DELETE are still queued
    manager.apply_pending();
    assert!(manager.tasks().iter().all(|t| t.id != gone.id));

    let refetched = manager.list_tasks().await?;
    let ids: Vec<i64> = refetched.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![keep.id]);
    assert_eq!(manager.tasks(), refetched);
    Ok(())
}

#[tokio::test]
async fn queued_changes_applied_after_refetch_converge() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manager = mounted(&backend).await?;
    manager.apply_pending();

    let theirs = backend.insert(&external("theirs")).await?;
    backend.update_description(theirs.id, "edited elsewhere").await?;

    // The refetch already sees the edit; the older INSERT lands after it
    let refetched = manager.list_tasks().await?;
    assert_eq!(refetched[0].description, "edited elsewhere");
    assert_eq!(manager.apply_pending(), 2);

    assert_eq!(manager.tasks()[0].description, "edited elsewhere");
    assert_eq!(manager.tasks(), manager.list_tasks().await?);
    Ok(())
}
