use std::sync::Arc;
use tracing::{info, warn};

use crate::client::{
    AuthProvider, MemoryBackend, ObjectStore, PgRealtime, PgTaskTable, RestAuth, RestStorage,
    SessionController, SignUpOutcome, TaskBackends, TaskManagerConfig,
};
use crate::config::AppConfig;
use crate::database::DatabaseManager;

/// Everything a command needs, resolved from the environment once.
pub struct CliContext {
    pub config: AppConfig,
}

impl CliContext {
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Ok(Self { config: AppConfig::from_env()? })
    }

    pub async fn database(&self) -> anyhow::Result<DatabaseManager> {
        Ok(DatabaseManager::connect(&self.config.database).await?)
    }

    pub fn task_config(&self) -> TaskManagerConfig {
        TaskManagerConfig::from(&self.config.backend)
    }

    fn remote(&self) -> Option<(&str, &str)> {
        self.config.backend.remote()
    }

    /// Image uploads need the remote object store; in-process objects do not
    /// outlive the command.
    pub fn ensure_object_store(&self) -> anyhow::Result<()> {
        if self.remote().is_none() {
            anyhow::bail!("--image needs BACKEND_URL and BACKEND_ANON_KEY for object storage");
        }
        Ok(())
    }

    /// Mount a session controller and authenticate. Without `BACKEND_URL` the
    /// account lives in an in-process auth backend, so it is always created.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        register: bool,
    ) -> anyhow::Result<(SessionController, Arc<dyn ObjectStore>)> {
        let (auth, local): (Arc<dyn AuthProvider>, Option<Arc<MemoryBackend>>) = match self.remote() {
            Some((url, key)) => (Arc::new(RestAuth::new(url, key)?) as Arc<dyn AuthProvider>, None),
            None => {
                warn!("BACKEND_URL or BACKEND_ANON_KEY not set, using in-process auth and storage");
                let backend = Arc::new(MemoryBackend::with_table(self.config.backend.tasks_table.clone()));
                let auth: Arc<dyn AuthProvider> = backend.clone();
                (auth, Some(backend))
            }
        };

        let mut controller = SessionController::mount(auth).await?;
        let session = if register || local.is_some() {
            match controller.sign_up(email, password).await? {
                SignUpOutcome::Authenticated(session) => session,
                SignUpOutcome::ConfirmationPending => {
                    anyhow::bail!("Check {} for a confirmation link, then sign in", email)
                }
            }
        } else {
            controller.sign_in(email, password).await?
        };
        info!("Authenticated as {}", session.user.email);

        let storage: Arc<dyn ObjectStore> = match (self.remote(), local) {
            (_, Some(backend)) => backend as Arc<dyn ObjectStore>,
            (Some((url, key)), None) => {
                Arc::new(RestStorage::new(url, key)?.with_access_token(session.access_token.clone()))
            }
            (None, None) => anyhow::bail!("No storage backend configured"),
        };
        Ok((controller, storage))
    }

    pub fn task_backends(
        &self,
        manager: &DatabaseManager,
        storage: Arc<dyn ObjectStore>,
    ) -> anyhow::Result<TaskBackends> {
        let pool = manager.pool().clone();
        Ok(TaskBackends {
            table: Arc::new(PgTaskTable::new(pool.clone(), self.config.backend.tasks_table.clone())?),
            realtime: Arc::new(PgRealtime::new(pool)),
            storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> CliContext {
        let pairs: Vec<(String, String)> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let config = AppConfig::from_lookup(|key| {
            if key == "DATABASE_URL" {
                return Some("postgres://localhost/crudsync".to_string());
            }
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap();
        CliContext { config }
    }

    #[test]
    fn image_upload_requires_remote_storage() {
        let err = context(&[]).ensure_object_store().unwrap_err();
        assert!(err.to_string().contains("BACKEND_URL"));

        let half = context(&[("BACKEND_URL", "https://project.backend.test")]);
        assert!(half.ensure_object_store().is_err());
    }

    #[test]
    fn configured_backend_accepts_images() {
        let ctx = context(&[
            ("BACKEND_URL", "https://project.backend.test"),
            ("BACKEND_ANON_KEY", "anon"),
        ]);
        assert!(ctx.ensure_object_store().is_ok());
    }
}
