#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use reqwest::StatusCode;

use crudsync::app::{router, AppState};
use crudsync::config::AppConfig;
use crudsync::database::models::UserFields;
use crudsync::database::{MemoryUserStore, UserStore};

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub store: Arc<MemoryUserStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Serve the router over an in-memory store on a free port.
    pub async fn start(seed: &[UserFields]) -> Result<Self> {
        let store = Arc::new(MemoryUserStore::new());
        store.create_many(seed).await?;

        let config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/crudsync_test".to_string()),
            _ => None,
        })?;

        Self::serve(router(AppState::new(store.clone()), &config), store).await
    }

    /// Serve an arbitrary router on a free port.
    pub async fn serve(app: Router, store: Arc<MemoryUserStore>) -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test port")?;

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let server = Self { port, base_url, store, handle };
        server.wait_ready(Duration::from_secs(5)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = client.get(format!("{}/health", self.base_url)).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn harry() -> UserFields {
    UserFields::new("Harry", "harry@hogwarts", 12, false, "British")
}

pub fn hermione() -> UserFields {
    UserFields::new("Hermione", "hermione@hogwarts", 11, false, "British")
}

pub fn minerva() -> UserFields {
    UserFields::new("Minerva", "minerva@hogwarts", 40, true, "British")
}
