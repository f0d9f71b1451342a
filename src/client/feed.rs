//! Push channels: row change feeds and auth state subscriptions.
//!
//! Both are cancellable handles. Dropping one unsubscribes immediately, and
//! anything still buffered in it is discarded.

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::backend::AuthEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change as delivered by the transport: `{event, new, old}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub event: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

/// Which change kinds a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kinds: Vec<ChangeKind>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self { kinds: vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete] }
    }

    pub fn only(kinds: &[ChangeKind]) -> Self {
        Self { kinds: kinds.to_vec() }
    }

    pub fn accepts(&self, kind: ChangeKind) -> bool {
        self.kinds.contains(&kind)
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Ordered stream of changes for one table.
pub struct ChangeFeed {
    table: String,
    rx: mpsc::UnboundedReceiver<RawChange>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(table: impl Into<String>, rx: mpsc::UnboundedReceiver<RawChange>) -> Self {
        Self { table: table.into(), rx, worker: None }
    }

    /// Attach the task pumping the transport; it is aborted with the feed.
    pub fn with_worker(mut self, worker: JoinHandle<()>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Wait for the next change. `None` once the transport has gone away.
    pub async fn next(&mut self) -> Option<RawChange> {
        self.rx.recv().await
    }

    /// Next already-delivered change, without waiting.
    pub fn try_next(&mut self) -> Option<RawChange> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        tracing::debug!("Unsubscribed from {} changes", self.table);
    }
}

impl Stream for ChangeFeed {
    type Item = RawChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Subscription to out-of-band auth state changes.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub fn new(rx: broadcast::Receiver<AuthEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Lagged events are skipped; only the latest
    /// auth state matters.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Auth subscription lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Auth subscription lagged, skipped {} events", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}
