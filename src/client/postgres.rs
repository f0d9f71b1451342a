//! Tasks table and its change feed straight over Postgres.
//!
//! The feed relies on the notify trigger installed by `crudctl migrate`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::backend::{Realtime, TaskTable};
use super::error::ClientError;
use super::feed::{ChangeFeed, ChangeKind, EventFilter, RawChange};
use crate::database::models::{NewTask, Task};
use crate::database::query_builder::QueryBuilder;
use crate::filter::{validate_column, FilterData, FilterOrderInfo};

pub struct PgTaskTable {
    pool: PgPool,
    table: String,
}

impl PgTaskTable {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self, ClientError> {
        let table = table.into();
        validate_column(&table).map_err(|e| ClientError::Validation(e.to_string()))?;
        Ok(Self { pool, table })
    }
}

#[async_trait]
impl TaskTable for PgTaskTable {
    async fn list_ordered(&self) -> Result<Vec<Task>, ClientError> {
        let filter = FilterData {
            order: vec![FilterOrderInfo::desc("created_at"), FilterOrderInfo::desc("id")],
            ..FilterData::default()
        };
        let tasks = QueryBuilder::<Task>::new(self.table.as_str())?
            .filter(filter)?
            .select_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn insert(&self, task: &NewTask) -> Result<Task, ClientError> {
        let sql = format!(
            "INSERT INTO \"{}\" (\"title\", \"description\", \"email\", \"image_url\") \
             VALUES ($1, $2, $3, $4) RETURNING *",
            self.table
        );
        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(&task.title)
            .bind(&task.description)
            .bind(&task.email)
            .bind(&task.image_url)
            .fetch_one(&self.pool)
            .await?;
        Ok(task)
    }

    async fn update_description(&self, id: i64, description: &str) -> Result<Task, ClientError> {
        let sql = format!(
            "UPDATE \"{}\" SET \"description\" = $1 WHERE \"id\" = $2 RETURNING *",
            self.table
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(description)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("Task {} not found", id)))
    }

    async fn delete(&self, id: i64) -> Result<(), ClientError> {
        let sql = format!("DELETE FROM \"{}\" WHERE \"id\" = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        debug!("Deleted {} rows from {}", result.rows_affected(), self.table);
        Ok(())
    }
}

/// Key-only notification published by the table trigger.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RowNotification {
    event: ChangeKind,
    id: i64,
}

impl RowNotification {
    /// Rebuild the `{event, new, old}` shape from the key and the current row.
    /// `None` when an inserted or updated row is already gone again.
    fn into_change(self, row: Option<Value>) -> Option<RawChange> {
        match self.event {
            ChangeKind::Delete => Some(RawChange {
                event: ChangeKind::Delete,
                new: None,
                old: Some(json!({ "id": self.id })),
            }),
            event => row.map(|row| RawChange { event, new: Some(row), old: None }),
        }
    }
}

/// `LISTEN`s on `<table>_changes` with a dedicated connection per feed.
pub struct PgRealtime {
    pool: PgPool,
}

impl PgRealtime {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn load_row(pool: &PgPool, table: &str, id: i64) -> Result<Option<Value>, sqlx::Error> {
    let sql = format!(
        "SELECT row_to_json(t)::jsonb FROM \"{}\" t WHERE t.\"id\" = $1",
        table
    );
    sqlx::query_scalar::<_, Value>(&sql).bind(id).fetch_optional(pool).await
}

#[async_trait]
impl Realtime for PgRealtime {
    async fn subscribe(&self, table: &str, filter: EventFilter) -> Result<ChangeFeed, ClientError> {
        validate_column(table).map_err(|e| ClientError::Validation(e.to_string()))?;
        let channel = format!("{}_changes", table);

        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&channel).await?;
        debug!("Listening on {}", channel);

        let pool = self.pool.clone();
        let table_name = table.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(e) => {
                        error!("Change feed on {} stopped: {}", channel, e);
                        break;
                    }
                };
                let note: RowNotification = match serde_json::from_str(notification.payload()) {
                    Ok(note) => note,
                    Err(e) => {
                        warn!("Ignoring malformed notification on {}: {}", channel, e);
                        continue;
                    }
                };
                if !filter.accepts(note.event) {
                    continue;
                }
                let row = match note.event {
                    ChangeKind::Delete => None,
                    _ => match load_row(&pool, &table_name, note.id).await {
                        Ok(row) => row,
                        Err(e) => {
                            warn!("Could not load {} row {}: {}", table_name, note.id, e);
                            continue;
                        }
                    },
                };
                let id = note.id;
                let Some(change) = note.into_change(row) else {
                    debug!("{} row {} vanished before it was read", table_name, id);
                    continue;
                };
                if tx.send(change).is_err() {
                    break;
                }
            }
        });

        Ok(ChangeFeed::new(table, rx).with_worker(worker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(payload: &str) -> RowNotification {
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn decodes_trigger_payload() {
        assert_eq!(
            note(r#"{"event":"UPDATE","id":7}"#),
            RowNotification { event: ChangeKind::Update, id: 7 }
        );
    }

    #[test]
    fn delete_carries_only_the_key() {
        let change = note(r#"{"event":"DELETE","id":42}"#).into_change(None).unwrap();
        assert_eq!(change.event, ChangeKind::Delete);
        assert!(change.new.is_none());
        assert_eq!(change.old, Some(json!({ "id": 42 })));
    }

    #[test]
    fn insert_uses_the_reloaded_row() {
        let row = json!({ "id": 3, "title": "t" });
        let change = note(r#"{"event":"INSERT","id":3}"#).into_change(Some(row.clone())).unwrap();
        assert_eq!(change.new, Some(row));
    }

    #[test]
    fn vanished_row_is_skipped() {
        assert!(note(r#"{"event":"UPDATE","id":3}"#).into_change(None).is_none());
    }
}
