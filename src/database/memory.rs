use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::database::manager::DatabaseError;
use crate::database::models::{User, UserFields};
use crate::database::users::{with_default_order, UserStore};
use crate::filter::filter_order::FilterOrder;
use crate::filter::filter_where::FilterWhere;
use crate::filter::FilterData;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    rows: BTreeMap<i64, User>,
    closed: bool,
}

/// In-process `UserStore` with the same filtering and uniqueness rules as the
/// Postgres table. Used by tests and for running the API without a database.
#[derive(Default)]
pub struct MemoryUserStore {
    state: RwLock<MemoryState>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    fn to_map(user: &User) -> Map<String, Value> {
        match serde_json::to_value(user) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn ensure_open(state: &MemoryState) -> Result<(), DatabaseError> {
        if state.closed {
            return Err(DatabaseError::QueryError("store is closed".to_string()));
        }
        Ok(())
    }

    fn email_taken(state: &MemoryState, email: &str, except_id: Option<i64>) -> bool {
        state
            .rows
            .values()
            .any(|u| u.email == email && Some(u.id) != except_id)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_many(&self, filter: FilterData) -> Result<Vec<User>, DatabaseError> {
        let state = self.state.read().await;
        Self::ensure_open(&state)?;
        let filter = with_default_order(filter);

        let mut rows: Vec<(Map<String, Value>, &User)> = state
            .rows
            .values()
            .map(|u| (Self::to_map(u), u))
            .filter(|(map, _)| {
                filter
                    .where_clause
                    .as_ref()
                    .map_or(true, |p| FilterWhere::matches(p, map))
            })
            .collect();
        rows.sort_by(|a, b| FilterOrder::compare(&filter.order, &a.0, &b.0));

        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(limit).map(|(_, u)| u.clone()).collect())
    }

    async fn find_unique(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let state = self.state.read().await;
        Self::ensure_open(&state)?;
        Ok(state.rows.get(&id).cloned())
    }

    async fn update(&self, id: i64, fields: &UserFields) -> Result<User, DatabaseError> {
        let mut state = self.state.write().await;
        Self::ensure_open(&state)?;
        if !state.rows.contains_key(&id) {
            return Err(DatabaseError::NotFound(format!("User {} not found", id)));
        }
        if Self::email_taken(&state, &fields.email, Some(id)) {
            return Err(DatabaseError::Conflict(format!("email '{}' already exists", fields.email)));
        }
        let user = fields.clone().into_user(id);
        state.rows.insert(id, user.clone());
        Ok(user)
    }

    async fn create_many(&self, records: &[UserFields]) -> Result<u64, DatabaseError> {
        let mut state = self.state.write().await;
        Self::ensure_open(&state)?;

        // Check the whole batch first so a conflict inserts nothing
        for (i, record) in records.iter().enumerate() {
            let repeated = records[..i].iter().any(|r| r.email == record.email);
            if repeated || Self::email_taken(&state, &record.email, None) {
                return Err(DatabaseError::Conflict(format!("email '{}' already exists", record.email)));
            }
        }

        for record in records {
            state.next_id += 1;
            let id = state.next_id;
            state.rows.insert(id, record.clone().into_user(id));
        }
        Ok(records.len() as u64)
    }

    async fn close(&self) {
        self.state.write().await.closed = true;
    }
}
