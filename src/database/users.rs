use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::database::manager::DatabaseError;
use crate::database::models::{User, UserFields};
use crate::database::query_builder::QueryBuilder;
use crate::filter::{FilterData, FilterOrderInfo};

pub const USERS_TABLE: &str = "users";

/// Typed access to the `users` table.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Rows matching the filter; ordered by id unless the filter says otherwise.
    async fn find_many(&self, filter: FilterData) -> Result<Vec<User>, DatabaseError>;

    async fn find_unique(&self, id: i64) -> Result<Option<User>, DatabaseError>;

    /// Overwrite every writable column of one row. `NotFound` when the id is unknown.
    async fn update(&self, id: i64, fields: &UserFields) -> Result<User, DatabaseError>;

    /// Insert all records in one statement; all or nothing.
    async fn create_many(&self, records: &[UserFields]) -> Result<u64, DatabaseError>;

    /// Connectivity check for `/health`.
    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    /// Release held connections. Further calls may fail.
    async fn close(&self) {}
}

pub(crate) fn with_default_order(mut filter: FilterData) -> FilterData {
    if filter.order.is_empty() {
        filter.order = vec![FilterOrderInfo::asc("id")];
    }
    filter
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_many(&self, filter: FilterData) -> Result<Vec<User>, DatabaseError> {
        QueryBuilder::<User>::new(USERS_TABLE)?
            .filter(with_default_order(filter))?
            .select_all(&self.pool)
            .await
    }

    async fn find_unique(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM \"users\" WHERE \"id\" = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update(&self, id: i64, fields: &UserFields) -> Result<User, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE \"users\" SET \"name\" = $1, \"email\" = $2, \"age\" = $3, \"married\" = $4, \"nationality\" = $5 \
             WHERE \"id\" = $6 RETURNING *",
        )
        .bind(&fields.name)
        .bind(&fields.email)
        .bind(fields.age)
        .bind(fields.married)
        .bind(&fields.nationality)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or_else(|| DatabaseError::NotFound(format!("User {} not found", id)))
    }

    async fn create_many(&self, records: &[UserFields]) -> Result<u64, DatabaseError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO \"users\" (\"name\", \"email\", \"age\", \"married\", \"nationality\") ",
        );
        builder.push_values(records, |mut row, user| {
            row.push_bind(&user.name)
                .push_bind(&user.email)
                .push_bind(user.age)
                .push_bind(user.married)
                .push_bind(&user.nationality);
        });
        debug!("create_many: {}", builder.sql());

        let result = builder.build().execute(&self.pool).await?;
        info!("Inserted {} users", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Closed user store pool");
    }
}
