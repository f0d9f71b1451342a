//! One-shot population of the `users` table.

use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

use crate::database::models::UserFields;
use crate::database::{DatabaseError, UserStore};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("error while seeding: {0}")]
    Database(#[from] DatabaseError),

    #[error("cannot read fixture {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("invalid fixture {path}: {message}")]
    Fixture { path: String, message: String },
}

/// The default seed set.
pub fn default_users() -> Vec<UserFields> {
    vec![
        UserFields::new("Harry", "harry@hogwarts", 12, false, "British"),
        UserFields::new("Hermione", "hermione@hogwarts", 11, false, "British"),
        UserFields::new("Ron", "ron@hogwarts", 11, false, "British"),
        UserFields::new("Draco", "draco@hogwarts", 11, false, "British"),
        UserFields::new("Neville", "neville@hogwarts", 11, false, "British"),
        UserFields::new("Mrs. Weasley", "mrsweasley@hogwarts", 40, true, "British"),
        UserFields::new("Minerva", "minerva@hogwarts", 40, true, "British"),
    ]
}

/// Load seed records from a `.json`, `.yaml` or `.yml` file holding a list of users.
pub fn load_fixture(path: &Path) -> Result<Vec<UserFields>, SeedError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: display.clone(),
        source,
    })?;

    let records: Vec<UserFields> = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| SeedError::Fixture {
            path: display.clone(),
            message: e.to_string(),
        })?,
        _ => serde_json::from_str(&content).map_err(|e| SeedError::Fixture {
            path: display.clone(),
            message: e.to_string(),
        })?,
    };

    for (i, record) in records.iter().enumerate() {
        if let Err(field_errors) = record.validate() {
            let mut fields: Vec<&String> = field_errors.keys().collect();
            fields.sort();
            return Err(SeedError::Fixture {
                path: display,
                message: format!("record {} has invalid fields: {:?}", i, fields),
            });
        }
    }
    Ok(records)
}

/// Insert `records` with a single bulk call, then release the store whether the
/// insert succeeded or not. Never retried.
pub async fn run(store: &dyn UserStore, records: &[UserFields]) -> Result<u64, SeedError> {
    info!("start seeding {} users", records.len());
    let result = store.create_many(records).await;
    store.close().await;

    match result {
        Ok(inserted) => {
            info!("seeded {} users", inserted);
            Ok(inserted)
        }
        Err(e) => {
            error!("error while seeding: {}", e);
            Err(e.into())
        }
    }
}
