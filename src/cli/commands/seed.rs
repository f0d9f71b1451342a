use serde_json::json;
use std::path::PathBuf;

use crate::cli::context::CliContext;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::database::PgUserStore;
use crate::seed;

pub async fn handle(file: Option<PathBuf>, output_format: OutputFormat) -> anyhow::Result<()> {
    let records = match &file {
        Some(path) => seed::load_fixture(path)?,
        None => seed::default_users(),
    };

    let ctx = CliContext::load()?;
    let manager = ctx.database().await?;
    let store = PgUserStore::new(manager.pool().clone());

    // run() releases the pool on both paths
    let inserted = seed::run(&store, &records).await?;

    output_success(
        &output_format,
        &format!("Seeded {} users", inserted),
        Some(json!({ "inserted": inserted })),
    )
}
