use serde_json::json;
use tracing::info;

use crate::cli::context::CliContext;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::BackendConfig;
use crate::database::schema;

fn statements(tasks_table: &str) -> anyhow::Result<Vec<String>> {
    let mut all = Vec::new();
    for table in schema::all(tasks_table) {
        all.extend(table.migration_statements()?);
    }
    Ok(all)
}

/// Apply every statement in one transaction.
pub async fn migrate(output_format: OutputFormat) -> anyhow::Result<()> {
    let ctx = CliContext::load()?;
    let statements = statements(&ctx.config.backend.tasks_table)?;
    let manager = ctx.database().await?;

    let mut tx = manager.pool().begin().await?;
    for statement in &statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!("Applied {} statements", statements.len());
    manager.close().await;

    output_success(
        &output_format,
        &format!("Applied {} statements", statements.len()),
        Some(json!({ "statements": statements.len() })),
    )
}

/// Works without `DATABASE_URL`.
pub fn print(output_format: OutputFormat) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let backend = BackendConfig::from_env();
    let statements = statements(&backend.tasks_table)?;
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "statements": statements }))?);
        }
        OutputFormat::Text => {
            for statement in statements {
                println!("{};\n", statement);
            }
        }
    }
    Ok(())
}
