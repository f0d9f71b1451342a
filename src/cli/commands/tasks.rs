use clap::Subcommand;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::context::CliContext;
use crate::cli::utils::{output_success, output_tasks, task_line};
use crate::cli::OutputFormat;
use crate::client::{ImageFile, SessionController, SessionState, TaskChange, TaskManager};

const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Subcommand)]
pub enum TaskCommands {
    #[command(about = "Create the account and sign in")]
    Signup,

    #[command(about = "List tasks, newest first")]
    List,

    #[command(about = "Create a task, optionally with an image")]
    Add {
        #[arg(long, help = "Task title")]
        title: String,
        #[arg(long, help = "Task description")]
        description: String,
        #[arg(long, help = "Image file to upload first")]
        image: Option<PathBuf>,
    },

    #[command(about = "Change a task's description")]
    Edit {
        #[arg(help = "Task id")]
        id: i64,
        #[arg(long, help = "New description")]
        description: String,
    },

    #[command(about = "Delete a task")]
    Delete {
        #[arg(help = "Task id")]
        id: i64,
    },

    #[command(about = "Print changes as they happen until interrupted")]
    Watch,
}

pub async fn handle(
    cmd: TaskCommands,
    email: &str,
    password: &str,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let ctx = CliContext::load()?;
    if let TaskCommands::Add { image: Some(_), .. } = &cmd {
        ctx.ensure_object_store()?;
    }
    let register = matches!(cmd, TaskCommands::Signup);
    let (mut controller, storage) = ctx.authenticate(email, password, register).await?;

    let session = match controller.session() {
        Some(session) => session,
        None => anyhow::bail!("Not signed in"),
    };
    if let TaskCommands::Signup = cmd {
        controller.unmount();
        return output_success(
            &output_format,
            &format!("Signed up {}", session.user.email),
            Some(json!({ "user": session.user })),
        );
    }

    let db = ctx.database().await?;
    let backends = ctx.task_backends(&db, storage)?;
    let mut manager = TaskManager::mount(backends, ctx.task_config(), session).await?;

    let result = run_command(cmd, &mut manager, &mut controller, &output_format).await;

    manager.teardown();
    controller.unmount();
    db.close().await;
    result
}

async fn run_command(
    cmd: TaskCommands,
    manager: &mut TaskManager,
    controller: &mut SessionController,
    output_format: &OutputFormat,
) -> anyhow::Result<()> {
    match cmd {
        TaskCommands::Signup => Ok(()),
        TaskCommands::List => output_tasks(output_format, &manager.tasks()),
        TaskCommands::Add { title, description, image } => {
            let image = match image {
                Some(path) => Some(read_image(&path)?),
                None => None,
            };
            let task = manager.create_task(&title, &description, image).await?;
            output_success(
                output_format,
                &format!("Created task #{}", task.id),
                Some(serde_json::to_value(&task)?),
            )
        }
        TaskCommands::Edit { id, description } => {
            let task = manager.update_task(id, &description).await?;
            output_success(
                output_format,
                &format!("Updated task #{}", task.id),
                Some(serde_json::to_value(&task)?),
            )
        }
        TaskCommands::Delete { id } => {
            manager.delete_task(id).await?;
            output_success(output_format, &format!("Deleted task #{}", id), Some(json!({ "id": id })))
        }
        TaskCommands::Watch => watch(manager, controller, output_format).await,
    }
}

async fn watch(
    manager: &mut TaskManager,
    controller: &mut SessionController,
    output_format: &OutputFormat,
) -> anyhow::Result<()> {
    output_tasks(output_format, &manager.tasks())?;
    info!("Watching for changes, press Ctrl-C to stop");

    let mut session_check = tokio::time::interval(SESSION_CHECK_INTERVAL);
    session_check.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = manager.next_change() => {
                let Some(change) = change else { break };
                print_change(&change, output_format)?;
            }
            _ = session_check.tick() => {
                match controller.revalidate().await {
                    Ok(SessionState::Anonymous) => anyhow::bail!("Session expired, sign in again"),
                    Ok(SessionState::Authenticated(_)) => {}
                    Err(e) => warn!("Session check failed: {}", e),
                }
            }
        }
    }
    Ok(())
}

fn print_change(change: &TaskChange, output_format: &OutputFormat) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let value = match change {
                TaskChange::Inserted(task) => json!({ "event": "INSERT", "task": task }),
                TaskChange::Updated(task) => json!({ "event": "UPDATE", "task": task }),
                TaskChange::Deleted { id } => json!({ "event": "DELETE", "id": id }),
            };
            println!("{}", serde_json::to_string(&value)?);
        }
        OutputFormat::Text => match change {
            TaskChange::Inserted(task) => println!("+ {}", task_line(task)),
            TaskChange::Updated(task) => println!("~ {}", task_line(task)),
            TaskChange::Deleted { id } => println!("- #{}", id),
        },
    }
    Ok(())
}

fn read_image(path: &Path) -> anyhow::Result<ImageFile> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    let mut file = ImageFile::new(name, bytes);
    if let Some(content_type) = content_type_for(path) {
        file = file.with_content_type(content_type);
    }
    Ok(file)
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
