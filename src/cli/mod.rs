pub mod commands;
pub mod context;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crudctl")]
#[command(about = "crudctl - seed, migrate and drive the task client from the command line")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Insert the seed users in one batch")]
    Seed {
        #[arg(long, help = "JSON or YAML file with the users to insert (defaults to the built-in set)")]
        file: Option<PathBuf>,
    },

    #[command(about = "Create the users and tasks tables and the realtime trigger")]
    Migrate,

    #[command(about = "Print the DDL without touching the database")]
    Schema,

    #[command(about = "Task operations as a signed-in user")]
    Tasks {
        #[arg(long, help = "Account email (password from CRUDCTL_PASSWORD or prompted)")]
        email: String,
        #[command(subcommand)]
        cmd: commands::tasks::TaskCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Seed { file } => commands::seed::handle(file, output_format).await,
        Commands::Migrate => commands::schema::migrate(output_format).await,
        Commands::Schema => commands::schema::print(output_format),
        Commands::Tasks { email, cmd } => {
            let password = utils::read_password(
                std::env::var("CRUDCTL_PASSWORD").ok(),
                &mut std::io::stdin().lock(),
            )?;
            commands::tasks::handle(cmd, &email, &password, output_format).await
        }
    }
}
