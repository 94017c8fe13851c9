mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "judge-cli")]
#[command(about = "Judge CLI - Inspect submissions, manage problems and rate limits", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a problem and its test cases from a JSON file
    ImportProblem {
        /// Path to the problem file ({ "problem": {...}, "test_cases": [...] })
        #[arg(short, long)]
        file: String,
    },

    /// Show a submission with its per-test-case results
    Submission {
        /// Submission id
        #[arg(short, long)]
        id: Uuid,
    },

    /// Requeue a submission that ended in INTERNAL_ERROR
    Requeue {
        /// Submission id
        #[arg(short, long)]
        id: Uuid,

        /// Base URL of the running judge API (the queue lives in that process)
        #[arg(long, env = "JUDGE_API_URL", default_value = "http://localhost:3000")]
        api_url: String,

        /// Operator id sent as the admin identity
        #[arg(long, default_value = "judge-cli")]
        admin: String,
    },

    /// Inspect or override per-user rate limits
    Limits {
        #[command(subcommand)]
        action: LimitsAction,
    },
}

#[derive(Subcommand)]
enum LimitsAction {
    /// Show a user's rate limit record
    Show {
        /// User id
        #[arg(short, long)]
        user: String,
    },

    /// Set max requests per window for one service, keeping the current count
    Set {
        /// User id
        #[arg(short, long)]
        user: String,

        /// Service name (e.g., code_submission, ai_hint)
        #[arg(short, long)]
        service: String,

        /// New ceiling for the window
        #[arg(short, long)]
        max: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::ImportProblem { file } => {
            commands::import_problem(&file).await?;
        }
        Commands::Submission { id } => {
            commands::show_submission(id).await?;
        }
        Commands::Requeue { id, api_url, admin } => {
            commands::requeue_submission(id, &api_url, &admin).await?;
        }
        Commands::Limits { action } => match action {
            LimitsAction::Show { user } => {
                commands::show_limits(&user).await?;
            }
            LimitsAction::Set { user, service, max } => {
                commands::set_limit(&user, &service, max).await?;
            }
        },
    }

    Ok(())
}
