mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stratbox")]
#[command(about = "Sandboxed code execution with static screening and auditing")]
#[command(version = "0.3.0")]
pub struct Cli {
    /// Configuration file (TOML); defaults are used if it does not exist
    #[arg(long, global = true, default_value = "stratbox.toml")]
    pub config: PathBuf,

    /// Directory holding the permission store and audit log
    #[arg(long, global = true, default_value = "stratbox-data")]
    pub data_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a code unit through the full pipeline
    Run(RunArgs),
    /// Scan a code unit without executing it
    Scan {
        /// File containing the code unit; reads stdin if omitted
        file: Option<PathBuf>,

        /// Emit findings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a principal with an initial role set
    CreatePrincipal {
        /// Principal identifier
        id: String,

        /// Credential to hash and store
        #[arg(short = 'k', long)]
        credential: String,

        /// Roles to assign (admin, trader, observer)
        #[arg(short, long)]
        roles: Vec<String>,
    },
    /// Assign an existing role to a principal
    AssignRole { principal: String, role: String },
    /// Issue a direct permission grant
    Grant(GrantArgs),
    /// Revoke a grant by id
    Revoke {
        /// Grant id (UUID)
        grant_id: String,
    },
    /// Query the access audit log
    AccessLog {
        /// Filter by principal
        #[arg(long)]
        principal: Option<String>,

        /// Filter by decision (allow, deny)
        #[arg(long, value_parser = ["allow", "deny"])]
        decision: Option<String>,

        /// Show at most this many entries, newest last
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// File containing the code unit; reads stdin if omitted
    pub file: Option<PathBuf>,

    /// Principal to run as
    #[arg(short, long)]
    pub principal: String,

    /// Credential for the principal
    #[arg(short = 'k', long)]
    pub credential: String,

    /// Interpreter for the code unit
    #[arg(short, long, default_value = "python", value_parser = ["python", "shell"])]
    pub interpreter: String,

    /// Wall-clock limit in seconds
    #[arg(long)]
    pub wall_secs: Option<u64>,

    /// Memory limit in megabytes
    #[arg(long)]
    pub memory_mb: Option<u64>,

    /// Emit the full outcome as JSON instead of a human summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct GrantArgs {
    /// Principal issuing the grant
    #[arg(long)]
    pub from: String,

    /// Principal receiving the grant
    #[arg(long)]
    pub to: String,

    /// Permission type (code-execute, file-read, file-write,
    /// network-access, strategy-manage, admin-manage)
    pub permission: String,

    /// Resource type (process, file, network, strategy, system)
    pub resource: String,

    /// Optional resource scope, e.g. a path prefix
    #[arg(long)]
    pub scope: Option<String>,

    /// Expiry in seconds from now (never expires if omitted)
    #[arg(long)]
    pub expires_secs: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    commands::dispatch(cli).await
}
