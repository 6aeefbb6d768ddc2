mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "folio",
    about = "Action orchestration engine for editorial workflows",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .folio/)
    #[arg(long, global = true, env = "FOLIO_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .folio/ in the current directory
    Init {
        /// Use the in-memory store (nothing persists between commands)
        #[arg(long)]
        memory: bool,
    },

    /// Post an action document through the orchestrator
    Post {
        /// JSON file with the action, or `-` for stdin
        file: PathBuf,
        /// Acting user; enables the access check
        #[arg(long, env = "FOLIO_USER")]
        user: Option<String>,
        /// Post as the trigger engine would (skips edit rules and access)
        #[arg(long)]
        triggered: bool,
        /// Wait for worker completion
        #[arg(long)]
        rpc: bool,
        /// Refuse action types without a dedicated handler
        #[arg(long)]
        strict: bool,
    },

    /// Upsert a scope, stage or user document
    Put {
        /// JSON file with the document, or `-` for stdin
        file: PathBuf,
        /// Acting user; enables the access check
        #[arg(long, env = "FOLIO_USER")]
        user: Option<String>,
    },

    /// Show a document
    Get {
        id: String,
        /// Read as this user, applying the access check
        #[arg(long, env = "FOLIO_USER")]
        user: Option<String>,
    },

    /// Delete a document at its current revision
    Delete {
        id: String,
        #[arg(long)]
        rev: u64,
        /// Acting user; enables the access check
        #[arg(long, env = "FOLIO_USER")]
        user: Option<String>,
    },

    /// Fire the pending triggers of a settled action again
    Retry {
        id: String,
        /// Acting user; enables the access check
        #[arg(long, env = "FOLIO_USER")]
        user: Option<String>,
    },

    /// Start the HTTP server
    Serve {
        #[arg(long, default_value = "3142")]
        port: u16,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { memory } => cmd::init::run(&root, memory),
        Commands::Post {
            file,
            user,
            triggered,
            rpc,
            strict,
        } => cmd::post::run(
            &root,
            cmd::post::PostArgs {
                file: &file,
                user,
                triggered,
                rpc,
                strict,
            },
            cli.json,
        ),
        Commands::Put { file, user } => cmd::put::run(&root, &file, user.as_deref(), cli.json),
        Commands::Get { id, user } => cmd::get::run(&root, &id, user.as_deref(), cli.json),
        Commands::Delete { id, rev, user } => cmd::delete::run(&root, &id, rev, user.as_deref()),
        Commands::Retry { id, user } => cmd::post::retry(&root, &id, user, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
