//! Scenery CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "scenery")]
#[command(about = "Versioned 3D scene-graph store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Data root holding the store dump and scenery.toml
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the read-only HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },
    /// List the branches of a project
    Branches { account: String, project: String },
    /// List revisions, newest first
    Revisions {
        account: String,
        project: String,
        #[arg(short, long)]
        branch: Option<String>,
        /// First index of the window (inclusive)
        #[arg(long)]
        from: Option<usize>,
        /// Last index of the window (inclusive)
        #[arg(long)]
        to: Option<usize>,
    },
    /// Shared-id diff between two snapshots (`master`, a branch or `rev:<id>`)
    Diff {
        account: String,
        project: String,
        from: String,
        to: String,
    },
    /// Expand the references of a snapshot
    Federation {
        account: String,
        project: String,
        #[arg(default_value = "master")]
        reference: String,
    },
    /// Generate the stash of a snapshot
    Stash {
        account: String,
        project: String,
        #[arg(default_value = "master")]
        reference: String,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = ["scenery", "scenery_store", "scenery_server", "tower_http"]
            .iter()
            .map(|target| format!("{target}={log_level}"))
            .collect();
        EnvFilter::new(directives.join(","))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut overrides = Overrides {
        data_dir: cli.data_dir,
        ..Default::default()
    };
    if let Commands::Serve { port, host } = &cli.command {
        overrides.port = *port;
        overrides.host = host.clone();
    }
    let config = Config::load(&overrides)?;
    tracing::debug!("Data root: {}", config.store.data_dir.display());

    match cli.command {
        Commands::Serve { .. } => commands::serve(config).await,
        Commands::Branches { account, project } => {
            commands::branches(config, &account, &project).await
        }
        Commands::Revisions {
            account,
            project,
            branch,
            from,
            to,
        } => commands::revisions(config, &account, &project, branch.as_deref(), from, to).await,
        Commands::Diff {
            account,
            project,
            from,
            to,
        } => commands::diff(config, &account, &project, &from, &to).await,
        Commands::Federation {
            account,
            project,
            reference,
        } => commands::federation(config, &account, &project, &reference).await,
        Commands::Stash {
            account,
            project,
            reference,
        } => commands::stash(config, &account, &project, &reference).await,
        Commands::Version => {
            println!("Scenery v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
