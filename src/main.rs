//! siteops: keeps a GitHub-hosted project showcase site in sync with the
//! repositories it describes.
//!
//! The pipeline runs in phases, each persisting its output so phases can be
//! run individually or end to end with `run`.

mod collect;
mod config;
mod context;
mod deploy;
mod editor;
mod github;
mod index;
mod ledger;
mod llm;
mod markers;
mod remote;
mod score;
mod store;
#[cfg(test)]
mod testutil;
mod util;
mod writer;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::store::Workspace;

#[derive(Parser)]
#[command(name = "siteops", version, about = "Project site content pipeline")]
struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = "config/settings.yaml")]
    config: PathBuf,

    /// Log decisions but never write to the page repository.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover tracked projects and score their recent activity.
    Collect {
        /// Promote skipped projects to updates. Locked pages stay locked.
        #[arg(long)]
        force_update: bool,
    },
    /// Generate a draft page for every project with a change verdict.
    Draft,
    /// Review drafts against policy and record verdicts.
    Review,
    /// Arbitrate reviewed drafts into direct writes, pull requests, or skips.
    Deploy,
    /// Write the run report and update the dashboard.
    Report,
    /// All phases in order.
    Run {
        #[arg(long)]
        force_update: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;
    let workspace = Workspace::new(Path::new("."), &settings);

    match cli.command {
        Command::Collect { force_update } => {
            collect::run(&settings, &workspace, force_update)?;
        }
        Command::Draft => {
            writer::run(&settings, &workspace)?;
        }
        Command::Review => {
            editor::run(&settings, &workspace)?;
        }
        Command::Deploy => {
            deploy::run(&settings, &workspace, cli.dry_run)?;
        }
        Command::Report => {
            ledger::run(&workspace)?;
        }
        Command::Run { force_update } => {
            collect::run(&settings, &workspace, force_update)?;
            writer::run(&settings, &workspace)?;
            editor::run(&settings, &workspace)?;
            deploy::run(&settings, &workspace, cli.dry_run)?;
            ledger::run(&workspace)?;
        }
    }
    Ok(())
}
