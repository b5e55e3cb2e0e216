//! AutoSync CLI - manual sync operations from the terminal.
//!
//! Drives the same controller a host editor would, against real git
//! working trees, and renders the notification stream to the terminal.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use autosync_sync::{
    HostHooks, NotificationChannel, StaticConfig, SyncController, SyncEngine, SyncSettings,
};
use autosync_vcs::GitBackend;

#[derive(Parser)]
#[command(name = "autosync")]
#[command(about = "AutoSync - background working-tree synchronization")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Managed directory; may be repeated. Defaults to the current
    /// directory.
    #[arg(short, long = "dir", value_name = "PATH")]
    dirs: Vec<PathBuf>,

    /// Read settings from a JSON file (flags still override).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suppress success notifications.
    #[arg(short, long)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull upstream changes for the repository containing FILE.
    Pull {
        /// A file inside a managed directory.
        file: PathBuf,
    },

    /// Commit FILE and push it to the tracked remote.
    Push {
        /// A file inside a managed directory.
        file: PathBuf,
    },
}

/// Renders notices to the terminal and remembers whether any were errors.
#[derive(Default)]
struct TerminalHost {
    saw_error: bool,
}

impl HostHooks for TerminalHost {
    fn show_message(&mut self, text: &str, is_error: bool) {
        if is_error {
            self.saw_error = true;
            eprintln!("error: {text}");
        } else {
            println!("{text}");
        }
    }

    fn reload_changed_files(&mut self) {
        println!("(files changed on disk; reload any open views)");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let settings = load_settings(&cli)?;

    let (channel, mut receiver) = NotificationChannel::new();
    let engine = Arc::new(SyncEngine::new(Arc::new(GitBackend::new()), channel));
    let controller = SyncController::new(engine.clone(), Box::new(StaticConfig::new(settings)));

    match &cli.command {
        Commands::Pull { file } => controller.manual_pull(file).await,
        Commands::Push { file } => controller.manual_push(file).await,
    }

    // Drain notifications until the spawned operation finishes, then
    // sweep whatever is left.
    let mut host = TerminalHost::default();
    while !engine.ledger().is_idle() {
        receiver.drain(16, &mut host);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    receiver.drain(usize::MAX, &mut host);

    if host.saw_error {
        bail!("sync reported errors");
    }
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<SyncSettings> {
    let mut settings = match &cli.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => SyncSettings::default(),
    };

    if !cli.dirs.is_empty() {
        settings.managed_dirs = cli.dirs.clone();
    }
    if settings.managed_dirs.is_empty() {
        settings
            .managed_dirs
            .push(std::env::current_dir().context("failed to resolve the current directory")?);
    }
    if cli.silent {
        settings.silent = true;
    }
    if cli.verbose {
        settings.debug = true;
    }

    Ok(settings)
}
