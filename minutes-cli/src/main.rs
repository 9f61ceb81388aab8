use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use minutes_remote::JsonExportSource;
use minutes_sync::{
    AutoResolve, LoadOutcome, StatePersistence, StateStore, SyncConfig, SyncOptions,
    SyncOrchestrator,
};
use minutes_vault::FsVault;

#[derive(Parser)]
#[command(name = "minutes")]
#[command(about = "Mirror meeting documents into a local note vault", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync from a remote export into the vault
    Sync {
        /// Vault directory the notes live in
        #[arg(short = 'd', long)]
        vault: PathBuf,

        /// Path to the exported JSON document set
        #[arg(short, long)]
        export: PathBuf,

        /// State record location (default: <vault>/.minutes-sync.json)
        #[arg(long)]
        state: Option<PathBuf>,

        /// Compute every action without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Resolve all conflicts one way instead of per-type defaults
        #[arg(long, value_enum)]
        strategy: Option<Strategy>,

        /// Stop after this many documents
        #[arg(long)]
        max: Option<usize>,

        /// Prefix note filenames with the meeting date
        #[arg(long)]
        include_date: bool,

        /// Only fetch documents updated since the last successful sync
        #[arg(long)]
        incremental: bool,

        /// Do not keep a resumable checkpoint while running
        #[arg(long)]
        no_recovery: bool,

        /// Accept export entries with missing optional fields
        #[arg(long)]
        lenient: bool,
    },

    /// Show the recorded sync state for a vault
    Status {
        /// Vault directory the notes live in
        #[arg(short = 'd', long)]
        vault: PathBuf,

        /// State record location (default: <vault>/.minutes-sync.json)
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Discard a leftover recovery checkpoint
    ClearCheckpoint {
        /// Vault directory the notes live in
        #[arg(short = 'd', long)]
        vault: PathBuf,

        /// State record location (default: <vault>/.minutes-sync.json)
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Keep the local file on every conflict
    Local,
    /// Overwrite with the remote content on every conflict
    Remote,
    /// Back the local file up, then overwrite
    Backup,
}

impl From<Strategy> for AutoResolve {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Local => AutoResolve::Local,
            Strategy::Remote => AutoResolve::Remote,
            Strategy::Backup => AutoResolve::Backup,
        }
    }
}

fn state_path(vault: &PathBuf, state: Option<PathBuf>) -> PathBuf {
    state.unwrap_or_else(|| vault.join(".minutes-sync.json"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Sync {
            vault,
            export,
            state,
            dry_run,
            strategy,
            max,
            include_date,
            incremental,
            no_recovery,
            lenient,
        } => {
            let state = state_path(&vault, state);
            let source = if lenient {
                JsonExportSource::lenient(&export)
            } else {
                JsonExportSource::new(&export)
            };
            let fs_vault = FsVault::open(&vault)
                .await
                .with_context(|| format!("opening vault at {}", vault.display()))?;
            let persistence = StatePersistence::new(&state);
            let store = StateStore::open(persistence, &fs_vault)
                .await
                .context("loading sync state")?;

            let orchestrator = Arc::new(SyncOrchestrator::new(
                Arc::new(source),
                Arc::new(fs_vault),
                Arc::new(Mutex::new(store)),
                SyncConfig::default(),
            ));

            // First Ctrl-C cancels cooperatively; a second one kills us.
            let canceller = orchestrator.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; finishing the current document");
                    canceller.cancel().await;
                }
            });

            let options = SyncOptions {
                dry_run,
                validate_data: true,
                auto_resolve: strategy.map(AutoResolve::from),
                enable_recovery: !no_recovery,
                max_documents: max,
                include_date_in_filename: include_date,
                incremental,
            };

            let result = orchestrator.sync(options).await.context("sync failed")?;
            if dry_run {
                println!("Dry run (no files were written):");
            }
            println!(
                "Synced in {:.1?}: {} created, {} updated, {} skipped",
                result.duration, result.created, result.updated, result.skipped
            );
            for error in &result.errors {
                eprintln!("  error: {} ({}): {}", error.title, error.remote_id, error.message);
            }
            if !result.errors.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Status { vault, state } => {
            let state = state_path(&vault, state);
            let persistence = StatePersistence::new(&state);
            match persistence.load().await? {
                LoadOutcome::Loaded(record) => {
                    println!("State record: {}", state.display());
                    println!("  notes mapped:  {}", record.mapping.len());
                    println!("  deleted ids:   {}", record.deleted_ids.len());
                    match record.last_sync {
                        Some(at) => println!("  last sync:     {}", at.to_rfc3339()),
                        None => println!("  last sync:     never"),
                    }
                    match record.checkpoint {
                        Some(cp) => println!(
                            "  checkpoint:    run {} ({}/{} processed)",
                            cp.id,
                            cp.processed(),
                            cp.total
                        ),
                        None => println!("  checkpoint:    none"),
                    }
                }
                LoadOutcome::Rebuild { reason } => {
                    println!("No usable state record at {}: {}", state.display(), reason);
                    println!("The next sync will rebuild it from tagged notes.");
                }
            }
        }

        Commands::ClearCheckpoint { vault, state } => {
            let state = state_path(&vault, state);
            let persistence = StatePersistence::new(&state);
            match persistence.load().await? {
                LoadOutcome::Loaded(mut record) => {
                    if record.checkpoint.take().is_some() {
                        persistence.save(&record).await?;
                        println!("Checkpoint cleared.");
                    } else {
                        println!("No checkpoint to clear.");
                    }
                }
                LoadOutcome::Rebuild { .. } => {
                    println!("No state record at {}; nothing to clear.", state.display());
                }
            }
        }
    }

    Ok(())
}
