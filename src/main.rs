//! Volume Backup - Main entry point
//!
//! Thin operator surface over the engine: argument parsing, configuration,
//! confirmation prompts and the final report. All orchestration lives in
//! the library.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use volume_backup::config::Config;
use volume_backup::engine::remote::remote_restore;
use volume_backup::engine::restore::RestoreEngine;
use volume_backup::engine::{BackupEngine, EngineOptions, JobStatus};
use volume_backup::journal::Journal;
use volume_backup::progress::{format_bytes, ProgressObserver};
use volume_backup::runtime::docker::DockerCli;
use volume_backup::runtime::VolumeRuntime;
use volume_backup::store::ArchiveStore;
use volume_backup::transfer::ssh::SshTransport;
use volume_backup::transfer::{RemoteEndpoint, TransferEngine};
use volume_backup::utils;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the selected volumes
    Backup {
        /// Volumes to back up
        volumes: Vec<String>,

        /// Back up every volume the runtime reports
        #[arg(long, conflicts_with = "volumes")]
        all: bool,
    },
    /// Restore an archive into a volume (overwrites its contents)
    Restore {
        archive: PathBuf,
        volume: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Copy an archive to the remote archive store
    Transfer {
        archive: PathBuf,

        /// Remote login user (defaults to [remote] user in config)
        #[arg(long)]
        user: Option<String>,

        /// Remote IPv4 address (defaults to [remote] address in config)
        #[arg(long)]
        address: Option<String>,
    },
    /// Fetch a remote archive and restore it into a volume
    RemoteRestore {
        remote_archive: String,
        volume: String,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        address: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List local archives (or remote ones with --remote)
    List {
        #[arg(long)]
        remote: bool,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        address: Option<String>,
    },
}

/// Prints throttled progress lines to stderr.
struct TermProgress;

impl ProgressObserver for TermProgress {
    fn report(&self, label: &str, done: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => {
                let percent = (done as f64 / total as f64 * 100.0).min(100.0);
                eprintln!(
                    "{}: {} / {} ({:.0}%)",
                    label,
                    format_bytes(done),
                    format_bytes(total),
                    percent
                );
            }
            _ => eprintln!("{}: {}", label, format_bytes(done)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let level = if args.verbose {
        "debug"
    } else {
        config.log.level.as_str()
    };
    utils::logger::init(level)?;

    let store = ArchiveStore::new(config.store.dir.clone());
    store
        .ensure_exists()
        .with_context(|| format!("cannot create archive store {}", config.store.dir.display()))?;
    let journal = Arc::new(
        Journal::open(&config.log.journal)
            .with_context(|| format!("cannot open journal {}", config.log.journal.display()))?,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(handle_signals(cancel.clone(), Arc::clone(&journal)));

    let outcome = run(args.command, &config, store, Arc::clone(&journal), cancel.clone()).await;

    if cancel.is_cancelled() {
        eprintln!("Interrupted - partial archives are left in place.");
        std::process::exit(130);
    }
    outcome
}

async fn handle_signals(cancel: CancellationToken, journal: Arc<Journal>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    journal.record("operation interrupted by signal");
    cancel.cancel();
}

async fn run(
    command: Command,
    config: &Config,
    store: ArchiveStore,
    journal: Arc<Journal>,
    cancel: CancellationToken,
) -> Result<()> {
    let runtime = Arc::new(DockerCli::new(&config.runtime));
    let observer: Arc<dyn ProgressObserver> = Arc::new(TermProgress);

    match command {
        Command::Backup { volumes, all } => {
            runtime.ping().await?;
            let selected: BTreeSet<String> = if all {
                runtime.list_volumes().await?.into_iter().collect()
            } else {
                volumes.into_iter().collect()
            };
            if selected.is_empty() {
                anyhow::bail!("no volumes selected (pass volume names or --all)");
            }

            let options = EngineOptions {
                retention_days: config.store.retention_days,
                max_concurrent_jobs: config.performance.max_concurrent_jobs,
            };
            let engine =
                BackupEngine::with_cancel(runtime, store, journal, observer, options, cancel);
            let results = engine.run_backup(&selected).await?;

            let mut failures = 0usize;
            for result in &results {
                match result.status {
                    JobStatus::Success => {
                        let path = result
                            .archive_path
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default();
                        println!("{}: ok -> {}", result.volume, path);
                    }
                    JobStatus::BackupFailed => {
                        failures += 1;
                        println!(
                            "{}: backup failed: {}",
                            result.volume,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    JobStatus::VerifyFailed => {
                        failures += 1;
                        println!(
                            "{}: verification failed: {}",
                            result.volume,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{} of {} backup job(s) failed", failures, results.len());
            }
            Ok(())
        }

        Command::Restore {
            archive,
            volume,
            yes,
        } => {
            runtime.ping().await?;
            let prompt = format!(
                "Restore {} into volume {}? This overwrites its contents.",
                archive.display(),
                volume
            );
            if !yes && !confirm(prompt).await? {
                println!("Cancelled.");
                return Ok(());
            }
            let engine = RestoreEngine::with_cancel(runtime, journal, observer, cancel);
            engine.restore(&archive, &volume).await?;
            println!("Restore completed.");
            Ok(())
        }

        Command::Transfer {
            archive,
            user,
            address,
        } => {
            let endpoint = endpoint_from(config, user, address)?;
            let transfer = transfer_engine(config, journal, observer);
            transfer.push(&archive, &endpoint).await?;
            println!("Transfer completed.");
            Ok(())
        }

        Command::RemoteRestore {
            remote_archive,
            volume,
            user,
            address,
            yes,
        } => {
            runtime.ping().await?;
            let endpoint = endpoint_from(config, user, address)?;
            let prompt = format!(
                "Fetch {} from {} and restore it into volume {}? This overwrites its contents.",
                remote_archive, endpoint, volume
            );
            if !yes && !confirm(prompt).await? {
                println!("Cancelled.");
                return Ok(());
            }

            let transfer = transfer_engine(config, Arc::clone(&journal), Arc::clone(&observer));
            let restore = RestoreEngine::with_cancel(runtime, journal, observer, cancel);
            let local =
                remote_restore(&transfer, &restore, &store, &endpoint, &remote_archive, &volume)
                    .await?;
            println!(
                "Remote restore completed (local copy kept at {}).",
                local.display()
            );
            Ok(())
        }

        Command::List {
            remote: false, ..
        } => {
            let archives = store.list()?;
            if archives.is_empty() {
                println!("No archives.");
                return Ok(());
            }
            let now = Utc::now();
            for archive in archives {
                println!(
                    "{}  {}  {}d",
                    archive.file_name(),
                    format_bytes(archive.size_bytes),
                    (now - archive.timestamp).num_days()
                );
            }
            Ok(())
        }

        Command::List {
            remote: true,
            user,
            address,
        } => {
            let endpoint = endpoint_from(config, user, address)?;
            let transfer = transfer_engine(config, journal, observer);
            let names = transfer.list_remote(&endpoint).await?;
            if names.is_empty() {
                println!("No remote archives.");
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
            Ok(())
        }
    }
}

fn transfer_engine(
    config: &Config,
    journal: Arc<Journal>,
    observer: Arc<dyn ProgressObserver>,
) -> TransferEngine<SshTransport> {
    let transport = SshTransport::new(
        config.remote.port,
        config.remote.identity_file.clone(),
        Duration::from_secs(config.remote.probe_timeout_secs),
    );
    TransferEngine::new(transport, journal, observer, config.remote.dir.clone())
}

fn endpoint_from(
    config: &Config,
    user: Option<String>,
    address: Option<String>,
) -> Result<RemoteEndpoint> {
    let user = user
        .or_else(|| non_empty(&config.remote.user))
        .context("remote user not set (use --user or [remote] user in the config)")?;
    let address = address
        .or_else(|| non_empty(&config.remote.address))
        .context("remote address not set (use --address or [remote] address in the config)")?;
    Ok(RemoteEndpoint { user, address })
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

async fn confirm(prompt: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        print!("{} [y/N] ", prompt);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(matches!(
            line.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    })
    .await?
}
