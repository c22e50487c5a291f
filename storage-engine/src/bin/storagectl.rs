// SPDX-License-Identifier: GPL-3.0-only

//! storagectl - inspect the device model and run request plans

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use storage_contracts::{Callbacks, StorageError, StorageInterface};
use storage_engine::{EngineConfig, Plan, StorageManager, create_storage_manager, logging};

#[derive(Debug, Parser)]
#[command(name = "storagectl")]
#[command(about = "Stage and commit partition, filesystem and LVM changes")]
struct Cli {
    /// Engine configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Start from a dumped device model instead of probing the system
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Log tool invocations instead of running them
    #[arg(long, global = true)]
    test_mode: bool,

    #[arg(long, global = true)]
    read_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the device model
    Info,
    /// Write the device model to a TOML snapshot
    Dump { path: PathBuf },
    /// Stage a plan and list the actions a commit would run
    Actions { plan: PathBuf },
    /// Stage a plan and commit it
    Apply { plan: PathBuf },
}

fn stage(manager: &mut StorageManager, path: &Path) -> Result<()> {
    let plan = Plan::load(path)?;
    manager.set_cache_changes(true)?;
    for (index, request) in plan.requests.iter().enumerate() {
        let created = request
            .apply(manager)
            .with_context(|| format!("request #{} ({request:?})", index + 1))?;
        if let Some(device) = created {
            tracing::info!("Request #{} staged {device}", index + 1);
        }
    }
    Ok(())
}

fn print_actions(manager: &StorageManager) {
    let actions = manager.get_commit_actions(true);
    if actions.is_empty() {
        println!("nothing to do");
    }
    for (index, action) in actions.iter().enumerate() {
        println!("{:>3}. {action}", index + 1);
    }
}

fn console_progress() -> Callbacks {
    Callbacks::new()
        .on_install_info(|info| {
            println!("==> {info}");
            Ok(())
        })
        .on_progress(|percent| {
            println!("    {percent:>3}%");
            Ok(())
        })
        .on_target(|target| {
            println!("    {target}");
            Ok(())
        })
        .on_diagnostic(|diagnostic| {
            if diagnostic.fatal {
                eprintln!("error: {}", diagnostic.text);
            } else {
                println!("    {}", diagnostic.text);
            }
            Ok(())
        })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if cli.snapshot.is_some() {
        config.snapshot = cli.snapshot.clone();
    }
    config.test_mode |= cli.test_mode;
    config.read_only |= cli.read_only;
    logging::init(&config);

    let mut manager = create_storage_manager(&config)?;

    match cli.command {
        Command::Info => {
            manager.print_info(&mut io::stdout().lock())?;
        }
        Command::Dump { path } => {
            storage_engine::save_snapshot(manager.staging().committed(), &path)?;
            println!("wrote {}", path.display());
        }
        Command::Actions { plan } => {
            stage(&mut manager, &plan)?;
            print_actions(&manager);
        }
        Command::Apply { plan } => {
            stage(&mut manager, &plan)?;
            print_actions(&manager);
            manager.set_progress_handler(Some(Box::new(console_progress())));
            match manager.commit() {
                Ok(report) => println!(
                    "commit {} finished: {} action(s) in {} ms",
                    report.commit_id,
                    report.committed.len(),
                    (report.finished_at - report.started_at).num_milliseconds()
                ),
                // The tool output already went through the progress handler
                Err(StorageError::PartialCommit(partial)) => {
                    anyhow::bail!(
                        "{partial}; {} dropped, {} still queued",
                        partial.dropped.len(),
                        partial.remaining
                    );
                }
                Err(e) if e.is_nothing_to_do() => println!("nothing to do"),
                Err(e) => return Err(e).context("commit failed"),
            }
        }
    }

    Ok(())
}
