// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! swiftwatch CLI.
//!
//! Streams the monitor's update events as JSON lines, or runs a single
//! diagnostics collection.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swiftwatch::{Config, Monitor, UpdateEvent};

/// How often the primary consumer drains the update channel.
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Command-line arguments for swiftwatch.
#[derive(Parser, Debug)]
#[command(name = "swiftwatch")]
#[command(about = "Aggregates Xcode, SwiftPM and sourcekit-lsp diagnostics into one event stream")]
#[command(version = env!("SWIFTWATCH_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    /// Project root to monitor (defaults to the current directory).
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Spawn and supervise the language server. Overrides the config file.
    #[arg(long, global = true)]
    lsp: bool,
}

/// Subcommands supported by swiftwatch.
#[derive(Subcommand, Debug)]
enum Command {
    /// Stream update events until interrupted (default).
    Watch,

    /// Collect diagnostics once and print them.
    Diagnostics,
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the root cannot be
/// monitored.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("swiftwatch=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.clone())?;
    if args.lsp {
        config.lsp.enabled = true;
    }

    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let mut monitor = Monitor::new(&root, config)?;

    match args.command {
        None | Some(Command::Watch) => run_watch(&mut monitor).await,
        Some(Command::Diagnostics) => {
            let records = monitor.collect_once().await;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}

fn print_event(event: &UpdateEvent) -> Result<()> {
    let line = serde_json::json!({
        "at": Utc::now().to_rfc3339(),
        "event": event,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

/// Drains the update channel every 100 ms until Ctrl-C.
async fn run_watch(monitor: &mut Monitor) -> Result<()> {
    let events = monitor.subscribe();
    monitor.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(DRAIN_INTERVAL);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {
                for event in events.drain() {
                    print_event(&event)?;
                }
            }
        }
    }

    monitor.stop().await;
    for event in events.drain() {
        print_event(&event)?;
    }
    Ok(())
}
