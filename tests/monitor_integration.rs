// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the monitoring lifecycle and update stream.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use swiftwatch::{Config, DiagnosticRecord, Monitor, MonitorState, Subscription, UpdateEvent};

/// Config pointing every external location at `scratch` so host tooling
/// and caches never leak into the results.
fn isolated_config(scratch: &Path) -> Config {
    let mut config = Config {
        scheduler_interval_ms: 100,
        detector_interval_ms: 25,
        join_timeout_ms: 2000,
        ..Config::default()
    };
    config.paths.derived_data = scratch.join("DerivedData");
    config.paths.live_diagnostics = scratch.join("Live");
    config.paths.package_logs = scratch.join("logs");
    config.tools.xcrun = "swiftwatch-no-such-xcrun".into();
    config.tools.xclogparser = "swiftwatch-no-such-xclogparser".into();
    config.tools.plutil = "swiftwatch-no-such-plutil".into();
    config
}

/// Drains `sub` for `window`, returning everything received.
async fn collect_for(sub: &Subscription, window: Duration) -> Vec<UpdateEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(batch) = tokio::time::timeout_at(deadline, sub.recv()).await {
        events.extend(batch);
    }
    events.extend(sub.drain());
    events
}

fn change_records(events: &[UpdateEvent]) -> Vec<&DiagnosticRecord> {
    events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::Diagnostics(records) => Some(records),
            _ => None,
        })
        .flatten()
        .filter(|r| r.source == "file_watcher")
        .collect()
}

#[tokio::test]
async fn test_status_events_arrive_after_start() -> Result<()> {
    let root = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let mut monitor = Monitor::new(root.path(), isolated_config(scratch.path()))?;
    let sub = monitor.subscribe();
    monitor.start();

    let events = collect_for(&sub, Duration::from_millis(500)).await;
    monitor.stop().await;

    let keys: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::Status { key, .. } => Some(key.as_str()),
            _ => None,
        })
        .collect();
    for expected in ["project", "build_server", "lsp", "last_build"] {
        assert!(keys.contains(&expected), "missing {expected} in {keys:?}");
    }
    assert!(events.iter().any(|e| e.kind() == "diagnostics"));
    assert!(events.iter().any(|e| e.kind() == "build_info"));
    assert_eq!(monitor.state(), MonitorState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_single_edit_yields_one_change_record() -> Result<()> {
    let root = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let source = root.path().join("main.swift");
    std::fs::write(&source, "print(\"hello\")\n")?;

    let mut monitor = Monitor::new(root.path(), isolated_config(scratch.path()))?;
    let sub = monitor.subscribe();
    monitor.start();

    // Let the baseline scan happen, which must be silent
    let baseline = collect_for(&sub, Duration::from_millis(300)).await;
    assert!(change_records(&baseline).is_empty());

    std::fs::write(&source, "print(\"goodbye\")\n")?;
    let events = collect_for(&sub, Duration::from_millis(500)).await;
    monitor.stop().await;

    let changes = change_records(&events);
    assert_eq!(changes.len(), 1, "{changes:?}");
    let record = changes.first().context("no change record")?;
    assert_eq!(record.file, "main.swift");
    assert_eq!(record.line, 1);
    assert_eq!(record.message, "File changed: main.swift");
    Ok(())
}

#[tokio::test]
async fn test_set_root_starts_with_silent_baseline() -> Result<()> {
    let first = tempfile::tempdir()?;
    let second = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    std::fs::write(first.path().join("A.swift"), "let a = 1\n")?;
    std::fs::write(second.path().join("B.swift"), "let b = 1\n")?;

    let mut monitor = Monitor::new(first.path(), isolated_config(scratch.path()))?;
    let sub = monitor.subscribe();
    monitor.start();
    let _ = collect_for(&sub, Duration::from_millis(200)).await;

    monitor.set_root(second.path()).await?;
    assert_eq!(monitor.state(), MonitorState::Running);

    // Edits under the old root are no longer watched
    std::fs::write(first.path().join("A.swift"), "let a = 2\n")?;
    let events = collect_for(&sub, Duration::from_millis(400)).await;
    assert!(change_records(&events).is_empty(), "{events:?}");

    std::fs::write(second.path().join("B.swift"), "let b = 2\n")?;
    let events = collect_for(&sub, Duration::from_millis(400)).await;
    monitor.stop().await;

    let changes = change_records(&events);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].file, "B.swift");
    Ok(())
}

#[tokio::test]
async fn test_stop_returns_when_language_server_hangs() -> Result<()> {
    let root = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let mut config = isolated_config(scratch.path());
    config.join_timeout_ms = 500;
    config.lsp.enabled = true;
    config.lsp.command = env!("CARGO_BIN_EXE_mockls").to_string();
    config.lsp.args = vec!["--hang-on".to_string(), "shutdown".to_string()];

    let mut monitor = Monitor::new(root.path(), config)?;
    let sub = monitor.subscribe();
    monitor.start();

    let mut running = false;
    for _ in 0..20 {
        let events = collect_for(&sub, Duration::from_millis(100)).await;
        running |= events.iter().any(|e| {
            matches!(e, UpdateEvent::Status { key, value } if key == "lsp" && value.starts_with("Running"))
        });
        if running {
            break;
        }
    }
    assert!(running, "language server never reported running");

    tokio::time::timeout(Duration::from_secs(10), monitor.stop())
        .await
        .context("stop() blocked on the language server")?;
    assert_eq!(monitor.state(), MonitorState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_diagnostics_command_collects_package_log() -> Result<()> {
    let root = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let config = isolated_config(scratch.path());
    std::fs::create_dir_all(&config.paths.package_logs)?;
    std::fs::write(
        config.paths.package_logs.join("build.log"),
        "Sources/App/main.swift:4:9: error: cannot find 'foo' in scope\n",
    )?;

    let monitor = Monitor::new(root.path(), config)?;
    let records = monitor.collect_once().await;

    let record = records
        .iter()
        .find(|r| r.source == "swiftpm")
        .context("no package log record")?;
    assert_eq!(record.file, "main.swift");
    assert_eq!(record.line, 4);
    assert_eq!(record.message, "cannot find 'foo' in scope");
    Ok(())
}
