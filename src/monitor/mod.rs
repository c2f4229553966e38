// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Monitoring lifecycle.
//!
//! A [`Monitor`] is either stopped or running. While running it owns one
//! [`MonitoringSession`]: the scheduler task, the change detector task and
//! the cancellation token both observe. Changing the root always tears the
//! session down and builds a fresh one.

/// The probes a scheduler tick runs.
pub mod probes;
/// The periodic status and diagnostics scheduler.
pub mod scheduler;
/// Cancellable periodic tasks.
pub mod task;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Subscription, UpdateChannel};
use crate::clock::{Clock, SystemClock};
use crate::collectors::DiagnosticsAggregator;
use crate::config::Config;
use crate::diagnostic::DiagnosticRecord;
use crate::error::MonitorError;
use crate::lsp::{self, SharedClient};
use crate::watcher::{ChangeDetector, DetectorTask};

use scheduler::Scheduler;
use task::spawn_periodic;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No tasks running.
    Stopped,
    /// Scheduler and change detector running.
    Running,
}

/// The tasks belonging to one monitored root.
struct MonitoringSession {
    root: PathBuf,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// Owns the monitoring lifecycle and the update channel.
pub struct Monitor {
    config: Config,
    root: PathBuf,
    channel: UpdateChannel,
    clock: Arc<dyn Clock>,
    lsp: SharedClient,
    session: Option<MonitoringSession>,
}

/// Canonicalizes `path`, requiring an existing directory.
fn validate_root(path: &Path) -> Result<PathBuf, MonitorError> {
    let root = path.canonicalize().map_err(|e| {
        MonitorError::Configuration(format!("cannot monitor {}: {e}", path.display()))
    })?;
    if !root.is_dir() {
        return Err(MonitorError::Configuration(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    Ok(root)
}

impl Monitor {
    /// Creates a stopped monitor for `root`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Configuration`] if `root` is not an existing
    /// directory.
    pub fn new(root: &Path, config: Config) -> Result<Self, MonitorError> {
        Ok(Self {
            config,
            root: validate_root(root)?,
            channel: UpdateChannel::new(),
            clock: Arc::new(SystemClock),
            lsp: lsp::empty_slot(),
            session: None,
        })
    }

    /// Replaces the wall clock used by collectors and probes.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> MonitorState {
        if self.session.is_some() {
            MonitorState::Running
        } else {
            MonitorState::Stopped
        }
    }

    /// The monitored root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Attaches a new consumer to the update channel.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.channel.subscribe()
    }

    fn aggregator(&self) -> DiagnosticsAggregator {
        DiagnosticsAggregator::standard(&self.config, self.clock.clone(), self.lsp.clone())
    }

    /// Runs one full diagnostics collection outside the periodic tasks.
    pub async fn collect_once(&self) -> Vec<DiagnosticRecord> {
        self.aggregator().collect_all(&self.root).await
    }

    /// Spawns the scheduler and change detector. No-op while running.
    pub fn start(&mut self) {
        if self.session.is_some() {
            debug!("Monitor already running");
            return;
        }

        let cancel = CancellationToken::new();
        let aggregator = Arc::new(self.aggregator());

        let scheduler = Scheduler::standard(
            self.root.clone(),
            &self.config,
            self.channel.clone(),
            self.clock.clone(),
            aggregator.clone(),
            self.lsp.clone(),
        );
        let detector = DetectorTask::new(
            ChangeDetector::new(self.root.clone(), self.config.watch.clone()),
            self.channel.clone(),
            aggregator,
            cancel.clone(),
        );

        let tasks = vec![
            (
                "scheduler",
                spawn_periodic(scheduler, self.config.scheduler_interval(), cancel.clone()),
            ),
            (
                "change-detector",
                spawn_periodic(detector, self.config.detector_interval(), cancel.clone()),
            ),
        ];

        info!("Monitoring {}", self.root.display());
        self.session = Some(MonitoringSession {
            root: self.root.clone(),
            cancel,
            tasks,
        });
    }

    /// Signals both tasks to stop and waits for them, bounded by the join
    /// timeout. A task still inside a cycle when the timeout expires is
    /// aborted. No-op while stopped.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.cancel.cancel();

        let timeout = self.config.join_timeout();
        for (name, mut handle) in session.tasks {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => debug!("{} joined", name),
                Ok(Err(e)) => warn!("{} task failed: {}", name, e),
                Err(_) => {
                    warn!("{} did not stop within {:?}, aborting", name, timeout);
                    handle.abort();
                }
            }
        }

        lsp::release(&self.lsp).await;
        info!("Stopped monitoring {}", session.root.display());
    }

    /// Switches to a new root: stop, discard pending events, start.
    ///
    /// The path is validated first; an invalid path leaves the current
    /// session untouched.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Configuration`] if `path` is not an existing
    /// directory.
    pub async fn set_root(&mut self, path: &Path) -> Result<PathBuf, MonitorError> {
        let root = validate_root(path)?;
        self.stop().await;
        self.channel.clear();
        self.root = root.clone();
        self.start();
        Ok(root)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::Duration;

    fn quiet_config(scratch: &Path) -> Config {
        let mut config = Config {
            scheduler_interval_ms: 50,
            detector_interval_ms: 20,
            join_timeout_ms: 2000,
            ..Config::default()
        };
        config.paths.derived_data = scratch.join("DerivedData");
        config.paths.live_diagnostics = scratch.join("Live");
        config.paths.package_logs = scratch.join("logs");
        config.tools.xcrun = "swiftwatch-no-such-xcrun".into();
        config
    }

    #[tokio::test]
    async fn test_rejects_missing_root() {
        let result = Monitor::new(Path::new("/no/such/swiftwatch/root"), Config::default());
        assert!(matches!(result, Err(MonitorError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_stop_transitions() -> Result<()> {
        let root = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let mut monitor = Monitor::new(root.path(), quiet_config(scratch.path()))?;
        let sub = monitor.subscribe();
        assert_eq!(monitor.state(), MonitorState::Stopped);

        monitor.start();
        assert_eq!(monitor.state(), MonitorState::Running);
        monitor.start();
        assert_eq!(monitor.state(), MonitorState::Running);

        let events = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await?;
        assert_eq!(events[0].kind(), "status");

        monitor.stop().await;
        assert_eq!(monitor.state(), MonitorState::Stopped);
        monitor.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_set_root_restarts_on_new_path() -> Result<()> {
        let first = tempfile::tempdir()?;
        let second = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let mut monitor = Monitor::new(first.path(), quiet_config(scratch.path()))?;
        monitor.start();

        let root = monitor.set_root(second.path()).await?;
        assert_eq!(root, second.path().canonicalize()?);
        assert_eq!(monitor.root(), root.as_path());
        assert_eq!(monitor.state(), MonitorState::Running);

        let bad = monitor.set_root(Path::new("/no/such/swiftwatch/root")).await;
        assert!(bad.is_err());
        assert_eq!(monitor.root(), root.as_path());
        assert_eq!(monitor.state(), MonitorState::Running);

        monitor.stop().await;
        Ok(())
    }
}
