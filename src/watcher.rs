// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Content-digest based change detection for project sources.
//!
//! Every scan hashes each source file under the project and compares it
//! with the digest from the previous scan. Only files whose digest existed
//! and changed are reported; the first scan establishes a silent baseline.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::UpdateChannel;
use crate::collectors::{DiagnosticsAggregator, basename};
use crate::config::{BuildServerConfig, WatchConfig};
use crate::diagnostic::{DiagnosticRecord, Severity, UpdateEvent};
use crate::monitor::task::Periodic;

/// Source tag for change notifications.
pub const SOURCE: &str = "file_watcher";

#[derive(Debug, Clone, Copy)]
struct Fingerprint {
    digest: blake3::Hash,
    /// Scan number in which the path was last present.
    last_seen: u64,
}

/// Tracks source file digests for one monitoring session.
#[derive(Debug)]
pub struct ChangeDetector {
    root: PathBuf,
    settings: WatchConfig,
    fingerprints: HashMap<PathBuf, Fingerprint>,
    scans: u64,
}

impl ChangeDetector {
    /// Creates a detector with an empty fingerprint map.
    #[must_use]
    pub fn new(root: PathBuf, settings: WatchConfig) -> Self {
        Self {
            root,
            settings,
            fingerprints: HashMap::new(),
            scans: 0,
        }
    }

    /// Number of tracked files.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.fingerprints.len()
    }

    /// Directories to scan: the configured workspace's directory if there is
    /// one, otherwise the root plus any project bundles directly inside it.
    #[must_use]
    pub fn scan_dirs(&self) -> Vec<PathBuf> {
        let workspace = BuildServerConfig::load(&self.root)
            .ok()
            .flatten()
            .and_then(|c| c.workspace)
            .map(|w| self.root.join(w))
            .and_then(|w| w.parent().map(Path::to_path_buf))
            .filter(|dir| dir.is_dir());
        if let Some(dir) = workspace {
            return vec![dir];
        }

        let mut dirs = vec![self.root.clone()];
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            let mut bundles: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir() && p.extension().is_some_and(|e| e == "xcodeproj"))
                .collect();
            bundles.sort();
            dirs.extend(bundles);
        }
        dirs
    }

    fn is_excluded(&self, path: &Path) -> bool {
        path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            self.settings.excluded_dirs.iter().any(|d| *d == name)
        })
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.settings.extensions.iter().any(|x| x == e))
    }

    /// Source files under the scan directories, deduplicated and sorted.
    fn source_files(&self) -> BTreeSet<PathBuf> {
        let mut files = BTreeSet::new();
        for dir in self.scan_dirs() {
            let walker = WalkBuilder::new(&dir)
                .standard_filters(false)
                .follow_links(false)
                .build();
            for entry in walker.flatten() {
                let path = entry.path();
                if entry.file_type().is_some_and(|t| t.is_file())
                    && self.is_source(path)
                    && !self.is_excluded(path.strip_prefix(&dir).unwrap_or(path))
                {
                    files.insert(entry.into_path());
                }
            }
        }
        files
    }

    /// Runs one scan and returns every path whose content changed since the
    /// previous scan, in path order.
    pub fn scan(&mut self) -> Vec<PathBuf> {
        self.scans += 1;
        let scan = self.scans;
        let mut changed = Vec::new();

        for path in self.source_files() {
            let digest = match std::fs::read(&path) {
                Ok(bytes) => blake3::hash(&bytes),
                Err(e) => {
                    trace!("Skipping unreadable {}: {}", path.display(), e);
                    continue;
                }
            };

            let previous = self.fingerprints.insert(
                path.clone(),
                Fingerprint {
                    digest,
                    last_seen: scan,
                },
            );
            if previous.is_some_and(|p| p.digest != digest) {
                changed.push(path);
            }
        }

        let keep = self.settings.evict_after_cycles.max(1);
        let before = self.fingerprints.len();
        self.fingerprints.retain(|_, f| scan - f.last_seen < keep);
        if self.fingerprints.len() < before {
            debug!("Evicted {} fingerprint(s)", before - self.fingerprints.len());
        }

        changed
    }

    /// Wraps the first `max_reported` changed paths as informational records.
    #[must_use]
    pub fn change_records(&self, changed: &[PathBuf]) -> Vec<DiagnosticRecord> {
        changed
            .iter()
            .take(self.settings.max_reported)
            .map(|path| {
                let name = basename(&path.to_string_lossy());
                let message = format!("File changed: {name}");
                DiagnosticRecord::new(Severity::Info, name, 1, message, SOURCE)
            })
            .collect()
    }
}

/// Periodic job that runs the detector and triggers re-collection.
pub struct DetectorTask {
    detector: Arc<Mutex<ChangeDetector>>,
    root: PathBuf,
    channel: UpdateChannel,
    aggregator: Arc<DiagnosticsAggregator>,
    cancel: CancellationToken,
}

impl DetectorTask {
    /// Creates the job. `cancel` suppresses re-collection results that
    /// finish after the session stopped.
    #[must_use]
    pub fn new(
        detector: ChangeDetector,
        channel: UpdateChannel,
        aggregator: Arc<DiagnosticsAggregator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root: detector.root.clone(),
            detector: Arc::new(Mutex::new(detector)),
            channel,
            aggregator,
            cancel,
        }
    }
}

#[async_trait]
impl Periodic for DetectorTask {
    fn name(&self) -> &'static str {
        "change-detector"
    }

    async fn tick(&mut self) {
        // Walking and hashing the tree is blocking file I/O
        let detector = self.detector.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            let mut detector = detector.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = detector.scan();
            let records = detector.change_records(&changed);
            (changed.len(), records)
        })
        .await;

        let (count, records) = match scanned {
            Ok(result) => result,
            Err(e) => {
                warn!("Change scan failed: {}", e);
                return;
            }
        };
        if count == 0 {
            return;
        }
        info!("{} file(s) changed", count);
        self.channel.push(UpdateEvent::Diagnostics(records));

        // Out of band so a slow collection never delays the next scan
        let aggregator = self.aggregator.clone();
        let channel = self.channel.clone();
        let cancel = self.cancel.clone();
        let root = self.root.clone();
        tokio::spawn(async move {
            let records = aggregator.collect_all(&root).await;
            if cancel.is_cancelled() {
                debug!("Dropping re-collection for stopped session");
                return;
            }
            channel.push(UpdateEvent::Diagnostics(records));
        });
    }
}
