// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Diagnostic collectors and the aggregator that runs them.
//!
//! Each collector extracts [`DiagnosticRecord`]s from one kind of external
//! artifact. The [`DiagnosticsAggregator`] runs them in a fixed order and
//! concatenates the results; a failing collector contributes nothing (or a
//! single error record) and never aborts the batch.

/// Xcode build logs via `xclogparser`.
pub mod build_log;
/// Diagnostics published by the supervised language server.
pub mod language_server;
/// Xcode's live issue cache.
pub mod live;
/// SwiftPM build logs.
pub mod package_log;
/// `diagnostics.plist` files under the build root.
pub mod plist;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::clock::{Clock, age};
use crate::config::{BuildServerConfig, Config};
use crate::diagnostic::{DiagnosticRecord, Severity};
use crate::error::MonitorError;
use crate::lsp::SharedClient;

pub use build_log::BuildLogCollector;
pub use language_server::LanguageServerCollector;
pub use live::LiveDiagnosticCollector;
pub use package_log::PackageLogCollector;
pub use plist::PlistCollector;

/// Inputs shared by every collector for one collection pass.
#[derive(Debug, Clone)]
pub struct CollectContext {
    /// Canonical monitored root.
    pub root: PathBuf,
    /// Reference time for recency horizons.
    pub now: SystemTime,
    /// The project's build configuration, if present and valid.
    pub build_config: Option<BuildServerConfig>,
}

/// A producer of normalized diagnostics for one artifact kind.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Tag written into the `source` field of every record.
    fn source(&self) -> &'static str;

    /// Extracts records relevant to `ctx.root`.
    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<DiagnosticRecord>, MonitorError>;
}

/// Runs collectors in a fixed order and concatenates their output.
pub struct DiagnosticsAggregator {
    collectors: Vec<Box<dyn Collector>>,
    clock: Arc<dyn Clock>,
}

impl DiagnosticsAggregator {
    /// Creates an aggregator over the given collectors, run in list order.
    #[must_use]
    pub fn new(collectors: Vec<Box<dyn Collector>>, clock: Arc<dyn Clock>) -> Self {
        Self { collectors, clock }
    }

    /// The standard collector set: live issues, build logs, property lists,
    /// package logs, then the language server.
    #[must_use]
    pub fn standard(config: &Config, clock: Arc<dyn Clock>, lsp: SharedClient) -> Self {
        let tools = &config.tools;
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(LiveDiagnosticCollector::new(
                config.paths.live_diagnostics.clone(),
                tools.plutil.clone(),
                tools.tool_timeout(),
            )),
            Box::new(BuildLogCollector::new(
                config.paths.derived_data.clone(),
                tools.xclogparser.clone(),
                tools.tool_timeout(),
            )),
            Box::new(PlistCollector::new(tools.plutil.clone(), tools.tool_timeout())),
            Box::new(PackageLogCollector::new(config.paths.package_logs.clone())),
            Box::new(LanguageServerCollector::new(lsp)),
        ];
        Self::new(collectors, clock)
    }

    /// Collects from every collector for `root`.
    pub async fn collect_all(&self, root: &Path) -> Vec<DiagnosticRecord> {
        let build_config = match BuildServerConfig::load(root) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring build configuration: {}", e);
                None
            }
        };
        let ctx = CollectContext {
            root: root.to_path_buf(),
            now: self.clock.now(),
            build_config,
        };

        let mut records = Vec::new();
        for collector in &self.collectors {
            match collector.collect(&ctx).await {
                Ok(batch) => {
                    debug!("{}: {} record(s)", collector.source(), batch.len());
                    records.extend(batch);
                }
                Err(e) if e.is_tool_unavailable() => {
                    debug!("{}: skipped ({})", collector.source(), e);
                }
                Err(e) => {
                    warn!("{} collector failed: {}", collector.source(), e);
                    records.push(DiagnosticRecord::new(
                        Severity::Error,
                        "",
                        0,
                        format!("{} collector failed: {e}", collector.source()),
                        collector.source(),
                    ));
                }
            }
        }
        records
    }
}

/// A file found while looking for artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Location of the artifact.
    pub path: PathBuf,
    /// Last modification time.
    pub modified: SystemTime,
}

/// Lists files under `dir` accepted by `matches`.
///
/// Only direct children are considered unless `recursive` is set. A missing
/// directory yields no artifacts.
pub fn find_artifacts(
    dir: &Path,
    recursive: bool,
    matches: impl Fn(&Path) -> bool,
) -> Vec<Artifact> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .follow_links(false)
        .max_depth(if recursive { None } else { Some(1) })
        .build();

    walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter(|entry| matches(entry.path()))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some(Artifact {
                path: entry.into_path(),
                modified,
            })
        })
        .collect()
}

/// Most recently modified artifact, optionally limited to those younger
/// than `horizon`.
pub fn newest_artifact(
    dir: &Path,
    recursive: bool,
    matches: impl Fn(&Path) -> bool,
    horizon: Option<Duration>,
    now: SystemTime,
) -> Option<Artifact> {
    find_artifacts(dir, recursive, matches)
        .into_iter()
        .filter(|a| horizon.is_none_or(|h| age(now, a.modified) < h))
        .max_by_key(|a| a.modified)
}

/// Returns true if `path` has the extension `ext`.
#[must_use]
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

/// Final path component, or the whole string if there is none.
#[must_use]
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned())
}

/// Resolves a path or `file://` URL to a canonical filesystem path.
fn resolve(candidate: &str) -> Option<PathBuf> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    let path = if candidate.starts_with("file://") {
        url::Url::parse(candidate).ok()?.to_file_path().ok()?
    } else {
        PathBuf::from(candidate)
    };
    path.canonicalize().ok()
}

/// Decides whether a record belongs to the monitored root.
///
/// Each known location (workspace, then file) that resolves on disk is
/// tested for containment; any hit includes the record. When neither
/// location is usable the record is included.
#[must_use]
pub fn within_root(root: &Path, workspace: Option<&str>, file: Option<&str>) -> bool {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let resolved: Vec<PathBuf> = [workspace, file]
        .into_iter()
        .flatten()
        .filter_map(resolve)
        .collect();

    resolved.is_empty() || resolved.iter().any(|p| p.starts_with(&root))
}
