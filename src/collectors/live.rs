// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Xcode's live issue cache.
//!
//! The editor persists the issues it is currently showing as
//! `*.xcdiagnostics` property lists. Two schema generations exist: a
//! `diagnostics` array with numeric severities, and a newer
//! `diagnostics-items` array with textual kinds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{CollectContext, Collector, has_extension, newest_artifact, within_root};
use crate::diagnostic::{DiagnosticRecord, Severity, line_number};
use crate::error::MonitorError;
use crate::tools::plist_to_json;

/// Source tag for live editor records.
pub const SOURCE: &str = "xcode_live";

const HORIZON: Duration = Duration::from_secs(3600);
const MAX_ENTRIES: usize = 20;
const UNKNOWN_MESSAGE: &str = "Unknown issue";

/// Reads the most recent live issue snapshot.
pub struct LiveDiagnosticCollector {
    dir: PathBuf,
    plutil: String,
    timeout: Duration,
}

impl LiveDiagnosticCollector {
    /// Creates a collector over the issue cache directory `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf, plutil: String, timeout: Duration) -> Self {
        Self {
            dir,
            plutil,
            timeout,
        }
    }
}

fn text<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Decodes a converted snapshot into records relevant to `root`.
///
/// # Errors
///
/// Returns [`MonitorError::Parse`] if `data` matches neither schema.
pub fn decode_snapshot(
    data: &Value,
    root: &Path,
    snapshot: &Path,
) -> Result<Vec<DiagnosticRecord>, MonitorError> {
    let workspace = ["workspacePath", "workspace", "project"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(String::from);

    let entries: Vec<DiagnosticRecord> =
        if let Some(items) = data.get("diagnostics").and_then(Value::as_array) {
            items
                .iter()
                .take(MAX_ENTRIES)
                .map(|item| {
                    let severity = item
                        .get("severity")
                        .and_then(Value::as_i64)
                        .map_or(Severity::Warning, Severity::from_level);
                    DiagnosticRecord::new(
                        severity,
                        text(item, "/location/path").unwrap_or("Unknown"),
                        line_number(item.pointer("/location/line")),
                        text(item, "/description").unwrap_or(UNKNOWN_MESSAGE),
                        SOURCE,
                    )
                    .with_raw_metadata(item.clone())
                })
                .collect()
        } else if let Some(items) = data.get("diagnostics-items").and_then(Value::as_array) {
            items
                .iter()
                .take(MAX_ENTRIES)
                .map(|item| {
                    DiagnosticRecord::new(
                        Severity::from_kind(text(item, "/kind").unwrap_or_default()),
                        text(item, "/diagnostic-context/file-path").unwrap_or("Unknown"),
                        line_number(item.pointer("/diagnostic-context/line-number")),
                        text(item, "/message").unwrap_or(UNKNOWN_MESSAGE),
                        SOURCE,
                    )
                    .with_raw_metadata(item.clone())
                })
                .collect()
        } else {
            return Err(MonitorError::parse(snapshot, "unrecognized live diagnostics schema"));
        };

    Ok(entries
        .into_iter()
        .map(|r| r.with_workspace_path(workspace.clone()))
        .filter(|r| within_root(root, r.workspace_path.as_deref(), Some(&r.file)))
        .collect())
}

#[async_trait]
impl Collector for LiveDiagnosticCollector {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<DiagnosticRecord>, MonitorError> {
        let Some(snapshot) = newest_artifact(
            &self.dir,
            false,
            |p| has_extension(p, "xcdiagnostics"),
            Some(HORIZON),
            ctx.now,
        ) else {
            debug!("No recent live diagnostics in {}", self.dir.display());
            return Ok(Vec::new());
        };

        let data = plist_to_json(&self.plutil, &snapshot.path, self.timeout).await?;
        decode_snapshot(&data, &ctx.root, &snapshot.path)
    }
}
