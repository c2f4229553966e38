// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{CollectContext, Collector, basename, find_artifacts};
use crate::diagnostic::{DiagnosticRecord, Severity, line_number};
use crate::error::MonitorError;
use crate::tools::plist_to_json;

/// Source tag for property-list records.
pub const SOURCE: &str = "diagnostics.plist";

const FILE_NAME: &str = "diagnostics.plist";
const MAX_PER_FILE: usize = 15;

/// Reads every `diagnostics.plist` under the configured build root.
pub struct PlistCollector {
    plutil: String,
    timeout: Duration,
}

impl PlistCollector {
    /// Creates a collector using `plutil` for conversion.
    #[must_use]
    pub const fn new(plutil: String, timeout: Duration) -> Self {
        Self { plutil, timeout }
    }
}

/// Decodes one converted `diagnostics.plist`, keeping at most fifteen entries.
#[must_use]
pub fn decode_plist(data: &Value) -> Vec<DiagnosticRecord> {
    let Some(items) = data.get("diagnostics").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .take(MAX_PER_FILE)
        .map(|item| {
            let severity = item
                .get("severity")
                .and_then(Value::as_i64)
                .map_or(Severity::Warning, Severity::from_level);
            let file = item
                .pointer("/location/file")
                .and_then(Value::as_str)
                .map_or_else(|| "Unknown".to_string(), basename);
            DiagnosticRecord::new(
                severity,
                file,
                line_number(item.pointer("/location/line")),
                item.get("message").and_then(Value::as_str).unwrap_or("Unknown issue"),
                SOURCE,
            )
        })
        .collect()
}

fn build_root(ctx: &CollectContext) -> Option<PathBuf> {
    let raw = ctx.build_config.as_ref()?.build_root.as_deref()?;
    let path = Path::new(raw);
    Some(if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.root.join(path)
    })
}

#[async_trait]
impl Collector for PlistCollector {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<DiagnosticRecord>, MonitorError> {
        let Some(build_root) = build_root(ctx) else {
            debug!("No build root configured");
            return Ok(Vec::new());
        };

        let mut files = find_artifacts(&build_root, true, |p| {
            p.file_name().is_some_and(|n| n == FILE_NAME)
        });
        files.sort_by(|a, b| b.modified.cmp(&a.modified));

        let mut records = Vec::new();
        for file in files {
            match plist_to_json(&self.plutil, &file.path, self.timeout).await {
                Ok(data) => records.extend(decode_plist(&data)),
                Err(e) if e.is_tool_unavailable() => return Err(e),
                Err(e) => {
                    warn!("Skipping {}: {}", file.path.display(), e);
                    records.push(
                        DiagnosticRecord::new(
                            Severity::Error,
                            FILE_NAME,
                            0,
                            format!("Error parsing diagnostics.plist: {e}"),
                            SOURCE,
                        )
                        .with_log_path(file.path.to_string_lossy()),
                    );
                }
            }
        }
        Ok(records)
    }
}
