// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CollectContext, Collector, has_extension, newest_artifact};
use crate::diagnostic::{DiagnosticRecord, Severity};
use crate::error::MonitorError;
use crate::tools::run_tool;

/// Source tag for records from build logs.
pub const SOURCE: &str = "xclogparser";

const HORIZON: Duration = Duration::from_secs(24 * 3600);
const MAX_ERRORS: usize = 10;
const MAX_WARNINGS: usize = 5;

/// Extracts issues from the newest `*.xcactivitylog` under DerivedData.
pub struct BuildLogCollector {
    derived_data: PathBuf,
    xclogparser: String,
    timeout: Duration,
}

impl BuildLogCollector {
    /// Creates a collector reading logs under `derived_data`.
    #[must_use]
    pub const fn new(derived_data: PathBuf, xclogparser: String, timeout: Duration) -> Self {
        Self {
            derived_data,
            xclogparser,
            timeout,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IssueReport {
    #[serde(default)]
    errors: Vec<Issue>,
    #[serde(default)]
    warnings: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Issue {
    #[serde(default, rename = "documentURL")]
    document_url: Option<String>,
    #[serde(default)]
    starting_line_number: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
}

impl Issue {
    fn into_record(self, severity: Severity, log_path: &str) -> DiagnosticRecord {
        let file = self
            .document_url
            .filter(|u| !u.is_empty())
            .map_or_else(|| "Unknown".to_string(), |u| document_path(&u));
        DiagnosticRecord::new(
            severity,
            file,
            crate::diagnostic::line_number(self.starting_line_number.as_ref()),
            self.title.unwrap_or_else(|| {
                if severity == Severity::Error {
                    "Unknown error".to_string()
                } else {
                    "Unknown warning".to_string()
                }
            }),
            SOURCE,
        )
        .with_log_path(log_path)
    }
}

/// Turns a `file://` document URL into a plain path.
fn document_path(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .filter(|u| u.scheme() == "file")
        .and_then(|u| u.to_file_path().ok())
        .map_or_else(|| url.to_string(), |p| p.to_string_lossy().into_owned())
}

/// Converts an issue report into records: at most ten errors followed by
/// at most five warnings.
///
/// # Errors
///
/// Returns [`MonitorError::Parse`] if `report` is not an issue report.
pub fn issues_to_records(
    report: &str,
    log_path: &Path,
) -> Result<Vec<DiagnosticRecord>, MonitorError> {
    let report: IssueReport =
        serde_json::from_str(report).map_err(|e| MonitorError::parse(log_path, e))?;
    let log = log_path.to_string_lossy();

    let errors = report
        .errors
        .into_iter()
        .take(MAX_ERRORS)
        .map(|i| i.into_record(Severity::Error, &log));
    let warnings = report
        .warnings
        .into_iter()
        .take(MAX_WARNINGS)
        .map(|i| i.into_record(Severity::Warning, &log));

    Ok(errors.chain(warnings).collect())
}

#[async_trait]
impl Collector for BuildLogCollector {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<DiagnosticRecord>, MonitorError> {
        let Some(log) = newest_artifact(
            &self.derived_data,
            true,
            |p| has_extension(p, "xcactivitylog"),
            Some(HORIZON),
            ctx.now,
        ) else {
            debug!("No recent build log under {}", self.derived_data.display());
            return Ok(Vec::new());
        };

        let path = log.path.to_string_lossy();
        let output = run_tool(
            &self.xclogparser,
            &["parse", "--file", path.as_ref(), "--reporter", "issues"],
            self.timeout,
        )
        .await?;

        if !output.success() {
            return Err(MonitorError::parse(&log.path, output.stderr.trim()));
        }

        issues_to_records(&output.stdout, &log.path)
    }
}
