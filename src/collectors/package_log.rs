// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{CollectContext, Collector, basename, has_extension, newest_artifact};
use crate::diagnostic::{DiagnosticRecord, Severity};
use crate::error::MonitorError;

/// Source tag for package-manager records.
pub const SOURCE: &str = "swiftpm";

const HORIZON: Duration = Duration::from_secs(3600);
const MAX_MATCHES: usize = 10;

/// `path:line:column: severity: message`
#[allow(clippy::expect_used, reason = "pattern is a literal")]
static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([^:\n]+):(\d+):(\d+):\s*(error|warning|note):\s*(.+?)\s*$")
        .expect("valid diagnostic pattern")
});

/// Scans the newest package build log for compiler diagnostics.
pub struct PackageLogCollector {
    dir: PathBuf,
}

impl PackageLogCollector {
    /// Creates a collector over the log directory `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

/// Extracts up to ten diagnostics from build log text.
#[must_use]
pub fn parse_log(contents: &str, log_path: &str) -> Vec<DiagnosticRecord> {
    DIAGNOSTIC_LINE
        .captures_iter(contents)
        .take(MAX_MATCHES)
        .map(|caps| {
            let line = caps[2].parse().unwrap_or(0);
            DiagnosticRecord::new(
                Severity::coerce(&caps[4]),
                basename(caps[1].trim()),
                line,
                &caps[5],
                SOURCE,
            )
            .with_log_path(log_path)
        })
        .collect()
}

#[async_trait]
impl Collector for PackageLogCollector {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<DiagnosticRecord>, MonitorError> {
        let Some(log) = newest_artifact(
            &self.dir,
            false,
            |p| has_extension(p, "log"),
            Some(HORIZON),
            ctx.now,
        ) else {
            debug!("No recent package log in {}", self.dir.display());
            return Ok(Vec::new());
        };

        let bytes = tokio::fs::read(&log.path).await?;
        let contents = String::from_utf8_lossy(&bytes);
        Ok(parse_log(&contents, &log.path.to_string_lossy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::SystemTime;

    #[test]
    fn test_parse_log() {
        let log = "\
Compiling App main.swift
/src/App/Sources/main.swift:12:5: error: cannot find 'foo' in scope
/src/App/Sources/util.swift:3:1: warning: unused variable 'x'
/src/App/Sources/util.swift:4:1: note: did you mean 'y'?
[3/4] Linking App
";
        let records = parse_log(log, "/logs/build.log");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].file, "main.swift");
        assert_eq!(records[0].line, 12);
        assert_eq!(records[0].severity, Severity::Error);
        assert_eq!(records[0].message, "cannot find 'foo' in scope");
        assert_eq!(records[1].severity, Severity::Warning);
        assert_eq!(records[2].severity, Severity::Info);
        assert_eq!(records[2].log_path.as_deref(), Some("/logs/build.log"));
    }

    #[test]
    fn test_caps_matches() {
        let log: String = (1..=25)
            .map(|n| format!("/src/a.swift:{n}:1: error: e{n}\n"))
            .collect();
        let records = parse_log(&log, "x.log");
        assert_eq!(records.len(), 10);
        assert_eq!(records[9].message, "e10");
    }

    #[tokio::test]
    async fn test_reads_newest_recent_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let now = SystemTime::now();
        let stale = dir.path().join("old.log");
        let fresh = dir.path().join("new.log");
        std::fs::write(&stale, "/a/old.swift:1:1: error: stale\n")?;
        std::fs::write(&fresh, "/a/new.swift:2:1: warning: fresh\n")?;
        std::fs::File::options()
            .write(true)
            .open(&stale)?
            .set_modified(now - Duration::from_secs(7200))?;
        std::fs::File::options()
            .write(true)
            .open(&fresh)?
            .set_modified(now - Duration::from_secs(60))?;

        let collector = PackageLogCollector::new(dir.path().to_path_buf());
        let ctx = CollectContext {
            root: dir.path().to_path_buf(),
            now,
            build_config: None,
        };
        let records = collector.collect(&ctx).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file, "new.swift");
        assert_eq!(records[0].message, "fresh");
        Ok(())
    }
}
