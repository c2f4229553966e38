// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use async_trait::async_trait;
use lsp_types::{Diagnostic, DiagnosticSeverity, Uri};
use tracing::debug;

use super::{CollectContext, Collector, within_root};
use crate::diagnostic::{DiagnosticRecord, Severity};
use crate::error::MonitorError;
use crate::lsp::SharedClient;

/// Source tag for language-server records.
pub const SOURCE: &str = "sourcekit-lsp";

/// Reports what the supervised language server last published.
pub struct LanguageServerCollector {
    client: SharedClient,
}

impl LanguageServerCollector {
    /// Creates a collector reading from `client`.
    #[must_use]
    pub const fn new(client: SharedClient) -> Self {
        Self { client }
    }
}

fn severity(diagnostic: &Diagnostic) -> Severity {
    match diagnostic.severity {
        Some(DiagnosticSeverity::ERROR) => Severity::Error,
        Some(DiagnosticSeverity::WARNING) => Severity::Warning,
        _ => Severity::Info,
    }
}

fn uri_to_file(uri: &Uri) -> String {
    url::Url::parse(uri.as_str())
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .map_or_else(|| uri.as_str().to_string(), |p| p.to_string_lossy().into_owned())
}

/// Converts published diagnostics into records for files inside `root`.
#[must_use]
pub fn convert_published(
    published: &[(Uri, Vec<Diagnostic>)],
    root: &std::path::Path,
) -> Vec<DiagnosticRecord> {
    published
        .iter()
        .map(|(uri, diags)| (uri_to_file(uri), diags))
        .filter(|(file, _)| within_root(root, None, Some(file)))
        .flat_map(|(file, diags)| {
            diags.iter().map(move |d| {
                DiagnosticRecord::new(
                    severity(d),
                    file.clone(),
                    d.range.start.line.saturating_add(1),
                    d.message.clone(),
                    SOURCE,
                )
            })
        })
        .collect()
}

#[async_trait]
impl Collector for LanguageServerCollector {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<DiagnosticRecord>, MonitorError> {
        // The slot is held for the whole handshake, which has no timeout
        let Ok(slot) = self.client.try_lock() else {
            debug!("Language server busy, skipping");
            return Ok(Vec::new());
        };
        let Some(client) = slot.as_ref().filter(|c| c.is_alive()) else {
            return Ok(Vec::new());
        };

        let published = client.diagnostics_snapshot().await;
        drop(slot);
        Ok(convert_published(&published, &ctx.root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use lsp_types::{Position, Range};

    fn diag(line: u32, severity: Option<DiagnosticSeverity>, message: &str) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(line, 0), Position::new(line, 1)),
            severity,
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_convert_published() -> Result<()> {
        let root = tempfile::tempdir()?;
        let root_path = root.path().canonicalize()?;
        let inside = root_path.join("main.swift");
        std::fs::write(&inside, "")?;
        let outside = tempfile::NamedTempFile::new()?;

        let uri = |p: &std::path::Path| -> Result<Uri> {
            let url = url::Url::from_file_path(p).map_err(|()| anyhow::anyhow!("relative"))?;
            url.as_str().parse().map_err(|e| anyhow::anyhow!("{e:?}"))
        };

        let published = vec![
            (
                uri(&inside)?,
                vec![
                    diag(0, Some(DiagnosticSeverity::ERROR), "e"),
                    diag(9, Some(DiagnosticSeverity::WARNING), "w"),
                    diag(2, Some(DiagnosticSeverity::HINT), "h"),
                    diag(3, None, "n"),
                ],
            ),
            (uri(outside.path())?, vec![diag(0, None, "elsewhere")]),
        ];

        let records = convert_published(&published, &root_path);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].severity, Severity::Error);
        assert_eq!(records[0].line, 1);
        assert_eq!(records[0].file, inside.to_string_lossy());
        assert_eq!(records[1].severity, Severity::Warning);
        assert_eq!(records[1].line, 10);
        assert_eq!(records[2].severity, Severity::Info);
        assert_eq!(records[3].severity, Severity::Info);
        assert!(records.iter().all(|r| r.source == SOURCE));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_slot_yields_nothing() -> Result<()> {
        let root = tempfile::tempdir()?;
        let collector = LanguageServerCollector::new(crate::lsp::empty_slot());
        let ctx = CollectContext {
            root: root.path().to_path_buf(),
            now: std::time::SystemTime::now(),
            build_config: None,
        };
        assert!(collector.collect(&ctx).await?.is_empty());
        Ok(())
    }
}
