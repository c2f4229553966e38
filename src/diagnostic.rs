// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Normalized diagnostic records and the events that carry them.

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

/// Severity of a diagnostic. Always one of three values; anything else is
/// coerced on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Severity {
    /// Compilation or analysis error.
    Error,
    /// Warning.
    Warning,
    /// Informational note.
    Info,
}

impl Severity {
    /// Coerces a free-form severity label.
    ///
    /// Labels mentioning "error" or "fatal" become [`Severity::Error`],
    /// labels mentioning "warn" become [`Severity::Warning`], and everything
    /// else (notes, remarks, unknown labels) becomes [`Severity::Info`].
    #[must_use]
    pub fn coerce(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("error") || label.contains("fatal") {
            Self::Error
        } else if label.contains("warn") {
            Self::Warning
        } else {
            Self::Info
        }
    }

    /// Maps a numeric severity level: 3 and above is an error, below is a warning.
    #[must_use]
    pub const fn from_level(level: i64) -> Self {
        if level >= 3 { Self::Error } else { Self::Warning }
    }

    /// Maps a textual issue kind: any kind containing "error" is an error,
    /// everything else a warning.
    #[must_use]
    pub fn from_kind(kind: &str) -> Self {
        if kind.to_ascii_lowercase().contains("error") {
            Self::Error
        } else {
            Self::Warning
        }
    }

    /// Lowercase label used in the external shape.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl From<String> for Severity {
    fn from(label: String) -> Self {
        Self::coerce(&label)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized diagnostic. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRecord {
    /// Error, warning or info.
    pub severity: Severity,
    /// File path; may be a basename or absolute.
    pub file: String,
    /// 1-based line, or 0 when unknown.
    pub line: u32,
    /// Human-readable message.
    pub message: String,
    /// Tag of the collector that produced the record.
    pub source: String,
    /// Workspace the record was attributed to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    /// Artifact the record was extracted from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    /// Opaque passthrough of the original entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_metadata: Option<serde_json::Value>,
}

impl DiagnosticRecord {
    /// Creates a record without optional metadata.
    pub fn new(
        severity: Severity,
        file: impl Into<String>,
        line: u32,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            file: file.into(),
            line,
            message: message.into(),
            source: source.into(),
            workspace_path: None,
            log_path: None,
            raw_metadata: None,
        }
    }

    /// Attaches the workspace path.
    #[must_use]
    pub fn with_workspace_path(mut self, workspace: Option<String>) -> Self {
        self.workspace_path = workspace;
        self
    }

    /// Attaches the originating artifact path.
    #[must_use]
    pub fn with_log_path(mut self, log_path: impl Into<String>) -> Self {
        self.log_path = Some(log_path.into());
        self
    }

    /// Attaches the raw source entry.
    #[must_use]
    pub fn with_raw_metadata(mut self, raw: serde_json::Value) -> Self {
        self.raw_metadata = Some(raw);
        self
    }
}

/// Clamps a JSON line number into the record's range.
#[must_use]
pub fn line_number(value: Option<&serde_json::Value>) -> u32 {
    value
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// An event appended to the update channel.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// A keyed status line changed.
    Status {
        /// Status slot, e.g. `project` or `lsp`.
        key: String,
        /// Readable status text.
        value: String,
    },
    /// A fresh batch of diagnostics.
    Diagnostics(Vec<DiagnosticRecord>),
    /// Build configuration details.
    BuildInfo(String),
    /// A probe failed.
    Error(String),
}

impl UpdateEvent {
    /// Creates a status event.
    pub fn status(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Status {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The event kind tag used in the external shape.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Diagnostics(_) => "diagnostics",
            Self::BuildInfo(_) => "build_info",
            Self::Error(_) => "error",
        }
    }
}

/// Serialized as a tagged tuple: `["status", key, value]`,
/// `["diagnostics", [..]]`, `["build_info", text]` or `["error", message]`.
impl Serialize for UpdateEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Status { key, value } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(self.kind())?;
                seq.serialize_element(key)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            Self::Diagnostics(records) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(self.kind())?;
                seq.serialize_element(records)?;
                seq.end()
            }
            Self::BuildInfo(text) | Self::Error(text) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(self.kind())?;
                seq.serialize_element(text)?;
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn test_severity_coercion() {
        assert_eq!(Severity::coerce("error"), Severity::Error);
        assert_eq!(Severity::coerce("Fatal Error"), Severity::Error);
        assert_eq!(Severity::coerce("warning"), Severity::Warning);
        assert_eq!(Severity::coerce("WARN"), Severity::Warning);
        assert_eq!(Severity::coerce("note"), Severity::Info);
        assert_eq!(Severity::coerce(""), Severity::Info);
    }

    #[test]
    fn test_severity_level_and_kind() {
        assert_eq!(Severity::from_level(3), Severity::Error);
        assert_eq!(Severity::from_level(4), Severity::Error);
        assert_eq!(Severity::from_level(2), Severity::Warning);
        assert_eq!(Severity::from_level(0), Severity::Warning);
        assert_eq!(Severity::from_kind("SwiftCompileError"), Severity::Error);
        assert_eq!(Severity::from_kind("deprecation"), Severity::Warning);
    }

    #[test]
    fn test_severity_deserializes_unknown_labels() -> Result<()> {
        let severity: Severity = serde_json::from_value(json!("remark"))?;
        assert_eq!(severity, Severity::Info);
        let severity: Severity = serde_json::from_value(json!("Error"))?;
        assert_eq!(severity, Severity::Error);
        Ok(())
    }

    #[test]
    fn test_record_external_shape() -> Result<()> {
        let record = DiagnosticRecord::new(Severity::Error, "main.swift", 12, "boom", "swiftpm")
            .with_log_path("/tmp/build.log");
        let value = serde_json::to_value(&record)?;
        assert_eq!(
            value,
            json!({
                "severity": "error",
                "file": "main.swift",
                "line": 12,
                "message": "boom",
                "source": "swiftpm",
                "logPath": "/tmp/build.log"
            })
        );

        let back: DiagnosticRecord = serde_json::from_value(value)?;
        assert_eq!(back, record);
        Ok(())
    }

    #[test]
    fn test_event_tagged_tuple_shape() -> Result<()> {
        let status = UpdateEvent::status("lsp", "Not available");
        assert_eq!(
            serde_json::to_value(&status)?,
            json!(["status", "lsp", "Not available"])
        );

        let diags = UpdateEvent::Diagnostics(vec![]);
        assert_eq!(serde_json::to_value(&diags)?, json!(["diagnostics", []]));

        let err = UpdateEvent::Error("probe failed".into());
        assert_eq!(serde_json::to_value(&err)?, json!(["error", "probe failed"]));
        assert_eq!(UpdateEvent::BuildInfo(String::new()).kind(), "build_info");
        Ok(())
    }

    #[test]
    fn test_line_number_clamping() {
        assert_eq!(line_number(Some(&json!(17))), 17);
        assert_eq!(line_number(Some(&json!("42"))), 42);
        assert_eq!(line_number(Some(&json!(-1))), 0);
        assert_eq!(line_number(None), 0);
        assert_eq!(line_number(Some(&json!(u64::MAX))), u32::MAX);
    }
}
