// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy shared by collectors, probes and the protocol client.
//!
//! Every variant is recoverable at the boundary of the component that
//! raised it: collectors degrade to an empty contribution, probes degrade
//! to a status string or an error event, and the protocol client marks
//! itself dead. Nothing here is allowed to end a scheduler tick.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised inside the monitoring engine.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Build configuration missing, unreadable or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required external binary is not installed.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Malformed frame or premature end of stream from the subordinate process.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error response returned by the subordinate process.
    #[error("server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the server.
        message: String,
    },

    /// A structured artifact could not be decoded.
    #[error("failed to parse {}: {reason}", path.display())]
    Parse {
        /// The artifact that failed to decode.
        path: PathBuf,
        /// Why decoding failed.
        reason: String,
    },

    /// An external call exceeded its bound.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// The bound that was exceeded.
        after: Duration,
    },

    /// Filesystem or pipe failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Builds a [`MonitorError::Parse`] for the given artifact.
    pub fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for failures that only mean "this tool is not installed".
    #[must_use]
    pub const fn is_tool_unavailable(&self) -> bool {
        matches!(self, Self::ToolUnavailable(_))
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid JSON message: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = MonitorError::ToolUnavailable("xclogparser".to_string());
        assert_eq!(err.to_string(), "tool unavailable: xclogparser");

        let err = MonitorError::Timeout {
            operation: "xcrun --find sourcekit-lsp".to_string(),
            after: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "xcrun --find sourcekit-lsp timed out after 2s");

        let err = MonitorError::parse("/tmp/a.plist", "unexpected token");
        assert_eq!(err.to_string(), "failed to parse /tmp/a.plist: unexpected token");
    }

    #[test]
    fn test_tool_unavailable_predicate() {
        assert!(MonitorError::ToolUnavailable("plutil".into()).is_tool_unavailable());
        assert!(!MonitorError::Protocol("eof".into()).is_tool_unavailable());
    }
}
