// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Bounded invocation of external command-line tools.
//!
//! Every call carries an explicit timeout; a child that overruns it is
//! killed when its handle is dropped.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

use crate::error::MonitorError;

/// Captured result of a finished tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    /// Returns true if the tool exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Runs `program args..` and waits at most `timeout` for it to finish.
///
/// # Errors
///
/// - [`MonitorError::ToolUnavailable`] if the program cannot be found.
/// - [`MonitorError::Timeout`] if it does not finish in time.
/// - [`MonitorError::Io`] for any other spawn or wait failure.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<ToolOutput, MonitorError> {
    debug!("Executing: {} {:?} (timeout {:?})", program, args, timeout);

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MonitorError::ToolUnavailable(program.to_string())
            } else {
                MonitorError::Io(e)
            }
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }),
        Ok(Err(e)) => Err(MonitorError::Io(e)),
        // The child future is dropped here, which kills the process
        Err(_) => Err(MonitorError::Timeout {
            operation: format!("{program} {}", args.join(" ")),
            after: timeout,
        }),
    }
}

/// Converts a property list (binary or XML) to JSON with `plutil`.
///
/// # Errors
///
/// Returns [`MonitorError::Parse`] if the converter fails or emits invalid
/// JSON, and propagates [`run_tool`] failures.
pub async fn plist_to_json(
    plutil: &str,
    path: &Path,
    timeout: Duration,
) -> Result<serde_json::Value, MonitorError> {
    let path_str = path.to_string_lossy();
    let output = run_tool(
        plutil,
        &["-convert", "json", "-o", "-", path_str.as_ref()],
        timeout,
    )
    .await?;

    if !output.success() {
        return Err(MonitorError::parse(path, output.stderr.trim()));
    }
    if output.stdout.trim().is_empty() {
        return Err(MonitorError::parse(path, "converter produced no output"));
    }

    serde_json::from_str(&output.stdout).map_err(|e| MonitorError::parse(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() -> Result<()> {
        match run_tool("swiftwatch-no-such-tool", &[], Duration::from_secs(1)).await {
            Err(MonitorError::ToolUnavailable(name)) => {
                assert_eq!(name, "swiftwatch-no-such-tool");
                Ok(())
            }
            other => bail!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output() -> Result<()> {
        let output = run_tool("sh", &["-c", "echo out; echo err >&2"], Duration::from_secs(5)).await?;
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() -> Result<()> {
        match run_tool("sleep", &["5"], Duration::from_millis(100)).await {
            Err(MonitorError::Timeout { after, .. }) => {
                assert_eq!(after, Duration::from_millis(100));
                Ok(())
            }
            other => bail!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plist_converter_failure_is_parse_error() -> Result<()> {
        // `false` ignores its arguments and exits 1
        let result = plist_to_json("false", Path::new("/tmp/x.plist"), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(MonitorError::Parse { .. })));
        Ok(())
    }
}
