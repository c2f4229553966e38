// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The probes a scheduler tick runs, in order.
//!
//! Each probe yields exactly one [`UpdateEvent`]. Expected degradations
//! (nothing configured, a tool missing) are reported as status text; only
//! unexpected failures surface as errors, which the scheduler turns into
//! error events.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::clock::age;
use crate::collectors::{DiagnosticsAggregator, basename, has_extension, newest_artifact};
use crate::config::{BuildServerConfig, LspConfig};
use crate::diagnostic::UpdateEvent;
use crate::error::MonitorError;
use crate::lsp::{LspClient, SharedClient};
use crate::tools::run_tool;

/// Inputs for one tick.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// Canonical monitored root.
    pub root: PathBuf,
    /// Tick time.
    pub now: SystemTime,
}

/// One step of a scheduler tick.
#[async_trait]
pub trait Probe: Send {
    /// Name used in logs and error events.
    fn name(&self) -> &'static str;

    /// Produces this probe's event.
    async fn run(&mut self, ctx: &ProbeContext) -> Result<UpdateEvent, MonitorError>;
}

#[allow(clippy::expect_used, reason = "pattern is a literal")]
static PROJECT_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"location = "group:(.*\.xcodeproj)"#).expect("valid project reference pattern")
});

fn bundles(root: &Path, ext: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir() && has_extension(p, ext))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}

/// Identifies the workspace and projects at the root.
pub struct ProjectProbe;

#[async_trait]
impl Probe for ProjectProbe {
    fn name(&self) -> &'static str {
        "project"
    }

    async fn run(&mut self, ctx: &ProbeContext) -> Result<UpdateEvent, MonitorError> {
        let mut lines = Vec::new();
        let workspaces = bundles(&ctx.root, "xcworkspace");
        let projects = bundles(&ctx.root, "xcodeproj");

        if let Some(workspace) = workspaces.first() {
            lines.push(format!("Workspace: {workspace}"));
            let data = ctx.root.join(workspace).join("contents.xcworkspacedata");
            if data.exists() {
                match std::fs::read_to_string(&data) {
                    Ok(contents) => {
                        let refs: Vec<String> = PROJECT_REFERENCE
                            .captures_iter(&contents)
                            .map(|c| basename(&c[1]))
                            .collect();
                        if !refs.is_empty() {
                            lines.push(format!("Referenced projects: {}", refs.join(", ")));
                        }
                    }
                    Err(e) => lines.push(format!("Workspace parse error: {e}")),
                }
            }
        } else if !projects.is_empty() {
            lines.push(format!("Projects: {}", projects.join(", ")));
        }

        // An invalid file is reported by the build server probe
        if let Ok(Some(config)) = BuildServerConfig::load(&ctx.root) {
            if let Some(workspace) = &config.workspace {
                lines.push(format!("Build server workspace: {}", basename(workspace)));
            }
            if let Some(scheme) = config.active_scheme() {
                lines.push(format!("Active scheme: {scheme}"));
            }
        }

        let text = if lines.is_empty() {
            let name = ctx
                .root
                .file_name()
                .map_or_else(|| ctx.root.display().to_string(), |n| n.to_string_lossy().into_owned());
            format!("{name} (no Xcode projects found)")
        } else {
            lines.join("\n")
        };
        Ok(UpdateEvent::status("project", text))
    }
}

/// Reports whether a build configuration is present.
pub struct BuildServerProbe;

#[async_trait]
impl Probe for BuildServerProbe {
    fn name(&self) -> &'static str {
        "build_server"
    }

    async fn run(&mut self, ctx: &ProbeContext) -> Result<UpdateEvent, MonitorError> {
        let text = match BuildServerConfig::load(&ctx.root) {
            Ok(Some(config)) => format!("Configured ({})", config.display_name()),
            Ok(None) => "Not configured".to_string(),
            Err(e) => {
                warn!("{}", e);
                format!("Invalid configuration: {e}")
            }
        };
        Ok(UpdateEvent::status("build_server", text))
    }
}

/// Reports language server availability and, when enabled, supervises it.
pub struct ToolingProbe {
    xcrun: String,
    timeout: Duration,
    lsp: LspConfig,
    slot: SharedClient,
}

impl ToolingProbe {
    /// Creates the probe. `slot` is shared with the diagnostics collector.
    #[must_use]
    pub const fn new(xcrun: String, timeout: Duration, lsp: LspConfig, slot: SharedClient) -> Self {
        Self {
            xcrun,
            timeout,
            lsp,
            slot,
        }
    }

    async fn availability(&self) -> Result<String, MonitorError> {
        match run_tool(&self.xcrun, &["--find", "sourcekit-lsp"], self.timeout).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => Ok(format!(
                "Available at {}",
                basename(output.stdout.trim())
            )),
            Ok(_) => Ok("Not available".to_string()),
            Err(e) if e.is_tool_unavailable() => Ok("Not available".to_string()),
            Err(e) => Err(e),
        }
    }

    /// Returns the running client's status, constructing a new client when
    /// the previous one is missing or dead.
    async fn supervise(&self, root: &Path) -> String {
        // Held across the handshake so the collector never sees a half-built client
        let mut slot = self.slot.lock().await;
        if let Some(client) = slot.as_ref().filter(|c| c.is_alive()) {
            return running(client);
        }

        if let Some(mut dead) = slot.take() {
            warn!("Language server is dead, restarting");
            if let Err(e) = dead.shutdown().await {
                warn!("Failed to reap language server: {}", e);
            }
        }

        let mut client = match LspClient::spawn(&self.lsp.command, &self.lsp.args) {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to start language server: {}", e);
                return format!("Failed to start: {e}");
            }
        };
        if let Err(e) = client.initialize(root).await {
            warn!("Language server handshake failed: {}", e);
            if let Err(e) = client.shutdown().await {
                debug!("Failed to reap language server: {}", e);
            }
            return format!("Failed to start: {e}");
        }

        info!("Language server running for {}", root.display());
        let status = running(&client);
        *slot = Some(client);
        status
    }
}

fn running(client: &LspClient) -> String {
    client
        .pid()
        .map_or_else(|| "Running".to_string(), |pid| format!("Running (pid {pid})"))
}

#[async_trait]
impl Probe for ToolingProbe {
    fn name(&self) -> &'static str {
        "lsp"
    }

    async fn run(&mut self, ctx: &ProbeContext) -> Result<UpdateEvent, MonitorError> {
        let text = if self.lsp.enabled {
            self.supervise(&ctx.root).await
        } else {
            self.availability().await?
        };
        Ok(UpdateEvent::status("lsp", text))
    }
}

/// Reports how long ago the last build log was written.
pub struct RecentBuildProbe {
    derived_data: PathBuf,
}

impl RecentBuildProbe {
    const HORIZON: Duration = Duration::from_secs(24 * 3600);

    /// Creates the probe over `derived_data`.
    #[must_use]
    pub const fn new(derived_data: PathBuf) -> Self {
        Self { derived_data }
    }
}

/// Formats a build age as whole minutes below an hour, hours above.
#[must_use]
pub fn describe_age(elapsed: Duration) -> String {
    let elapsed = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::MAX);
    if elapsed < chrono::Duration::hours(1) {
        format!("{} minutes ago", elapsed.num_minutes())
    } else {
        format!("{} hours ago", elapsed.num_hours())
    }
}

#[async_trait]
impl Probe for RecentBuildProbe {
    fn name(&self) -> &'static str {
        "last_build"
    }

    async fn run(&mut self, ctx: &ProbeContext) -> Result<UpdateEvent, MonitorError> {
        let newest = newest_artifact(
            &self.derived_data,
            true,
            |p| has_extension(p, "xcactivitylog"),
            Some(Self::HORIZON),
            ctx.now,
        );
        let text = newest.map_or_else(
            || "No recent builds".to_string(),
            |log| describe_age(age(ctx.now, log.modified)),
        );
        Ok(UpdateEvent::status("last_build", text))
    }
}

/// Runs every collector.
pub struct DiagnosticsProbe {
    aggregator: Arc<DiagnosticsAggregator>,
}

impl DiagnosticsProbe {
    /// Creates the probe.
    #[must_use]
    pub const fn new(aggregator: Arc<DiagnosticsAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl Probe for DiagnosticsProbe {
    fn name(&self) -> &'static str {
        "diagnostics"
    }

    async fn run(&mut self, ctx: &ProbeContext) -> Result<UpdateEvent, MonitorError> {
        Ok(UpdateEvent::Diagnostics(
            self.aggregator.collect_all(&ctx.root).await,
        ))
    }
}

/// Summarizes the build server's command line.
pub struct BuildDetailsProbe;

/// Renders build details for `config`.
#[must_use]
pub fn build_details(config: Option<&BuildServerConfig>) -> String {
    let Some(config) = config else {
        return "No build server configuration found".to_string();
    };

    let mut lines = vec![format!(
        "Build server: {}",
        config.name.as_deref().unwrap_or("unknown")
    )];
    if !config.arguments.is_empty() {
        let head: Vec<&str> = config.arguments.iter().take(5).map(String::as_str).collect();
        lines.push(format!("Arguments: {}...", head.join(" ")));
    }
    if let Some(dir) = &config.working_directory {
        lines.push(format!("Working directory: {dir}"));
    }
    lines.join("\n")
}

#[async_trait]
impl Probe for BuildDetailsProbe {
    fn name(&self) -> &'static str {
        "build_info"
    }

    async fn run(&mut self, ctx: &ProbeContext) -> Result<UpdateEvent, MonitorError> {
        let config = BuildServerConfig::load(&ctx.root)?;
        Ok(UpdateEvent::BuildInfo(build_details(config.as_ref())))
    }
}
