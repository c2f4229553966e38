/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MonitorError;

/// File name of the per-project build configuration.
pub const BUILD_CONFIG_FILE: &str = "buildServer.json";

/// Engine settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Scheduler cadence in milliseconds (default: 5000)
    pub scheduler_interval_ms: u64,

    /// Change detector cadence in milliseconds (default: 2000)
    pub detector_interval_ms: u64,

    /// How long `stop` waits for each task to finish (default: 3000)
    pub join_timeout_ms: u64,

    /// Where external artifacts live
    pub paths: PathsConfig,

    /// External binaries and their timeouts
    pub tools: ToolsConfig,

    /// Optional language server supervision
    pub lsp: LspConfig,

    /// Source file change detection
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Xcode DerivedData (build logs)
    pub derived_data: PathBuf,

    /// Xcode's live issue cache (`*.xcdiagnostics`)
    pub live_diagnostics: PathBuf,

    /// SwiftPM build logs
    pub package_logs: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    /// Structured build-log issue extractor
    pub xclogparser: String,

    /// Property-list converter
    pub plutil: String,

    /// Toolchain launcher used to locate sourcekit-lsp
    pub xcrun: String,

    /// Timeout for quick availability probes, in seconds (default: 2)
    pub probe_timeout_secs: u64,

    /// Timeout for artifact extraction tools, in seconds (default: 10)
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LspConfig {
    /// Spawn and supervise the language server (default: false)
    pub enabled: bool,

    /// The command to execute
    pub command: String,

    /// Arguments to pass to the command
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    /// File extensions that are fingerprinted
    pub extensions: Vec<String>,

    /// Path components that mark build output
    pub excluded_dirs: Vec<String>,

    /// Maximum changed files reported per cycle
    pub max_reported: usize,

    /// Fingerprints unseen for this many scans are evicted
    pub evict_after_cycles: u64,
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler_interval_ms: 5000,
            detector_interval_ms: 2000,
            join_timeout_ms: 3000,
            paths: PathsConfig::default(),
            tools: ToolsConfig::default(),
            lsp: LspConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home();
        Self {
            derived_data: home.join("Library/Developer/Xcode/DerivedData"),
            live_diagnostics: home
                .join("Library/Developer/Xcode/UserData/IDEEditorInteractivityHistory"),
            package_logs: home.join(".build/logs"),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            xclogparser: "xclogparser".to_string(),
            plutil: "plutil".to_string(),
            xcrun: "xcrun".to_string(),
            probe_timeout_secs: 2,
            tool_timeout_secs: 10,
        }
    }
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "xcrun".to_string(),
            args: vec!["sourcekit-lsp".to_string()],
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: ["swift", "m", "h", "mm", "c", "cpp"]
                .into_iter()
                .map(String::from)
                .collect(),
            excluded_dirs: vec!["DerivedData".to_string(), "build".to_string()],
            max_reported: 5,
            evict_after_cycles: 3,
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source exists but cannot be
    /// parsed or deserialized.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Load from user config directory (~/.config/swiftwatch/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("swiftwatch").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 2. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Environment (SWIFTWATCH_SCHEDULER_INTERVAL_MS, SWIFTWATCH_LSP__ENABLED, ...)
        builder = builder.add_source(
            config::Environment::with_prefix("SWIFTWATCH")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        // Missing keys fall back to `Default` via #[serde(default)]
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Scheduler cadence.
    #[must_use]
    pub const fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    /// Change detector cadence.
    #[must_use]
    pub const fn detector_interval(&self) -> Duration {
        Duration::from_millis(self.detector_interval_ms)
    }

    /// Bounded wait used when joining stopped tasks.
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl ToolsConfig {
    /// Timeout for availability probes.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Timeout for extraction tools.
    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// The project's `buildServer.json`, written by the build-server bootstrap.
///
/// Every key is optional; unknown keys are ignored.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct BuildServerConfig {
    /// Build server flavor (e.g. "xcode build server").
    #[serde(default)]
    pub name: Option<String>,

    /// Path of the `.xcworkspace` or `.xcodeproj` being built.
    #[serde(default)]
    pub workspace: Option<String>,

    /// Active scheme.
    #[serde(default)]
    pub scheme: Option<String>,

    /// Command line of the build server.
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Directory the build server runs in.
    #[serde(default, rename = "workingDirectory")]
    pub working_directory: Option<String>,

    /// Root of the build products tree.
    #[serde(default)]
    pub build_root: Option<String>,
}

impl BuildServerConfig {
    /// Reads `<root>/buildServer.json`.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Configuration`] if the file exists but cannot
    /// be read or is not a valid configuration object.
    pub fn load(root: &Path) -> Result<Option<Self>, MonitorError> {
        let path = root.join(BUILD_CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            MonitorError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            MonitorError::Configuration(format!("invalid {}: {e}", path.display()))
        })
    }

    /// The active scheme, falling back to the `-scheme` argument.
    #[must_use]
    pub fn active_scheme(&self) -> Option<&str> {
        self.scheme.as_deref().or_else(|| {
            self.arguments
                .iter()
                .position(|a| a == "-scheme")
                .and_then(|i| self.arguments.get(i + 1))
                .map(String::as_str)
        })
    }

    /// Display name of the build server.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("xcode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler_interval(), Duration::from_secs(5));
        assert_eq!(config.detector_interval(), Duration::from_secs(2));
        assert_eq!(config.tools.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.tools.tool_timeout(), Duration::from_secs(10));
        assert_eq!(config.watch.max_reported, 5);
        assert!(config.watch.extensions.iter().any(|e| e == "swift"));
        assert!(!config.lsp.enabled);
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("swiftwatch.toml");
        std::fs::write(
            &path,
            "scheduler_interval_ms = 250\n[lsp]\nenabled = true\n[watch]\nmax_reported = 2\n",
        )?;

        let config = Config::load(Some(path))?;
        assert_eq!(config.scheduler_interval_ms, 250);
        assert!(config.lsp.enabled);
        assert_eq!(config.lsp.command, "xcrun");
        assert_eq!(config.watch.max_reported, 2);
        assert_eq!(config.detector_interval_ms, 2000);
        Ok(())
    }

    #[test]
    fn test_build_config_absent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(BuildServerConfig::load(dir.path())?.is_none());
        Ok(())
    }

    #[test]
    fn test_build_config_parse() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join(BUILD_CONFIG_FILE),
            r#"{
                "name": "xcode build server",
                "workspace": "/src/App/App.xcworkspace",
                "arguments": ["xcode-build-server", "-scheme", "App"],
                "workingDirectory": "/src/App",
                "build_root": "/tmp/DerivedData/App",
                "kind": "xcode"
            }"#,
        )?;

        let config = BuildServerConfig::load(dir.path())?.context("config missing")?;
        assert_eq!(config.display_name(), "xcode build server");
        assert_eq!(config.active_scheme(), Some("App"));
        assert_eq!(config.working_directory.as_deref(), Some("/src/App"));
        assert_eq!(config.build_root.as_deref(), Some("/tmp/DerivedData/App"));
        Ok(())
    }

    #[test]
    fn test_build_config_invalid_is_configuration_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(BUILD_CONFIG_FILE), "{ not json")?;
        let err = BuildServerConfig::load(dir.path()).err().context("expected error")?;
        assert!(matches!(err, MonitorError::Configuration(_)));
        Ok(())
    }
}
