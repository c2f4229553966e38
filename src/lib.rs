// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! swiftwatch keeps a live, normalized view of an Xcode or SwiftPM project's
//! diagnostics.
//!
//! It polls build logs, the IDE's live issue cache, package-manager logs,
//! build-output property lists and an optional sourcekit-lsp process, and
//! publishes everything as one ordered stream of update events that any
//! number of consumers can read at their own pace.

/// Ordered multi-consumer update log.
pub mod channel;
/// Injectable wall clock.
pub mod clock;
/// Diagnostic collectors and the aggregator that runs them.
pub mod collectors;
/// Engine settings and the per-project build configuration.
pub mod config;
/// Normalized records and update events.
pub mod diagnostic;
/// Error taxonomy.
pub mod error;
/// Language server client and framing.
pub mod lsp;
/// Lifecycle, scheduler and probes.
pub mod monitor;
/// Bounded external tool invocation.
pub mod tools;
/// Source change detection.
pub mod watcher;

pub use channel::{Subscription, UpdateChannel};
pub use config::Config;
pub use diagnostic::{DiagnosticRecord, Severity, UpdateEvent};
pub use error::MonitorError;
pub use monitor::{Monitor, MonitorState};
