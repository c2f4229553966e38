// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::probes::{
    BuildDetailsProbe, BuildServerProbe, DiagnosticsProbe, Probe, ProbeContext, ProjectProbe,
    RecentBuildProbe, ToolingProbe,
};
use super::task::Periodic;
use crate::channel::UpdateChannel;
use crate::clock::Clock;
use crate::collectors::DiagnosticsAggregator;
use crate::config::Config;
use crate::diagnostic::UpdateEvent;
use crate::lsp::SharedClient;

/// Runs every probe once per tick and publishes one event per probe.
pub struct Scheduler {
    root: PathBuf,
    probes: Vec<Box<dyn Probe>>,
    channel: UpdateChannel,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Creates a scheduler running `probes` in list order.
    #[must_use]
    pub fn new(
        root: PathBuf,
        probes: Vec<Box<dyn Probe>>,
        channel: UpdateChannel,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            root,
            probes,
            channel,
            clock,
        }
    }

    /// The standard probe sequence: project, build server, tooling, last
    /// build, diagnostics, build details.
    #[must_use]
    pub fn standard(
        root: PathBuf,
        config: &Config,
        channel: UpdateChannel,
        clock: Arc<dyn Clock>,
        aggregator: Arc<DiagnosticsAggregator>,
        lsp: SharedClient,
    ) -> Self {
        let probes: Vec<Box<dyn Probe>> = vec![
            Box::new(ProjectProbe),
            Box::new(BuildServerProbe),
            Box::new(ToolingProbe::new(
                config.tools.xcrun.clone(),
                config.tools.probe_timeout(),
                config.lsp.clone(),
                lsp,
            )),
            Box::new(RecentBuildProbe::new(config.paths.derived_data.clone())),
            Box::new(DiagnosticsProbe::new(aggregator)),
            Box::new(BuildDetailsProbe),
        ];
        Self::new(root, probes, channel, clock)
    }
}

#[async_trait]
impl Periodic for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    /// Failures never escape the tick: each becomes one error event.
    async fn tick(&mut self) {
        let ctx = ProbeContext {
            root: self.root.clone(),
            now: self.clock.now(),
        };

        for probe in &mut self.probes {
            let event = match probe.run(&ctx).await {
                Ok(event) => event,
                Err(e) => {
                    warn!("{} probe failed: {}", probe.name(), e);
                    UpdateEvent::Error(format!("{}: {e}", probe.name()))
                }
            };
            self.channel.push(event);
        }
        debug!("Scheduler tick complete for {}", self.root.display());
    }
}
