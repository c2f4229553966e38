// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Low-level client for communicating with a language server process.
pub mod client;
/// JSON-RPC message definitions and framing.
pub mod protocol;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

pub use client::LspClient;

/// Slot holding the supervised client, shared by the tooling probe (which
/// creates and replaces it) and the diagnostics collector (which reads it).
pub type SharedClient = Arc<Mutex<Option<LspClient>>>;

/// Creates an empty client slot.
#[must_use]
pub fn empty_slot() -> SharedClient {
    Arc::new(Mutex::new(None))
}

/// Shuts down and removes the client in `slot`, if any.
pub async fn release(slot: &SharedClient) {
    let client = slot.lock().await.take();
    if let Some(mut client) = client
        && let Err(e) = client.shutdown().await
    {
        warn!("Language server shutdown failed: {}", e);
    }
}
