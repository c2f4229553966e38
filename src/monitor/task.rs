// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A unit of work repeated on a fixed cadence.
#[async_trait]
pub trait Periodic: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one cycle. Failures must be handled inside the cycle.
    async fn tick(&mut self);
}

/// Spawns `job`, ticking it every `period` until `cancel` fires.
///
/// Cancellation is observed at the top of each cycle and while sleeping;
/// a cycle in progress always runs to completion.
pub fn spawn_periodic<P: Periodic>(
    mut job: P,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("{} started (every {:?})", job.name(), period);
        while !cancel.is_cancelled() {
            job.tick().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(period) => {}
            }
        }
        debug!("{} stopped", job.name());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Periodic for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_ticks_until_cancelled() -> Result<()> {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn_periodic(
            Counter(count.clone()),
            Duration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await??;

        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {seen} ticks");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_ticks() -> Result<()> {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        spawn_periodic(Counter(count.clone()), Duration::from_secs(60), cancel).await?;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() -> Result<()> {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn_periodic(Counter(count.clone()), Duration::from_secs(60), cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await??;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
