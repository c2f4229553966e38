// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Ordered update log shared by producers and independently paced consumers.
//!
//! Producers append [`UpdateEvent`]s; each [`Subscription`] reads the same
//! sequence through its own cursor, so a slow watcher never steals events
//! from the primary consumer. Events are discarded once every live cursor
//! has moved past them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::trace;

use crate::diagnostic::UpdateEvent;

#[derive(Debug, Default)]
struct LogState {
    /// Sequence number of `events[0]`.
    base: u64,
    events: VecDeque<UpdateEvent>,
    /// Subscription id -> next sequence number to read.
    cursors: HashMap<u64, u64>,
    next_subscription: u64,
}

impl LogState {
    fn head(&self) -> u64 {
        self.base + u64::try_from(self.events.len()).unwrap_or(u64::MAX)
    }

    /// Drops events every cursor has already consumed.
    fn trim(&mut self) {
        let Some(&oldest) = self.cursors.values().min() else {
            return;
        };
        while self.base < oldest && self.events.pop_front().is_some() {
            self.base += 1;
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LogState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer handle for the update log. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct UpdateChannel {
    shared: Arc<Shared>,
}

impl UpdateChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and wakes waiting consumers.
    pub fn push(&self, event: UpdateEvent) {
        {
            let mut state = self.shared.lock();
            trace!("update #{}: {}", state.head(), event.kind());
            state.events.push_back(event);
        }
        self.shared.notify.notify_waiters();
    }

    /// Registers a new consumer positioned at the oldest retained event.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.shared.lock();
        let id = state.next_subscription;
        state.next_subscription += 1;
        let start = state.base;
        state.cursors.insert(id, start);
        drop(state);

        Subscription {
            id,
            shared: self.shared.clone(),
        }
    }

    /// Discards everything pending for every consumer.
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        let head = state.head();
        state.events.clear();
        state.base = head;
        for cursor in state.cursors.values_mut() {
            *cursor = head;
        }
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().events.len()
    }

    /// Returns true if no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A consumer cursor over an [`UpdateChannel`].
///
/// Dropping the subscription releases its cursor.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Returns every event emitted since the last drain. Never blocks.
    #[must_use]
    pub fn drain(&self) -> Vec<UpdateEvent> {
        let mut state = self.shared.lock();
        let head = state.head();
        let base = state.base;
        let Some(cursor) = state.cursors.get_mut(&self.id) else {
            return Vec::new();
        };
        // A clear() may have moved the base past us.
        let from = (*cursor).max(base);
        *cursor = head;

        let skip = usize::try_from(from - base).unwrap_or(usize::MAX);
        let batch: Vec<UpdateEvent> = state.events.iter().skip(skip).cloned().collect();
        state.trim();
        batch
    }

    /// Waits until at least one event is available, then drains.
    pub async fn recv(&self) -> Vec<UpdateEvent> {
        loop {
            let notified = self.shared.notify.notified();
            let batch = self.drain();
            if !batch.is_empty() {
                return batch;
            }
            notified.await;
        }
    }

    /// Number of events this consumer has not read yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.shared.lock();
        let head = state.head();
        state
            .cursors
            .get(&self.id)
            .map_or(0, |&c| usize::try_from(head - c.max(state.base)).unwrap_or(usize::MAX))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.cursors.remove(&self.id);
        state.trim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::Duration;

    fn status(n: usize) -> UpdateEvent {
        UpdateEvent::status("seq", n.to_string())
    }

    #[test]
    fn test_drain_empty_returns_immediately() {
        let channel = UpdateChannel::new();
        let sub = channel.subscribe();
        assert!(sub.drain().is_empty());
        assert_eq!(sub.pending(), 0);
    }

    #[test]
    fn test_drain_preserves_emission_order() {
        let channel = UpdateChannel::new();
        let sub = channel.subscribe();
        for n in 0..5 {
            channel.push(status(n));
        }
        let drained = sub.drain();
        assert_eq!(drained, (0..5).map(status).collect::<Vec<_>>());
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_independent_cursors() {
        let channel = UpdateChannel::new();
        let primary = channel.subscribe();
        let watcher = channel.subscribe();

        channel.push(status(1));
        channel.push(status(2));
        assert_eq!(primary.drain().len(), 2);

        channel.push(status(3));
        assert_eq!(primary.drain(), vec![status(3)]);
        // The watcher still sees everything from its own position.
        assert_eq!(watcher.drain(), vec![status(1), status(2), status(3)]);
    }

    #[test]
    fn test_events_trimmed_once_all_cursors_pass() {
        let channel = UpdateChannel::new();
        let a = channel.subscribe();
        let b = channel.subscribe();
        channel.push(status(1));
        channel.push(status(2));

        let _ = a.drain();
        assert_eq!(channel.len(), 2);
        let _ = b.drain();
        assert_eq!(channel.len(), 0);
    }

    #[test]
    fn test_dropped_subscription_releases_backlog() {
        let channel = UpdateChannel::new();
        let a = channel.subscribe();
        let b = channel.subscribe();
        channel.push(status(1));
        let _ = a.drain();
        assert_eq!(channel.len(), 1);
        drop(b);
        assert_eq!(channel.len(), 0);
    }

    #[test]
    fn test_late_subscriber_sees_retained_backlog() {
        let channel = UpdateChannel::new();
        channel.push(status(1));
        let sub = channel.subscribe();
        assert_eq!(sub.drain(), vec![status(1)]);
    }

    #[test]
    fn test_clear_discards_pending_for_all() {
        let channel = UpdateChannel::new();
        let a = channel.subscribe();
        let b = channel.subscribe();
        channel.push(status(1));
        channel.push(status(2));
        channel.clear();
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());

        channel.push(status(3));
        assert_eq!(a.drain(), vec![status(3)]);
        assert_eq!(b.pending(), 1);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() -> Result<()> {
        let channel = UpdateChannel::new();
        let sub = channel.subscribe();

        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let channel = channel.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        channel.push(UpdateEvent::status(producer.to_string(), n.to_string()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("producer panicked"))?;
        }

        let events = sub.drain();
        assert_eq!(events.len(), 400);
        for producer in 0..4 {
            let seen: Vec<usize> = events
                .iter()
                .filter_map(|e| match e {
                    UpdateEvent::Status { key, value } if *key == producer.to_string() => {
                        value.parse().ok()
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() -> Result<()> {
        let channel = UpdateChannel::new();
        let sub = channel.subscribe();

        let producer = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(status(7));
        });

        let batch = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await?;
        assert_eq!(batch, vec![status(7)]);
        Ok(())
    }
}
