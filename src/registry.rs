//! Pending-request registry with sliding-TTL eviction.
//!
//! Maps correlation ids to their dispatch handlers. Entries slide on every
//! touch (registration, dispatch). Eviction is opportunistic: any access may
//! run a sweep when the previous one is older than the sweep interval, so no
//! timer task exists and eviction latency is bounded by TTL plus
//! time-to-next-access. Evicting an entry drops its handler, which wakes a
//! one-shot waiter with a cancellation exactly once.
//!
//! Persistent entries whose subscriber is still connected are exempt from
//! TTL; a quiet subscription is not an abandoned request. Once the
//! subscriber is gone they are swept like anything else.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::trace;

use crate::handler::{Dispatched, Handler};

/// Where the dispatcher should deliver a matched message.
pub(crate) enum DispatchTarget {
    /// Deliver once; the registry entry is already gone.
    OneShot(oneshot::Sender<Dispatched>),
    /// Deliver to the subscription feed; the entry remains.
    Persistent(mpsc::Sender<Dispatched>),
}

struct PendingEntry {
    handler: Handler,
    last_used: Instant,
}

pub(crate) struct PendingRegistry {
    entries: DashMap<String, PendingEntry>,
    ttl: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

fn lock(mutex: &Mutex<Instant>) -> MutexGuard<'_, Instant> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PendingRegistry {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Register a handler for `id`. Returns false when the id is already
    /// pending; the existing entry is untouched.
    pub fn try_add(&self, id: String, handler: Handler) -> bool {
        self.maybe_sweep();
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    handler,
                    last_used: Instant::now(),
                });
                true
            }
        }
    }

    /// Look up the handler for an inbound message, refreshing the entry's
    /// TTL. One-shot entries leave the map here so delivery is at-most-once
    /// even when the waiter is already gone.
    pub fn begin_dispatch(&self, id: &str) -> Option<DispatchTarget> {
        self.maybe_sweep();
        let persistent = {
            let mut entry = self.entries.get_mut(id)?;
            entry.last_used = Instant::now();
            match &entry.handler {
                Handler::Persistent(tx) => Some(tx.clone()),
                Handler::OneShot(_) => None,
            }
            // guard drops here; removal below must not hold a shard lock
        };
        if let Some(tx) = persistent {
            return Some(DispatchTarget::Persistent(tx));
        }
        let (_, entry) = self.entries.remove(id)?;
        match entry.handler {
            Handler::OneShot(tx) => Some(DispatchTarget::OneShot(tx)),
            Handler::Persistent(tx) => Some(DispatchTarget::Persistent(tx)),
        }
    }

    /// Drop the entry for `id`, if any. Returns whether one existed.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drop every entry; all waiters observe cancellation.
    pub fn clear(&self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn maybe_sweep(&self) {
        let now = Instant::now();
        {
            let mut last = lock(&self.last_sweep);
            if now.duration_since(*last) < self.sweep_interval {
                return;
            }
            *last = now;
        }
        let ttl = self.ttl;
        self.entries.retain(|id, entry| {
            if entry.handler.is_persistent() && !entry.handler.receiver_gone() {
                return true;
            }
            let keep = now.duration_since(entry.last_used) <= ttl;
            if !keep {
                trace!(id = %id, "evicting expired pending entry");
            }
            keep
        });
    }
}
