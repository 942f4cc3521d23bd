//! Sender deduplication and sequence id assignment.

use reporter_types::{DetectionEvent, MacAddr};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

/// A newly recorded sender and the epoch its id belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub event: DetectionEvent,
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    seen: HashSet<Ipv4Addr>,
    counter: u64,
    epoch: u64,
}

/// The authoritative record of which senders have been seen.
///
/// Every read and write goes through one mutex. It is only ever held for
/// in-memory updates, never across enrichment or delivery.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // Each update is one insert plus one increment; a poisoned state is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records `source_ip` if it has not been seen in the current epoch.
    ///
    /// Returns `None` for a sender already in the ledger; the caller must
    /// not broadcast anything for it. Otherwise returns a base event with
    /// the next sequence id.
    pub fn record_if_new(
        &self,
        source_ip: Ipv4Addr,
        source_mac: MacAddr,
        destination_port: u16,
    ) -> Option<Recorded> {
        let mut state = self.lock();
        if !state.seen.insert(source_ip) {
            return None;
        }
        state.counter += 1;

        Some(Recorded {
            event: DetectionEvent::new(state.counter, source_ip, source_mac, destination_port),
            epoch: state.epoch,
        })
    }

    /// Forgets every sender and restarts ids at 1.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.seen.clear();
        state.counter = 0;
        state.epoch += 1;
        tracing::info!(epoch = state.epoch, "cleared detection ledger");
    }

    /// Returns `true` if no clear has happened since `epoch` was handed out.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    /// Number of senders seen in the current epoch.
    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
