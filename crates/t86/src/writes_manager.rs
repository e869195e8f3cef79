//! Pending-write ordering and alias hazard tracking.
//!
//! Grounded in the store-buffer bookkeeping of `t86/cpu/reservation_station.h`:
//! speculative stores must commit to memory in program order, and a load
//! behind a store whose address is not yet known must stall rather than
//! risk reading stale data (spec §4.8, "Memory ordering").

use std::collections::VecDeque;

/// A store still waiting to commit, in program order.
#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    /// Sequence number assigned at issue, used to preserve program order.
    seq: u64,
    /// The target address, once resolved. `None` while the store's address
    /// operand is still being computed.
    address: Option<u64>,
}

/// Tracks in-flight stores so loads can detect potential aliasing before
/// the store's address is known.
#[derive(Debug, Clone, Default)]
pub struct WritesManager {
    pending: VecDeque<PendingWrite>,
}

impl WritesManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new store at issue time, before its address is known.
    /// `seq` is the issuing instruction's own sequence number (the same one
    /// the reservation station assigned), so a branch misprediction's
    /// rollback point applies identically to both without a second
    /// numbering scheme to keep in sync.
    pub fn register(&mut self, seq: u64) {
        self.pending.push_back(PendingWrite { seq, address: None });
    }

    /// Records that the store identified by `seq` has resolved its target
    /// address.
    pub fn resolve_address(&mut self, seq: u64, address: u64) {
        if let Some(entry) = self.pending.iter_mut().find(|e| e.seq == seq) {
            entry.address = Some(address);
        }
    }

    /// Whether a load issued after `seq` at `address` must stall: true if
    /// any earlier, still-pending store either targets the same address or
    /// has not yet resolved its address at all (spec §4.8's
    /// "unspecified earlier write" hazard, see
    /// [`crate::stats::StallReason::UnspecifiedEarlierWrite`]).
    #[must_use]
    pub fn load_must_stall(&self, seq: u64, address: u64) -> bool {
        self.pending
            .iter()
            .take_while(|e| e.seq < seq)
            .any(|e| e.address.is_none() || e.address == Some(address))
    }

    /// Whether the store at the front of the queue (the oldest pending
    /// write) is `seq` and has a resolved address, i.e. is eligible to
    /// commit to [`crate::ram::Ram`] this tick.
    #[must_use]
    pub fn is_ready_to_commit(&self, seq: u64) -> bool {
        matches!(self.pending.front(), Some(e) if e.seq == seq && e.address.is_some())
    }

    /// Removes the store `seq` once it has committed to memory (or been
    /// rolled back). Must be called in program order; commit logic only
    /// ever retires the front entry.
    pub fn retire(&mut self, seq: u64) {
        if matches!(self.pending.front(), Some(e) if e.seq == seq) {
            self.pending.pop_front();
        }
    }

    /// Discards every pending write with `seq >= from`, undoing
    /// speculatively-issued stores behind a mispredicted branch
    /// (spec §4.9, "Speculative rollback").
    pub fn rollback_from(&mut self, from: u64) {
        self.pending.retain(|e| e.seq < from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_stalls_behind_write_with_unresolved_address() {
        let mut mgr = WritesManager::new();
        let write_seq = 0;
        mgr.register(write_seq);
        let load_seq = write_seq + 1;
        assert!(mgr.load_must_stall(load_seq, 100));
        mgr.resolve_address(write_seq, 200);
        assert!(!mgr.load_must_stall(load_seq, 100));
        assert!(mgr.load_must_stall(load_seq, 200));
    }

    #[test]
    fn load_before_write_in_program_order_never_stalls() {
        let mut mgr = WritesManager::new();
        let load_seq = 0;
        mgr.register(1);
        assert!(!mgr.load_must_stall(load_seq, 100));
    }

    #[test]
    fn commit_requires_front_of_queue_and_resolved_address() {
        let mut mgr = WritesManager::new();
        let first = 0;
        let second = 1;
        mgr.register(first);
        mgr.register(second);
        assert!(!mgr.is_ready_to_commit(first));
        mgr.resolve_address(first, 10);
        assert!(mgr.is_ready_to_commit(first));
        mgr.resolve_address(second, 20);
        assert!(!mgr.is_ready_to_commit(second));
        mgr.retire(first);
        assert!(mgr.is_ready_to_commit(second));
    }

    #[test]
    fn rollback_discards_speculative_entries() {
        let mut mgr = WritesManager::new();
        let kept = 0;
        mgr.register(kept);
        mgr.resolve_address(kept, 1);
        let discarded = 1;
        mgr.register(discarded);
        mgr.rollback_from(discarded);
        assert!(mgr.is_ready_to_commit(kept));
        assert!(!mgr.load_must_stall(discarded, 999));
    }
}
