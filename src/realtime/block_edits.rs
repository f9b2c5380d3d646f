//! # Block Edit Ordering
//!
//! Edits are broadcast without a central authority. Each actor numbers its
//! own edits, and an edit is applied only if its sequence is strictly greater
//! than the last one applied from the same actor at the same voxel. Replays
//! are therefore idempotent. Edits from different actors are not ordered
//! against each other.
//!
//! A host-ordered variant keyed by position alone is provided for rooms where
//! a single host allocates sequences for everyone.

use std::collections::{HashMap, VecDeque};

use log::debug;

use super::protocol::{BlockEditEvent, BlockEditOperation, BlockPosition, Envelope};
use crate::engine_state::voxels::block::{BlockType, BlockTypeSize};

pub const DEFAULT_EDIT_LOG_CAPACITY: usize = 5000;

/// Whether an incoming sequence supersedes the last applied one.
pub fn should_apply_block_edit(previous: Option<u32>, incoming: u32) -> bool {
    previous.map_or(true, |previous| incoming > previous)
}

/// Per-actor ledger, local sequence counter and bounded edit log.
///
/// Only the log is bounded. `last_applied` keeps one entry per (actor, voxel)
/// pair for the whole session: other peers keep replaying their own logs in
/// world-syncs, and an edit that has aged out of ours must still be refused
/// when it comes back. Growth is bounded by the voxels players touch;
/// `clear` releases it.
pub struct BlockEditLedger {
    local_sequence: u32,
    last_applied: HashMap<(String, BlockPosition), u32>,
    log: VecDeque<BlockEditEvent>,
    capacity: usize,
}

impl BlockEditLedger {
    pub fn new(capacity: usize) -> Self {
        BlockEditLedger {
            local_sequence: 0,
            last_applied: HashMap::new(),
            log: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Numbers a local edit, records it and returns the event to broadcast.
    pub fn record_local(
        &mut self,
        envelope: Envelope,
        local_peer_id: &str,
        position: BlockPosition,
        block: BlockType,
    ) -> BlockEditEvent {
        self.local_sequence += 1;
        let edit = BlockEditEvent::from_write(envelope, local_peer_id, self.local_sequence, position, block);
        self.accept(edit.clone());
        edit
    }

    /// Applies a remote edit to the ledger.
    ///
    /// # Returns
    /// `true` if the edit is new and should be written to the world.
    pub fn accept(&mut self, edit: BlockEditEvent) -> bool {
        let key = (edit.actor_peer_id.clone(), edit.position);
        if !should_apply_block_edit(self.last_applied.get(&key).copied(), edit.sequence) {
            debug!(
                "Dropping stale edit {} from {} at {:?}",
                edit.sequence, edit.actor_peer_id, edit.position
            );
            return false;
        }
        self.last_applied.insert(key, edit.sequence);

        if self.log.len() == self.capacity {
            self.log.pop_front();
        }
        self.log.push_back(edit);
        true
    }

    /// The last local sequence handed out.
    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    /// Edits in the order they were accepted, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &BlockEditEvent> {
        self.log.iter()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Number of (actor, voxel) pairs whose latest sequence is remembered.
    pub fn tracked_positions(&self) -> usize {
        self.last_applied.len()
    }

    /// A copy of the log for a world-sync, or `None` if nothing was edited.
    pub fn replay(&self) -> Option<Vec<BlockEditEvent>> {
        if self.log.is_empty() {
            None
        } else {
            Some(self.log.iter().cloned().collect())
        }
    }

    /// Forgets everything, including the local sequence.
    pub fn clear(&mut self) {
        self.local_sequence = 0;
        self.last_applied.clear();
        self.log.clear();
    }
}

impl Default for BlockEditLedger {
    fn default() -> Self {
        Self::new(DEFAULT_EDIT_LOG_CAPACITY)
    }
}

/// Sequence source for a host that orders everyone's edits.
#[derive(Default)]
pub struct HostSequenceAllocator {
    sequence: u32,
}

impl HostSequenceAllocator {
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence += 1;
        self.sequence
    }

    pub fn reset(&mut self, sequence: u32) {
        self.sequence = sequence;
    }
}

/// The edit currently in effect at a position under host ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedBlockEdit {
    pub operation: BlockEditOperation,
    pub block_type: Option<BlockTypeSize>,
    pub sequence: u32,
    pub actor_peer_id: String,
    pub applied_at_ms: u64,
}

/// Applies a host-sequenced edit, keyed by position only.
///
/// # Returns
/// `false` if an edit with an equal or greater sequence is already in effect.
pub fn apply_host_ordered_block_edit(
    state: &mut HashMap<BlockPosition, AppliedBlockEdit>,
    edit: &BlockEditEvent,
) -> bool {
    if !should_apply_block_edit(state.get(&edit.position).map(|e| e.sequence), edit.sequence) {
        return false;
    }
    state.insert(
        edit.position,
        AppliedBlockEdit {
            operation: edit.operation,
            block_type: edit.block_type,
            sequence: edit.sequence,
            actor_peer_id: edit.actor_peer_id.clone(),
            applied_at_ms: edit.envelope.sent_at_ms,
        },
    );
    true
}
