//! Retransmission cache for unacknowledged reliable packets.
//!
//! Packets are appended in send order and removed only when the peer
//! acknowledges them, either through the ack cursor on an inbound reliable
//! packet or through a resync.

use crate::error::CacheError;
use std::collections::VecDeque;
use tracing::debug;
use vulp_wire::Packet;

/// Ordered store of sent reliable packets awaiting acknowledgment
#[derive(Debug, Default)]
pub struct RetransmissionCache {
    /// Cached packets, ascending by sequence id
    entries: VecDeque<Packet>,
}

impl RetransmissionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Append a packet at the tail.
    ///
    /// The packet must be reliable and its id must exceed every cached id.
    pub fn append(&mut self, packet: Packet) -> Result<(), CacheError> {
        let id = packet.sequence_id().ok_or(CacheError::NotReliable)?;
        if let Some(last) = self.last_id() {
            if id <= last {
                return Err(CacheError::OutOfOrder { id, last });
            }
        }

        debug!("Cache append id={} len={}", id, packet.payload().len());
        self.entries.push_back(packet);
        Ok(())
    }

    /// Drop every entry with id <= `ack_id`, returning how many were removed
    pub fn prune(&mut self, ack_id: u32) -> usize {
        let mut removed = 0;
        while self
            .entries
            .front()
            .and_then(Packet::sequence_id)
            .is_some_and(|id| id <= ack_id)
        {
            self.entries.pop_front();
            removed += 1;
        }

        if removed > 0 {
            debug!(
                "Cache pruned through ack_id={} removed={} remaining={}",
                ack_id,
                removed,
                self.entries.len()
            );
        }
        removed
    }

    /// Ascending view of the cached packets, for replay
    pub fn snapshot(&self) -> impl Iterator<Item = &Packet> + '_ {
        self.entries.iter()
    }

    /// Cached ids in ascending order
    pub fn ids(&self) -> Vec<u32> {
        self.entries.iter().filter_map(Packet::sequence_id).collect()
    }

    /// Newest cached id
    pub fn last_id(&self) -> Option<u32> {
        self.entries.back().and_then(Packet::sequence_id)
    }

    /// Number of cached packets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
