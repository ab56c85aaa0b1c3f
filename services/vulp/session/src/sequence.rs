//! Outbound sequence id allocation.

/// Hands out sequence ids for reliable packets.
///
/// Ids start at 1 (0 means "nothing received yet" on the wire) and increase by
/// exactly one per reliable packet for the lifetime of the client, across
/// reconnects. The space never wraps: after `u32::MAX` is handed out the
/// allocator is exhausted.
#[derive(Debug, Clone)]
pub struct SequenceIds {
    next: Option<u32>,
}

impl SequenceIds {
    /// Create an allocator starting at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create an allocator whose first id is `next`
    pub fn starting_at(next: u32) -> Self {
        Self { next: Some(next) }
    }

    /// Allocate the next id, or `None` once the id space is used up
    pub fn allocate(&mut self) -> Option<u32> {
        let id = self.next?;
        self.next = id.checked_add(1);
        Some(id)
    }

    /// Id the next call to [`SequenceIds::allocate`] will return
    pub fn peek(&self) -> Option<u32> {
        self.next
    }
}

impl Default for SequenceIds {
    fn default() -> Self {
        Self::new()
    }
}
