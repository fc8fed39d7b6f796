//! Victim selection when the slot table is full.
//!
//! Pure FIFO by creation: the occupied slot with the smallest creation stamp
//! goes first, ties broken by slot index. The stamp is a strictly increasing
//! sequence number handed out by the registry, so wall-clock resolution never
//! reorders sessions created back to back.

/// Eviction-relevant view of one occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub slot: usize,
    pub created: u64,
}

/// Pick the slot to evict, `None` if nothing is evictable.
pub fn select_victim<I>(candidates: I) -> Option<usize>
where
    I: IntoIterator<Item = Candidate>,
{
    candidates
        .into_iter()
        .min_by_key(|c| (c.created, c.slot))
        .map(|c| c.slot)
}
