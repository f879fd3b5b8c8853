use crate::error::{KvdisError, KvdisResult};

/// Initial head and tail of an empty list, in the middle of the index space
/// so both ends can grow without renumbering.
pub const INITIAL_INDEX: u64 = 1 << 63;

/// Sliding window `[head, tail)` over the item keys of one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListMeta {
    pub expire_at: u64,
    pub tomb: bool,
    pub head: u64,
    pub tail: u64,
}

impl Default for ListMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl ListMeta {
    pub fn new() -> Self {
        ListMeta {
            expire_at: 0,
            tomb: false,
            head: INITIAL_INDEX,
            tail: INITIAL_INDEX,
        }
    }

    pub fn size(&self) -> u64 {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Grow the window by `n` slots at the head. The `i`-th pushed item
    /// belongs at `old_head - 1 - i`; the old head is returned.
    pub fn reserve_front(&mut self, n: u64) -> KvdisResult<u64> {
        let old = self.head;
        self.head = old
            .checked_sub(n)
            .ok_or_else(|| KvdisError::Generic("list index space exhausted".into()))?;
        Ok(old)
    }

    /// Grow the window by `n` slots at the tail. The `i`-th pushed item
    /// belongs at `old_tail + i`; the old tail is returned.
    pub fn reserve_back(&mut self, n: u64) -> KvdisResult<u64> {
        let old = self.tail;
        self.tail = old
            .checked_add(n)
            .ok_or_else(|| KvdisError::Generic("list index space exhausted".into()))?;
        Ok(old)
    }

    /// Take the first slot, returning its index.
    pub fn pop_front(&mut self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        let idx = self.head;
        self.head += 1;
        Some(idx)
    }

    /// Take the last slot, returning its index.
    pub fn pop_back(&mut self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        self.tail -= 1;
        Some(self.tail)
    }

    /// Map a Redis list index (negative counts from the end) to a slot index.
    pub fn resolve_index(&self, index: i64) -> Option<u64> {
        let size = self.size() as i64;
        let logical = if index < 0 { index + size } else { index };
        if logical < 0 || logical >= size {
            return None;
        }
        Some(self.head + logical as u64)
    }

    /// Normalize an inclusive `[start, stop]` range the way LRANGE does.
    /// Returns logical offsets, or `None` for an empty result.
    pub fn normalize_range(&self, start: i64, stop: i64) -> Option<(u64, u64)> {
        normalize_range(self.size(), start, stop)
    }
}

/// Resolve Redis-style inclusive `[start, stop]` indexes (negative counts
/// from the end) against a sequence of `size` elements.
pub fn normalize_range(size: u64, start: i64, stop: i64) -> Option<(u64, u64)> {
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    let start = if start < 0 { start.saturating_add(size).max(0) } else { start };
    let stop = if stop < 0 { stop.saturating_add(size) } else { stop.min(size - 1) };
    if start > stop || start >= size {
        return None;
    }
    Some((start as u64, stop as u64))
}
