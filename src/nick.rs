//! Default handle allocation
//!
//! Default handles are a fixed prefix followed by a decimal index. Freed
//! indices go on a min-heap and are always reused before a new one is minted,
//! so the lowest free slot is handed out first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Prefix of every default handle
pub const DEFAULT_PREFIX: &str = "rand";

/// Issues and recycles `rand<N>` handles
///
/// Invariants: no index is ever both in `used` and on `free`, and every index
/// below `next` is in exactly one of them. Anything on `free` is therefore
/// smaller than any free index that has not been minted yet.
#[derive(Debug, Default)]
pub struct NicknameAllocator {
    used: HashSet<u32>,
    free: BinaryHeap<Reverse<u32>>,
    next: u32,
}

impl NicknameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a default handle, reusing the smallest freed index first
    pub fn assign(&mut self) -> String {
        let index = match self.free.pop() {
            Some(Reverse(index)) => index,
            None => {
                // Skip indices reserved by hand above the mark
                let index = (self.next..)
                    .find(|i| !self.used.contains(i))
                    .unwrap_or(u32::MAX);
                self.next = index.saturating_add(1);
                index
            }
        };
        self.used.insert(index);
        format!("{}{}", DEFAULT_PREFIX, index)
    }

    /// Return a default handle's index to the pool
    ///
    /// Returns false for handles that are not default-pattern or not in use.
    pub fn release(&mut self, handle: &str) -> bool {
        let Some(index) = default_index(handle) else {
            return false;
        };
        if !self.used.remove(&index) {
            return false;
        }
        // Above the mark the index is simply unminted again
        if index < self.next {
            self.free.push(Reverse(index));
        }
        true
    }

    /// Mark a default-pattern handle chosen by hand as taken
    ///
    /// Keeps `assign` from ever minting a handle someone already holds.
    pub fn reserve(&mut self, handle: &str) -> bool {
        let Some(index) = default_index(handle) else {
            return false;
        };
        if !self.used.insert(index) {
            return false;
        }
        if index < self.next {
            self.free.retain(|Reverse(free)| *free != index);
        }
        true
    }

    pub fn is_used(&self, index: u32) -> bool {
        self.used.contains(&index)
    }

    /// Number of default handles currently handed out
    pub fn in_use(&self) -> usize {
        self.used.len()
    }
}

/// Index of a default-pattern handle
///
/// Only the canonical form matches: `rand7` does, `rand07` and `rand+7` don't.
pub fn default_index(handle: &str) -> Option<u32> {
    let digits = handle.strip_prefix(DEFAULT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}
