// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cursor into the nested `(thread, synapse type, local index)` source table.

use core::cmp::Ordering;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Totally ordered position in the source table.
///
/// Positions compare lexicographically by `(tid, syn_id, lcid)`. The invalid
/// position `(-1, -1, -1)` sorts below every valid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceTablePosition {
    pub tid: i64,
    pub syn_id: i64,
    pub lcid: i64,
}

impl SourceTablePosition {
    pub const fn new(tid: i64, syn_id: i64, lcid: i64) -> Self {
        Self { tid, syn_id, lcid }
    }

    /// The "uninitialized / minimal" sentinel
    pub const fn invalid() -> Self {
        Self::new(-1, -1, -1)
    }

    pub fn reset(&mut self) {
        *self = Self::invalid();
    }

    /// True if any component is below zero
    pub fn is_invalid(&self) -> bool {
        self.tid < 0 || self.syn_id < 0 || self.lcid < 0
    }

    /// Step one entry back within the current sequence.
    ///
    /// The result may have `lcid == -1`; the source table normalises it with
    /// `SourceTable::wrap_position`.
    pub fn decrease(&mut self) {
        self.lcid -= 1;
    }
}

impl Default for SourceTablePosition {
    fn default() -> Self {
        Self::invalid()
    }
}

impl PartialOrd for SourceTablePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourceTablePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.tid, self.syn_id, self.lcid).cmp(&(other.tid, other.syn_id, other.lcid))
    }
}

impl fmt::Display for SourceTablePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(tid={}, syn_id={}, lcid={})", self.tid, self.syn_id, self.lcid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicographic_order() {
        let a = SourceTablePosition::new(0, 5, 100);
        let b = SourceTablePosition::new(1, 0, 0);
        let c = SourceTablePosition::new(1, 0, 1);
        let d = SourceTablePosition::new(1, 1, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert_eq!(c.max(a), c);
    }

    #[test]
    fn test_invalid_sorts_below_everything() {
        let invalid = SourceTablePosition::invalid();
        assert!(invalid < SourceTablePosition::new(0, 0, 0));
        assert!(invalid.is_invalid());
        assert!(SourceTablePosition::new(0, 0, -1).is_invalid());
        assert!(!SourceTablePosition::new(0, 0, 0).is_invalid());
    }

    #[test]
    fn test_decrease_and_reset() {
        let mut pos = SourceTablePosition::new(2, 1, 0);
        pos.decrease();
        assert_eq!(pos, SourceTablePosition::new(2, 1, -1));
        pos.reset();
        assert_eq!(pos, SourceTablePosition::default());
    }
}
