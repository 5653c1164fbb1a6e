// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Source record - one packed 8-byte entry per incoming connection.
//!
//! Layout of the backing `u64`:
//! - bits 0-61: source node id
//! - bit 62: processed (set once the record has been communicated)
//! - bit 63: disabled (logically removed, awaiting compaction)

use super::ids::NodeId;
use core::fmt;

const NODE_ID_MASK: u64 = (1 << 62) - 1;
const PROCESSED_BIT: u64 = 1 << 62;
const DISABLED_BIT: u64 = 1 << 63;

/// Largest node id a source record can hold
pub const MAX_NODE_ID: u64 = NODE_ID_MASK;

/// Size every source record must have
pub const SOURCE_RECORD_SIZE: usize = 8;

const _: () = assert!(core::mem::size_of::<Source>() == SOURCE_RECORD_SIZE);

/// Compact source record stored once per connection
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Source(u64);

impl Source {
    /// Create an enabled, unprocessed record for `node_id`
    #[inline]
    pub fn new(node_id: NodeId) -> Self {
        assert!(
            node_id.0 <= MAX_NODE_ID,
            "source node id {} exceeds the {}-bit record capacity",
            node_id.0,
            62
        );
        Self(node_id.0)
    }

    #[inline(always)]
    pub fn node_id(self) -> NodeId {
        NodeId(self.0 & NODE_ID_MASK)
    }

    #[inline(always)]
    pub fn is_disabled(self) -> bool {
        self.0 & DISABLED_BIT != 0
    }

    #[inline(always)]
    pub fn disable(&mut self) {
        self.0 |= DISABLED_BIT;
    }

    #[inline(always)]
    pub fn is_processed(self) -> bool {
        self.0 & PROCESSED_BIT != 0
    }

    #[inline(always)]
    pub fn set_processed(&mut self, processed: bool) {
        if processed {
            self.0 |= PROCESSED_BIT;
        } else {
            self.0 &= !PROCESSED_BIT;
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("node_id", &self.node_id().0)
            .field("processed", &self.is_processed())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
