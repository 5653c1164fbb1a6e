// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Identity types for nodes, threads, ranks and synapse types

use core::fmt;
use serde::{Deserialize, Serialize};

/// Node ID (globally unique across the entire cluster)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

/// Index of a worker thread inside one process
pub type ThreadIndex = usize;

/// Index of a registered synapse type (connection model prototype)
pub type SynIndex = usize;

/// Index of a participating process in the cluster
pub type Rank = usize;

/// Largest synapse type index that can be packed into a buffer position key.
/// `255` itself is reserved as the invalid marker.
pub const INVALID_SYN_INDEX: SynIndex = 255;
