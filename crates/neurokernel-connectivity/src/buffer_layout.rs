// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Receive-buffer geometry for secondary (payload-carrying) events.
//!
//! Every rank owns one uniform chunk of the shared receive buffer. Inside a
//! chunk, each unique `(source node, synapse type)` pair whose source lives on
//! that rank gets a contiguous slot of `secondary_event_size` units. The
//! layout is a pure function of the global set of pairs, so every process
//! computes identical offsets without exchanging them.

use crate::collective::Collective;
use crate::partition::Partitioning;
use crate::synapse_model::SynapseRegistry;
use crate::types::{NodeId, Rank, Result, SynIndex, INVALID_SYN_INDEX};
use ahash::AHashMap;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Node ids must fit in the upper 56 bits of a packed key
pub const MAX_PACKABLE_NODE_ID: u64 = (1 << 56) - 1;

/// Unique `(source node, synapse type)` pairs in canonical (sorted) order
pub type UniqueSecondarySources = BTreeSet<(NodeId, SynIndex)>;

/// Pack a `(source node, synapse type)` pair into one map key.
///
/// Key order equals pair order, so iterating a [`UniqueSecondarySources`] set
/// visits keys in ascending order.
#[inline]
pub fn pack_source_node_id_and_syn_id(source: NodeId, syn_id: SynIndex) -> u64 {
    assert!(
        source.0 <= MAX_PACKABLE_NODE_ID,
        "node id {} does not fit into a packed buffer key",
        source.0
    );
    assert!(
        syn_id < INVALID_SYN_INDEX,
        "synapse type {} does not fit into a packed buffer key",
        syn_id
    );
    (source.0 << 8) + syn_id as u64
}

/// Inverse of [`pack_source_node_id_and_syn_id`]
#[inline]
pub fn unpack_source_node_id_and_syn_id(key: u64) -> (NodeId, SynIndex) {
    (NodeId(key >> 8), (key & 0xff) as SynIndex)
}

/// Result of the buffer layout computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryBufferLayout {
    chunk_size: usize,
    positions: AHashMap<u64, usize>,
}

impl SecondaryBufferLayout {
    /// Uniform per-rank segment length, in payload units
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Buffer position map: packed key -> offset in the receive buffer
    pub fn positions(&self) -> &AHashMap<u64, usize> {
        &self.positions
    }

    pub fn position_of(&self, source: NodeId, syn_id: SynIndex) -> Option<usize> {
        self.positions
            .get(&pack_source_node_id_and_syn_id(source, syn_id))
            .copied()
    }

    /// First buffer unit belonging to `rank`
    pub fn rank_offset(&self, rank: Rank) -> usize {
        rank * self.chunk_size
    }

    /// Total receive-buffer length for `num_processes` ranks
    pub fn buffer_len(&self, num_processes: usize) -> usize {
        num_processes * self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Compute the layout for `unique` on this process.
///
/// Performs one blocking `all_reduce_max` through `collective`; every process
/// must call this for the reduction to complete.
pub fn compute_layout(
    unique: &UniqueSecondarySources,
    registry: &SynapseRegistry,
    partitioning: &dyn Partitioning,
    collective: &dyn Collective,
) -> Result<SecondaryBufferLayout> {
    let num_processes = partitioning.num_processes();

    let mut uint_count_per_rank = vec![0usize; num_processes];
    for &(source, syn_id) in unique {
        uint_count_per_rank[partitioning.process_of(source)] +=
            registry.secondary_event_size(syn_id);
    }

    let local_max = uint_count_per_rank.iter().copied().max().unwrap_or(0);
    let global_max = collective.all_reduce_max(local_max as u64)?;
    let chunk_size = global_max as usize + 1;

    let mut recv_buffer_position_by_rank: Vec<usize> =
        (0..num_processes).map(|rank| rank * chunk_size).collect();

    let mut positions = AHashMap::with_capacity(unique.len());
    for &(source, syn_id) in unique {
        let source_rank = partitioning.process_of(source);
        positions.insert(
            pack_source_node_id_and_syn_id(source, syn_id),
            recv_buffer_position_by_rank[source_rank],
        );
        recv_buffer_position_by_rank[source_rank] += registry.secondary_event_size(syn_id);
    }

    debug!(
        "[SECONDARY-LAYOUT] per-rank units {:?}, local max {}, global max {}",
        uint_count_per_rank, local_max, global_max
    );
    info!(
        "[SECONDARY-LAYOUT] chunk size {} for {} unique secondary sources on {} ranks",
        chunk_size,
        unique.len(),
        num_processes
    );

    Ok(SecondaryBufferLayout {
        chunk_size,
        positions,
    })
}
