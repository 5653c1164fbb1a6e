// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mapping of global node ids onto processes, threads and local indices.

use crate::types::{NodeId, Rank, ThreadIndex};

/// Partition of the global node id space across the cluster
pub trait Partitioning: Send + Sync {
    /// Worker threads per process
    fn num_threads(&self) -> usize;

    /// Participating processes
    fn num_processes(&self) -> usize;

    /// Rank owning `node`
    fn process_of(&self, node: NodeId) -> Rank;

    /// Thread (within its owning rank) that owns `node`
    fn thread_of(&self, node: NodeId) -> ThreadIndex;

    /// Index of `node` inside its owning thread's partition
    fn node_to_local_index(&self, node: NodeId) -> usize;
}

/// Round-robin assignment over virtual processes.
///
/// Node `n` belongs to virtual process `n % (num_processes * num_threads)`;
/// virtual processes are dealt to ranks round-robin, so rank `vp % num_processes`
/// runs it on thread `vp / num_processes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobinPartitioning {
    num_processes: usize,
    num_threads: usize,
}

impl RoundRobinPartitioning {
    pub fn new(num_processes: usize, num_threads: usize) -> Self {
        assert!(num_processes > 0, "at least one process is required");
        assert!(num_threads > 0, "at least one thread is required");
        Self {
            num_processes,
            num_threads,
        }
    }

    /// Single process, `num_threads` workers
    pub fn single_process(num_threads: usize) -> Self {
        Self::new(1, num_threads)
    }

    #[inline]
    pub fn num_virtual_processes(&self) -> usize {
        self.num_processes * self.num_threads
    }

    #[inline]
    fn vp_of(&self, node: NodeId) -> usize {
        (node.0 % self.num_virtual_processes() as u64) as usize
    }
}

impl Partitioning for RoundRobinPartitioning {
    fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn num_processes(&self) -> usize {
        self.num_processes
    }

    fn process_of(&self, node: NodeId) -> Rank {
        self.vp_of(node) % self.num_processes
    }

    fn thread_of(&self, node: NodeId) -> ThreadIndex {
        self.vp_of(node) / self.num_processes
    }

    fn node_to_local_index(&self, node: NodeId) -> usize {
        (node.0 / self.num_virtual_processes() as u64) as usize
    }
}
