// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cluster-wide collective reductions.
//!
//! The buffer layout needs exactly one primitive: a blocking maximum
//! reduction that every process must reach. There is no timeout; a rank that
//! never arrives stalls all others.

use crate::types::{ConnectivityError, Rank, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use tracing::trace;

/// Blocking cluster-wide collective
pub trait Collective: Send + Sync {
    /// Rank of the calling process
    fn rank(&self) -> Rank;

    /// Number of participating processes
    fn num_processes(&self) -> usize;

    /// Maximum of `value` over every participating process
    fn all_reduce_max(&self, value: u64) -> Result<u64>;
}

/// Collective for a process running alone
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> Rank {
        0
    }

    fn num_processes(&self) -> usize {
        1
    }

    fn all_reduce_max(&self, value: u64) -> Result<u64> {
        Ok(value)
    }
}

struct ClusterShared {
    num_ranks: usize,
    contributions: Mutex<Vec<u64>>,
    barrier: Barrier,
}

/// In-process cluster whose ranks are threads.
///
/// Each rank handle must be driven from its own OS thread; the reduction
/// blocks until all ranks have contributed.
#[derive(Clone)]
pub struct LocalCluster {
    shared: Arc<ClusterShared>,
}

impl LocalCluster {
    pub fn new(num_ranks: usize) -> Self {
        assert!(num_ranks > 0, "a cluster needs at least one rank");
        Self {
            shared: Arc::new(ClusterShared {
                num_ranks,
                contributions: Mutex::new(vec![0; num_ranks]),
                barrier: Barrier::new(num_ranks),
            }),
        }
    }

    pub fn num_ranks(&self) -> usize {
        self.shared.num_ranks
    }

    /// Handle for `rank`
    pub fn rank(&self, rank: Rank) -> LocalClusterRank {
        assert!(
            rank < self.shared.num_ranks,
            "rank {} out of range for a {}-rank cluster",
            rank,
            self.shared.num_ranks
        );
        LocalClusterRank {
            rank,
            shared: Arc::clone(&self.shared),
        }
    }

    /// One handle per rank, in rank order
    pub fn ranks(&self) -> Vec<LocalClusterRank> {
        (0..self.shared.num_ranks).map(|r| self.rank(r)).collect()
    }
}

/// One rank of a [`LocalCluster`]
#[derive(Clone)]
pub struct LocalClusterRank {
    rank: Rank,
    shared: Arc<ClusterShared>,
}

impl Collective for LocalClusterRank {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn num_processes(&self) -> usize {
        self.shared.num_ranks
    }

    fn all_reduce_max(&self, value: u64) -> Result<u64> {
        self.shared.contributions.lock()[self.rank] = value;
        self.shared.barrier.wait();

        let reduced = self
            .shared
            .contributions
            .lock()
            .iter()
            .copied()
            .max()
            .ok_or_else(|| ConnectivityError::Collective("empty cluster".to_string()))?;

        // Nobody may overwrite a contribution before every rank has read the result
        self.shared.barrier.wait();
        trace!(
            "[COLLECTIVE] rank {} contributed {} -> max {}",
            self.rank,
            value,
            reduced
        );
        Ok(reduced)
    }
}
