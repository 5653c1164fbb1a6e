/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! Source table - who feeds into each locally stored connection.
//!
//! Storage is two-level: one partition per worker thread, each holding one
//! sequence of [`Source`] records per synapse type. A slot is `None` when its
//! sequence has been released and `Some(vec)` otherwise.
//!
//! Each worker thread only ever mutates its own partition. Partitions sit
//! behind uncontended per-thread locks so that cross-thread readers
//! (`find_maximal_position`, `wrap_position`, `save_entry_point`) can inspect
//! them.
//!
//! The target-data scheduler reads the table backwards, from the highest
//! thread / synapse type / index down to `(0, 0, 0)`. The saved cursor of a
//! thread records how far its last completed pass got; entries above the
//! maximum saved cursor over all threads have been fully communicated and
//! can be reclaimed by [`SourceTable::clean`].

use crate::buffer_layout::{compute_layout, SecondaryBufferLayout, UniqueSecondarySources};
use crate::collective::Collective;
use crate::lifecycle::LifecycleState;
use crate::partition::Partitioning;
use crate::synapse_model::SynapseRegistry;
use crate::types::{
    NodeId, Result, Source, SourceTablePosition, SynIndex, ThreadIndex, SOURCE_RECORD_SIZE,
};
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use std::fmt::Write as _;
use std::sync::{Arc, Barrier};
use tracing::{debug, info, trace, warn};

/// Default number of truncated entries above which `clean` also returns the
/// freed capacity to the allocator
pub const DEFAULT_MIN_DELETED_ELEMENTS: usize = 1_000_000;

/// Thread that executes the single-executor sections of the layout protocol
pub const LAYOUT_EXECUTOR_THREAD: ThreadIndex = 0;

/// Everything one worker thread owns
#[derive(Debug)]
struct ThreadSources {
    sources: Vec<Option<Vec<Source>>>,
    current_position: SourceTablePosition,
    saved_position: SourceTablePosition,
    saved_entry_point: bool,
    is_cleared: bool,
    last_sorted_source: Vec<usize>,
}

impl ThreadSources {
    fn new(num_synapse_types: usize) -> Self {
        let mut partition = Self {
            sources: Vec::with_capacity(num_synapse_types),
            current_position: SourceTablePosition::invalid(),
            saved_position: SourceTablePosition::invalid(),
            saved_entry_point: false,
            is_cleared: false,
            last_sorted_source: Vec::with_capacity(num_synapse_types),
        };
        partition.resize(num_synapse_types);
        partition
    }

    fn resize(&mut self, num_synapse_types: usize) {
        if self.sources.len() < num_synapse_types {
            self.sources.resize_with(num_synapse_types, || None);
            self.last_sorted_source.resize(num_synapse_types, 0);
        }
        for slot in self.sources.iter_mut() {
            if slot.is_none() {
                *slot = Some(Vec::new());
            }
        }
    }

    fn sequence_len(&self, syn_id: usize) -> usize {
        self.sources
            .get(syn_id)
            .and_then(|slot| slot.as_ref())
            .map_or(0, Vec::len)
    }

    /// Release the sequence in `syn_id`, leaving an empty one behind
    fn discard(&mut self, syn_id: usize) -> usize {
        let removed = match &mut self.sources[syn_id] {
            Some(sources) => {
                let removed = sources.len();
                *sources = Vec::new();
                removed
            }
            None => 0,
        };
        self.last_sorted_source[syn_id] = 0;
        removed
    }

    fn collect_secondary(&self, registry: &SynapseRegistry, into: &mut UniqueSecondarySources) {
        for (syn_id, slot) in self.sources.iter().enumerate() {
            let Some(sources) = slot else { continue };
            if registry.is_primary(syn_id) {
                continue;
            }
            into.extend(sources.iter().map(|s| (s.node_id(), syn_id)));
        }
    }
}

/// Per-thread, per-synapse-type table of connection sources
pub struct SourceTable {
    state: LifecycleState,
    partitions: Vec<Mutex<ThreadSources>>,
    min_deleted_elements: usize,

    unique_secondary_sources: Mutex<UniqueSecondarySources>,
    layout_barrier: Option<Barrier>,
    layout_result: Mutex<Option<Result<Arc<SecondaryBufferLayout>>>>,
}

impl SourceTable {
    /// Create an uninitialized table
    pub fn new() -> Self {
        Self::with_min_deleted_elements(DEFAULT_MIN_DELETED_ELEMENTS)
    }

    /// Create an uninitialized table with a custom reclamation threshold
    pub fn with_min_deleted_elements(min_deleted_elements: usize) -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            partitions: Vec::new(),
            min_deleted_elements,
            unique_secondary_sources: Mutex::new(UniqueSecondarySources::new()),
            layout_barrier: None,
            layout_result: Mutex::new(None),
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state
    }

    pub fn min_deleted_elements(&self) -> usize {
        self.min_deleted_elements
    }

    pub fn num_threads(&self) -> usize {
        self.partitions.len()
    }

    /// Allocate one partition per worker thread, each with an empty sequence
    /// for every one of the `num_synapse_types` registered types.
    pub fn initialize(&mut self, num_threads: usize, num_synapse_types: usize) {
        assert_eq!(
            core::mem::size_of::<Source>(),
            SOURCE_RECORD_SIZE,
            "source records must be exactly {} bytes",
            SOURCE_RECORD_SIZE
        );
        assert!(num_threads > 0, "source table needs at least one thread");
        if self.state.is_active() {
            warn!("[SOURCE-TABLE] initialize() on an active table; previous contents are released");
        }

        self.partitions = (0..num_threads)
            .into_par_iter()
            .map(|_| Mutex::new(ThreadSources::new(num_synapse_types)))
            .collect();
        self.unique_secondary_sources.lock().clear();
        self.layout_barrier = Some(Barrier::new(num_threads));
        *self.layout_result.lock() = None;
        self.state = LifecycleState::Active;

        info!(
            "[SOURCE-TABLE] Initialized {} thread partitions with {} synapse types",
            num_threads, num_synapse_types
        );
    }

    /// Release all storage. Safe to call repeatedly.
    pub fn finalize(&mut self) {
        if !self.state.is_active() {
            debug!("[SOURCE-TABLE] finalize() while {}; nothing to release", self.state);
            return;
        }
        if !self.is_cleared() {
            for tid in 0..self.partitions.len() {
                self.clear(tid);
            }
        }
        self.partitions.clear();
        self.unique_secondary_sources.lock().clear();
        self.layout_barrier = None;
        *self.layout_result.lock() = None;
        self.state = LifecycleState::Cleared;
        info!("[SOURCE-TABLE] Finalized");
    }

    /// Release every sequence owned by `tid`
    pub fn clear(&self, tid: ThreadIndex) {
        let mut partition = self.partition(tid);
        for slot in partition.sources.iter_mut() {
            *slot = None;
        }
        partition.last_sorted_source.iter_mut().for_each(|i| *i = 0);
        partition.is_cleared = true;
        debug!("[SOURCE-TABLE] tid {} cleared", tid);
    }

    /// True only if every thread has cleared its partition
    #[track_caller]
    pub fn is_cleared(&self) -> bool {
        self.state.expect_active("source table");
        self.partitions.iter().all(|p| p.lock().is_cleared)
    }

    #[track_caller]
    fn partition(&self, tid: ThreadIndex) -> MutexGuard<'_, ThreadSources> {
        self.state.expect_active("source table");
        match self.partitions.get(tid) {
            Some(partition) => partition.lock(),
            None => panic!(
                "thread {} out of range for source table with {} threads",
                tid,
                self.partitions.len()
            ),
        }
    }

    /// Grow `tid`'s synapse-type array to `num_synapse_types`, giving every
    /// new or released slot an empty sequence. Existing sequences are kept.
    pub fn resize_sources(&self, tid: ThreadIndex, num_synapse_types: usize) {
        let mut partition = self.partition(tid);
        let before = partition.sources.len();
        partition.resize(num_synapse_types);
        if partition.sources.len() != before {
            debug!(
                "[SOURCE-TABLE] tid {} grew synapse types {} -> {}",
                tid,
                before,
                partition.sources.len()
            );
        }
    }

    /// Make room for `count` more records in one sequence
    pub fn reserve(&self, tid: ThreadIndex, syn_id: SynIndex, count: usize) {
        let mut partition = self.partition(tid);
        sequence_mut(&mut partition, tid, syn_id).reserve(count);
    }

    /// Append a record (used by the connection builder)
    pub fn add_source(&self, tid: ThreadIndex, syn_id: SynIndex, source: Source) {
        let mut partition = self.partition(tid);
        sequence_mut(&mut partition, tid, syn_id).push(source);
        partition.is_cleared = false;
    }

    /// Length of one sequence; released slots count as empty
    pub fn num_sources(&self, tid: ThreadIndex, syn_id: SynIndex) -> usize {
        self.partition(tid).sequence_len(syn_id)
    }

    /// Number of synapse-type slots in `tid`'s partition
    pub fn num_synapse_types(&self, tid: ThreadIndex) -> usize {
        self.partition(tid).sources.len()
    }

    pub fn get_node_id(&self, tid: ThreadIndex, syn_id: SynIndex, lcid: usize) -> NodeId {
        let mut partition = self.partition(tid);
        source_mut(&mut partition, tid, syn_id, lcid).node_id()
    }

    pub fn is_disabled(&self, tid: ThreadIndex, syn_id: SynIndex, lcid: usize) -> bool {
        let mut partition = self.partition(tid);
        source_mut(&mut partition, tid, syn_id, lcid).is_disabled()
    }

    /// Mark one record as logically removed
    pub fn disable_connection(&self, tid: ThreadIndex, syn_id: SynIndex, lcid: usize) {
        let mut partition = self.partition(tid);
        let source = source_mut(&mut partition, tid, syn_id, lcid);
        assert!(
            !source.is_disabled(),
            "connection (tid={}, syn_id={}, lcid={}) is already disabled",
            tid,
            syn_id,
            lcid
        );
        source.disable();
    }

    pub fn set_processed(&self, tid: ThreadIndex, syn_id: SynIndex, lcid: usize, processed: bool) {
        let mut partition = self.partition(tid);
        source_mut(&mut partition, tid, syn_id, lcid).set_processed(processed);
    }

    /// Run `f` with exclusive access to `tid`'s synapse-type slots
    pub fn with_thread_local_sources<R>(
        &self,
        tid: ThreadIndex,
        f: impl FnOnce(&mut [Option<Vec<Source>>]) -> R,
    ) -> R {
        let mut partition = self.partition(tid);
        f(&mut partition.sources)
    }

    pub fn last_sorted_source(&self, tid: ThreadIndex, syn_id: SynIndex) -> usize {
        let partition = self.partition(tid);
        partition.last_sorted_source[syn_id]
    }

    pub fn set_last_sorted_source(&self, tid: ThreadIndex, syn_id: SynIndex, index: usize) {
        let mut partition = self.partition(tid);
        partition.last_sorted_source[syn_id] = index;
    }

    // ------------------------------------------------------------------
    // Cursors
    // ------------------------------------------------------------------

    pub fn get_current_position(&self, tid: ThreadIndex) -> SourceTablePosition {
        self.partition(tid).current_position
    }

    pub fn set_current_position(&self, tid: ThreadIndex, position: SourceTablePosition) {
        self.partition(tid).current_position = position;
    }

    pub fn get_saved_position(&self, tid: ThreadIndex) -> SourceTablePosition {
        self.partition(tid).saved_position
    }

    /// Remember where the current pass of `tid` stands, once per pass.
    ///
    /// The current cursor points at the next entry to be read, so the entry
    /// just above it was the last one handed out and may still be in flight;
    /// the saved cursor keeps it.
    pub fn save_entry_point(&self, tid: ThreadIndex) {
        let current = {
            let partition = self.partition(tid);
            if partition.saved_entry_point {
                return;
            }
            partition.current_position
        };

        let lcid = if current.tid > -1 && current.syn_id > -1 {
            let len = self
                .partition(current.tid as usize)
                .sequence_len(current.syn_id as usize) as i64;
            (current.lcid + 1).min(len - 1)
        } else {
            assert_eq!(
                current.lcid, -1,
                "current position {} of thread {} has an invalid prefix but a valid index",
                current, tid
            );
            -1
        };

        let mut partition = self.partition(tid);
        partition.saved_position = SourceTablePosition::new(current.tid, current.syn_id, lcid);
        partition.saved_entry_point = true;
        trace!("[SOURCE-TABLE] tid {} saved entry point {}", tid, partition.saved_position);
    }

    /// Continue from the saved cursor
    pub fn restore_entry_point(&self, tid: ThreadIndex) {
        let mut partition = self.partition(tid);
        partition.current_position = partition.saved_position;
        partition.saved_entry_point = false;
    }

    /// Point the saved cursor at the very last entry of the table so that
    /// the next `restore_entry_point` starts a full backwards pass.
    pub fn reset_entry_point(&self, tid: ThreadIndex) {
        let top = self.top_position();
        self.partition(tid).saved_position = top;
    }

    fn top_position(&self) -> SourceTablePosition {
        let last_tid = self.partitions.len() as i64 - 1;
        if last_tid < 0 {
            return SourceTablePosition::invalid();
        }
        let partition = self.partition(last_tid as usize);
        let syn_id = partition.sources.len() as i64 - 1;
        let lcid = if syn_id > -1 {
            partition.sequence_len(syn_id as usize) as i64 - 1
        } else {
            -1
        };
        SourceTablePosition::new(last_tid, syn_id, lcid)
    }

    /// Normalise a position whose index ran below zero onto the last entry
    /// of the previous non-empty sequence, walking backwards through synapse
    /// types and threads. Ends at the invalid position once everything has
    /// been visited.
    pub fn wrap_position(&self, position: &mut SourceTablePosition) {
        while position.lcid < 0 {
            position.syn_id -= 1;
            if position.syn_id >= 0 {
                position.lcid = self
                    .partition(position.tid as usize)
                    .sequence_len(position.syn_id as usize) as i64
                    - 1;
                continue;
            }

            position.tid -= 1;
            if position.tid >= 0 {
                let partition = self.partition(position.tid as usize);
                position.syn_id = partition.sources.len() as i64 - 1;
                if position.syn_id >= 0 {
                    position.lcid = partition.sequence_len(position.syn_id as usize) as i64 - 1;
                }
                continue;
            }

            *position = SourceTablePosition::invalid();
            return;
        }
    }

    // ------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------

    /// The greatest saved cursor over all threads
    pub fn find_maximal_position(&self) -> SourceTablePosition {
        self.state.expect_active("source table");
        self.partitions
            .iter()
            .map(|p| p.lock().saved_position)
            .fold(SourceTablePosition::invalid(), SourceTablePosition::max)
    }

    /// Drop every entry of `tid`'s partition that lies above the maximal
    /// saved position.
    ///
    /// - watermark in this thread: keep `0..=lcid` of the watermark's synapse
    ///   type, release all higher synapse types
    /// - watermark in a lower thread: release everything
    /// - watermark in a higher thread: keep everything
    pub fn clean(&self, tid: ThreadIndex) {
        let max_position = self.find_maximal_position();
        let mut partition = self.partition(tid);
        let tid_i = tid as i64;

        if max_position.tid == tid_i {
            // A negative synapse type matches no slot
            let Ok(first_syn_id) = usize::try_from(max_position.syn_id) else {
                return;
            };
            for syn_id in first_syn_id..partition.sources.len() {
                if syn_id == first_syn_id {
                    let keep = (max_position.lcid + 1) as usize;
                    let min_deleted_elements = self.min_deleted_elements;
                    let Some(sources) = partition.sources[syn_id].as_mut() else {
                        continue;
                    };
                    if keep < sources.len() {
                        let deleted_elements = sources.len() - keep;
                        sources.truncate(keep);
                        if deleted_elements > min_deleted_elements {
                            sources.shrink_to_fit();
                        }
                        debug!(
                            "[SOURCE-TABLE] tid {} syn_id {} truncated by {} to {}",
                            tid, syn_id, deleted_elements, keep
                        );
                    }
                    let sorted = &mut partition.last_sorted_source[syn_id];
                    *sorted = (*sorted).min(keep);
                } else {
                    let removed = partition.discard(syn_id);
                    trace!(
                        "[SOURCE-TABLE] tid {} syn_id {} released {} entries",
                        tid, syn_id, removed
                    );
                }
            }
        } else if max_position.tid < tid_i {
            let removed: usize = (0..partition.sources.len())
                .map(|syn_id| partition.discard(syn_id))
                .sum();
            debug!(
                "[SOURCE-TABLE] tid {} above watermark {}; released {} entries",
                tid, max_position, removed
            );
        } else {
            trace!("[SOURCE-TABLE] tid {} below watermark {}; nothing to clean", tid, max_position);
        }
    }

    /// Erase the trailing run of disabled records of one sequence.
    ///
    /// Returns the new length, or `None` if the slot is released or empty or
    /// if nothing was removed. Disabled records followed by an enabled one
    /// stay in place.
    pub fn remove_disabled_sources(&self, tid: ThreadIndex, syn_id: SynIndex) -> Option<usize> {
        let mut partition = self.partition(tid);
        assert!(
            syn_id < partition.sources.len(),
            "synapse type {} out of range for thread {} ({} types)",
            syn_id,
            tid,
            partition.sources.len()
        );
        let sources = partition.sources[syn_id].as_mut()?;

        let max_size = sources.len();
        if max_size == 0 {
            return None;
        }

        let first_trailing_disabled = sources
            .iter()
            .rposition(|s| !s.is_disabled())
            .map_or(0, |last_enabled| last_enabled + 1);
        sources.truncate(first_trailing_disabled);

        if first_trailing_disabled == max_size {
            None
        } else {
            debug!(
                "[SOURCE-TABLE] tid {} syn_id {} removed {} disabled sources",
                tid,
                syn_id,
                max_size - first_trailing_disabled
            );
            Some(first_trailing_disabled)
        }
    }

    // ------------------------------------------------------------------
    // Secondary event buffer layout
    // ------------------------------------------------------------------

    /// Compute the secondary-event receive-buffer layout.
    ///
    /// Every worker thread of the process must call this with its own `tid`.
    /// Threads publish their non-primary `(source, synapse type)` pairs into a
    /// shared set; after a barrier, thread [`LAYOUT_EXECUTOR_THREAD`] computes
    /// the layout (including the cluster-wide reduction) on behalf of the
    /// process, and all threads return the same shared result.
    pub fn compute_buffer_pos_for_unique_secondary_sources(
        &self,
        tid: ThreadIndex,
        registry: &SynapseRegistry,
        partitioning: &dyn Partitioning,
        collective: &dyn Collective,
    ) -> Result<Arc<SecondaryBufferLayout>> {
        self.state.expect_active("source table");
        let barrier = match &self.layout_barrier {
            Some(barrier) => barrier,
            None => panic!("source table has no layout barrier"),
        };

        if tid == LAYOUT_EXECUTOR_THREAD {
            self.unique_secondary_sources.lock().clear();
        }
        barrier.wait();

        let mut local = UniqueSecondarySources::new();
        self.partition(tid).collect_secondary(registry, &mut local);
        self.unique_secondary_sources.lock().append(&mut local);
        barrier.wait();

        if tid == LAYOUT_EXECUTOR_THREAD {
            let layout = {
                let unique = self.unique_secondary_sources.lock();
                self.warn_if_no_secondary_sources(&unique, registry);
                compute_layout(&unique, registry, partitioning, collective).map(Arc::new)
            };
            *self.layout_result.lock() = Some(layout);
        }
        barrier.wait();

        match self.layout_result.lock().as_ref() {
            Some(result) => result.clone(),
            None => panic!("secondary buffer layout missing after executor section"),
        }
    }

    /// Single-call variant of the layout computation: thread-local sets are
    /// gathered in parallel and merged before the layout is computed.
    pub fn compute_secondary_buffer_layout(
        &self,
        registry: &SynapseRegistry,
        partitioning: &dyn Partitioning,
        collective: &dyn Collective,
    ) -> Result<SecondaryBufferLayout> {
        self.state.expect_active("source table");
        let merged = self
            .partitions
            .par_iter()
            .map(|partition| {
                let mut local = UniqueSecondarySources::new();
                partition.lock().collect_secondary(registry, &mut local);
                local
            })
            .reduce(UniqueSecondarySources::new, |mut a, mut b| {
                a.append(&mut b);
                a
            });

        let mut unique = self.unique_secondary_sources.lock();
        *unique = merged;
        self.warn_if_no_secondary_sources(&unique, registry);
        compute_layout(&unique, registry, partitioning, collective)
    }

    /// Snapshot of the set gathered by the most recent layout computation
    pub fn unique_secondary_sources(&self) -> UniqueSecondarySources {
        self.unique_secondary_sources.lock().clone()
    }

    fn warn_if_no_secondary_sources(
        &self,
        unique: &UniqueSecondarySources,
        registry: &SynapseRegistry,
    ) {
        if unique.is_empty() && registry.has_secondary_types() {
            warn!(
                "[SECONDARY-LAYOUT] secondary synapse types registered but no secondary sources found"
            );
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Human-readable dump of one sequence, one line per run of equal
    /// source ids. `None` if `syn_id` is out of range.
    pub fn format_sources(&self, tid: ThreadIndex, syn_id: SynIndex) -> Option<String> {
        let partition = self.partition(tid);
        let slot = partition.sources.get(syn_id)?;

        let mut out = String::from("-------------SOURCES-------------------\n");
        let mut prev_node_id = NodeId(0);
        for source in slot.iter().flatten() {
            if source.node_id() != prev_node_id {
                out.push('\n');
                prev_node_id = source.node_id();
            }
            let _ = write!(out, "({}, {})", source.node_id().0, u8::from(source.is_disabled()));
        }
        out.push('\n');
        out.push_str("---------------------------------------\n");
        Some(out)
    }

    /// Log [`format_sources`](Self::format_sources) at debug level
    pub fn print_sources(&self, tid: ThreadIndex, syn_id: SynIndex) {
        if let Some(dump) = self.format_sources(tid, syn_id) {
            debug!("[SOURCE-TABLE] tid {} syn_id {}\n{}", tid, syn_id, dump);
        }
    }
}

impl Default for SourceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[track_caller]
fn sequence_mut<'a>(
    partition: &'a mut ThreadSources,
    tid: ThreadIndex,
    syn_id: SynIndex,
) -> &'a mut Vec<Source> {
    let num_types = partition.sources.len();
    match partition.sources.get_mut(syn_id) {
        Some(Some(sources)) => sources,
        Some(None) => panic!(
            "sources of thread {} synapse type {} have been released",
            tid, syn_id
        ),
        None => panic!(
            "synapse type {} out of range for thread {} ({} types)",
            syn_id, tid, num_types
        ),
    }
}

#[track_caller]
fn source_mut<'a>(
    partition: &'a mut ThreadSources,
    tid: ThreadIndex,
    syn_id: SynIndex,
    lcid: usize,
) -> &'a mut Source {
    let sources = sequence_mut(partition, tid, syn_id);
    let len = sources.len();
    match sources.get_mut(lcid) {
        Some(source) => source,
        None => panic!(
            "local connection id {} out of range for thread {} synapse type {} ({} sources)",
            lcid, tid, syn_id, len
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::SingleProcess;
    use crate::models::StaticSynapseModel;
    use crate::partition::RoundRobinPartitioning;

    fn fill(table: &SourceTable, tid: ThreadIndex, syn_id: SynIndex, node_ids: &[u64]) {
        for &n in node_ids {
            table.add_source(tid, syn_id, Source::new(NodeId(n)));
        }
    }

    fn set_saved(table: &SourceTable, tid: ThreadIndex, pos: SourceTablePosition) {
        table.partition(tid).saved_position = pos;
    }

    #[test]
    fn test_initialize_allocates_empty_sequences() {
        let mut table = SourceTable::new();
        table.initialize(3, 4);
        assert_eq!(table.lifecycle_state(), LifecycleState::Active);
        assert_eq!(table.num_threads(), 3);
        for tid in 0..3 {
            assert_eq!(table.num_synapse_types(tid), 4);
            for syn_id in 0..4 {
                assert_eq!(table.num_sources(tid, syn_id), 0);
            }
            assert!(table.get_current_position(tid).is_invalid());
            assert!(table.get_saved_position(tid).is_invalid());
        }
        assert!(!table.is_cleared());
    }

    #[test]
    #[should_panic(expected = "initialize")]
    fn test_uninitialized_table_rejects_use() {
        let table = SourceTable::new();
        table.num_sources(0, 0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut table = SourceTable::new();
        table.finalize();
        assert_eq!(table.lifecycle_state(), LifecycleState::Uninitialized);

        table.initialize(2, 2);
        fill(&table, 0, 1, &[1, 2, 3]);
        table.finalize();
        table.finalize();
        assert_eq!(table.lifecycle_state(), LifecycleState::Cleared);
        assert_eq!(table.num_threads(), 0);

        table.initialize(1, 1);
        assert_eq!(table.num_sources(0, 0), 0);
    }

    #[test]
    fn test_resize_keeps_existing_entries() {
        let mut table = SourceTable::new();
        table.initialize(1, 2);
        fill(&table, 0, 1, &[7, 8]);

        table.resize_sources(0, 5);
        table.resize_sources(0, 5);
        assert_eq!(table.num_synapse_types(0), 5);
        assert_eq!(table.num_sources(0, 1), 2);
        assert_eq!(table.get_node_id(0, 1, 1), NodeId(8));

        table.resize_sources(0, 3);
        assert_eq!(table.num_synapse_types(0), 5);
    }

    #[test]
    fn test_clear_releases_and_resize_restores() {
        let mut table = SourceTable::new();
        table.initialize(2, 2);
        fill(&table, 0, 0, &[1, 2]);
        table.clear(0);
        assert!(!table.is_cleared());
        table.clear(1);
        assert!(table.is_cleared());
        assert_eq!(table.remove_disabled_sources(0, 0), None);

        table.resize_sources(0, 2);
        fill(&table, 0, 0, &[3]);
        assert_eq!(table.num_sources(0, 0), 1);
        assert!(!table.is_cleared());
    }

    #[test]
    fn test_cleanup_scenario() {
        let mut table = SourceTable::with_min_deleted_elements(2);
        table.initialize(6, 4);
        for tid in 0..6 {
            for syn_id in 0..4 {
                fill(&table, tid, syn_id, &(0..10).collect::<Vec<_>>());
            }
        }
        set_saved(&table, 2, SourceTablePosition::new(2, 1, 4));
        set_saved(&table, 1, SourceTablePosition::new(1, 3, 9));

        assert_eq!(table.find_maximal_position(), SourceTablePosition::new(2, 1, 4));
        for tid in 0..6 {
            table.clean(tid);
        }

        // thread 2: syn 0 untouched, syn 1 truncated to 0..=4, syn >= 2 released
        assert_eq!(table.num_sources(2, 0), 10);
        assert_eq!(table.num_sources(2, 1), 5);
        assert_eq!(table.get_node_id(2, 1, 4), NodeId(4));
        assert_eq!(table.num_sources(2, 2), 0);
        assert_eq!(table.num_sources(2, 3), 0);

        // threads below the watermark keep everything
        for tid in 0..2 {
            for syn_id in 0..4 {
                assert_eq!(table.num_sources(tid, syn_id), 10);
            }
        }
        // threads above it lose everything but keep usable empty slots
        for tid in 3..6 {
            for syn_id in 0..4 {
                assert_eq!(table.num_sources(tid, syn_id), 0);
            }
            fill(&table, tid, 0, &[1]);
        }
    }

    #[test]
    fn test_clean_with_invalid_watermark_releases_everything() {
        let mut table = SourceTable::new();
        table.initialize(2, 2);
        fill(&table, 0, 0, &[1, 2, 3]);
        fill(&table, 1, 1, &[4]);

        table.clean(0);
        table.clean(1);
        assert_eq!(table.num_sources(0, 0), 0);
        assert_eq!(table.num_sources(1, 1), 0);
    }

    #[test]
    #[should_panic(expected = "call initialize() first")]
    fn test_is_cleared_rejects_uninitialized_table() {
        SourceTable::new().is_cleared();
    }

    #[test]
    #[should_panic(expected = "call initialize() first")]
    fn test_is_cleared_rejects_finalized_table() {
        let mut table = SourceTable::new();
        table.initialize(1, 1);
        table.finalize();
        table.is_cleared();
    }

    fn capacity(table: &SourceTable, tid: ThreadIndex, syn_id: SynIndex) -> Option<usize> {
        table.with_thread_local_sources(tid, |slots| slots[syn_id].as_ref().map(Vec::capacity))
    }

    #[test]
    fn test_clean_shrinks_capacity_past_threshold() {
        let mut table = SourceTable::with_min_deleted_elements(2);
        table.initialize(1, 1);
        fill(&table, 0, 0, &(0..50).collect::<Vec<_>>());
        set_saved(&table, 0, SourceTablePosition::new(0, 0, 4));

        table.clean(0);
        assert_eq!(table.num_sources(0, 0), 5);
        assert_eq!(capacity(&table, 0, 0), Some(5));
    }

    #[test]
    fn test_clean_keeps_capacity_up_to_threshold() {
        // 45 deleted: below and exactly at the threshold
        for threshold in [100, 45] {
            let mut table = SourceTable::with_min_deleted_elements(threshold);
            table.initialize(1, 1);
            fill(&table, 0, 0, &(0..50).collect::<Vec<_>>());
            set_saved(&table, 0, SourceTablePosition::new(0, 0, 4));
            let before = capacity(&table, 0, 0);

            table.clean(0);
            assert_eq!(table.num_sources(0, 0), 5);
            assert_eq!(capacity(&table, 0, 0), before);
        }
    }

    #[test]
    fn test_clean_clamps_last_sorted_source() {
        let mut table = SourceTable::new();
        table.initialize(1, 3);
        for syn_id in 0..3 {
            fill(&table, 0, syn_id, &[1, 2, 3, 4, 5, 6]);
            table.set_last_sorted_source(0, syn_id, 6);
        }
        set_saved(&table, 0, SourceTablePosition::new(0, 1, 2));

        table.clean(0);
        // below the watermark's synapse type: untouched
        assert_eq!(table.last_sorted_source(0, 0), 6);
        // truncated to 0..=2
        assert_eq!(table.num_sources(0, 1), 3);
        assert_eq!(table.last_sorted_source(0, 1), 3);
        // released
        assert_eq!(table.last_sorted_source(0, 2), 0);

        // an index already inside the kept range is left alone
        table.set_last_sorted_source(0, 1, 1);
        table.clean(0);
        assert_eq!(table.last_sorted_source(0, 1), 1);
    }

    #[test]
    fn test_clear_resets_last_sorted_source() {
        let mut table = SourceTable::new();
        table.initialize(1, 2);
        fill(&table, 0, 0, &[1, 2]);
        table.set_last_sorted_source(0, 0, 2);

        table.clear(0);
        table.resize_sources(0, 2);
        assert_eq!(table.last_sorted_source(0, 0), 0);
    }

    #[test]
    fn test_set_processed_marks_single_record() {
        let mut table = SourceTable::new();
        table.initialize(1, 1);
        fill(&table, 0, 0, &[1, 2, 3]);

        table.set_processed(0, 0, 1, true);
        let flags: Vec<bool> = table.with_thread_local_sources(0, |slots| {
            slots[0].iter().flatten().map(|s| s.is_processed()).collect()
        });
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(table.get_node_id(0, 0, 1), NodeId(2));

        table.set_processed(0, 0, 1, false);
        assert!(table.with_thread_local_sources(0, |slots| {
            slots[0].iter().flatten().all(|s| !s.is_processed())
        }));
    }

    #[test]
    fn test_remove_disabled_sources() {
        let mut table = SourceTable::new();
        table.initialize(1, 3);
        fill(&table, 0, 0, &[1, 2, 3, 4, 5]);
        table.disable_connection(0, 0, 1);
        table.disable_connection(0, 0, 3);
        table.disable_connection(0, 0, 4);

        assert_eq!(table.remove_disabled_sources(0, 0), Some(3));
        assert_eq!(table.num_sources(0, 0), 3);
        assert!(table.is_disabled(0, 0, 1));
        assert_eq!(table.remove_disabled_sources(0, 0), None);

        // fully disabled
        fill(&table, 0, 1, &[6, 7]);
        table.disable_connection(0, 1, 0);
        table.disable_connection(0, 1, 1);
        assert_eq!(table.remove_disabled_sources(0, 1), Some(0));
        assert_eq!(table.num_sources(0, 1), 0);

        // empty slot
        assert_eq!(table.remove_disabled_sources(0, 2), None);
    }

    #[test]
    fn test_entry_point_round_trip() {
        let mut table = SourceTable::new();
        table.initialize(2, 2);
        fill(&table, 1, 1, &[1, 2, 3]);

        table.reset_entry_point(0);
        assert_eq!(table.get_saved_position(0), SourceTablePosition::new(1, 1, 2));
        table.restore_entry_point(0);
        assert_eq!(table.get_current_position(0), SourceTablePosition::new(1, 1, 2));

        // two entries read; the one above the cursor may still be in flight
        table.set_current_position(0, SourceTablePosition::new(1, 1, 0));
        table.save_entry_point(0);
        assert_eq!(table.get_saved_position(0), SourceTablePosition::new(1, 1, 1));

        // only the first save of a pass counts
        table.set_current_position(0, SourceTablePosition::new(0, 0, -1));
        table.save_entry_point(0);
        assert_eq!(table.get_saved_position(0), SourceTablePosition::new(1, 1, 1));

        table.restore_entry_point(0);
        table.set_current_position(0, SourceTablePosition::invalid());
        table.save_entry_point(0);
        assert_eq!(table.get_saved_position(0), SourceTablePosition::invalid());
    }

    #[test]
    fn test_wrap_position_walks_backwards() {
        let mut table = SourceTable::new();
        table.initialize(2, 3);
        fill(&table, 0, 0, &[1]);
        fill(&table, 0, 2, &[2, 3]);
        fill(&table, 1, 1, &[4]);

        let mut visited = Vec::new();
        let mut pos = SourceTablePosition::new(1, 2, -1);
        table.wrap_position(&mut pos);
        while !pos.is_invalid() {
            visited.push((pos.tid, pos.syn_id, pos.lcid));
            pos.decrease();
            table.wrap_position(&mut pos);
        }
        assert_eq!(visited, vec![(1, 1, 0), (0, 2, 1), (0, 2, 0), (0, 0, 0)]);
        assert_eq!(pos, SourceTablePosition::invalid());
    }

    #[test]
    fn test_format_sources_groups_runs() {
        let mut table = SourceTable::new();
        table.initialize(1, 1);
        fill(&table, 0, 0, &[3, 3, 5]);
        table.disable_connection(0, 0, 2);

        let dump = table.format_sources(0, 0).unwrap();
        assert!(dump.starts_with("-------------SOURCES-------------------\n"));
        assert!(dump.contains("\n(3, 0)(3, 0)\n(5, 1)\n"));
        assert!(table.format_sources(0, 1).is_none());
    }

    fn scenario_registry() -> SynapseRegistry {
        let mut registry = SynapseRegistry::new();
        registry.register(Arc::new(StaticSynapseModel::primary("static")));
        registry.register(Arc::new(StaticSynapseModel::secondary("gap_junction", 2)));
        registry.register(Arc::new(StaticSynapseModel::secondary("rate_connection", 3)));
        registry
    }

    #[test]
    fn test_primary_sources_are_not_collected() {
        let registry = scenario_registry();
        let mut table = SourceTable::new();
        table.initialize(2, registry.len());
        fill(&table, 0, 0, &[1, 2]);
        fill(&table, 0, 1, &[10, 10]);
        fill(&table, 1, 2, &[11]);

        let layout = table
            .compute_secondary_buffer_layout(
                &registry,
                &RoundRobinPartitioning::single_process(2),
                &SingleProcess,
            )
            .unwrap();

        let unique: Vec<_> = table.unique_secondary_sources().into_iter().collect();
        assert_eq!(unique, vec![(NodeId(10), 1), (NodeId(11), 2)]);
        assert_eq!(layout.chunk_size(), 6);
        assert_eq!(layout.position_of(NodeId(10), 1), Some(0));
        assert_eq!(layout.position_of(NodeId(11), 2), Some(2));
    }

    #[test]
    fn test_per_thread_protocol_matches_single_call() {
        let registry = scenario_registry();
        let partitioning = RoundRobinPartitioning::single_process(4);
        let mut table = SourceTable::new();
        table.initialize(4, registry.len());
        for tid in 0..4 {
            fill(&table, tid, 1, &[tid as u64, 40 + tid as u64, 7]);
            fill(&table, tid, 2, &[7, 8]);
        }

        let expected = table
            .compute_secondary_buffer_layout(&registry, &partitioning, &SingleProcess)
            .unwrap();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|tid| {
                    let table = &table;
                    let registry = &registry;
                    let partitioning = &partitioning;
                    scope.spawn(move || {
                        table
                            .compute_buffer_pos_for_unique_secondary_sources(
                                tid,
                                registry,
                                partitioning,
                                &SingleProcess,
                            )
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for layout in &results {
            assert_eq!(**layout, expected);
            assert!(Arc::ptr_eq(layout, &results[0]));
        }
    }
}
