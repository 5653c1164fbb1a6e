// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Connectivity kernel: the two connection tables of one process, built from
//! a [`NeurokernelConfig`] and driven from its worker threads.

use std::sync::Arc;

use neurokernel_config::{validate_config, NeurokernelConfig};
use neurokernel_connectivity::{
    Collective, ConnectivityError, ConnectorModel, DeviceConnectionTable, Partitioning,
    Result, RoundRobinPartitioning, SecondaryBufferLayout, SourceTable, SourceTablePosition,
    SynIndex, SynapseRegistry,
};
use rayon::prelude::*;
use tracing::{debug, info};

/// Source table, device table, synapse registry and partitioning of one rank
pub struct ConnectivityKernel {
    registry: SynapseRegistry,
    partitioning: RoundRobinPartitioning,
    rank: usize,
    source_table: SourceTable,
    device_table: DeviceConnectionTable,
}

impl ConnectivityKernel {
    /// Build and initialize both tables for this rank
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if `config` fails validation
    pub fn from_config(config: &NeurokernelConfig, registry: SynapseRegistry) -> Result<Self> {
        validate_config(config)
            .map_err(|e| ConnectivityError::InvalidConfiguration(e.to_string()))?;

        let num_threads = match config.kernel.num_threads {
            0 => rayon::current_num_threads(),
            n => n,
        };
        info!(
            "[CONFIG] rank {}/{} with {} worker threads (configured: {})",
            config.cluster.rank,
            config.cluster.num_processes,
            num_threads,
            config.kernel.num_threads
        );
        let partitioning = RoundRobinPartitioning::new(config.cluster.num_processes, num_threads);

        let mut source_table =
            SourceTable::with_min_deleted_elements(config.source_table.min_deleted_elements);
        source_table.initialize(num_threads, registry.len());

        let hint = config.source_table.initial_capacity_hint;
        if hint > 0 {
            (0..num_threads).into_par_iter().for_each(|tid| {
                for syn_id in 0..registry.len() {
                    source_table.reserve(tid, syn_id, hint);
                }
            });
            debug!(
                "[KERNEL] reserved {} records per sequence ({} threads x {} synapse types)",
                hint,
                num_threads,
                registry.len()
            );
        }

        let mut device_table = DeviceConnectionTable::new();
        device_table.initialize(num_threads);
        device_table.resize_to_number_of_synapse_types(registry.len());

        Ok(Self {
            registry,
            partitioning,
            rank: config.cluster.rank,
            source_table,
            device_table,
        })
    }

    pub fn source_table(&self) -> &SourceTable {
        &self.source_table
    }

    pub fn device_table(&self) -> &DeviceConnectionTable {
        &self.device_table
    }

    pub fn registry(&self) -> &SynapseRegistry {
        &self.registry
    }

    pub fn partitioning(&self) -> &RoundRobinPartitioning {
        &self.partitioning
    }

    pub fn num_threads(&self) -> usize {
        self.partitioning.num_threads()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_processes(&self) -> usize {
        self.partitioning.num_processes()
    }

    /// Register a synapse type after start-up and grow both tables to it
    pub fn register_synapse_type(&mut self, model: Arc<dyn ConnectorModel>) -> SynIndex {
        let name = model.name().to_string();
        let syn_id = self.registry.register(model);
        let num_synapse_types = self.registry.len();
        for tid in 0..self.num_threads() {
            self.source_table.resize_sources(tid, num_synapse_types);
        }
        self.device_table.resize_to_number_of_synapse_types(num_synapse_types);
        info!("[KERNEL] registered synapse type {} as {}", name, syn_id);
        syn_id
    }

    /// Secondary buffer layout for this rank
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if `collective` disagrees with the configured
    /// rank or process count; otherwise whatever the reduction reports
    pub fn compute_secondary_buffer_layout(
        &self,
        collective: &dyn Collective,
    ) -> Result<SecondaryBufferLayout> {
        if collective.rank() != self.rank || collective.num_processes() != self.num_processes() {
            return Err(ConnectivityError::InvalidConfiguration(format!(
                "collective is rank {}/{}, kernel is configured as rank {}/{}",
                collective.rank(),
                collective.num_processes(),
                self.rank,
                self.num_processes()
            )));
        }
        self.source_table
            .compute_secondary_buffer_layout(&self.registry, &self.partitioning, collective)
    }

    /// Reclaim every entry above the maximal saved position, all threads at once.
    /// Returns the watermark that was applied.
    pub fn clean_all(&self) -> SourceTablePosition {
        let watermark = self.source_table.find_maximal_position();
        (0..self.num_threads())
            .into_par_iter()
            .for_each(|tid| self.source_table.clean(tid));
        debug!("[KERNEL] cleaned {} threads at watermark {}", self.num_threads(), watermark);
        watermark
    }

    /// Compact trailing disabled records of every sequence; returns how many
    /// records were erased
    pub fn remove_disabled_sources_all(&self) -> usize {
        let num_synapse_types = self.registry.len();
        let removed: usize = (0..self.num_threads())
            .into_par_iter()
            .map(|tid| {
                (0..num_synapse_types)
                    .map(|syn_id| {
                        let before = self.source_table.num_sources(tid, syn_id);
                        self.source_table
                            .remove_disabled_sources(tid, syn_id)
                            .map_or(0, |len| before - len)
                    })
                    .sum::<usize>()
            })
            .sum();
        debug!("[KERNEL] removed {} disabled sources", removed);
        removed
    }

    /// Release both tables. Safe to call repeatedly.
    pub fn finalize(&mut self) {
        self.source_table.finalize();
        self.device_table.finalize();
    }
}
