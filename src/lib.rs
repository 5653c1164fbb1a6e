// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # neurokernel
//!
//! Connection storage for a distributed, multi-threaded spiking-network
//! kernel: which upstream neurons feed each local neuron (per thread and
//! synapse type), connections to and from devices, and the deterministic
//! layout of the buffer that carries secondary events across the cluster.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use neurokernel::prelude::*;
//!
//! let config = neurokernel::config::load_config(None, None)?;
//!
//! let mut registry = SynapseRegistry::new();
//! registry.register(Arc::new(StaticSynapseModel::primary("static_synapse")));
//! registry.register(Arc::new(StaticSynapseModel::secondary("gap_junction", 2)));
//!
//! let kernel = ConnectivityKernel::from_config(&config, registry)?;
//! kernel.source_table().add_source(0, 1, Source::new(NodeId(42)));
//!
//! let layout = kernel.compute_secondary_buffer_layout(&SingleProcess)?;
//! println!("chunk size: {}", layout.chunk_size());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Feature Flags
//! - **`file-logging`**: JSON run logs via `neurokernel-observability`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: neurokernel-config, -observability         │
//! │  (TOML + overrides, tracing subscriber setup)           │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Core: neurokernel-connectivity                         │
//! │  (SourceTable, DeviceConnectionTable, buffer layout)    │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Wiring: neurokernel::ConnectivityKernel                │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

pub use neurokernel_config as config;
pub use neurokernel_connectivity as connectivity;
pub use neurokernel_observability as observability;

pub mod kernel;

pub use kernel::ConnectivityKernel;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::connectivity::{
        Collective, ConnectionParameters, ConnectivityError, DeviceConnectionTable, LocalCluster,
        NodeId, Partitioning, RoundRobinPartitioning, SecondaryBufferLayout, SingleProcess, Source,
        SourceTable, SourceTablePosition, StaticSynapseModel, SynapseRegistry,
    };
    pub use crate::config::NeurokernelConfig;
    pub use crate::kernel::ConnectivityKernel;
}
