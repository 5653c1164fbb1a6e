// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Neurokernel Connectivity
//!
//! Connection bookkeeping for a distributed spiking-network kernel.
//!
//! ## Components
//! - [`SourceTable`]: per-thread, per-synapse-type sequences of 8-byte
//!   [`Source`] records with cursor-driven reclamation, compaction of
//!   disabled records, and the secondary event buffer layout protocol
//! - [`DeviceConnectionTable`]: connector objects for connections to and
//!   from stimulation/recording devices
//!
//! ## Collaborators
//! Rank/thread assignment ([`Partitioning`]), the cluster-wide reduction
//! ([`Collective`]) and synapse-type prototypes ([`ConnectorModel`]) are
//! traits. Simple implementations ship with the crate for single-process
//! use and for tests.

pub mod buffer_layout;
pub mod collective;
pub mod device_table;
pub mod lifecycle;
pub mod models;
pub mod partition;
pub mod source_table;
pub mod synapse_model;
pub mod types;

pub use buffer_layout::{
    compute_layout, pack_source_node_id_and_syn_id, unpack_source_node_id_and_syn_id,
    SecondaryBufferLayout, UniqueSecondarySources, MAX_PACKABLE_NODE_ID,
};
pub use collective::{Collective, LocalCluster, LocalClusterRank, SingleProcess};
pub use device_table::{ConnectionId, DeviceConnectionTable};
pub use lifecycle::LifecycleState;
pub use models::{StaticConnection, StaticConnector, StaticSynapseModel};
pub use partition::{Partitioning, RoundRobinPartitioning};
pub use source_table::{SourceTable, DEFAULT_MIN_DELETED_ELEMENTS, LAYOUT_EXECUTOR_THREAD};
pub use synapse_model::{
    ConnectionParameters, Connector, ConnectorModel, Event, Node, StatusDictionary,
    SynapseRegistry,
};
pub use types::*;
