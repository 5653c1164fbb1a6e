// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contracts between the connection tables and the synapse-type registry.
//!
//! A synapse type is represented by a [`ConnectorModel`] prototype. The
//! prototype knows whether its events are primary (fixed-size spikes) or
//! secondary (payload-carrying), how large a secondary payload is, and how to
//! build the [`Connector`] object that stores connections of that type.

use crate::types::{NodeId, Result, SynIndex, ThreadIndex, INVALID_SYN_INDEX};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Status dictionary used for connector introspection and updates
pub type StatusDictionary = serde_json::Map<String, serde_json::Value>;

/// A simulated node as seen by the device table
pub trait Node: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Local device id for stimulation/recording devices, `None` for neurons
    fn local_device_id(&self) -> Option<usize> {
        None
    }

    /// Receive an event delivered through a connector
    fn handle(&self, _event: &Event) {}
}

/// Event record handed from a sender through connectors to receivers
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub sender: NodeId,
    pub receiver: Option<NodeId>,
    /// Simulation step at which the event was emitted
    pub stamp: u64,
    pub weight: f64,
    pub delay: f64,
    pub multiplicity: u32,
    /// Index of the connection inside its connector
    pub port: usize,
}

impl Event {
    pub fn new(sender: NodeId, stamp: u64) -> Self {
        Self {
            sender,
            receiver: None,
            stamp,
            weight: 0.0,
            delay: 0.0,
            multiplicity: 1,
            port: 0,
        }
    }
}

/// Parameters of one new connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParameters {
    pub delay: f64,
    pub weight: f64,
    /// Additional model-specific settings
    pub params: Option<StatusDictionary>,
}

impl ConnectionParameters {
    pub fn new(delay: f64, weight: f64) -> Self {
        Self {
            delay,
            weight,
            params: None,
        }
    }

    pub fn with_params(mut self, params: StatusDictionary) -> Self {
        self.params = Some(params);
        self
    }
}

/// Storage for all connections of one synapse type leaving one slot
pub trait Connector: Send {
    fn syn_id(&self) -> SynIndex;

    /// Number of connections stored
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` through every stored connection
    fn send_to_all(&mut self, tid: ThreadIndex, event: &mut Event, registry: &SynapseRegistry);

    /// Write the status of the connection at `port` into `dict`
    fn get_synapse_status(&self, port: usize, dict: &mut StatusDictionary);

    /// Update the connection at `port` from `dict`
    fn set_synapse_status(
        &mut self,
        port: usize,
        model: &dyn ConnectorModel,
        dict: &StatusDictionary,
    ) -> Result<()>;

    /// Target node of every stored connection, in port order
    fn target_node_ids(&self) -> Vec<NodeId>;

    /// Concrete connector access for the owning model
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Synapse-type prototype
pub trait ConnectorModel: Send + Sync {
    fn name(&self) -> &str;

    /// Primary events carry no payload and never need secondary buffer space
    fn is_primary(&self) -> bool;

    /// Secondary event payload in buffer units (0 for primary models)
    fn secondary_event_size(&self) -> usize;

    /// Append a connection `source -> target` into `slot`, creating the
    /// connector if the slot is empty.
    fn add_connection(
        &self,
        source: &dyn Node,
        target: Arc<dyn Node>,
        slot: &mut Option<Box<dyn Connector>>,
        syn_id: SynIndex,
        params: &ConnectionParameters,
    ) -> Result<()>;
}

/// Ordered list of registered synapse types; the index is the synapse type id
#[derive(Clone, Default)]
pub struct SynapseRegistry {
    models: Vec<Arc<dyn ConnectorModel>>,
}

impl SynapseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prototype and return its synapse type id
    pub fn register(&mut self, model: Arc<dyn ConnectorModel>) -> SynIndex {
        let syn_id = self.models.len();
        assert!(
            syn_id < INVALID_SYN_INDEX,
            "cannot register more than {} synapse types",
            INVALID_SYN_INDEX
        );
        self.models.push(model);
        syn_id
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, syn_id: SynIndex) -> &dyn ConnectorModel {
        match self.models.get(syn_id) {
            Some(model) => model.as_ref(),
            None => panic!(
                "synapse type {} is not registered ({} types known)",
                syn_id,
                self.models.len()
            ),
        }
    }

    pub fn is_primary(&self, syn_id: SynIndex) -> bool {
        self.get(syn_id).is_primary()
    }

    pub fn secondary_event_size(&self, syn_id: SynIndex) -> usize {
        self.get(syn_id).secondary_event_size()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SynIndex, &dyn ConnectorModel)> {
        self.models.iter().enumerate().map(|(i, m)| (i, m.as_ref()))
    }

    /// True if at least one registered type uses secondary events
    pub fn has_secondary_types(&self) -> bool {
        self.models.iter().any(|m| !m.is_primary())
    }
}

impl fmt::Debug for SynapseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.models.iter().map(|m| m.name()))
            .finish()
    }
}
