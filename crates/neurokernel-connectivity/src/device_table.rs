// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Connections that involve stimulation or recording devices.
//!
//! Per worker thread the table holds two arrays of connector slots:
//!
//! - **to devices**, indexed by the local index of the sending neuron
//! - **from devices**, indexed by the local device id of the sending device
//!
//! Each entry is a per-synapse-type array of optional connector objects. A
//! third array remembers the global node id of every sending device, since
//! the local device id alone does not recover it.

use crate::lifecycle::LifecycleState;
use crate::partition::Partitioning;
use crate::synapse_model::{
    ConnectionParameters, Connector, Event, Node, StatusDictionary, SynapseRegistry,
};
use crate::types::{NodeId, Result, SynIndex, ThreadIndex};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace};

type ConnectorSlots = Vec<Option<Box<dyn Connector>>>;

/// Identity of one stored device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId {
    pub source: NodeId,
    pub target: NodeId,
    pub thread: ThreadIndex,
    pub syn_id: SynIndex,
    pub port: usize,
}

#[derive(Default)]
struct DevicePartition {
    target_to_devices: Vec<ConnectorSlots>,
    target_from_devices: Vec<ConnectorSlots>,
    sending_devices_node_ids: Vec<Option<NodeId>>,
}

impl DevicePartition {
    fn resize_synapse_types(&mut self, num_synapse_types: usize) {
        for slots in self
            .target_to_devices
            .iter_mut()
            .chain(self.target_from_devices.iter_mut())
        {
            if slots.len() < num_synapse_types {
                slots.resize_with(num_synapse_types, || None);
            }
        }
    }
}

/// Per-thread storage for device connections
pub struct DeviceConnectionTable {
    state: LifecycleState,
    partitions: Vec<Mutex<DevicePartition>>,
}

impl DeviceConnectionTable {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            partitions: Vec::new(),
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state
    }

    pub fn num_threads(&self) -> usize {
        self.partitions.len()
    }

    pub fn initialize(&mut self, num_threads: usize) {
        assert!(num_threads > 0, "device table needs at least one thread");
        self.partitions = (0..num_threads)
            .map(|_| Mutex::new(DevicePartition::default()))
            .collect();
        self.state = LifecycleState::Active;
        info!("[DEVICE-TABLE] Initialized {} thread partitions", num_threads);
    }

    /// Drop every connector. Safe to call repeatedly.
    pub fn finalize(&mut self) {
        if !self.state.is_active() {
            debug!("[DEVICE-TABLE] finalize() while {}; nothing to release", self.state);
            return;
        }
        self.partitions.clear();
        self.state = LifecycleState::Cleared;
        info!("[DEVICE-TABLE] Finalized");
    }

    #[track_caller]
    fn partition(&self, tid: ThreadIndex) -> MutexGuard<'_, DevicePartition> {
        self.state.expect_active("device table");
        match self.partitions.get(tid) {
            Some(partition) => partition.lock(),
            None => panic!(
                "thread {} out of range for device table with {} threads",
                tid,
                self.partitions.len()
            ),
        }
    }

    /// Size `tid`'s arrays for its local neurons and local devices
    pub fn resize_to_number_of_neurons(
        &self,
        tid: ThreadIndex,
        num_local_nodes: usize,
        num_local_devices: usize,
    ) {
        let mut partition = self.partition(tid);
        partition.target_to_devices.resize_with(num_local_nodes, Vec::new);
        partition.target_from_devices.resize_with(num_local_devices, Vec::new);
        partition.sending_devices_node_ids.resize(num_local_devices, None);
        debug!(
            "[DEVICE-TABLE] tid {} sized for {} neurons and {} devices",
            tid, num_local_nodes, num_local_devices
        );
    }

    /// Grow every per-slot synapse-type array on every thread
    #[track_caller]
    pub fn resize_to_number_of_synapse_types(&self, num_synapse_types: usize) {
        self.state.expect_active("device table");
        for tid in 0..self.partitions.len() {
            self.partition(tid).resize_synapse_types(num_synapse_types);
        }
    }

    /// Store a connection from a neuron to a device. The connector lives in
    /// the slot of the sending neuron's local index.
    #[allow(clippy::too_many_arguments)]
    pub fn add_connection_to_device(
        &self,
        source: &dyn Node,
        target: Arc<dyn Node>,
        tid: ThreadIndex,
        syn_id: SynIndex,
        params: &ConnectionParameters,
        registry: &SynapseRegistry,
        partitioning: &dyn Partitioning,
    ) -> Result<()> {
        let lid = partitioning.node_to_local_index(source.node_id());
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_to_devices, "neuron", tid, lid);
        if slots.len() < registry.len() {
            slots.resize_with(registry.len(), || None);
        }
        let target_id = target.node_id();
        registry
            .get(syn_id)
            .add_connection(source, target, slot_mut(slots, syn_id), syn_id, params)?;
        trace!(
            "[DEVICE-TABLE] tid {} {} -> device {} (syn_id {})",
            tid,
            source.node_id(),
            target_id,
            syn_id
        );
        Ok(())
    }

    /// Store a connection from a device to a node. The connector lives in the
    /// slot of the device's local id, and the device's node id is recorded.
    pub fn add_connection_from_device(
        &self,
        source: &dyn Node,
        target: Arc<dyn Node>,
        tid: ThreadIndex,
        syn_id: SynIndex,
        params: &ConnectionParameters,
        registry: &SynapseRegistry,
    ) -> Result<()> {
        let ldid = match source.local_device_id() {
            Some(ldid) => ldid,
            None => panic!("{} is not a device; it has no local device id", source.node_id()),
        };
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_from_devices, "device", tid, ldid);
        if slots.len() < registry.len() {
            slots.resize_with(registry.len(), || None);
        }
        let target_id = target.node_id();
        registry
            .get(syn_id)
            .add_connection(source, target, slot_mut(slots, syn_id), syn_id, params)?;
        partition.sending_devices_node_ids[ldid] = Some(source.node_id());
        trace!(
            "[DEVICE-TABLE] tid {} device {} -> {} (syn_id {})",
            tid,
            source.node_id(),
            target_id,
            syn_id
        );
        Ok(())
    }

    /// Deliver an event from neuron `source` to every device it connects to,
    /// in ascending synapse-type order
    pub fn send_to_device(
        &self,
        tid: ThreadIndex,
        source: NodeId,
        event: &mut Event,
        registry: &SynapseRegistry,
        partitioning: &dyn Partitioning,
    ) {
        let lid = partitioning.node_to_local_index(source);
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_to_devices, "neuron", tid, lid);
        for connector in slots.iter_mut().flatten() {
            connector.send_to_all(tid, event, registry);
        }
    }

    /// Deliver an event from the device with local id `ldid` to every node it
    /// connects to, in ascending synapse-type order
    pub fn send_from_device(
        &self,
        tid: ThreadIndex,
        ldid: usize,
        event: &mut Event,
        registry: &SynapseRegistry,
    ) {
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_from_devices, "device", tid, ldid);
        for connector in slots.iter_mut().flatten() {
            connector.send_to_all(tid, event, registry);
        }
    }

    pub fn get_synapse_status_to_device(
        &self,
        tid: ThreadIndex,
        source: NodeId,
        syn_id: SynIndex,
        port: usize,
        dict: &mut StatusDictionary,
        partitioning: &dyn Partitioning,
    ) {
        let lid = partitioning.node_to_local_index(source);
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_to_devices, "neuron", tid, lid);
        connector_mut(slots, tid, syn_id).get_synapse_status(port, dict);
    }

    pub fn get_synapse_status_from_device(
        &self,
        tid: ThreadIndex,
        ldid: usize,
        syn_id: SynIndex,
        port: usize,
        dict: &mut StatusDictionary,
    ) {
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_from_devices, "device", tid, ldid);
        connector_mut(slots, tid, syn_id).get_synapse_status(port, dict);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_synapse_status_to_device(
        &self,
        tid: ThreadIndex,
        source: NodeId,
        syn_id: SynIndex,
        port: usize,
        dict: &StatusDictionary,
        registry: &SynapseRegistry,
        partitioning: &dyn Partitioning,
    ) -> Result<()> {
        let lid = partitioning.node_to_local_index(source);
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_to_devices, "neuron", tid, lid);
        connector_mut(slots, tid, syn_id).set_synapse_status(port, registry.get(syn_id), dict)
    }

    pub fn set_synapse_status_from_device(
        &self,
        tid: ThreadIndex,
        ldid: usize,
        syn_id: SynIndex,
        port: usize,
        dict: &StatusDictionary,
        registry: &SynapseRegistry,
    ) -> Result<()> {
        let mut partition = self.partition(tid);
        let slots = slots_mut(&mut partition.target_from_devices, "device", tid, ldid);
        connector_mut(slots, tid, syn_id).set_synapse_status(port, registry.get(syn_id), dict)
    }

    /// Node id of the device with local id `ldid`, once it has a connection
    pub fn get_sending_device_node_id(&self, tid: ThreadIndex, ldid: usize) -> Option<NodeId> {
        let partition = self.partition(tid);
        match partition.sending_devices_node_ids.get(ldid) {
            Some(node_id) => *node_id,
            None => panic!(
                "device id {} out of range for thread {} ({} devices)",
                ldid,
                tid,
                partition.sending_devices_node_ids.len()
            ),
        }
    }

    /// True if the neuron with local index `lcid` sends to any device
    pub fn is_device_connected(&self, tid: ThreadIndex, lcid: usize) -> bool {
        let partition = self.partition(tid);
        partition
            .target_to_devices
            .get(lcid)
            .is_some_and(|slots| slots.iter().flatten().any(|c| !c.is_empty()))
    }

    /// Number of device connections of synapse type `syn_id` on `tid`, in
    /// both directions
    pub fn num_connections(&self, tid: ThreadIndex, syn_id: SynIndex) -> usize {
        let partition = self.partition(tid);
        partition
            .target_to_devices
            .iter()
            .chain(partition.target_from_devices.iter())
            .filter_map(|slots| slots.get(syn_id).and_then(Option::as_ref))
            .map(|c| c.len())
            .sum()
    }

    /// Connections of type `syn_id` from neuron `source` to devices
    pub fn get_connections_to_devices(
        &self,
        tid: ThreadIndex,
        source: NodeId,
        syn_id: SynIndex,
        partitioning: &dyn Partitioning,
    ) -> Vec<ConnectionId> {
        let lid = partitioning.node_to_local_index(source);
        let partition = self.partition(tid);
        let Some(connector) = partition
            .target_to_devices
            .get(lid)
            .and_then(|slots| slots.get(syn_id))
            .and_then(Option::as_ref)
        else {
            return Vec::new();
        };
        connection_ids(source, tid, syn_id, connector.as_ref())
    }

    /// Connections of type `syn_id` from any device on `tid`
    pub fn get_connections_from_devices(
        &self,
        tid: ThreadIndex,
        syn_id: SynIndex,
    ) -> Vec<ConnectionId> {
        let partition = self.partition(tid);
        partition
            .target_from_devices
            .iter()
            .zip(partition.sending_devices_node_ids.iter())
            .filter_map(|(slots, source)| {
                let connector = slots.get(syn_id)?.as_ref()?;
                Some(connection_ids((*source)?, tid, syn_id, connector.as_ref()))
            })
            .flatten()
            .collect()
    }
}

impl Default for DeviceConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn connection_ids(
    source: NodeId,
    tid: ThreadIndex,
    syn_id: SynIndex,
    connector: &dyn Connector,
) -> Vec<ConnectionId> {
    connector
        .target_node_ids()
        .into_iter()
        .enumerate()
        .map(|(port, target)| ConnectionId {
            source,
            target,
            thread: tid,
            syn_id,
            port,
        })
        .collect()
}

#[track_caller]
fn slots_mut<'a>(
    array: &'a mut [ConnectorSlots],
    kind: &str,
    tid: ThreadIndex,
    index: usize,
) -> &'a mut ConnectorSlots {
    let len = array.len();
    match array.get_mut(index) {
        Some(slots) => slots,
        None => panic!(
            "local {} id {} out of range for thread {} ({} allocated)",
            kind, index, tid, len
        ),
    }
}

#[track_caller]
fn slot_mut(slots: &mut ConnectorSlots, syn_id: SynIndex) -> &mut Option<Box<dyn Connector>> {
    let len = slots.len();
    match slots.get_mut(syn_id) {
        Some(slot) => slot,
        None => panic!("synapse type {} out of range ({} types)", syn_id, len),
    }
}

#[track_caller]
fn connector_mut(
    slots: &mut ConnectorSlots,
    tid: ThreadIndex,
    syn_id: SynIndex,
) -> &mut dyn Connector {
    match slots.get_mut(syn_id) {
        Some(Some(connector)) => connector.as_mut(),
        _ => panic!("no connector of synapse type {} on thread {}", syn_id, tid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StaticSynapseModel;
    use crate::partition::RoundRobinPartitioning;
    use crate::types::ConnectivityError;
    use serde_json::json;

    struct TestNode {
        id: NodeId,
        device_id: Option<usize>,
        received: Mutex<Vec<Event>>,
    }

    impl TestNode {
        fn neuron(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id: NodeId(id),
                device_id: None,
                received: Mutex::new(Vec::new()),
            })
        }

        fn device(id: u64, ldid: usize) -> Arc<Self> {
            Arc::new(Self {
                id: NodeId(id),
                device_id: Some(ldid),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl Node for TestNode {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn local_device_id(&self) -> Option<usize> {
            self.device_id
        }

        fn handle(&self, event: &Event) {
            self.received.lock().push(event.clone());
        }
    }

    fn registry() -> SynapseRegistry {
        let mut registry = SynapseRegistry::new();
        registry.register(Arc::new(StaticSynapseModel::primary("static")));
        registry.register(Arc::new(StaticSynapseModel::primary("static_hom")));
        registry
    }

    fn table() -> DeviceConnectionTable {
        let mut table = DeviceConnectionTable::new();
        table.initialize(1);
        table.resize_to_number_of_neurons(0, 4, 2);
        table
    }

    #[test]
    fn test_send_to_device_in_synapse_type_order() {
        let registry = registry();
        let partitioning = RoundRobinPartitioning::single_process(1);
        let table = table();
        let neuron = TestNode::neuron(2);
        let recorder = TestNode::device(100, 0);

        table
            .add_connection_to_device(
                &*neuron,
                recorder.clone(),
                0,
                1,
                &ConnectionParameters::new(2.0, 0.5),
                &registry,
                &partitioning,
            )
            .unwrap();
        table
            .add_connection_to_device(
                &*neuron,
                recorder.clone(),
                0,
                0,
                &ConnectionParameters::new(1.0, 3.0),
                &registry,
                &partitioning,
            )
            .unwrap();
        assert!(table.is_device_connected(0, 2));
        assert!(!table.is_device_connected(0, 1));

        let mut event = Event::new(NodeId(2), 7);
        table.send_to_device(0, NodeId(2), &mut event, &registry, &partitioning);

        let received = recorder.received.lock();
        let weights: Vec<f64> = received.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![3.0, 0.5]);
        assert!(received.iter().all(|e| e.receiver == Some(NodeId(100)) && e.stamp == 7));
    }

    #[test]
    fn test_from_device_records_sender() {
        let registry = registry();
        let table = table();
        let generator = TestNode::device(50, 1);
        let a = TestNode::neuron(3);
        let b = TestNode::neuron(4);

        assert_eq!(table.get_sending_device_node_id(0, 1), None);
        for target in [a.clone(), b.clone()] {
            table
                .add_connection_from_device(
                    &*generator,
                    target,
                    0,
                    0,
                    &ConnectionParameters::new(1.0, 1.0),
                    &registry,
                )
                .unwrap();
        }
        assert_eq!(table.get_sending_device_node_id(0, 1), Some(NodeId(50)));
        assert_eq!(table.num_connections(0, 0), 2);

        let mut event = Event::new(NodeId(50), 1);
        table.send_from_device(0, 1, &mut event, &registry);
        assert_eq!(a.received.lock().len(), 1);
        assert_eq!(b.received.lock()[0].port, 1);

        let conns = table.get_connections_from_devices(0, 0);
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[1].source, NodeId(50));
        assert_eq!(conns[1].target, NodeId(4));
        assert!(table.get_connections_from_devices(0, 1).is_empty());
    }

    #[test]
    fn test_status_forwarding() {
        let registry = registry();
        let partitioning = RoundRobinPartitioning::single_process(1);
        let table = table();
        let neuron = TestNode::neuron(1);
        let meter = TestNode::device(99, 0);

        let mut extra = StatusDictionary::new();
        extra.insert("weight".into(), json!(4.5));
        table
            .add_connection_to_device(
                &*neuron,
                meter,
                0,
                0,
                &ConnectionParameters::new(1.5, 1.0).with_params(extra),
                &registry,
                &partitioning,
            )
            .unwrap();

        let mut dict = StatusDictionary::new();
        table.get_synapse_status_to_device(0, NodeId(1), 0, 0, &mut dict, &partitioning);
        assert_eq!(dict["weight"], json!(4.5));
        assert_eq!(dict["delay"], json!(1.5));
        assert_eq!(dict["target"], json!(99));

        let mut update = StatusDictionary::new();
        update.insert("weight".into(), json!(-2.0));
        table
            .set_synapse_status_to_device(0, NodeId(1), 0, 0, &update, &registry, &partitioning)
            .unwrap();
        let mut dict = StatusDictionary::new();
        table.get_synapse_status_to_device(0, NodeId(1), 0, 0, &mut dict, &partitioning);
        assert_eq!(dict["weight"], json!(-2.0));

        update.insert("tau".into(), json!(1.0));
        let err = table
            .set_synapse_status_to_device(0, NodeId(1), 0, 0, &update, &registry, &partitioning)
            .unwrap_err();
        assert!(matches!(err, ConnectivityError::UnknownProperty { .. }));

        let ids = table.get_connections_to_devices(0, NodeId(1), 0, &partitioning);
        assert_eq!(
            ids,
            vec![ConnectionId {
                source: NodeId(1),
                target: NodeId(99),
                thread: 0,
                syn_id: 0,
                port: 0
            }]
        );
    }

    #[test]
    fn test_invalid_delay_is_rejected() {
        let registry = registry();
        let table = table();
        let generator = TestNode::device(50, 0);
        let err = table
            .add_connection_from_device(
                &*generator,
                TestNode::neuron(1),
                0,
                0,
                &ConnectionParameters::new(-1.0, 1.0),
                &registry,
            )
            .unwrap_err();
        assert!(matches!(err, ConnectivityError::InvalidParameter { syn_id: 0, .. }));
        assert_eq!(table.num_connections(0, 0), 0);
    }

    #[test]
    #[should_panic(expected = "no connector")]
    fn test_status_on_empty_slot_panics() {
        let table = table();
        table.resize_to_number_of_synapse_types(2);
        let mut dict = StatusDictionary::new();
        table.get_synapse_status_from_device(0, 0, 1, 0, &mut dict);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_local_id_outside_allocation_panics() {
        let registry = registry();
        let table = table();
        let generator = TestNode::device(50, 5);
        let _ = table.add_connection_from_device(
            &*generator,
            TestNode::neuron(1),
            0,
            0,
            &ConnectionParameters::new(1.0, 1.0),
            &registry,
        );
    }

    #[test]
    #[should_panic(expected = "call initialize() first")]
    fn test_resize_synapse_types_rejects_uninitialized_table() {
        DeviceConnectionTable::new().resize_to_number_of_synapse_types(3);
    }

    #[test]
    #[should_panic(expected = "call initialize() first")]
    fn test_resize_synapse_types_rejects_finalized_table() {
        let mut table = table();
        table.finalize();
        table.resize_to_number_of_synapse_types(3);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut table = table();
        table.finalize();
        table.finalize();
        assert_eq!(table.lifecycle_state(), LifecycleState::Cleared);
        table.initialize(2);
        assert_eq!(table.num_threads(), 2);
    }
}
