// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Static synapse model: fixed weight and delay per connection.
//!
//! The same prototype serves primary (spike) and secondary (payload) synapse
//! types; only the event classification differs.

use crate::synapse_model::{
    ConnectionParameters, Connector, ConnectorModel, Event, Node, StatusDictionary,
    SynapseRegistry,
};
use crate::types::{ConnectivityError, NodeId, Result, SynIndex, ThreadIndex};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

/// Prototype for static connections
#[derive(Debug, Clone)]
pub struct StaticSynapseModel {
    name: String,
    secondary_event_size: Option<usize>,
}

impl StaticSynapseModel {
    /// Primary (spike) synapse type
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secondary_event_size: None,
        }
    }

    /// Secondary synapse type carrying `payload_size` buffer units per event
    pub fn secondary(name: impl Into<String>, payload_size: usize) -> Self {
        assert!(payload_size > 0, "secondary events need a non-empty payload");
        Self {
            name: name.into(),
            secondary_event_size: Some(payload_size),
        }
    }
}

fn validate_delay(syn_id: SynIndex, delay: f64) -> Result<()> {
    if !(delay.is_finite() && delay > 0.0) {
        return Err(ConnectivityError::InvalidParameter {
            syn_id,
            reason: format!("delay must be positive and finite, got {}", delay),
        });
    }
    Ok(())
}

fn read_number(dict: &StatusDictionary, name: &str) -> Result<Option<f64>> {
    match dict.get(name) {
        None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| ConnectivityError::BadProperty {
            name: name.to_string(),
            reason: format!("expected a number, got {}", value),
        }),
    }
}

impl ConnectorModel for StaticSynapseModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_primary(&self) -> bool {
        self.secondary_event_size.is_none()
    }

    fn secondary_event_size(&self) -> usize {
        self.secondary_event_size.unwrap_or(0)
    }

    fn add_connection(
        &self,
        _source: &dyn Node,
        target: Arc<dyn Node>,
        slot: &mut Option<Box<dyn Connector>>,
        syn_id: SynIndex,
        params: &ConnectionParameters,
    ) -> Result<()> {
        let mut connection = StaticConnection {
            target,
            weight: params.weight,
            delay: params.delay,
        };

        if let Some(dict) = &params.params {
            for key in dict.keys() {
                if key != "weight" && key != "delay" {
                    return Err(ConnectivityError::UnknownProperty {
                        name: key.clone(),
                        model: self.name.clone(),
                    });
                }
            }
            if let Some(weight) = read_number(dict, "weight")? {
                connection.weight = weight;
            }
            if let Some(delay) = read_number(dict, "delay")? {
                connection.delay = delay;
            }
        }
        validate_delay(syn_id, connection.delay)?;

        if slot.is_none() {
            *slot = Some(Box::new(StaticConnector {
                syn_id,
                model_name: self.name.clone(),
                connections: Vec::new(),
            }));
        }
        match slot.as_mut().map(|c| c.as_any_mut().downcast_mut::<StaticConnector>()) {
            Some(Some(connector)) if connector.syn_id == syn_id => {
                connector.connections.push(connection)
            }
            _ => panic!(
                "connector slot for synapse type {} does not hold static connections of model '{}'",
                syn_id, self.name
            ),
        }
        Ok(())
    }
}

/// One static connection
#[derive(Clone)]
pub struct StaticConnection {
    pub target: Arc<dyn Node>,
    pub weight: f64,
    pub delay: f64,
}

/// Connector holding static connections of one synapse type
pub struct StaticConnector {
    syn_id: SynIndex,
    model_name: String,
    connections: Vec<StaticConnection>,
}

impl StaticConnector {
    pub fn connections(&self) -> &[StaticConnection] {
        &self.connections
    }

    fn connection(&self, port: usize) -> &StaticConnection {
        let len = self.connections.len();
        match self.connections.get(port) {
            Some(c) => c,
            None => panic!("port {} out of range for connector with {} connections", port, len),
        }
    }

    fn connection_mut(&mut self, port: usize) -> &mut StaticConnection {
        let len = self.connections.len();
        match self.connections.get_mut(port) {
            Some(c) => c,
            None => panic!("port {} out of range for connector with {} connections", port, len),
        }
    }
}

impl Connector for StaticConnector {
    fn syn_id(&self) -> SynIndex {
        self.syn_id
    }

    fn len(&self) -> usize {
        self.connections.len()
    }

    fn send_to_all(&mut self, tid: ThreadIndex, event: &mut Event, _registry: &SynapseRegistry) {
        for (port, connection) in self.connections.iter().enumerate() {
            event.receiver = Some(connection.target.node_id());
            event.port = port;
            event.weight = connection.weight;
            event.delay = connection.delay;
            trace!(
                "[STATIC-CONNECTOR] tid {} delivering {} -> {}",
                tid,
                event.sender,
                connection.target.node_id()
            );
            connection.target.handle(event);
        }
    }

    fn get_synapse_status(&self, port: usize, dict: &mut StatusDictionary) {
        let connection = self.connection(port);
        dict.insert("weight".to_string(), Value::from(connection.weight));
        dict.insert("delay".to_string(), Value::from(connection.delay));
        dict.insert("target".to_string(), Value::from(connection.target.node_id().0));
        dict.insert("synapse_model".to_string(), Value::from(self.model_name.clone()));
        dict.insert("size_of".to_string(), Value::from(core::mem::size_of::<StaticConnection>()));
    }

    fn set_synapse_status(
        &mut self,
        port: usize,
        model: &dyn ConnectorModel,
        dict: &StatusDictionary,
    ) -> Result<()> {
        for key in dict.keys() {
            if key != "weight" && key != "delay" {
                return Err(ConnectivityError::UnknownProperty {
                    name: key.clone(),
                    model: model.name().to_string(),
                });
            }
        }
        let weight = read_number(dict, "weight")?;
        let delay = read_number(dict, "delay")?;
        if let Some(delay) = delay {
            validate_delay(self.syn_id, delay).map_err(|_| ConnectivityError::BadProperty {
                name: "delay".to_string(),
                reason: format!("must be positive and finite, got {}", delay),
            })?;
        }

        let connection = self.connection_mut(port);
        if let Some(weight) = weight {
            connection.weight = weight;
        }
        if let Some(delay) = delay {
            connection.delay = delay;
        }
        Ok(())
    }

    fn target_node_ids(&self) -> Vec<NodeId> {
        self.connections.iter().map(|c| c.target.node_id()).collect()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
