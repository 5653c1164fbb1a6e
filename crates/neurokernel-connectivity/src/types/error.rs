// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for connectivity operations
//!
//! Contract violations (out-of-range indices, missing connectors, wrong
//! lifecycle state) are not represented here: they panic.

use super::ids::SynIndex;

/// Recoverable connectivity errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectivityError {
    /// A status entry had the wrong type or an out-of-range value
    #[error("bad property '{name}': {reason}")]
    BadProperty { name: String, reason: String },

    /// A status dictionary carried a key the connector does not know
    #[error("unknown property '{name}' for synapse model '{model}'")]
    UnknownProperty { name: String, model: String },

    /// Connection parameters rejected by a connector model
    #[error("invalid connection parameter for synapse type {syn_id}: {reason}")]
    InvalidParameter { syn_id: SynIndex, reason: String },

    /// The collective reduction did not complete
    #[error("collective reduction failed: {0}")]
    Collective(String),

    /// Inconsistent kernel configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for connectivity operations
pub type Result<T> = core::result::Result<T, ConnectivityError>;
