// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core value types shared by the connection tables

pub mod error;
pub mod ids;
pub mod position;
pub mod source;

pub use error::{ConnectivityError, Result};
pub use ids::{NodeId, Rank, SynIndex, ThreadIndex, INVALID_SYN_INDEX};
pub use position::SourceTablePosition;
pub use source::{Source, MAX_NODE_ID, SOURCE_RECORD_SIZE};
