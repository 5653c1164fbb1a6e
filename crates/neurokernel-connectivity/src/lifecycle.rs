// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Explicit two-phase lifecycle shared by the connection tables.
//!
//! Tables are constructed empty (`Uninitialized`), become usable through
//! `initialize` (`Active`) and release their storage through `finalize`
//! (`Cleared`). Teardown happens at a well-defined kernel phase rather than on
//! drop, so other subsystems may keep using a table until the kernel says so.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Active,
    Cleared,
}

impl LifecycleState {
    pub fn is_active(self) -> bool {
        self == LifecycleState::Active
    }

    /// Panic unless the table is `Active`
    #[track_caller]
    pub fn expect_active(self, table: &str) {
        if !self.is_active() {
            panic!("{} used while {}; call initialize() first", table, self);
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Cleared => write!(f, "cleared"),
        }
    }
}
