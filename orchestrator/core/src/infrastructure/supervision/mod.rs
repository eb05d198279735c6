// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Supervision backends
//!
//! - [`local::LocalProcessSupervisor`] forks detached OS processes and keeps
//!   its registry on disk so separate CLI invocations share one fleet.
//! - [`memory::InMemorySupervisor`] only records what it is asked to do;
//!   used by tests and dry runs.

pub mod local;
pub mod memory;

pub use local::{LocalProcessConnector, LocalProcessSupervisor};
pub use memory::{InMemoryConnector, InMemorySupervisor};
