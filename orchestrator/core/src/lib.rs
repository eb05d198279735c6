// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Convoy core
//!
//! Deployment orchestration engine: turns a declarative topology into a
//! supervised fleet of local service processes.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Descriptor parsing, config synthesis, fleet lifecycle,
//!   node announcement

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
