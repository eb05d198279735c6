// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Domain types and ports for the orchestration engine.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Descriptor model, service kinds, supervision and
//!   messaging ports, orchestrator configuration

pub mod config;
pub mod descriptor;
pub mod error;
pub mod messaging;
pub mod node;
pub mod service;
pub mod supervision;
