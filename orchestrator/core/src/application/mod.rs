// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod announcer;
pub mod fleet;
pub mod orchestrator;
pub mod readiness;

// Re-export use cases for convenience
pub use announcer::{AnnouncementOutcome, Announcer};
pub use fleet::{FleetIndex, FleetStatus, ProcessFleetManager, StopReport};
pub use orchestrator::{Announcement, LaunchedInstance, Orchestrator, StartReport};
pub use readiness::{probes_for, Probe, ReadinessProbe};
