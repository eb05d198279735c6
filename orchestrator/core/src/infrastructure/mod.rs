// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config_synthesizer;
pub mod descriptor_parser;
pub mod merge;
pub mod messaging;
pub mod supervision;

pub use config_synthesizer::{ConfigSynthesizer, GeneratedConfig};
pub use descriptor_parser::DescriptorParser;
pub use merge::{deep_merge, merge_into};
