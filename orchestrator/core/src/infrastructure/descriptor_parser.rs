// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Descriptor YAML Parser
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → nested mapping
//!
//! Only structure is checked here (the document must be a mapping of
//! groups). Domain rules such as "every node names its scheduler" are
//! enforced by the orchestrator while it walks the topology.

use std::path::Path;

use crate::domain::descriptor::{DeploymentDescriptor, DescriptorSource, DEFAULT_DESCRIPTOR};
use crate::domain::error::HarnessError;

pub struct DescriptorParser;

impl DescriptorParser {
    /// Parse from exactly one of `path` or `text`
    pub fn parse(path: Option<&Path>, text: Option<&str>) -> Result<DeploymentDescriptor, HarnessError> {
        match (path, text) {
            (Some(_), Some(_)) => Err(HarnessError::InvalidArgument(
                "cannot handle both a descriptor file and a descriptor string".to_string(),
            )),
            (None, None) => Err(HarnessError::InvalidArgument(
                "provide a path to a descriptor file or a descriptor string to parse".to_string(),
            )),
            (Some(path), None) => Self::parse_file(path),
            (None, Some(text)) => Self::parse_yaml(text),
        }
    }

    pub fn load(source: &DescriptorSource) -> Result<DeploymentDescriptor, HarnessError> {
        match source {
            DescriptorSource::Text(text) => Self::parse_yaml(text),
            DescriptorSource::Path(path) => Self::parse_file(path),
            DescriptorSource::BuiltIn => Self::default_descriptor(),
        }
    }

    pub fn parse_yaml(yaml: &str) -> Result<DeploymentDescriptor, HarnessError> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        DeploymentDescriptor::from_value(value)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<DeploymentDescriptor, HarnessError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::parse_yaml(&yaml)
    }

    pub fn default_descriptor() -> Result<DeploymentDescriptor, HarnessError> {
        Self::parse_yaml(DEFAULT_DESCRIPTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::descriptor::ServiceGroup;
    use std::io::Write;

    #[test]
    fn test_both_or_neither_is_invalid_argument() {
        let both = DescriptorParser::parse(Some(Path::new("/tmp/x.yml")), Some("nodes: {}"));
        assert!(matches!(both, Err(HarnessError::InvalidArgument(_))));

        let neither = DescriptorParser::parse(None, None);
        assert!(matches!(neither, Err(HarnessError::InvalidArgument(_))));
    }

    #[test]
    fn test_parse_text() {
        let descriptor = DescriptorParser::parse(None, Some("provisioners:\n  prov_0: {}\n")).unwrap();
        assert_eq!(descriptor.names(ServiceGroup::Provisioners).unwrap(), vec!["prov_0"]);
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dt_registries:\n  dtrs_0: {{}}").unwrap();

        let descriptor = DescriptorParser::parse(Some(file.path()), None).unwrap();
        assert_eq!(descriptor.names(ServiceGroup::Registries).unwrap(), vec!["dtrs_0"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = DescriptorParser::parse_file("/nonexistent/convoy/descriptor.yml");
        assert!(matches!(result, Err(HarnessError::Io { .. })));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = DescriptorParser::parse_yaml("nodes: [unclosed");
        assert!(matches!(result, Err(HarnessError::Yaml(_))));
    }

    #[test]
    fn test_builtin_source() {
        let descriptor = DescriptorParser::load(&DescriptorSource::BuiltIn).unwrap();
        assert_eq!(descriptor.names(ServiceGroup::Schedulers).unwrap(), vec!["pd_0"]);
        assert_eq!(descriptor.names(ServiceGroup::Nodes).unwrap(), vec!["nodeone"]);
    }
}
