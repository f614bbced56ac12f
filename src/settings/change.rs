//! Cluster configuration and the changes that edit it

use crate::common::format_bytes;
use crate::protocol::NomadChange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Committed configuration held by every server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_name: String,
    pub activated: bool,
    pub settings: BTreeMap<String, String>,
    /// Resource name -> size in bytes
    pub resources: BTreeMap<String, u64>,
}

impl ClusterConfig {
    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings.get(name).map(String::as_str)
    }

    pub fn resource(&self, name: &str) -> Option<u64> {
        self.resources.get(name).copied()
    }
}

// Externally tagged: records are bincode-encoded on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigChange {
    /// Name the cluster and allow settings to be edited
    Activate { cluster_name: String },
    SetSetting { name: String, value: String },
    UnsetSetting { name: String },
    /// Set the size of a storage resource (offheap, data directory, ...)
    ResizeResource { name: String, bytes: u64 },
}

impl NomadChange for ConfigChange {
    type State = ClusterConfig;

    fn summary(&self) -> String {
        match self {
            ConfigChange::Activate { cluster_name } => format!("activate cluster {}", cluster_name),
            ConfigChange::SetSetting { name, value } => format!("set {}={}", name, value),
            ConfigChange::UnsetSetting { name } => format!("unset {}", name),
            ConfigChange::ResizeResource { name, bytes } => {
                format!("resize {} to {}", name, format_bytes(*bytes))
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ConfigChange::Activate { .. } => "activate",
            ConfigChange::SetSetting { .. } => "set-setting",
            ConfigChange::UnsetSetting { .. } => "unset-setting",
            ConfigChange::ResizeResource { .. } => "resize-resource",
        }
    }
}
