//! Data model for containers, snapshots, and nodes.
//!
//! Two views of a container exist side by side:
//!
//! - [`ContainerConfig`] is the authoritative cluster representation, stored
//!   as a container extension and mirrored to cluster storage.
//! - [`ContainerInfo`] is the runtime view assembled on demand from the
//!   runtime, the snapshotter, and cgroup metrics.

use crate::constants::{CURRENT_CONFIG, IP_LABEL, LAST_CONFIG};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Container Config (cluster authoritative)
// =============================================================================

/// Authoritative container configuration.
///
/// Stored under the `CurrentConfig` extension on the runtime container;
/// the prior generation is kept under `LastConfig` for rollback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: String,
    pub image: String,
    #[serde(default)]
    pub process: ProcessSpec,
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub configs: BTreeMap<String, ConfigFile>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<Gpus>,
    #[serde(default)]
    pub readonly: bool,
}

/// Process entrypoint and environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSpec>,
}

/// Uid/gid the process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub uid: u32,
    pub gid: u32,
}

/// Network attachment mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    None,
    Host,
    Cni,
}

/// A mount carried into the container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// A config file written on disk and bind-mounted into the container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Mount destination inside the container.
    pub path: String,
    /// File contents written to the bind source.
    pub content: String,
}

/// A service the container exposes to the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub port: u16,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

/// A health check attached to a service registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub interval_seconds: u64,
}

/// Resource limits applied to the container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Memory limit in megabytes.
    #[serde(default)]
    pub memory_mb: i64,
    /// CPU quota in whole-or-fractional cpus.
    #[serde(default)]
    pub cpus: f64,
    /// OOM score adjustment.
    #[serde(default)]
    pub oom_score: i64,
    /// RLIMIT_NOFILE hard and soft cap.
    #[serde(default)]
    pub nofile: u64,
}

/// GPU device assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gpus {
    #[serde(default)]
    pub devices: Vec<i64>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

// =============================================================================
// Container Info (runtime view)
// =============================================================================

/// Observed container status.
///
/// `ListError` is a synthetic value surfaced only in listings when info
/// collection failed; clients must not confuse it with a runtime state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Running,
    Paused,
    #[default]
    Stopped,
    #[serde(rename = "list error")]
    ListError,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Created => "created",
            Status::Running => "running",
            Status::Paused => "paused",
            Status::Stopped => "stopped",
            Status::ListError => "list error",
        };
        f.write_str(s)
    }
}

/// Uniform runtime view of a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub image: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Total CPU time consumed, in nanoseconds.
    #[serde(default)]
    pub cpu: u64,
    /// Active memory in bytes (usage minus page cache).
    #[serde(default)]
    pub memory_usage: u64,
    #[serde(default)]
    pub memory_limit: u64,
    #[serde(default)]
    pub pid_usage: u64,
    #[serde(default)]
    pub pid_limit: u64,
    /// Snapshot usage plus recursive size of bind-mount sources, in bytes.
    #[serde(default)]
    pub fs_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ContainerConfig>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

impl ContainerInfo {
    /// Synthetic entry emitted by `List` when info collection failed.
    pub fn list_error(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::ListError,
            ..Self::default()
        }
    }
}

/// One snapshot in a container's revision chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub created: DateTime<Utc>,
    /// Previous snapshot in the chain; absent on the initial snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    pub fs_size: u64,
}

// =============================================================================
// Runtime Container Record
// =============================================================================

/// The runtime's metadata record for a container.
///
/// This is the shape serialized into the container-info blob of a
/// checkpoint image: everything needed to recreate the container on
/// another node, extensions included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub image: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub snapshotter: String,
    pub snapshot_key: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl ContainerRecord {
    /// Decodes the `CurrentConfig` extension.
    ///
    /// Fails with [`Error::OldConfigFormat`] when the extension is missing
    /// or decodes to an unknown shape.
    pub fn current_config(&self) -> Result<ContainerConfig> {
        self.decode_extension(CURRENT_CONFIG)
    }

    /// Decodes the `LastConfig` extension, if present.
    pub fn last_config(&self) -> Result<Option<ContainerConfig>> {
        if !self.extensions.contains_key(LAST_CONFIG) {
            return Ok(None);
        }
        self.decode_extension(LAST_CONFIG).map(Some)
    }

    fn decode_extension(&self, key: &str) -> Result<ContainerConfig> {
        let value = self
            .extensions
            .get(key)
            .ok_or_else(|| Error::OldConfigFormat(self.id.clone()))?;
        serde_json::from_value(value.clone()).map_err(|_| Error::OldConfigFormat(self.id.clone()))
    }

    /// The CNI-assigned IP label, if the container has one.
    pub fn ip(&self) -> Option<&str> {
        self.labels.get(IP_LABEL).map(String::as_str)
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// A cluster member as reported by the membership layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// `host:port` gossip address.
    pub address: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Node {
    /// The host part of the gossip address.
    pub fn host(&self) -> &str {
        match self.address.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.address,
        }
    }
}

/// Task metrics sampled from the container's cgroup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Total CPU time in nanoseconds.
    pub cpu_total: u64,
    /// Resident memory usage, page cache included.
    pub memory_usage: u64,
    /// Page cache portion of `memory_usage`.
    pub memory_total_cache: u64,
    pub memory_limit: u64,
    pub pids_current: u64,
    pub pids_limit: u64,
}

impl Metrics {
    /// Active memory: usage minus page cache (the working set).
    pub fn working_set(&self) -> u64 {
        self.memory_usage.saturating_sub(self.memory_total_cache)
    }
}
