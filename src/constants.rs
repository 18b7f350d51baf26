//! Constants for the agent core.
//!
//! All labels, media types, store keys, and timeouts are defined here to
//! ensure consistency and prevent magic values throughout the codebase.

use std::time::Duration;

// =============================================================================
// Node Labels
// =============================================================================

/// Membership label marking the cluster master node.
pub const MASTER_LABEL: &str = "boss.io/master";

/// Membership label advertising the replicated-store port.
pub const STORE_PORT_LABEL: &str = "boss.io/store.port";

// =============================================================================
// Container Extensions & Labels
// =============================================================================

/// Container extension key holding the authoritative config.
pub const CURRENT_CONFIG: &str = "io.boss/container";

/// Container extension key holding the previous config generation.
pub const LAST_CONFIG: &str = "io.boss/container.last";

/// Container label carrying the CNI-assigned IP.
pub const IP_LABEL: &str = "io.boss/container.ip";

/// Snapshot label identifying the owning container.
pub const CONTAINER_ID_LABEL: &str = "boss.io/container-id";

/// Snapshot label pointing at the previous snapshot in the revision chain.
pub const PREVIOUS_LABEL: &str = "boss.io/snapshot.previous";

// =============================================================================
// Media Types
// =============================================================================

/// Container record blob inside checkpoint images.
pub const MEDIA_TYPE_CONTAINER_INFO: &str = "application/vnd.boss.container.info.v1+json";

/// Checkpoint image envelope.
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Read-write layer diff.
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Live task checkpoint produced by the runtime.
pub const MEDIA_TYPE_TASK_CHECKPOINT: &str =
    "application/vnd.containerd.container.criu.checkpoint.criu.v1";

/// The runtime's own config descriptor inside a task checkpoint.
/// Superseded by the container-info blob and dropped from the index.
pub const MEDIA_TYPE_CHECKPOINT_CONFIG: &str =
    "application/vnd.containerd.container.checkpoint.config.v1+proto";

/// Content label prefix that keeps index children alive under GC.
pub const GC_REF_LABEL_PREFIX: &str = "containerd.io/gc.ref.content";

// =============================================================================
// Store Keys
// =============================================================================

/// Cluster-wide volume root path (string key).
pub const VOLUME_ROOT_KEY: &str = "v1:volume-root";

/// Set of registry hostnames reachable over plain HTTP.
pub const PLAIN_REMOTES_KEY: &str = "v1:plain-remotes";

// =============================================================================
// Namespaces
// =============================================================================

/// Default namespace all agent operations run in.
pub const DEFAULT_NAMESPACE: &str = "boss";

/// Namespace reserved for build artifacts (`Push` with `build=true`).
pub const BUILD_NAMESPACE: &str = "buildkit";

// =============================================================================
// Paths & Defaults
// =============================================================================

/// Default on-disk root for agent state.
pub const DEFAULT_ROOT: &str = "/var/lib/boss";

/// Default interface for node addressing.
pub const DEFAULT_IFACE: &str = "eth0";

/// Default replicated-store TCP port.
pub const DEFAULT_STORE_PORT: u16 = 6380;

/// Node-local resolver file name, regenerated as peers change.
pub const RESOLV_CONF: &str = "resolv.conf";

/// Container `/etc/hosts` bind source file name.
pub const HOSTS_FILE: &str = "hosts";

/// Per-container directory for bind-mounted config files.
pub const CONFIGS_DIR: &str = "configs";

/// Persisted store state file inside the node data directory.
pub const STORE_STATE_FILE: &str = "store.json";

/// Nameservers used when no registry backend supplies any.
pub const DEFAULT_NAMESERVERS: [&str; 2] = ["8.8.8.8", "8.8.4.4"];

// =============================================================================
// Limits & Timeouts
// =============================================================================

/// Sockets per store connection pool.
pub const STORE_POOL_SIZE: usize = 5;

/// How long an update waits for a task to exit before sending SIGKILL.
pub const UPDATE_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Replica poll interval against the master store.
pub const REPLICATION_INTERVAL: Duration = Duration::from_millis(500);
