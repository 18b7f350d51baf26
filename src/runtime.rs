//! Runtime collaborator traits.
//!
//! The agent drives a local container runtime through these seams and
//! never touches wire formats, tarballs, or process execution itself.
//! Implementations wrap the actual runtime; tests inject in-memory fakes.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                          Agent                            │
//! ├───────────────────────────────────────────────────────────┤
//! │  Runtime ── pull/push/fetch, containers, task checkpoint  │
//! │    │                                                      │
//! │    ├── Container ── record, task, update, delete          │
//! │    │     └── Task ── status, metrics, kill, pause, wait   │
//! │    ├── Snapshotter ── usage, walk, mounts                 │
//! │    ├── Differ ── create diff, apply diff                  │
//! │    ├── ContentStore ── put/read blobs                     │
//! │    └── ImageStore ── create/get/delete image records      │
//! └───────────────────────────────────────────────────────────┘
//! ```

use crate::constants::{BUILD_NAMESPACE, DEFAULT_NAMESPACE};
use crate::content::Descriptor;
use crate::error::Result;
use crate::model::{ContainerConfig, ContainerRecord, Metrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

// =============================================================================
// Operation Context
// =============================================================================

/// Per-operation context carrying the namespace label.
///
/// Every RPC relays into the default namespace; `Push` with `build=true`
/// operates in the namespace reserved for build artifacts.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub namespace: String,
}

impl OpContext {
    /// The default namespace all agent operations run in.
    pub fn relay() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// The build-artifact namespace.
    pub fn build() -> Self {
        Self {
            namespace: BUILD_NAMESPACE.to_string(),
        }
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::relay()
    }
}

// =============================================================================
// Task Types
// =============================================================================

/// Signals the agent sends to tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

/// Observed task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Stopped,
}

/// Exit notification for a task.
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    pub code: u32,
}

/// One-shot channel resolved when the task exits.
///
/// A closed channel (sender dropped) also counts as an exit; a waiter
/// built for an absent task resolves immediately.
pub type ExitSignal = tokio::sync::oneshot::Receiver<ExitStatus>;

/// An exit signal that resolves immediately, for containers with no task.
pub fn exited() -> ExitSignal {
    let (tx, rx) = tokio::sync::oneshot::channel();
    drop(tx);
    rx
}

/// Options for a live task checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    /// Stop the task as part of the checkpoint.
    pub exit: bool,
    pub open_tcp: bool,
    pub external_unix_sockets: bool,
    pub terminal: bool,
    pub file_locks: bool,
    pub empty_namespaces: Vec<String>,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            exit: false,
            open_tcp: false,
            external_unix_sockets: false,
            terminal: false,
            file_locks: true,
            empty_namespaces: Vec::new(),
        }
    }
}

// =============================================================================
// Container Types
// =============================================================================

/// A pulled or created image record.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub name: String,
    pub target: Descriptor,
}

/// Options for creating a container.
#[derive(Debug, Clone)]
pub struct NewContainerOpts {
    pub id: String,
    /// Base image ref the snapshot is built from.
    pub image: String,
    /// Container extensions (holds the `CurrentConfig` generation).
    pub extensions: BTreeMap<String, serde_json::Value>,
    /// Config driving OCI runtime spec generation.
    pub config: ContainerConfig,
    /// Cluster volume root for mount resolution.
    pub volume_root: Option<String>,
    /// Task checkpoint to start from (live restore).
    pub checkpoint: Option<Descriptor>,
}

/// A metadata mutation applied through the runtime's container lock.
#[derive(Debug, Clone)]
pub enum UpdateOp {
    /// Install a new config generation: the current extension moves to
    /// `LastConfig`, the given config becomes `CurrentConfig`, and the
    /// OCI runtime spec is regenerated from it.
    ReplaceConfig {
        config: ContainerConfig,
        volume_root: Option<String>,
    },
    /// Restore the previous generation: `CurrentConfig` takes the value
    /// of `LastConfig`, which is cleared, and the spec is regenerated.
    /// No-op when no previous generation exists.
    RollbackConfig,
    /// Set a container label.
    SetLabel { key: String, value: String },
}

/// Cleanup behavior on container deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// Remove the active snapshot only (failed/aborted creates).
    Snapshot,
    /// Remove every snapshot in the revision chain.
    Revisions,
}

// =============================================================================
// Snapshot & Mount Types
// =============================================================================

/// Disk usage of a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub size: u64,
}

/// Snapshotter metadata for one snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub name: String,
    pub created: DateTime<Utc>,
    pub labels: HashMap<String, String>,
}

/// A mount belonging to a snapshot, as handed to the diff applier.
#[derive(Debug, Clone)]
pub struct MountPoint {
    pub kind: String,
    pub source: String,
    pub options: Vec<String>,
}

// =============================================================================
// Leases
// =============================================================================

/// Scoped content lease.
///
/// Content written under a lease is reclaimable only after the lease
/// ends; the guard releases on drop so the lease is coupled to the
/// request that took it.
pub struct LeaseGuard {
    id: String,
    release: Option<Box<dyn FnOnce(&str) + Send>>,
}

impl LeaseGuard {
    pub fn new(id: impl Into<String>, release: impl FnOnce(&str) + Send + 'static) -> Self {
        Self {
            id: id.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(&self.id);
        }
    }
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// The container runtime the agent drives.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Pulls and unpacks an image. Idempotent when the ref is local.
    async fn pull(&self, ctx: &OpContext, image_ref: &str, plain_http: bool)
        -> Result<ImageHandle>;

    /// Fetches image metadata without unpacking.
    async fn fetch(
        &self,
        ctx: &OpContext,
        image_ref: &str,
        plain_http: bool,
    ) -> Result<ImageHandle>;

    /// Pushes local image content to its registry.
    async fn push(
        &self,
        ctx: &OpContext,
        image_ref: &str,
        target: &Descriptor,
        plain_http: bool,
    ) -> Result<()>;

    /// Creates a container with a fresh snapshot from its base image.
    async fn new_container(
        &self,
        ctx: &OpContext,
        opts: NewContainerOpts,
    ) -> Result<Arc<dyn Container>>;

    /// Loads an existing container. Fails with `NotFound` for unknown ids.
    async fn load_container(&self, ctx: &OpContext, id: &str) -> Result<Arc<dyn Container>>;

    /// All containers in the context namespace.
    async fn containers(&self, ctx: &OpContext) -> Result<Vec<Arc<dyn Container>>>;

    /// Checkpoints a task's live state, returning descriptors of every
    /// blob the runtime wrote (including its own config descriptor).
    async fn checkpoint_task(
        &self,
        ctx: &OpContext,
        id: &str,
        opts: &CheckpointOptions,
    ) -> Result<Vec<Descriptor>>;

    /// Takes a content lease scoped to the current request.
    async fn lease(&self, ctx: &OpContext) -> Result<LeaseGuard>;

    fn snapshots(&self) -> Arc<dyn Snapshotter>;
    fn diffs(&self) -> Arc<dyn Differ>;
    fn content(&self) -> Arc<dyn ContentStore>;
    fn images(&self) -> Arc<dyn ImageStore>;
}

/// A container held by the runtime.
#[async_trait]
pub trait Container: Send + Sync {
    fn id(&self) -> &str;

    /// The runtime's metadata record, extensions included.
    async fn record(&self, ctx: &OpContext) -> Result<ContainerRecord>;

    /// The running task, or `None` when no task exists.
    async fn task(&self, ctx: &OpContext) -> Result<Option<Arc<dyn Task>>>;

    /// Applies metadata mutations under the runtime's container lock.
    async fn update(&self, ctx: &OpContext, ops: Vec<UpdateOp>) -> Result<()>;

    /// Deletes the container with the given snapshot cleanup.
    async fn delete(&self, ctx: &OpContext, cleanup: Cleanup) -> Result<()>;
}

/// A container's task.
#[async_trait]
pub trait Task: Send + Sync {
    async fn status(&self, ctx: &OpContext) -> Result<TaskStatus>;
    async fn metrics(&self, ctx: &OpContext) -> Result<Metrics>;
    async fn kill(&self, ctx: &OpContext, signal: Signal) -> Result<()>;
    async fn pause(&self, ctx: &OpContext) -> Result<()>;
    async fn resume(&self, ctx: &OpContext) -> Result<()>;

    /// Subscribes to the task's exit.
    async fn wait(&self, ctx: &OpContext) -> Result<ExitSignal>;
}

/// Snapshot management.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn usage(&self, ctx: &OpContext, key: &str) -> Result<Usage>;
    async fn walk(&self, ctx: &OpContext) -> Result<Vec<SnapshotInfo>>;
    async fn mounts(&self, ctx: &OpContext, key: &str) -> Result<Vec<MountPoint>>;
}

/// Layer diff creation and application.
#[async_trait]
pub trait Differ: Send + Sync {
    /// Diffs a snapshot against its parent into the content store.
    async fn create(
        &self,
        ctx: &OpContext,
        snapshot_key: &str,
        media_type: &str,
        reference: &str,
    ) -> Result<Descriptor>;

    /// Applies a layer blob onto a snapshot's mounts.
    async fn apply(
        &self,
        ctx: &OpContext,
        desc: &Descriptor,
        mounts: &[MountPoint],
    ) -> Result<()>;
}

/// Content-addressed blob storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Commits a blob under its digest, attaching the given labels.
    async fn put(
        &self,
        ctx: &OpContext,
        reference: &str,
        digest: &str,
        data: Vec<u8>,
        labels: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Reads a blob by digest.
    async fn read(&self, ctx: &OpContext, digest: &str) -> Result<Vec<u8>>;
}

/// Image record management.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Looks up an image by name. Fails with `NotFound` for unknown refs.
    async fn get(&self, ctx: &OpContext, name: &str) -> Result<ImageHandle>;

    /// Creates an image record pointing at a target descriptor.
    async fn create(&self, ctx: &OpContext, name: &str, target: Descriptor) -> Result<ImageHandle>;

    /// Deletes an image record.
    async fn delete(&self, ctx: &OpContext, name: &str) -> Result<()>;
}
