//! In-memory fakes for the agent's collaborator seams, shared by the
//! integration tests. The fake runtime models containers, tasks,
//! snapshots, content, and images well enough to exercise the update,
//! checkpoint/restore, and migration flows end to end; the fake unit
//! manager plays the supervisor, starting a task when a unit starts.

#![allow(dead_code)]

use async_trait::async_trait;
use boss::agent::{Agent, Collaborators, RemoteAgent, Remotes};
use boss::api::{GetRequest, GetResponse, RestoreRequest, RestoreResponse};
use boss::cluster::{Membership, NodeEvent};
use boss::config::Config;
use boss::constants::{
    CONTAINER_ID_LABEL, CURRENT_CONFIG, LAST_CONFIG, MASTER_LABEL, MEDIA_TYPE_CHECKPOINT_CONFIG,
    MEDIA_TYPE_TASK_CHECKPOINT, STORE_PORT_LABEL,
};
use boss::content::{digest_of, Descriptor};
use boss::error::{Error, Result};
use boss::model::{
    ContainerConfig, ContainerRecord, Metrics, NetworkMode, Node, ServiceSpec,
};
use boss::runtime::{
    CheckpointOptions, Cleanup, Container, ContentStore, Differ, ExitSignal, ExitStatus,
    ImageHandle, ImageStore, LeaseGuard, MountPoint, NewContainerOpts, OpContext, Runtime, Signal,
    SnapshotInfo, Snapshotter, Task, TaskStatus, UpdateOp, Usage,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

// =============================================================================
// Fake Cluster Membership
// =============================================================================

pub struct FakeCluster {
    local: Node,
    peers: Mutex<Vec<Node>>,
    events: broadcast::Sender<NodeEvent>,
}

impl FakeCluster {
    pub fn new(local: Node, peers: Vec<Node>) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            local,
            peers: Mutex::new(peers),
            events,
        })
    }

    pub fn join(&self, node: Node) {
        self.peers.lock().unwrap().push(node.clone());
        let _ = self.events.send(NodeEvent::Joined(node));
    }

    pub fn leave(&self, id: &str) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(pos) = peers.iter().position(|n| n.id == id) {
            let node = peers.remove(pos);
            drop(peers);
            let _ = self.events.send(NodeEvent::Left(node));
        }
    }
}

#[async_trait]
impl Membership for FakeCluster {
    async fn local_node(&self) -> Result<Node> {
        Ok(self.local.clone())
    }

    async fn peers(&self) -> Result<Vec<Node>> {
        Ok(self.peers.lock().unwrap().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }
}

pub fn node(id: &str, address: &str) -> Node {
    Node {
        id: id.to_string(),
        address: address.to_string(),
        labels: HashMap::new(),
    }
}

pub fn master_node(id: &str, address: &str, store_port: u16) -> Node {
    let mut n = node(id, address);
    n.labels.insert(MASTER_LABEL.to_string(), String::new());
    n.labels
        .insert(STORE_PORT_LABEL.to_string(), store_port.to_string());
    n
}

// =============================================================================
// Fake Registry (shared between runtimes for migration)
// =============================================================================

#[derive(Default)]
pub struct FakeRegistry {
    images: Mutex<HashMap<String, Descriptor>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    /// `(ref, plain_http)` per push, in order.
    pub pushes: Mutex<Vec<(String, bool)>>,
}

// =============================================================================
// Fake Task
// =============================================================================

pub struct FakeTask {
    ignore_term: bool,
    status: Mutex<TaskStatus>,
    metrics: Mutex<Metrics>,
    pub kills: Mutex<Vec<Signal>>,
    waiters: Mutex<Vec<tokio::sync::oneshot::Sender<ExitStatus>>>,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
}

impl FakeTask {
    fn new(ignore_term: bool) -> Arc<Self> {
        Arc::new(Self {
            ignore_term,
            status: Mutex::new(TaskStatus::Running),
            metrics: Mutex::new(Metrics {
                cpu_total: 1_000_000,
                memory_usage: 100,
                memory_total_cache: 25,
                memory_limit: 512,
                pids_current: 3,
                pids_limit: 100,
            }),
            kills: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
        })
    }

    pub fn set_metrics(&self, metrics: Metrics) {
        *self.metrics.lock().unwrap() = metrics;
    }

    pub fn stop(&self) {
        *self.status.lock().unwrap() = TaskStatus::Stopped;
        for tx in self.waiters.lock().unwrap().drain(..) {
            let _ = tx.send(ExitStatus { code: 0 });
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.status.lock().unwrap(), TaskStatus::Stopped)
    }
}

#[async_trait]
impl Task for FakeTask {
    async fn status(&self, _ctx: &OpContext) -> Result<TaskStatus> {
        Ok(*self.status.lock().unwrap())
    }

    async fn metrics(&self, _ctx: &OpContext) -> Result<Metrics> {
        Ok(*self.metrics.lock().unwrap())
    }

    async fn kill(&self, _ctx: &OpContext, signal: Signal) -> Result<()> {
        self.kills.lock().unwrap().push(signal);
        match signal {
            Signal::Term if !self.ignore_term => self.stop(),
            Signal::Kill => self.stop(),
            _ => {}
        }
        Ok(())
    }

    async fn pause(&self, _ctx: &OpContext) -> Result<()> {
        let mut status = self.status.lock().unwrap();
        if matches!(*status, TaskStatus::Stopped) {
            return Err(Error::runtime("pause", "task exited"));
        }
        self.pauses.fetch_add(1, Ordering::SeqCst);
        *status = TaskStatus::Paused;
        Ok(())
    }

    async fn resume(&self, _ctx: &OpContext) -> Result<()> {
        let mut status = self.status.lock().unwrap();
        if matches!(*status, TaskStatus::Stopped) {
            return Err(Error::runtime("resume", "task exited"));
        }
        self.resumes.fetch_add(1, Ordering::SeqCst);
        *status = TaskStatus::Running;
        Ok(())
    }

    async fn wait(&self, _ctx: &OpContext) -> Result<ExitSignal> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.is_stopped() {
            let _ = tx.send(ExitStatus { code: 0 });
        } else {
            self.waiters.lock().unwrap().push(tx);
        }
        Ok(rx)
    }
}

// =============================================================================
// Fake Runtime
// =============================================================================

struct ContainerState {
    record: ContainerRecord,
    task: Option<Arc<FakeTask>>,
    restore_checkpoint: Option<Descriptor>,
    respecs: usize,
}

pub struct SnapEntry {
    pub info: SnapshotInfo,
    pub files: BTreeMap<String, Vec<u8>>,
}

pub struct RuntimeState {
    containers: Mutex<HashMap<String, ContainerState>>,
    snapshots: Mutex<HashMap<String, SnapEntry>>,
    content: Mutex<HashMap<String, Vec<u8>>>,
    content_labels: Mutex<HashMap<String, BTreeMap<String, String>>>,
    images: Mutex<HashMap<String, Descriptor>>,
    pub pulls: Mutex<Vec<(String, bool)>>,
    pub fetches: Mutex<Vec<(String, bool)>>,
    /// Namespace each push ran in, in order.
    pub push_namespaces: Mutex<Vec<String>>,
    leases: Mutex<HashSet<String>>,
    lease_counter: AtomicUsize,
    registry: Arc<FakeRegistry>,
}

pub struct FakeRuntime {
    pub state: Arc<RuntimeState>,
    parts: Arc<Parts>,
}

struct Parts(Arc<RuntimeState>);

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Self::with_registry(Arc::new(FakeRegistry::default()))
    }

    pub fn with_registry(registry: Arc<FakeRegistry>) -> Arc<Self> {
        let state = Arc::new(RuntimeState {
            containers: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            content: Mutex::new(HashMap::new()),
            content_labels: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            pulls: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
            push_namespaces: Mutex::new(Vec::new()),
            leases: Mutex::new(HashSet::new()),
            lease_counter: AtomicUsize::new(0),
            registry,
        });
        Arc::new(Self {
            parts: Arc::new(Parts(state.clone())),
            state,
        })
    }

    // ------------------------------------------------------------------
    // test helpers
    // ------------------------------------------------------------------

    pub fn task(&self, id: &str) -> Option<Arc<FakeTask>> {
        self.state
            .containers
            .lock()
            .unwrap()
            .get(id)
            .and_then(|c| c.task.clone())
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.state.containers.lock().unwrap().contains_key(id)
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.state.images.lock().unwrap().contains_key(name)
    }

    pub fn snapshot_count(&self, id: &str) -> usize {
        self.state
            .snapshots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.info.labels.get(CONTAINER_ID_LABEL).map(String::as_str) == Some(id))
            .count()
    }

    pub fn record(&self, id: &str) -> Option<ContainerRecord> {
        self.state
            .containers
            .lock()
            .unwrap()
            .get(id)
            .map(|c| c.record.clone())
    }

    pub fn respecs(&self, id: &str) -> usize {
        self.state
            .containers
            .lock()
            .unwrap()
            .get(id)
            .map(|c| c.respecs)
            .unwrap_or(0)
    }

    /// Replaces the `CurrentConfig` extension with garbage.
    pub fn corrupt_config(&self, id: &str) {
        let mut containers = self.state.containers.lock().unwrap();
        let c = containers.get_mut(id).unwrap();
        c.record
            .extensions
            .insert(CURRENT_CONFIG.to_string(), serde_json::json!(42));
    }

    /// Writes a file into the container's active rw snapshot.
    pub fn write_rw_file(&self, id: &str, name: &str, data: &[u8]) {
        let key = self
            .record(id)
            .expect("container exists")
            .snapshot_key;
        let mut snapshots = self.state.snapshots.lock().unwrap();
        snapshots
            .get_mut(&key)
            .expect("snapshot exists")
            .files
            .insert(name.to_string(), data.to_vec());
    }

    /// The file tree of the container's active rw snapshot.
    pub fn rw_files(&self, id: &str) -> BTreeMap<String, Vec<u8>> {
        let key = self
            .record(id)
            .expect("container exists")
            .snapshot_key;
        self.state
            .snapshots
            .lock()
            .unwrap()
            .get(&key)
            .map(|s| s.files.clone())
            .unwrap_or_default()
    }

    pub fn content_blob(&self, digest: &str) -> Option<Vec<u8>> {
        self.state.content.lock().unwrap().get(digest).cloned()
    }

    pub fn content_labels(&self, digest: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .content_labels
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
    }

    pub fn image_target(&self, name: &str) -> Option<Descriptor> {
        self.state.images.lock().unwrap().get(name).cloned()
    }

    pub fn active_leases(&self) -> usize {
        self.state.leases.lock().unwrap().len()
    }

    /// The task checkpoint descriptor attached at creation, if any.
    pub fn restore_checkpoint(&self, id: &str) -> Option<Descriptor> {
        self.state
            .containers
            .lock()
            .unwrap()
            .get(id)
            .and_then(|c| c.restore_checkpoint.clone())
    }

    /// Seeds a raw content blob, bypassing the agent.
    pub fn put_content(&self, digest: &str, data: Vec<u8>) {
        self.state
            .content
            .lock()
            .unwrap()
            .insert(digest.to_string(), data);
    }

    /// Seeds an image record, bypassing the agent.
    pub fn create_image(&self, name: &str, target: Descriptor) {
        self.state
            .images
            .lock()
            .unwrap()
            .insert(name.to_string(), target);
    }

    /// `(ref, plain_http)` per registry push, in order.
    pub fn registry_pushes(&self) -> Vec<(String, bool)> {
        self.state.registry.pushes.lock().unwrap().clone()
    }

    /// Namespace each push ran in, in order.
    pub fn push_namespaces(&self) -> Vec<String> {
        self.state.push_namespaces.lock().unwrap().clone()
    }

    fn start_task(&self, id: &str, ignore_term: bool) {
        let mut containers = self.state.containers.lock().unwrap();
        if let Some(c) = containers.get_mut(id) {
            match &c.task {
                Some(task) if !task.is_stopped() => {}
                _ => c.task = Some(FakeTask::new(ignore_term)),
            }
        }
    }

    fn stop_task(&self, id: &str) {
        let mut containers = self.state.containers.lock().unwrap();
        if let Some(c) = containers.get_mut(id) {
            if let Some(task) = c.task.take() {
                task.stop();
            }
        }
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn pull(
        &self,
        _ctx: &OpContext,
        image_ref: &str,
        plain_http: bool,
    ) -> Result<ImageHandle> {
        self.state
            .pulls
            .lock()
            .unwrap()
            .push((image_ref.to_string(), plain_http));
        let target = Descriptor {
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            digest: digest_of(image_ref.as_bytes()),
            size: image_ref.len() as i64,
            platform: None,
            annotations: None,
        };
        self.state
            .images
            .lock()
            .unwrap()
            .insert(image_ref.to_string(), target.clone());
        Ok(ImageHandle {
            name: image_ref.to_string(),
            target,
        })
    }

    async fn fetch(
        &self,
        _ctx: &OpContext,
        image_ref: &str,
        plain_http: bool,
    ) -> Result<ImageHandle> {
        self.state
            .fetches
            .lock()
            .unwrap()
            .push((image_ref.to_string(), plain_http));
        let target = self
            .state
            .registry
            .images
            .lock()
            .unwrap()
            .get(image_ref)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("image {} in registry", image_ref)))?;
        // bring the remote blobs into the local content store
        let remote = self.state.registry.blobs.lock().unwrap().clone();
        self.state.content.lock().unwrap().extend(remote);
        Ok(ImageHandle {
            name: image_ref.to_string(),
            target,
        })
    }

    async fn push(
        &self,
        ctx: &OpContext,
        image_ref: &str,
        target: &Descriptor,
        plain_http: bool,
    ) -> Result<()> {
        self.state
            .push_namespaces
            .lock()
            .unwrap()
            .push(ctx.namespace.clone());
        self.state
            .registry
            .pushes
            .lock()
            .unwrap()
            .push((image_ref.to_string(), plain_http));
        self.state
            .registry
            .images
            .lock()
            .unwrap()
            .insert(image_ref.to_string(), target.clone());
        let local = self.state.content.lock().unwrap().clone();
        self.state.registry.blobs.lock().unwrap().extend(local);
        Ok(())
    }

    async fn new_container(
        &self,
        _ctx: &OpContext,
        opts: NewContainerOpts,
    ) -> Result<Arc<dyn Container>> {
        let mut containers = self.state.containers.lock().unwrap();
        if containers.contains_key(&opts.id) {
            return Err(Error::AlreadyExists(opts.id));
        }
        let snapshot_key = format!("{}-snapshot", opts.id);
        let mut labels = HashMap::new();
        labels.insert(CONTAINER_ID_LABEL.to_string(), opts.id.clone());
        self.state.snapshots.lock().unwrap().insert(
            snapshot_key.clone(),
            SnapEntry {
                info: SnapshotInfo {
                    name: snapshot_key.clone(),
                    created: chrono::Utc::now(),
                    labels,
                },
                files: BTreeMap::new(),
            },
        );
        let record = ContainerRecord {
            id: opts.id.clone(),
            image: opts.image.clone(),
            labels: HashMap::new(),
            snapshotter: "overlayfs".to_string(),
            snapshot_key,
            created_at: Some(chrono::Utc::now()),
            extensions: opts.extensions,
        };
        containers.insert(
            opts.id.clone(),
            ContainerState {
                record,
                task: None,
                restore_checkpoint: opts.checkpoint,
                respecs: 0,
            },
        );
        Ok(Arc::new(FakeContainer {
            id: opts.id,
            state: self.state.clone(),
        }))
    }

    async fn load_container(&self, _ctx: &OpContext, id: &str) -> Result<Arc<dyn Container>> {
        if !self.state.containers.lock().unwrap().contains_key(id) {
            return Err(Error::NotFound(format!("container {}", id)));
        }
        Ok(Arc::new(FakeContainer {
            id: id.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn containers(&self, _ctx: &OpContext) -> Result<Vec<Arc<dyn Container>>> {
        let mut ids: Vec<String> = self
            .state
            .containers
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| {
                Arc::new(FakeContainer {
                    id,
                    state: self.state.clone(),
                }) as Arc<dyn Container>
            })
            .collect())
    }

    async fn checkpoint_task(
        &self,
        _ctx: &OpContext,
        id: &str,
        opts: &CheckpointOptions,
    ) -> Result<Vec<Descriptor>> {
        if self.task(id).is_none() {
            return Err(Error::NotFound(format!("task for container {}", id)));
        }
        let criu = serde_json::to_vec(&serde_json::json!({ "task": id })).unwrap();
        let criu_digest = digest_of(&criu);
        let config = serde_json::to_vec(&serde_json::json!({ "config": id })).unwrap();
        let config_digest = digest_of(&config);
        {
            let mut content = self.state.content.lock().unwrap();
            content.insert(criu_digest.clone(), criu.clone());
            content.insert(config_digest.clone(), config.clone());
        }
        if opts.exit {
            self.stop_task(id);
        }
        Ok(vec![
            Descriptor {
                media_type: MEDIA_TYPE_TASK_CHECKPOINT.to_string(),
                digest: criu_digest,
                size: criu.len() as i64,
                platform: None,
                annotations: None,
            },
            Descriptor {
                media_type: MEDIA_TYPE_CHECKPOINT_CONFIG.to_string(),
                digest: config_digest,
                size: config.len() as i64,
                platform: None,
                annotations: None,
            },
        ])
    }

    async fn lease(&self, _ctx: &OpContext) -> Result<LeaseGuard> {
        let id = format!(
            "lease-{}",
            self.state.lease_counter.fetch_add(1, Ordering::SeqCst)
        );
        self.state.leases.lock().unwrap().insert(id.clone());
        let state = self.state.clone();
        Ok(LeaseGuard::new(id, move |id| {
            state.leases.lock().unwrap().remove(id);
        }))
    }

    fn snapshots(&self) -> Arc<dyn Snapshotter> {
        self.parts.clone()
    }

    fn diffs(&self) -> Arc<dyn Differ> {
        self.parts.clone()
    }

    fn content(&self) -> Arc<dyn ContentStore> {
        self.parts.clone()
    }

    fn images(&self) -> Arc<dyn ImageStore> {
        self.parts.clone()
    }
}

// =============================================================================
// Fake Container
// =============================================================================

struct FakeContainer {
    id: String,
    state: Arc<RuntimeState>,
}

#[async_trait]
impl Container for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn record(&self, _ctx: &OpContext) -> Result<ContainerRecord> {
        self.state
            .containers
            .lock()
            .unwrap()
            .get(&self.id)
            .map(|c| c.record.clone())
            .ok_or_else(|| Error::NotFound(format!("container {}", self.id)))
    }

    async fn task(&self, _ctx: &OpContext) -> Result<Option<Arc<dyn Task>>> {
        let containers = self.state.containers.lock().unwrap();
        let c = containers
            .get(&self.id)
            .ok_or_else(|| Error::NotFound(format!("container {}", self.id)))?;
        Ok(c.task.clone().map(|t| t as Arc<dyn Task>))
    }

    async fn update(&self, _ctx: &OpContext, ops: Vec<UpdateOp>) -> Result<()> {
        let mut containers = self.state.containers.lock().unwrap();
        let c = containers
            .get_mut(&self.id)
            .ok_or_else(|| Error::NotFound(format!("container {}", self.id)))?;
        for op in ops {
            match op {
                UpdateOp::ReplaceConfig { config, .. } => {
                    if let Some(current) = c.record.extensions.get(CURRENT_CONFIG).cloned() {
                        c.record
                            .extensions
                            .insert(LAST_CONFIG.to_string(), current);
                    }
                    c.record.extensions.insert(
                        CURRENT_CONFIG.to_string(),
                        serde_json::to_value(&config)?,
                    );
                    c.record.image = config.image.clone();
                    c.respecs += 1;
                }
                UpdateOp::RollbackConfig => {
                    if let Some(last) = c.record.extensions.remove(LAST_CONFIG) {
                        if let Ok(config) =
                            serde_json::from_value::<ContainerConfig>(last.clone())
                        {
                            c.record.image = config.image;
                        }
                        c.record.extensions.insert(CURRENT_CONFIG.to_string(), last);
                        c.respecs += 1;
                    }
                }
                UpdateOp::SetLabel { key, value } => {
                    c.record.labels.insert(key, value);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, _ctx: &OpContext, cleanup: Cleanup) -> Result<()> {
        let removed = self
            .state
            .containers
            .lock()
            .unwrap()
            .remove(&self.id)
            .ok_or_else(|| Error::NotFound(format!("container {}", self.id)))?;
        let mut snapshots = self.state.snapshots.lock().unwrap();
        match cleanup {
            Cleanup::Snapshot => {
                snapshots.remove(&removed.record.snapshot_key);
            }
            Cleanup::Revisions => {
                snapshots.retain(|_, s| {
                    s.info.labels.get(CONTAINER_ID_LABEL).map(String::as_str)
                        != Some(self.id.as_str())
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Fake Snapshotter / Differ / Content / Images
// =============================================================================

#[async_trait]
impl Snapshotter for Parts {
    async fn usage(&self, _ctx: &OpContext, key: &str) -> Result<Usage> {
        let snapshots = self.0.snapshots.lock().unwrap();
        let entry = snapshots
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", key)))?;
        Ok(Usage {
            size: entry.files.values().map(|d| d.len() as u64).sum(),
        })
    }

    async fn walk(&self, _ctx: &OpContext) -> Result<Vec<SnapshotInfo>> {
        let snapshots = self.0.snapshots.lock().unwrap();
        let mut infos: Vec<SnapshotInfo> = snapshots.values().map(|s| s.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn mounts(&self, _ctx: &OpContext, key: &str) -> Result<Vec<MountPoint>> {
        if !self.0.snapshots.lock().unwrap().contains_key(key) {
            return Err(Error::NotFound(format!("snapshot {}", key)));
        }
        Ok(vec![MountPoint {
            kind: "bind".to_string(),
            source: format!("/fake/{}", key),
            options: vec!["rw".to_string()],
        }])
    }
}

#[async_trait]
impl Differ for Parts {
    async fn create(
        &self,
        _ctx: &OpContext,
        snapshot_key: &str,
        media_type: &str,
        _reference: &str,
    ) -> Result<Descriptor> {
        let files = {
            let snapshots = self.0.snapshots.lock().unwrap();
            let entry = snapshots
                .get(snapshot_key)
                .ok_or_else(|| Error::NotFound(format!("snapshot {}", snapshot_key)))?;
            entry.files.clone()
        };
        let data = serde_json::to_vec(&files)?;
        let digest = digest_of(&data);
        self.0
            .content
            .lock()
            .unwrap()
            .insert(digest.clone(), data.clone());
        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest,
            size: data.len() as i64,
            platform: None,
            annotations: None,
        })
    }

    async fn apply(
        &self,
        _ctx: &OpContext,
        desc: &Descriptor,
        mounts: &[MountPoint],
    ) -> Result<()> {
        let data = self
            .0
            .content
            .lock()
            .unwrap()
            .get(&desc.digest)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("content {}", desc.digest)))?;
        let files: BTreeMap<String, Vec<u8>> = serde_json::from_slice(&data)?;
        let key = mounts
            .first()
            .and_then(|m| m.source.strip_prefix("/fake/"))
            .ok_or_else(|| Error::runtime("apply diff", "no snapshot mount"))?;
        let mut snapshots = self.0.snapshots.lock().unwrap();
        let entry = snapshots
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", key)))?;
        entry.files.extend(files);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for Parts {
    async fn put(
        &self,
        _ctx: &OpContext,
        _reference: &str,
        digest: &str,
        data: Vec<u8>,
        labels: BTreeMap<String, String>,
    ) -> Result<()> {
        self.0
            .content
            .lock()
            .unwrap()
            .insert(digest.to_string(), data);
        self.0
            .content_labels
            .lock()
            .unwrap()
            .insert(digest.to_string(), labels);
        Ok(())
    }

    async fn read(&self, _ctx: &OpContext, digest: &str) -> Result<Vec<u8>> {
        self.0
            .content
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("content {}", digest)))
    }
}

#[async_trait]
impl ImageStore for Parts {
    async fn get(&self, _ctx: &OpContext, name: &str) -> Result<ImageHandle> {
        self.0
            .images
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .map(|target| ImageHandle {
                name: name.to_string(),
                target,
            })
            .ok_or_else(|| Error::NotFound(format!("image {}", name)))
    }

    async fn create(&self, _ctx: &OpContext, name: &str, target: Descriptor) -> Result<ImageHandle> {
        self.0
            .images
            .lock()
            .unwrap()
            .insert(name.to_string(), target.clone());
        Ok(ImageHandle {
            name: name.to_string(),
            target,
        })
    }

    async fn delete(&self, _ctx: &OpContext, name: &str) -> Result<()> {
        self.0
            .images
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("image {}", name)))
    }
}

// =============================================================================
// Fake Host Collaborators
// =============================================================================

/// Plays the supervisor: starting a unit starts the container's task.
pub struct FakeUnits {
    runtime: Arc<FakeRuntime>,
    pub events: Mutex<Vec<(String, String)>>,
    ignore_term: Mutex<HashSet<String>>,
}

impl FakeUnits {
    pub fn new(runtime: Arc<FakeRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            events: Mutex::new(Vec::new()),
            ignore_term: Mutex::new(HashSet::new()),
        })
    }

    /// Make the next started task for `id` ignore SIGTERM.
    pub fn ignore_term(&self, id: &str) {
        self.ignore_term.lock().unwrap().insert(id.to_string());
    }

    fn log(&self, event: &str, id: &str) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), id.to_string()));
    }
}

#[async_trait]
impl boss::register::UnitManager for FakeUnits {
    async fn enable(&self, _ctx: &OpContext, id: &str) -> Result<()> {
        self.log("enable", id);
        Ok(())
    }

    async fn start(&self, _ctx: &OpContext, id: &str) -> Result<()> {
        self.log("start", id);
        let ignore = self.ignore_term.lock().unwrap().contains(id);
        self.runtime.start_task(id, ignore);
        Ok(())
    }

    async fn stop(&self, _ctx: &OpContext, id: &str) -> Result<()> {
        self.log("stop", id);
        self.runtime.stop_task(id);
        Ok(())
    }

    async fn disable(&self, _ctx: &OpContext, id: &str) -> Result<()> {
        self.log("disable", id);
        Ok(())
    }
}

/// Records every registry interaction.
#[derive(Default)]
pub struct FakeRegister {
    pub maintenance: Mutex<Vec<(String, String, String)>>,
    pub deregistered: Mutex<Vec<(String, String)>>,
}

impl FakeRegister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn in_maintenance(&self, id: &str, name: &str) -> bool {
        self.maintenance
            .lock()
            .unwrap()
            .iter()
            .any(|(i, n, _)| i == id && n == name)
    }

    pub fn is_deregistered(&self, id: &str, name: &str) -> bool {
        self.deregistered
            .lock()
            .unwrap()
            .iter()
            .any(|(i, n)| i == id && n == name)
    }
}

#[async_trait]
impl boss::register::ServiceRegistry for FakeRegister {
    async fn register(&self, _id: &str, _name: &str, _ip: &str, _svc: &ServiceSpec) -> Result<()> {
        Ok(())
    }

    async fn deregister(&self, id: &str, name: &str) -> Result<()> {
        self.deregistered
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string()));
        Ok(())
    }

    async fn enable_maintenance(&self, id: &str, name: &str, reason: &str) -> Result<()> {
        self.maintenance.lock().unwrap().push((
            id.to_string(),
            name.to_string(),
            reason.to_string(),
        ));
        Ok(())
    }

    async fn disable_maintenance(&self, id: &str, name: &str) -> Result<()> {
        self.maintenance
            .lock()
            .unwrap()
            .retain(|(i, n, _)| !(i == id && n == name));
        Ok(())
    }
}

/// Records mirrored configs; can be switched to fail for testing
/// create/restore cleanup paths.
#[derive(Default)]
pub struct FakeConfigStore {
    pub written: Mutex<Vec<ContainerConfig>>,
    fail: AtomicBool,
}

impl FakeConfigStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent `write` fail until switched back.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl boss::register::ConfigStore for FakeConfigStore {
    async fn write(&self, _ctx: &OpContext, config: &ContainerConfig) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::runtime("write config", "config store unavailable"));
        }
        self.written.lock().unwrap().push(config.clone());
        Ok(())
    }
}

/// Routes migration channels to in-process agents by address.
#[derive(Default)]
pub struct FakeRemotes {
    agents: Mutex<HashMap<String, Arc<Agent>>>,
}

impl FakeRemotes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, address: &str, agent: Arc<Agent>) {
        self.agents
            .lock()
            .unwrap()
            .insert(address.to_string(), agent);
    }
}

#[async_trait]
impl Remotes for FakeRemotes {
    async fn dial(&self, address: &str) -> Result<Box<dyn RemoteAgent>> {
        let agent = self
            .agents
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::transport("dial", format!("no agent at {}", address)))?;
        Ok(Box::new(AgentChannel(agent)))
    }
}

struct AgentChannel(Arc<Agent>);

#[async_trait]
impl RemoteAgent for AgentChannel {
    async fn get(&self, req: &GetRequest) -> Result<GetResponse> {
        self.0.get(req.clone()).await
    }

    async fn restore(&self, req: &RestoreRequest) -> Result<RestoreResponse> {
        self.0.restore(req.clone()).await
    }
}

// =============================================================================
// Agent Harness
// =============================================================================

pub struct Harness {
    pub agent: Arc<Agent>,
    pub runtime: Arc<FakeRuntime>,
    pub register: Arc<FakeRegister>,
    pub config_store: Arc<FakeConfigStore>,
    pub units: Arc<FakeUnits>,
    pub cluster: Arc<FakeCluster>,
    pub remotes: Arc<FakeRemotes>,
    pub root: TempDir,
}

impl Harness {
    pub fn root_path(&self) -> &std::path::Path {
        self.root.path()
    }
}

pub fn agent_config(name: &str, root: &TempDir, master: bool) -> Config {
    let mut config = Config::from_toml(&format!(
        r#"
id = "{}"
nameservers = ["8.8.8.8"]

[agent]
master = {}
store_port = 0
"#,
        name, master
    ))
    .unwrap();
    config.root = root.path().to_path_buf();
    config
}

/// Starts an agent with a fresh fake stack.
pub async fn start_agent(
    name: &str,
    master: bool,
    peers: Vec<Node>,
    registry: Arc<FakeRegistry>,
    remotes: Arc<FakeRemotes>,
) -> Result<Harness> {
    let root = TempDir::new().unwrap();
    let runtime = FakeRuntime::with_registry(registry);
    let register = FakeRegister::new();
    let config_store = FakeConfigStore::new();
    let units = FakeUnits::new(runtime.clone());
    let cluster = FakeCluster::new(node(name, "127.0.0.1:7946"), peers);
    let config = agent_config(name, &root, master);

    let agent = Agent::start(
        config,
        runtime.clone(),
        Collaborators {
            config_store: config_store.clone(),
            register: register.clone(),
            units: units.clone(),
            network: Arc::new(boss::register::NullNetwork),
            remotes: remotes.clone(),
        },
        cluster.clone(),
    )
    .await?;

    Ok(Harness {
        agent: Arc::new(agent),
        runtime,
        register,
        config_store,
        units,
        cluster,
        remotes,
        root,
    })
}

/// Starts a master agent with a fresh fake stack.
pub async fn master_agent(name: &str) -> Harness {
    master_agent_with(name, Arc::new(FakeRegistry::default()), FakeRemotes::new()).await
}

/// Starts a master agent sharing a registry and remote channel table,
/// for multi-node migration scenarios.
pub async fn master_agent_with(
    name: &str,
    registry: Arc<FakeRegistry>,
    remotes: Arc<FakeRemotes>,
) -> Harness {
    start_agent(name, true, Vec::new(), registry, remotes)
        .await
        .unwrap()
}

/// A container config in the shape the scenarios use.
pub fn web_config(id: &str, image: &str) -> ContainerConfig {
    let mut config = ContainerConfig {
        id: id.to_string(),
        image: image.to_string(),
        network: NetworkMode::Cni,
        ..Default::default()
    };
    config.process.args = vec!["nginx".to_string(), "-g".to_string(), "daemon off;".to_string()];
    config
        .services
        .insert("http".to_string(), ServiceSpec {
            port: 80,
            labels: Vec::new(),
            checks: Vec::new(),
        });
    config
}

/// Polls `check` until it returns true or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
