//! The per-node agent: lifecycle wiring and the RPC surface.
//!
//! Startup order matters: the embedded store comes up first, then the
//! master is discovered from peer labels (masters point at themselves),
//! the local replica is slaved, and the resolv.conf watcher starts.
//! The agent owns the store exclusively — it starts it and closes it —
//! so no cyclic reference between the two can form.
//!
//! Handlers serve concurrently and are not serialized per container;
//! the runtime's container lock is the only defense, and conflicting
//! interleavings surface as errors rather than corrupt state.

use crate::api::*;
use crate::changes::{self, pause_and_run, ChangeDeps};
use crate::checkpoint;
use crate::cluster::{Membership, PeerDirectory};
use crate::config::Config;
use crate::constants::UPDATE_EXIT_TIMEOUT;
use crate::error::{Error, Result};
use crate::info;
use crate::model::ContainerInfo;
use crate::register::{
    ConfigStore, Network, NullConfigStore, NullNetwork, NullRegistry, ServiceRegistry, UnitManager,
};
use crate::restore;
use crate::runtime::{self, Cleanup, OpContext, Runtime, Signal, UpdateOp};
use crate::store::{StoreClient, StoreServer};
use crate::opts as container_opts;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

// =============================================================================
// Peer Agent Channel
// =============================================================================

/// Dials RPC channels to peer agents (migration targets).
#[async_trait]
pub trait Remotes: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Box<dyn RemoteAgent>>;
}

/// The subset of the RPC surface migration drives on the target peer.
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    async fn get(&self, req: &GetRequest) -> Result<GetResponse>;
    async fn restore(&self, req: &RestoreRequest) -> Result<RestoreResponse>;
}

/// Host-side collaborators injected into the agent.
pub struct Collaborators {
    pub config_store: Arc<dyn ConfigStore>,
    pub register: Arc<dyn ServiceRegistry>,
    pub units: Arc<dyn UnitManager>,
    pub network: Arc<dyn Network>,
    pub remotes: Arc<dyn Remotes>,
}

impl Collaborators {
    /// Collaborators for a single-node setup without a registry
    /// backend: the service registry, config store, and network fall
    /// back to their no-op implementations. The unit manager and peer
    /// channels have no meaningful no-op and stay required.
    pub fn single_node(units: Arc<dyn UnitManager>, remotes: Arc<dyn Remotes>) -> Self {
        Self {
            config_store: Arc::new(NullConfigStore),
            register: Arc::new(NullRegistry),
            units,
            network: Arc::new(NullNetwork),
            remotes,
        }
    }
}

// =============================================================================
// Agent
// =============================================================================

/// The per-node orchestration agent.
pub struct Agent {
    config: Config,
    runtime: Arc<dyn Runtime>,
    collab: Collaborators,
    directory: PeerDirectory,
    server: StoreServer,
    store: StoreClient,
    resolv_task: JoinHandle<()>,
}

impl Agent {
    /// Starts the agent: store up, master discovered, replica slaved,
    /// resolv.conf bootstrapped and watched.
    pub async fn start(
        config: Config,
        runtime: Arc<dyn Runtime>,
        collab: Collaborators,
        node: Arc<dyn Membership>,
    ) -> Result<Self> {
        let listen: SocketAddr = ([0, 0, 0, 0], config.agent.store_port).into();
        let server =
            StoreServer::start(listen, config.store_data_dir(), !config.agent.master).await?;
        let local = format!("127.0.0.1:{}", server.local_addr().port());

        let directory = PeerDirectory::new(node, config.root.clone());
        let master = if config.agent.master {
            local.clone()
        } else {
            debug!("connecting to other nodes");
            directory.find_master().await?
        };
        let store = StoreClient::connect(&local, &master, !config.agent.master).await?;

        directory.write_resolv_conf().await?;
        let resolv_task = directory.watch();

        Ok(Self {
            config,
            runtime,
            collab,
            directory,
            server,
            store,
            resolv_task,
        })
    }

    /// Stops the store server and the resolv.conf watcher.
    pub fn close(&self) {
        self.server.shutdown();
        self.resolv_task.abort();
    }

    /// The typed store client (local + master pools).
    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    /// The embedded store's bound listen address.
    pub fn store_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    // =========================================================================
    // RPC Surface
    // =========================================================================

    pub async fn create(&self, req: CreateRequest) -> Result<()> {
        let ctx = OpContext::relay();
        let config = req.container;
        if config.id.is_empty() {
            return Err(Error::NoId);
        }
        let plain_http = self.store.plain_http_for(&config.image).await?;
        let image = self.runtime.pull(&ctx, &config.image, plain_http).await?;

        if self.runtime.load_container(&ctx, &config.id).await.is_ok() {
            if !req.update {
                return Err(Error::AlreadyExists(config.id));
            }
            return self
                .update(UpdateRequest { container: config })
                .await
                .map(|_| ());
        }

        let volume_root = self.store.volume_root().await?;
        let create = container_opts::with_boss_config(
            &self.config.root,
            &self.config.nameservers(),
            volume_root,
            &config,
            &image,
        )?;
        let container = self.runtime.new_container(&ctx, create).await?;

        if let Err(e) = self.collab.config_store.write(&ctx, &config).await {
            if let Err(cleanup) = container.delete(&ctx, Cleanup::Snapshot).await {
                warn!("cleanup container {}: {}", config.id, cleanup);
            }
            return Err(e);
        }
        self.collab.units.enable(&ctx, container.id()).await?;
        self.collab.units.start(&ctx, container.id()).await?;
        Ok(())
    }

    pub async fn delete(&self, req: DeleteRequest) -> Result<()> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        let container = self.runtime.load_container(&ctx, &req.id).await?;
        self.collab
            .units
            .stop(&ctx, &req.id)
            .await
            .map_err(|e| Error::runtime("stop service", e))?;
        self.collab
            .units
            .disable(&ctx, &req.id)
            .await
            .map_err(|e| Error::runtime("disable service", e))?;

        let record = container.record(&ctx).await?;
        let config = record.current_config()?;
        self.collab.network.remove(&ctx, container.as_ref()).await?;
        for name in config.services.keys() {
            if let Err(e) = self.collab.register.deregister(&req.id, name).await {
                warn!("de-register {}-{}: {}", req.id, name, e);
            }
        }
        container.delete(&ctx, Cleanup::Revisions).await
    }

    pub async fn get(&self, req: GetRequest) -> Result<GetResponse> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        let container = self.runtime.load_container(&ctx, &req.id).await?;
        let container = info::assemble(&ctx, self.runtime.as_ref(), container.as_ref()).await?;
        Ok(GetResponse { container })
    }

    /// Lists all containers, degrading per item: a container whose info
    /// cannot be assembled is reported with the `list error` status
    /// instead of failing the listing.
    pub async fn list(&self, _req: ListRequest) -> Result<ListResponse> {
        let ctx = OpContext::relay();
        let mut resp = ListResponse::default();
        for container in self.runtime.containers(&ctx).await? {
            match info::assemble(&ctx, self.runtime.as_ref(), container.as_ref()).await {
                Ok(info) => resp.containers.push(info),
                Err(e) => {
                    error!("info container: {}", e);
                    resp.containers
                        .push(ContainerInfo::list_error(container.id()));
                }
            }
        }
        Ok(resp)
    }

    pub async fn kill(&self, req: KillRequest) -> Result<()> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        let container = self.runtime.load_container(&ctx, &req.id).await?;
        let record = container.record(&ctx).await?;
        let config = record.current_config()?;
        for name in config.services.keys() {
            if let Err(e) = self
                .collab
                .register
                .enable_maintenance(&req.id, name, "manual kill")
                .await
            {
                warn!("enable maintenance {}-{}: {}", req.id, name, e);
            }
        }
        let task = container
            .task(&ctx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task for container {}", req.id)))?;
        task.kill(&ctx, Signal::Term).await
    }

    pub async fn start_unit(&self, req: StartRequest) -> Result<()> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        self.collab.units.start(&ctx, &req.id).await
    }

    pub async fn stop_unit(&self, req: StopRequest) -> Result<()> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        self.collab.units.stop(&ctx, &req.id).await
    }

    /// Applies the change pipeline: maintenance on, content lease taken,
    /// ordered changes under pause, SIGTERM to the task, then a bounded
    /// wait for the exit — SIGKILL on timeout still counts as success,
    /// supervision restarts under the new config.
    pub async fn update(&self, req: UpdateRequest) -> Result<UpdateResponse> {
        let ctx = OpContext::relay();
        let desired = req.container;
        if desired.id.is_empty() {
            return Err(Error::NoId);
        }
        let _lease = self.runtime.lease(&ctx).await?;
        let container = self.runtime.load_container(&ctx, &desired.id).await?;
        let record = container.record(&ctx).await?;
        let current = record.current_config()?;

        // maintenance flags are not cleared on failure; the registry's
        // TTL or an explicit recovery call removes them
        for name in current.services.keys() {
            if let Err(e) = self
                .collab
                .register
                .enable_maintenance(&desired.id, name, "update container configuration")
                .await
            {
                warn!("enable maintenance {}-{}: {}", desired.id, name, e);
            }
        }

        let volume_root = self.store.volume_root().await?;
        let plan = changes::plan(&current, &desired, volume_root);

        let task = container.task(&ctx).await?;
        let wait = match task.as_ref() {
            Some(task) => task.wait(&ctx).await?,
            None => runtime::exited(),
        };

        let deps = ChangeDeps {
            runtime: self.runtime.as_ref(),
            register: self.collab.register.as_ref(),
            store: &self.store,
            root: &self.config.root,
        };
        let deps = &deps;
        let plan = &plan;
        let ctx_ref = &ctx;
        let container_ref = container.as_ref();
        let task_ref = task.as_ref();
        pause_and_run(ctx_ref, task_ref, move || async move {
            for change in plan {
                change.apply(ctx_ref, deps, container_ref).await?;
            }
            match task_ref {
                Some(task) => task.kill(ctx_ref, Signal::Term).await,
                None => Ok(()),
            }
        })
        .await?;

        match tokio::time::timeout(UPDATE_EXIT_TIMEOUT, wait).await {
            Ok(_) => Ok(UpdateResponse {}),
            Err(_) => {
                if let Some(task) = task.as_ref() {
                    if let Err(e) = task.kill(&ctx, Signal::Kill).await {
                        warn!("sigkill task {}: {}", desired.id, e);
                    }
                }
                Ok(UpdateResponse {})
            }
        }
    }

    /// Restores the previous config generation under pause and signals
    /// the task so supervision restarts it. A rollback with no prior
    /// generation is a no-op.
    pub async fn rollback(&self, req: RollbackRequest) -> Result<RollbackResponse> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        let _lease = self.runtime.lease(&ctx).await?;
        let container = self.runtime.load_container(&ctx, &req.id).await?;
        let task = container.task(&ctx).await?;
        let ctx_ref = &ctx;
        let container_ref = container.as_ref();
        let task_ref = task.as_ref();
        pause_and_run(ctx_ref, task_ref, move || async move {
            container_ref
                .update(ctx_ref, vec![UpdateOp::RollbackConfig])
                .await?;
            match task_ref {
                Some(task) => task.kill(ctx_ref, Signal::Term).await,
                None => Ok(()),
            }
        })
        .await?;
        Ok(RollbackResponse {})
    }

    pub async fn checkpoint(&self, req: CheckpointRequest) -> Result<CheckpointResponse> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        if req.image_ref.is_empty() {
            return Err(Error::NoRef);
        }
        checkpoint::checkpoint(
            &ctx,
            self.runtime.as_ref(),
            self.collab.units.as_ref(),
            &req.id,
            &req.image_ref,
            req.live,
            req.exit,
        )
        .await?;
        Ok(CheckpointResponse {})
    }

    pub async fn restore(&self, req: RestoreRequest) -> Result<RestoreResponse> {
        let ctx = OpContext::relay();
        if req.image_ref.is_empty() {
            return Err(Error::NoRef);
        }
        restore::restore(
            &ctx,
            self.runtime.as_ref(),
            self.collab.units.as_ref(),
            self.collab.config_store.as_ref(),
            &self.store,
            &self.config.root,
            &self.config.nameservers(),
            &req.image_ref,
            req.live,
        )
        .await?;
        Ok(RestoreResponse {})
    }

    /// End-to-end migration: precondition on the target, checkpoint,
    /// push, remote restore, optional source delete. Not transactional —
    /// a failure between steps leaves intermediate state and retries are
    /// the caller's responsibility. The local checkpoint image is
    /// removed best-effort once the attempt completes.
    pub async fn migrate(&self, req: MigrateRequest) -> Result<MigrateResponse> {
        let ctx = OpContext::relay();
        if req.id.is_empty() {
            return Err(Error::NoId);
        }
        if req.image_ref.is_empty() {
            return Err(Error::NoRef);
        }
        let to = self.collab.remotes.dial(&req.to).await?;
        if to.get(&GetRequest { id: req.id.clone() }).await.is_ok() {
            return Err(Error::ServiceExistsOnTarget(req.id));
        }

        self.checkpoint(CheckpointRequest {
            id: req.id.clone(),
            image_ref: req.image_ref.clone(),
            live: req.live,
            exit: req.stop || req.delete,
        })
        .await?;

        let outcome: Result<()> = async {
            self.push(PushRequest {
                image_ref: req.image_ref.clone(),
                build: false,
            })
            .await?;
            to.restore(&RestoreRequest {
                image_ref: req.image_ref.clone(),
                live: req.live,
            })
            .await?;
            if req.delete {
                self.delete(DeleteRequest { id: req.id.clone() }).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = self.runtime.images().delete(&ctx, &req.image_ref).await {
            warn!("delete migration image {}: {}", req.image_ref, e);
        }
        outcome.map(|_| MigrateResponse {})
    }

    pub async fn push(&self, req: PushRequest) -> Result<()> {
        if req.image_ref.is_empty() {
            return Err(Error::NoRef);
        }
        let ctx = if req.build {
            OpContext::build()
        } else {
            OpContext::relay()
        };
        let image = self.runtime.images().get(&ctx, &req.image_ref).await?;
        let plain_http = self.store.plain_http_for(&req.image_ref).await?;
        self.runtime
            .push(&ctx, &req.image_ref, &image.target, plain_http)
            .await
    }

    pub async fn push_build(&self, req: PushBuildRequest) -> Result<()> {
        if req.image_ref.is_empty() {
            return Err(Error::NoRef);
        }
        self.push(PushRequest {
            image_ref: req.image_ref,
            build: true,
        })
        .await
    }

    pub async fn nodes(&self, _req: NodesRequest) -> Result<NodesResponse> {
        Ok(NodesResponse {
            nodes: self.directory.nodes().await?,
        })
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.close();
    }
}
