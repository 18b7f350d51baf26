//! The update change pipeline.
//!
//! An update is expressed as an ordered list of [`Change`] values applied
//! under container pause. The set is closed and small, so changes are a
//! sum type with a single [`Change::apply`] contract rather than a
//! polymorphic interface.
//!
//! Failure semantics: the first failing change aborts the pipeline and
//! already-applied changes are not reversed — `Rollback` is the recovery
//! path. Maintenance flags set before the pipeline ran are likewise left
//! for the registry's own TTL to clear.

use crate::error::Result;
use crate::model::ContainerConfig;
use crate::opts;
use crate::register::ServiceRegistry;
use crate::runtime::{Container, OpContext, Runtime, Task, UpdateOp};
use crate::store::StoreClient;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a change may touch while applying.
pub struct ChangeDeps<'a> {
    pub runtime: &'a dyn Runtime,
    pub register: &'a dyn ServiceRegistry,
    pub store: &'a StoreClient,
    pub root: &'a Path,
}

/// One step of an update, applied in list order.
#[derive(Debug, Clone)]
pub enum Change {
    /// Deregister a service present in the current config but absent
    /// from the desired one.
    Deregister { name: String },
    /// Pull the desired image ref. Idempotent when already local.
    ImageUpdate { image_ref: String },
    /// Install the desired config as `CurrentConfig`, preserving the old
    /// generation as `LastConfig`, and regenerate the runtime spec.
    ConfigSwap {
        config: ContainerConfig,
        volume_root: Option<String>,
    },
    /// Rewrite the declared config files so bind mounts reflect the new
    /// contents.
    FilesRewrite { config: ContainerConfig },
}

impl Change {
    pub async fn apply(
        &self,
        ctx: &OpContext,
        deps: &ChangeDeps<'_>,
        container: &dyn Container,
    ) -> Result<()> {
        match self {
            Change::Deregister { name } => {
                debug!(id = container.id(), service = %name, "deregister removed service");
                deps.register.deregister(container.id(), name).await
            }
            Change::ImageUpdate { image_ref } => {
                let plain_http = deps.store.plain_http_for(image_ref).await?;
                deps.runtime.pull(ctx, image_ref, plain_http).await?;
                Ok(())
            }
            Change::ConfigSwap {
                config,
                volume_root,
            } => {
                container
                    .update(
                        ctx,
                        vec![UpdateOp::ReplaceConfig {
                            config: config.clone(),
                            volume_root: volume_root.clone(),
                        }],
                    )
                    .await
            }
            Change::FilesRewrite { config } => opts::write_config_files(deps.root, config),
        }
    }
}

/// Builds the ordered change list for an update: deregistrations for
/// services dropped by the desired config, then image, config swap, and
/// files rewrite.
pub fn plan(
    current: &ContainerConfig,
    desired: &ContainerConfig,
    volume_root: Option<String>,
) -> Vec<Change> {
    let mut changes = Vec::new();
    for name in current.services.keys() {
        if !desired.services.contains_key(name) {
            changes.push(Change::Deregister { name: name.clone() });
        }
    }
    changes.push(Change::ImageUpdate {
        image_ref: desired.image.clone(),
    });
    changes.push(Change::ConfigSwap {
        config: desired.clone(),
        volume_root,
    });
    changes.push(Change::FilesRewrite {
        config: desired.clone(),
    });
    changes
}

/// Runs `body` with the container paused.
///
/// With no task the body runs unpaused. Resume is attempted on every
/// path; when the body itself signalled the task while paused, the
/// runtime unpauses on task exit and the redundant resume failure is
/// logged and dropped.
pub async fn pause_and_run<F, Fut>(
    ctx: &OpContext,
    task: Option<&Arc<dyn Task>>,
    body: F,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let Some(task) = task else {
        return body().await;
    };
    task.pause(ctx).await?;
    let result = body().await;
    if let Err(e) = task.resume(ctx).await {
        warn!("resume after paused section: {}", e);
    }
    result
}
