//! Restore engine.
//!
//! Decomposes a checkpoint image back into a running container: resolve
//! the index, recover the config from the info blob, pull the base
//! image, recreate the container (attaching the task checkpoint for live
//! restores), apply the rw-layer diff, and hand the unit to the host.
//! Any failure after container creation undoes the creation with
//! snapshot cleanup before the error surfaces.

use crate::constants::{
    MEDIA_TYPE_CONTAINER_INFO, MEDIA_TYPE_LAYER_GZIP, MEDIA_TYPE_TASK_CHECKPOINT,
};
use crate::content::ImageIndex;
use crate::error::Result;
use crate::model::{ContainerConfig, ContainerRecord};
use crate::opts;
use crate::register::{ConfigStore, UnitManager};
use crate::runtime::{Cleanup, Container, OpContext, Runtime};
use crate::store::StoreClient;
use std::path::Path;
use tracing::warn;

/// Restores a container from the checkpoint image at `image_ref`.
#[allow(clippy::too_many_arguments)]
pub async fn restore(
    ctx: &OpContext,
    runtime: &dyn Runtime,
    units: &dyn UnitManager,
    config_store: &dyn ConfigStore,
    store: &StoreClient,
    root: &Path,
    nameservers: &[String],
    image_ref: &str,
    live: bool,
) -> Result<()> {
    // resolve locally, falling back to the registry
    let checkpoint = match runtime.images().get(ctx, image_ref).await {
        Ok(image) => image,
        Err(e) if e.is_not_found() => {
            let plain_http = store.plain_http_for(image_ref).await?;
            runtime.fetch(ctx, image_ref, plain_http).await?
        }
        Err(e) => return Err(e),
    };

    let content = runtime.content();
    let data = content.read(ctx, &checkpoint.target.digest).await?;
    let index: ImageIndex = serde_json::from_slice(&data)?;

    let info_desc = index.descriptor(MEDIA_TYPE_CONTAINER_INFO)?;
    let blob = content.read(ctx, &info_desc.digest).await?;
    let record: ContainerRecord = serde_json::from_slice(&blob)?;
    let config = record.current_config()?;

    let plain_http = store.plain_http_for(&config.image).await?;
    let base = runtime.pull(ctx, &config.image, plain_http).await?;
    let volume_root = store.volume_root().await?;

    let mut create = opts::with_boss_config(root, nameservers, volume_root, &config, &base)?;
    if live {
        create.checkpoint = Some(index.descriptor(MEDIA_TYPE_TASK_CHECKPOINT)?.clone());
    }
    let container = runtime.new_container(ctx, create).await?;

    if let Err(e) = rehydrate(
        ctx,
        runtime,
        units,
        config_store,
        &index,
        &config,
        container.as_ref(),
    )
    .await
    {
        if let Err(cleanup) = container.delete(ctx, Cleanup::Snapshot).await {
            warn!("undo restored container {}: {}", config.id, cleanup);
        }
        return Err(e);
    }
    Ok(())
}

/// Everything after container creation: rw layer, config mirroring, and
/// unit start. Kept separate so the caller can undo creation on failure.
async fn rehydrate(
    ctx: &OpContext,
    runtime: &dyn Runtime,
    units: &dyn UnitManager,
    config_store: &dyn ConfigStore,
    index: &ImageIndex,
    config: &ContainerConfig,
    container: &dyn Container,
) -> Result<()> {
    let record = container.record(ctx).await?;
    let rw = index.descriptor(MEDIA_TYPE_LAYER_GZIP)?;
    let mounts = runtime.snapshots().mounts(ctx, &record.snapshot_key).await?;
    runtime.diffs().apply(ctx, rw, &mounts).await?;

    config_store.write(ctx, config).await?;
    units.enable(ctx, &config.id).await?;
    units.start(ctx, &config.id).await?;
    Ok(())
}
