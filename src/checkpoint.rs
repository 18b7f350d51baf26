//! Checkpoint packaging.
//!
//! A checkpoint is an OCI image index. The container-info blob comes
//! first and is the only manifest needed to enumerate the rest; the
//! rw-layer diff and any live task state follow, all stamped with the
//! host platform. The index carries GC ref labels for each child so the
//! content outlives the request lease.
//!
//! Ordering matters: the info blob is written before the pause, the
//! index after the unpause. An interrupted checkpoint leaves orphan
//! blobs but no image; GC reclaims them once the lease expires.

use crate::changes::pause_and_run;
use crate::constants::{
    GC_REF_LABEL_PREFIX, MEDIA_TYPE_CHECKPOINT_CONFIG, MEDIA_TYPE_CONTAINER_INFO,
    MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_LAYER_GZIP,
};
use crate::content::{write_content, ImageIndex};
use crate::error::{Error, Result};
use crate::register::UnitManager;
use crate::runtime::{CheckpointOptions, OpContext, Runtime};
use std::collections::BTreeMap;

/// Checkpoints a container into an image named `image_ref`.
///
/// With `live` the runtime's task checkpoint is included so the process
/// can resume on restore. With `exit` the task is stopped as part of the
/// checkpoint and the service unit is stopped afterwards.
pub async fn checkpoint(
    ctx: &OpContext,
    runtime: &dyn Runtime,
    units: &dyn UnitManager,
    id: &str,
    image_ref: &str,
    live: bool,
    exit: bool,
) -> Result<()> {
    let _lease = runtime.lease(ctx).await?;
    let container = runtime.load_container(ctx, id).await?;
    let record = container.record(ctx).await?;

    let mut index = ImageIndex::new();
    let content = runtime.content();

    // the container record, extensions included, supersedes the
    // runtime's own checkpoint config descriptor
    let info_blob = serde_json::to_vec(&record)?;
    let info_desc = write_content(
        content.as_ref(),
        ctx,
        MEDIA_TYPE_CONTAINER_INFO,
        &format!("{}-container-info", id),
        info_blob,
        BTreeMap::new(),
    )
    .await?
    .with_host_platform();
    index.manifests.push(info_desc);

    let task = container.task(ctx).await?;
    let options = CheckpointOptions {
        exit,
        ..CheckpointOptions::default()
    };

    let snapshot_key = record.snapshot_key.clone();
    let manifests = &mut index.manifests;
    pause_and_run(ctx, task.as_ref(), move || async move {
        let rw = runtime
            .diffs()
            .create(
                ctx,
                &snapshot_key,
                MEDIA_TYPE_LAYER_GZIP,
                &format!("checkpoint-rw-{}", snapshot_key),
            )
            .await?;
        manifests.push(rw.with_host_platform());

        if live {
            for desc in runtime.checkpoint_task(ctx, id, &options).await? {
                if desc.media_type == MEDIA_TYPE_CHECKPOINT_CONFIG {
                    continue;
                }
                manifests.push(desc.with_host_platform());
            }
        }
        Ok(())
    })
    .await?;

    let target = write_index(ctx, runtime, &index, &format!("{}index", id)).await?;
    runtime.images().create(ctx, image_ref, target).await?;

    if exit {
        units
            .stop(ctx, id)
            .await
            .map_err(|e| Error::runtime("stop service", e))?;
    }
    Ok(())
}

/// Marshals an index with GC ref labels pointing at each child digest
/// and writes it into the content store.
async fn write_index(
    ctx: &OpContext,
    runtime: &dyn Runtime,
    index: &ImageIndex,
    reference: &str,
) -> Result<crate::content::Descriptor> {
    let mut labels = BTreeMap::new();
    for (i, manifest) in index.manifests.iter().enumerate() {
        labels.insert(
            format!("{}.{}", GC_REF_LABEL_PREFIX, i),
            manifest.digest.clone(),
        );
    }
    let data = serde_json::to_vec(index)?;
    write_content(
        runtime.content().as_ref(),
        ctx,
        MEDIA_TYPE_IMAGE_INDEX,
        reference,
        data,
        labels,
    )
    .await
}
