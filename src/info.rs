//! Container info assembly.
//!
//! Gathers the uniform runtime view of one container: decoded config,
//! snapshot chain with usage, bind-mount sizes, task status, and cgroup
//! metrics. A container without a task reports `stopped` with no
//! metrics.

use crate::constants::{CONTAINER_ID_LABEL, PREVIOUS_LABEL};
use crate::error::Result;
use crate::model::{ContainerConfig, ContainerInfo, Snapshot, Status};
use crate::runtime::{Container, OpContext, Runtime, TaskStatus};
use std::path::Path;
use tracing::warn;

/// Assembles the info record for one container.
pub async fn assemble(
    ctx: &OpContext,
    runtime: &dyn Runtime,
    container: &dyn Container,
) -> Result<ContainerInfo> {
    let record = container.record(ctx).await?;
    let config = record.current_config()?;

    let snapshotter = runtime.snapshots();
    let usage = snapshotter.usage(ctx, &record.snapshot_key).await?;

    let mut snapshots = Vec::new();
    for si in snapshotter.walk(ctx).await? {
        if si.labels.get(CONTAINER_ID_LABEL).map(String::as_str) != Some(container.id()) {
            continue;
        }
        let snapshot_usage = snapshotter.usage(ctx, &si.name).await?;
        snapshots.push(Snapshot {
            id: si.name.clone(),
            created: si.created,
            previous: si.labels.get(PREVIOUS_LABEL).cloned(),
            fs_size: snapshot_usage.size,
        });
    }

    let fs_size = usage.size + bind_sizes(&config);

    let task = match container.task(ctx).await? {
        Some(task) => task,
        None => {
            return Ok(ContainerInfo {
                id: container.id().to_string(),
                image: record.image.clone(),
                status: Status::Stopped,
                fs_size,
                config: Some(config),
                snapshots,
                ..ContainerInfo::default()
            });
        }
    };

    let status = task.status(ctx).await?;
    let metrics = task.metrics(ctx).await?;

    Ok(ContainerInfo {
        id: container.id().to_string(),
        image: record.image.clone(),
        status: task_status(status),
        ip: record.ip().map(String::from),
        cpu: metrics.cpu_total,
        memory_usage: metrics.working_set(),
        memory_limit: metrics.memory_limit,
        pid_usage: metrics.pids_current,
        pid_limit: metrics.pids_limit,
        fs_size,
        config: Some(config),
        snapshots,
    })
}

fn task_status(status: TaskStatus) -> Status {
    match status {
        TaskStatus::Created => Status::Created,
        TaskStatus::Running => Status::Running,
        TaskStatus::Paused => Status::Paused,
        TaskStatus::Stopped => Status::Stopped,
    }
}

/// Sums the sizes of all bind-mount sources: files by length,
/// directories by recursive walk. Unreadable entries (dangling
/// symlinks, permission errors) are logged and skipped.
pub fn bind_sizes(config: &ContainerConfig) -> u64 {
    let mut size = 0u64;
    for mount in &config.mounts {
        if mount.kind != "bind" {
            continue;
        }
        let source = Path::new(&mount.source);
        let meta = match std::fs::metadata(source) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("unable to open bind for size {}: {}", mount.source, e);
                continue;
            }
        };
        if meta.is_dir() {
            size += dir_size(source);
        } else {
            size += meta.len();
        }
    }
    size
}

fn dir_size(dir: &Path) -> u64 {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("walk {}: {}", dir.display(), e);
            return 0;
        }
    };
    let mut size = 0u64;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("walk {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        match entry.metadata() {
            Ok(meta) if meta.is_dir() => size += dir_size(&path),
            Ok(meta) if meta.is_file() => size += meta.len(),
            Ok(_) => {}
            Err(e) => warn!("stat {}: {}", path.display(), e),
        }
    }
    size
}
