//! Container option assembly.
//!
//! Builds the create options carried to the runtime — the config
//! extension plus the on-disk files the OCI spec binds in: the
//! per-container `hosts` and `resolv.conf` sources for `cni` networking
//! and the declared config files under `<root>/<id>/configs/`.

use crate::constants::{CONFIGS_DIR, CURRENT_CONFIG, HOSTS_FILE, RESOLV_CONF};
use crate::error::Result;
use crate::model::{ContainerConfig, NetworkMode};
use crate::runtime::{ImageHandle, NewContainerOpts};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bind source of a named config file.
pub fn config_path(root: &Path, id: &str, name: &str) -> PathBuf {
    root.join(id).join(CONFIGS_DIR).join(name)
}

/// Bind source of the container's `/etc/hosts`.
pub fn hosts_path(root: &Path, id: &str) -> PathBuf {
    root.join(id).join(HOSTS_FILE)
}

/// Bind source of the container's `/etc/resolv.conf`.
pub fn resolv_path(root: &Path, id: &str) -> PathBuf {
    root.join(id).join(RESOLV_CONF)
}

/// Assembles create options for a container: writes the network and
/// config bind sources, then packages the config as the `CurrentConfig`
/// extension alongside the spec inputs.
pub fn with_boss_config(
    root: &Path,
    nameservers: &[String],
    volume_root: Option<String>,
    config: &ContainerConfig,
    image: &ImageHandle,
) -> Result<NewContainerOpts> {
    write_network_files(root, nameservers, config)?;
    write_config_files(root, config)?;

    let mut extensions = BTreeMap::new();
    extensions.insert(
        CURRENT_CONFIG.to_string(),
        serde_json::to_value(config)?,
    );

    Ok(NewContainerOpts {
        id: config.id.clone(),
        image: image.name.clone(),
        extensions,
        config: config.clone(),
        volume_root,
        checkpoint: None,
    })
}

/// Writes the `hosts` and `resolv.conf` bind sources for `cni` networking.
/// Other network modes use the host's files and need nothing on disk.
pub fn write_network_files(
    root: &Path,
    nameservers: &[String],
    config: &ContainerConfig,
) -> Result<()> {
    if config.network != NetworkMode::Cni {
        return Ok(());
    }
    let dir = root.join(&config.id);
    std::fs::create_dir_all(&dir)?;

    let mut hosts = String::from("127.0.0.1\tlocalhost\n");
    hosts.push_str(&format!("127.0.0.1\t{}\n", config.id));
    hosts.push_str("::1\tlocalhost ip6-localhost ip6-loopback\n");
    std::fs::write(dir.join(HOSTS_FILE), hosts)?;

    let mut resolv = String::new();
    for ns in nameservers {
        resolv.push_str("nameserver ");
        resolv.push_str(ns);
        resolv.push('\n');
    }
    std::fs::write(dir.join(RESOLV_CONF), resolv)?;
    Ok(())
}

/// Writes every declared config file to its bind source so the mounts
/// reflect the current config generation.
pub fn write_config_files(root: &Path, config: &ContainerConfig) -> Result<()> {
    if config.configs.is_empty() {
        return Ok(());
    }
    let dir = root.join(&config.id).join(CONFIGS_DIR);
    std::fs::create_dir_all(&dir)?;
    for (name, file) in &config.configs {
        std::fs::write(dir.join(name), &file.content)?;
    }
    Ok(())
}
