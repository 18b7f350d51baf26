//! Peer directory over the cluster membership layer.
//!
//! Membership itself is exogenous: another layer gossips peer identity
//! and labels, and master election is expressed purely through the
//! `boss.io/master` label. This module wraps that layer to locate the
//! master's store and to keep the node-local `resolv.conf` in step with
//! the peer set.

use crate::constants::{DEFAULT_STORE_PORT, MASTER_LABEL, RESOLV_CONF, STORE_PORT_LABEL};
use crate::error::{Error, Result};
use crate::model::Node;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A membership change observed from the gossip layer.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Joined(Node),
    Left(Node),
    Updated(Node),
}

/// The cluster membership layer.
#[async_trait]
pub trait Membership: Send + Sync {
    /// This node's own entry.
    async fn local_node(&self) -> Result<Node>;

    /// All remote members.
    async fn peers(&self) -> Result<Vec<Node>>;

    /// Subscribes to membership events.
    fn subscribe(&self) -> broadcast::Receiver<NodeEvent>;
}

/// Peer enumeration, master discovery, and resolv.conf maintenance.
#[derive(Clone)]
pub struct PeerDirectory {
    node: std::sync::Arc<dyn Membership>,
    root: PathBuf,
}

impl PeerDirectory {
    pub fn new(node: std::sync::Arc<dyn Membership>, root: PathBuf) -> Self {
        Self { node, root }
    }

    /// All members: peers first, then self, in enumeration order.
    pub async fn nodes(&self) -> Result<Vec<Node>> {
        let mut nodes = self.node.peers().await?;
        nodes.push(self.node.local_node().await?);
        Ok(nodes)
    }

    /// Locates the master's store address.
    ///
    /// Picks the first peer whose labels carry the master marker, takes
    /// the host from its gossip address, and joins it with the advertised
    /// store port. Fails with [`Error::NoMaster`] when no peer qualifies.
    pub async fn find_master(&self) -> Result<String> {
        for peer in self.node.peers().await? {
            if !peer.labels.contains_key(MASTER_LABEL) {
                continue;
            }
            let port = peer
                .labels
                .get(STORE_PORT_LABEL)
                .cloned()
                .unwrap_or_else(|| DEFAULT_STORE_PORT.to_string());
            return Ok(format!("{}:{}", peer.host(), port));
        }
        Err(Error::NoMaster)
    }

    /// Rewrites `<root>/resolv.conf` from the current member set:
    /// one `nameserver <host>` line per node, peers then self.
    pub async fn write_resolv_conf(&self) -> Result<()> {
        let nodes = self.nodes().await?;
        let mut out = String::new();
        for node in &nodes {
            out.push_str("nameserver ");
            out.push_str(node.host());
            out.push('\n');
        }
        std::fs::create_dir_all(&self.root)?;
        // single path, truncate-write-close
        std::fs::write(self.root.join(RESOLV_CONF), out)?;
        debug!(nodes = nodes.len(), "resolv.conf regenerated");
        Ok(())
    }

    /// Starts the background task that regenerates resolv.conf on every
    /// membership event. Peers are re-queried per event, so the file
    /// never reflects a stale snapshot.
    pub fn watch(&self) -> JoinHandle<()> {
        let directory = self.clone();
        let mut events = self.node.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) => {
                        if let Err(e) = directory.write_resolv_conf().await {
                            error!("update resolv config: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }
}
