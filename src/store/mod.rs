//! Replicated key-value store: client pools and the embedded server.
//!
//! The agent reads cluster-wide configuration (volume root, plain-HTTP
//! registries) from its local replica and keeps a second pool pointed at
//! the master for writes. On the master both pools dial the same address.

mod server;

pub use server::StoreServer;

use crate::constants::{PLAIN_REMOTES_KEY, STORE_POOL_SIZE, VOLUME_ROOT_KEY};
use crate::error::{Error, Result};
use redis::aio::MultiplexedConnection;
use std::sync::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

// =============================================================================
// Connection Pool
// =============================================================================

/// A bounded pool of store connections.
///
/// Connections are checked out per call and returned after it; at most
/// [`STORE_POOL_SIZE`] sockets exist at a time. A connection that errors
/// is discarded rather than returned.
pub struct StorePool {
    client: redis::Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
    slots: Semaphore,
    address: String,
}

impl StorePool {
    /// Creates a pool dialing plain TCP to `host:port`.
    pub fn new(address: &str) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{}", address))?;
        Ok(Self {
            client,
            idle: Mutex::new(Vec::new()),
            slots: Semaphore::new(STORE_POOL_SIZE),
            address: address.to_string(),
        })
    }

    /// The `host:port` this pool dials.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Runs one command on a pooled connection.
    pub async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|e| Error::runtime("store pool", e))?;
        let idle = self.idle.lock().ok().and_then(|mut v| v.pop());
        let mut conn = match idle {
            Some(conn) => conn,
            None => {
                debug!(address = %self.address, "dialing store");
                self.client.get_multiplexed_async_connection().await?
            }
        };
        match cmd.query_async(&mut conn).await {
            Ok(value) => {
                if let Ok(mut idle) = self.idle.lock() {
                    idle.push(conn);
                }
                Ok(value)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Store Client
// =============================================================================

/// Typed client over the local and master replicas.
pub struct StoreClient {
    local: StorePool,
    master: StorePool,
}

impl StoreClient {
    /// Builds the two pools. On non-master nodes a single
    /// `SLAVEOF <master-host> <master-port>` is issued through the local
    /// pool before any read traffic; masters use one address for both.
    pub async fn connect(local: &str, master: &str, slave: bool) -> Result<Self> {
        let client = Self {
            local: StorePool::new(local)?,
            master: StorePool::new(master)?,
        };
        if slave {
            let (host, port) = split_host_port(master);
            let mut cmd = redis::cmd("SLAVEOF");
            cmd.arg(host).arg(port);
            let _: String = client.do_local(&cmd).await?;
        }
        Ok(client)
    }

    /// Runs an arbitrary command against the local replica.
    pub async fn do_local<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        self.local.query(cmd).await
    }

    /// Runs an arbitrary command against the master.
    pub async fn do_master<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        self.master.query(cmd).await
    }

    /// The cluster volume root, if configured. A missing key is not an
    /// error; it reads as `None`.
    pub async fn volume_root(&self) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(VOLUME_ROOT_KEY);
        self.do_local(&cmd).await
    }

    /// Whether a registry host must be reached over plain HTTP.
    pub async fn is_plain_remote(&self, registry: &str) -> Result<bool> {
        let mut cmd = redis::cmd("SISMEMBER");
        cmd.arg(PLAIN_REMOTES_KEY).arg(registry);
        self.do_local(&cmd).await
    }

    /// Plain-HTTP opt-in for a full image ref: the registry is the part
    /// before the first `/`.
    pub async fn plain_http_for(&self, image_ref: &str) -> Result<bool> {
        let registry = image_ref.split('/').next().unwrap_or(image_ref);
        self.is_plain_remote(registry).await
    }
}

fn split_host_port(address: &str) -> (&str, &str) {
    match address.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (address, ""),
    }
}
