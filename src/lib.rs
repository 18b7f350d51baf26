//! # boss
//!
//! **Per-Node Container Orchestration Agent**
//!
//! This crate is the coordination core of a clustered container agent:
//! it manages the full lifecycle of OCI containers on a host and
//! coordinates with peer agents so workloads can be inspected, updated,
//! checkpointed, migrated live between hosts, and rolled back.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Agent RPC Surface                      │
//! │  Create Get List Kill Start Stop Update Rollback                │
//! │  Checkpoint Restore Migrate Push Nodes                          │
//! ├──────────────┬──────────────┬──────────────┬────────────────────┤
//! │ Change       │ Checkpoint   │ Restore      │ Migration          │
//! │ pipeline     │ packager     │ engine       │ orchestrator       │
//! ├──────────────┴──────────────┴──────────────┴────────────────────┤
//! │ Store client (local + master pools)   Peer directory            │
//! │ Embedded replicated store (RESP2)     resolv.conf maintenance   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Injected collaborators: container runtime, unit manager,        │
//! │ service registry, network, config store, peer RPC channels      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Cluster Model
//!
//! One node is elected master through the membership layer's
//! `boss.io/master` label; every other node runs a read-only store
//! replica slaved to it. The agent reads cluster-wide configuration —
//! the volume root and the set of plain-HTTP registries — from its
//! local replica. Peer membership also drives DNS: the node-local
//! `resolv.conf` is regenerated whenever the peer set changes.
//!
//! # Checkpoints
//!
//! A checkpoint is an OCI image index holding the container record, the
//! rw-layer diff, and (for live checkpoints) the task's CRIU state.
//! Migration is checkpoint → push → remote restore, with an optional
//! source delete.
//!
//! # Example
//!
//! ```rust,ignore
//! use boss::{Agent, Collaborators, Config};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> boss::Result<()> {
//!     let config = Config::load(boss::config::CONFIG_PATH)?;
//!     let agent = Agent::start(config, runtime, collaborators, membership).await?;
//!
//!     agent.create(boss::api::CreateRequest {
//!         container: web_config,
//!         update: false,
//!     })
//!     .await?;
//!
//!     let info = agent.get(boss::api::GetRequest { id: "web".into() }).await?;
//!     println!("{} is {}", info.container.id, info.container.status);
//!     Ok(())
//! }
//! ```

// =============================================================================
// Internal Modules
// =============================================================================

mod changes;
mod checkpoint;
mod info;
mod restore;

// =============================================================================
// Public Modules
// =============================================================================

pub mod agent;
pub mod api;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod content;
pub mod error;
pub mod model;
pub mod opts;
pub mod platform;
pub mod register;
pub mod runtime;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{Agent, Collaborators, RemoteAgent, Remotes};
pub use cluster::{Membership, NodeEvent, PeerDirectory};
pub use config::Config;
pub use content::{Descriptor, ImageIndex};
pub use error::{Error, Result};
pub use model::{ContainerConfig, ContainerInfo, Node, Status};
pub use store::{StoreClient, StoreServer};
