//! Host-side collaborators: service registry, unit manager, network,
//! and the external config store.
//!
//! Single-node setups without a registry backend plug in the null
//! implementations; everything degrades to local-only behavior.

use crate::error::Result;
use crate::model::{ContainerConfig, ServiceSpec};
use crate::runtime::{Container, OpContext};
use async_trait::async_trait;

// =============================================================================
// Service Registry
// =============================================================================

/// Registry the container's declared services are kept symmetric with:
/// registered while the container is alive, deregistered on delete, and
/// placed in maintenance around disruptive operations.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, id: &str, name: &str, ip: &str, service: &ServiceSpec) -> Result<()>;

    async fn deregister(&self, id: &str, name: &str) -> Result<()>;

    /// Suppresses traffic routing without deregistering.
    async fn enable_maintenance(&self, id: &str, name: &str, reason: &str) -> Result<()>;

    async fn disable_maintenance(&self, id: &str, name: &str) -> Result<()>;
}

/// No-op registry for nodes without a registry backend.
pub struct NullRegistry;

#[async_trait]
impl ServiceRegistry for NullRegistry {
    async fn register(&self, _: &str, _: &str, _: &str, _: &ServiceSpec) -> Result<()> {
        Ok(())
    }

    async fn deregister(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn enable_maintenance(&self, _: &str, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn disable_maintenance(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Unit Manager
// =============================================================================

/// Service-unit manager on the host. One unit per container id;
/// supervision and restart policy live here, not in the agent.
#[async_trait]
pub trait UnitManager: Send + Sync {
    async fn enable(&self, ctx: &OpContext, id: &str) -> Result<()>;
    async fn start(&self, ctx: &OpContext, id: &str) -> Result<()>;
    async fn stop(&self, ctx: &OpContext, id: &str) -> Result<()>;
    async fn disable(&self, ctx: &OpContext, id: &str) -> Result<()>;
}

// =============================================================================
// Network
// =============================================================================

/// Network attachment teardown.
#[async_trait]
pub trait Network: Send + Sync {
    async fn remove(&self, ctx: &OpContext, container: &dyn Container) -> Result<()>;
}

/// No-op network for `none`/`host` modes.
pub struct NullNetwork;

#[async_trait]
impl Network for NullNetwork {
    async fn remove(&self, _: &OpContext, _: &dyn Container) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Config Store
// =============================================================================

/// Mirrors container configs to cluster storage.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn write(&self, ctx: &OpContext, config: &ContainerConfig) -> Result<()>;
}

/// No-op config store for single-node setups.
pub struct NullConfigStore;

#[async_trait]
impl ConfigStore for NullConfigStore {
    async fn write(&self, _: &OpContext, _: &ContainerConfig) -> Result<()> {
        Ok(())
    }
}
