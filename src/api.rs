//! Request and response shapes for the agent RPC surface.

use crate::model::{ContainerConfig, ContainerInfo, Node};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub container: ContainerConfig,
    /// Delegate to `Update` when the id already exists.
    #[serde(default)]
    pub update: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub container: ContainerInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResponse {
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub container: ContainerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub id: String,
    #[serde(rename = "ref")]
    pub image_ref: String,
    /// Include the task's live state (CRIU-style).
    #[serde(default)]
    pub live: bool,
    /// Stop the task and its unit as part of the checkpoint.
    #[serde(default)]
    pub exit: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreRequest {
    #[serde(rename = "ref")]
    pub image_ref: String,
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrateRequest {
    pub id: String,
    /// Peer agent address the container moves to.
    pub to: String,
    #[serde(rename = "ref")]
    pub image_ref: String,
    #[serde(default)]
    pub live: bool,
    /// Stop the source container after checkpointing.
    #[serde(default)]
    pub stop: bool,
    /// Delete the source container after a successful restore.
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrateResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(rename = "ref")]
    pub image_ref: String,
    /// Operate in the namespace reserved for build artifacts.
    #[serde(default)]
    pub build: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushBuildRequest {
    #[serde(rename = "ref")]
    pub image_ref: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodesRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<Node>,
}
