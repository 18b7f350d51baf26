//! OCI descriptors, image indexes, and content writing.
//!
//! Checkpoint images are OCI image indexes whose manifests point at
//! loose content blobs: the container record, the rw-layer diff, and
//! (for live checkpoints) the task state produced by the runtime.
//!
//! Content is addressed by sha256 digest. [`write_content`] computes the
//! digest before handing bytes to the store, so every descriptor the
//! agent emits is verifiable against its blob.

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::runtime::{ContentStore, OpContext};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A content-addressed reference to a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Stamps the descriptor with the running host's platform.
    pub fn with_host_platform(mut self) -> Self {
        self.platform = Some(Platform::host());
        self
    }
}

/// An OCI image index: the envelope of a checkpoint image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ImageIndex {
    /// An empty schema-2 index.
    pub fn new() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(crate::constants::MEDIA_TYPE_IMAGE_INDEX.to_string()),
            manifests: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Returns the first manifest with the given media type.
    ///
    /// Fails with [`Error::MediaTypeNotFound`] when absent.
    pub fn descriptor(&self, media_type: &str) -> Result<&Descriptor> {
        self.manifests
            .iter()
            .find(|d| d.media_type == media_type)
            .ok_or_else(|| Error::MediaTypeNotFound(media_type.to_string()))
    }
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the canonical `sha256:<hex>` digest of a byte slice.
pub fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Writes a blob into the content store and returns its descriptor.
///
/// `reference` names the in-flight write for lease tracking; `labels`
/// are attached to the committed content (GC ref labels on indexes).
pub async fn write_content(
    store: &dyn ContentStore,
    ctx: &OpContext,
    media_type: &str,
    reference: &str,
    data: Vec<u8>,
    labels: BTreeMap<String, String>,
) -> Result<Descriptor> {
    let digest = digest_of(&data);
    let size = data.len() as i64;
    store.put(ctx, reference, &digest, data, labels).await?;
    Ok(Descriptor {
        media_type: media_type.to_string(),
        digest,
        size,
        platform: None,
        annotations: None,
    })
}
