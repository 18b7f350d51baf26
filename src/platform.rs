//! Host platform detection for descriptor stamping.
//!
//! Every descriptor written into a checkpoint image carries the
//! `{os, architecture}` of the host that produced it.

use serde::{Deserialize, Serialize};

/// OCI platform tag attached to checkpoint descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

impl Platform {
    /// Detects the running host's platform.
    pub fn host() -> Self {
        Self {
            os: host_os().to_string(),
            architecture: host_arch().to_string(),
        }
    }
}

/// Operating system in OCI naming.
fn host_os() -> &'static str {
    #[cfg(target_os = "linux")]
    return "linux";

    #[cfg(target_os = "macos")]
    return "darwin";

    #[cfg(target_os = "windows")]
    return "windows";

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "unknown";
}

/// CPU architecture in OCI naming.
fn host_arch() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    return "amd64";

    #[cfg(target_arch = "aarch64")]
    return "arm64";

    #[cfg(target_arch = "arm")]
    return "arm";

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")))]
    return "unknown";
}
