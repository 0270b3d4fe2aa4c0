//! Build marker persisted next to the compiled artifact.
//!
//! The marker records the fingerprint of the registry content the artifact
//! was generated from. It is written only after a successful compile, so a
//! marker whose fingerprint matches always describes the artifact on disk.

use crate::error::BridgeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Length of a hex-encoded SHA-256 digest.
const FINGERPRINT_HEX_LEN: usize = 64;

/// Contents of the `.lln_host_fingerprint` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Hex SHA-256 over the shim format and every command signature.
    pub fingerprint: String,

    /// Version of the generated shim layout.
    pub shim_format: u32,

    /// Number of commands compiled into the artifact.
    pub command_count: usize,

    /// Compiler program and flags that produced the artifact.
    pub compiler: String,

    /// Completion time of the build.
    pub built_at: DateTime<Utc>,
}

impl BuildManifest {
    pub fn new(
        fingerprint: impl Into<String>,
        shim_format: u32,
        command_count: usize,
        compiler: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            shim_format,
            command_count,
            compiler: compiler.into(),
            built_at: Utc::now(),
        }
    }

    /// Load a marker from a TOML file.
    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a marker from TOML content.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> BridgeResult<Self> {
        let manifest: BuildManifest = toml::from_str(content)?;
        Ok(manifest)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> BridgeResult<String> {
        Ok(toml::to_string(self)?)
    }

    /// Check the marker is well formed. Returns the problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.fingerprint.len() != FINGERPRINT_HEX_LEN
            || !self.fingerprint.bytes().all(|b| b.is_ascii_hexdigit())
        {
            problems.push(format!(
                "fingerprint must be {} hex characters",
                FINGERPRINT_HEX_LEN
            ));
        }

        if self.shim_format == 0 {
            problems.push("shim_format must be positive".to_string());
        }

        if self.compiler.trim().is_empty() {
            problems.push("compiler must not be empty".to_string());
        }

        problems
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}
