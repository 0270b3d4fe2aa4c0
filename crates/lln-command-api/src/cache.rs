//! Build cache for the compiled shim.
//!
//! Layout of the build directory:
//!
//! ```text
//! <dir>/lln-host.gen.c             generated shim source
//! <dir>/liblln_host_plugin.<ext>   compiled artifact
//! <dir>/.lln_host_fingerprint      BuildManifest of the artifact
//! ```
//!
//! Every file is written to a temporary file in the same directory and
//! renamed into place. The marker is written last, after a successful
//! compile, so a matching marker always describes the artifact on disk.

use crate::compiler::{CcCompiler, NativeCompiler};
use crate::fingerprint::fingerprint;
use crate::registry::CommandRegistry;
use crate::shim::{self, SHIM_FORMAT_VERSION};
use lln_runtime::{BridgeResult, BuildError, BuildManifest};
use serde::{Deserialize, Serialize};
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const GENERATED_SOURCE: &str = "lln-host.gen.c";
pub const FINGERPRINT_FILE: &str = ".lln_host_fingerprint";
const ARTIFACT_STEM: &str = "lln_host_plugin";

/// Build settings. Deserializes from the `[build]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Build directory, relative to the working directory unless absolute.
    pub dir: PathBuf,

    /// Compiler program; `$CC`, then `cc`, when unset.
    pub compiler: Option<String>,

    /// Extra compiler flags.
    pub flags: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("lln_build"),
            compiler: None,
            flags: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// The compiler program to run.
    pub fn compiler_program(&self) -> String {
        self.compiler
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| std::env::var("CC").ok().filter(|c| !c.trim().is_empty()))
            .unwrap_or_else(|| "cc".to_string())
    }

    pub fn cc_compiler(&self) -> CcCompiler {
        CcCompiler::new(self.compiler_program()).with_flags(self.flags.iter().cloned())
    }

    pub fn layout(&self) -> BuildLayout {
        BuildLayout::new(&self.dir)
    }
}

/// Paths inside a build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    dir: PathBuf,
}

impl BuildLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.join(GENERATED_SOURCE)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", DLL_PREFIX, ARTIFACT_STEM, DLL_EXTENSION))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(FINGERPRINT_FILE)
    }
}

/// True iff the artifact is missing or was built from different content.
pub fn needs_rebuild(fingerprint: &str, last_fingerprint: Option<&str>, artifact_exists: bool) -> bool {
    !artifact_exists || last_fingerprint != Some(fingerprint)
}

/// Whether `ensure` reused the artifact or produced a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Cached,
    Rebuilt,
}

/// A compiled artifact and the fingerprint it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub path: PathBuf,
    pub fingerprint: String,
    pub outcome: BuildOutcome,
}

/// Keeps the artifact in a build directory in sync with a registry.
pub struct BuildCache<C = CcCompiler> {
    layout: BuildLayout,
    compiler: C,
}

impl BuildCache<CcCompiler> {
    pub fn from_options(options: &BuildOptions) -> Self {
        Self::new(options.layout(), options.cc_compiler())
    }
}

impl<C: NativeCompiler> BuildCache<C> {
    pub fn new(layout: BuildLayout, compiler: C) -> Self {
        Self { layout, compiler }
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// The persisted marker, if present and readable.
    pub fn manifest(&self) -> Option<BuildManifest> {
        let path = self.layout.marker_path();
        if !path.exists() {
            return None;
        }
        match BuildManifest::from_file(&path) {
            Ok(manifest) if manifest.is_valid() => Some(manifest),
            Ok(manifest) => {
                warn!(
                    "Ignoring invalid build marker {:?}: {}",
                    path,
                    manifest.validate().join(", ")
                );
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable build marker {:?}: {}", path, e);
                None
            }
        }
    }

    /// Fingerprint of the artifact currently on disk.
    pub fn last_fingerprint(&self) -> Option<String> {
        self.manifest().map(|m| m.fingerprint)
    }

    /// Return an artifact matching `registry`, compiling only when needed.
    ///
    /// A marker written by a different compiler invocation also forces a
    /// rebuild, since the fingerprint only covers the command declarations.
    pub fn ensure(&self, registry: &CommandRegistry) -> BridgeResult<BuildArtifact> {
        let digest = fingerprint(registry)?;
        let artifact = self.layout.artifact_path();
        let manifest = self.manifest();
        let last = manifest.as_ref().map(|m| m.fingerprint.as_str());
        let invocation = self.compiler.invocation();
        let compiler_changed = manifest.as_ref().is_some_and(|m| m.compiler != invocation);

        if !compiler_changed && !needs_rebuild(&digest, last, artifact.is_file()) {
            info!("Artifact up to date ({})", short(&digest));
            return Ok(BuildArtifact {
                path: artifact,
                fingerprint: digest,
                outcome: BuildOutcome::Cached,
            });
        }

        match &manifest {
            Some(previous) if previous.fingerprint != digest => info!(
                "Command signatures changed ({} -> {}), rebuilding",
                short(&previous.fingerprint),
                short(&digest)
            ),
            Some(previous) if compiler_changed => info!(
                "Compiler changed ({:?} -> {:?}), rebuilding",
                previous.compiler, invocation
            ),
            Some(_) => info!("Artifact missing, rebuilding ({})", short(&digest)),
            None => info!("No usable artifact, building ({})", short(&digest)),
        }
        self.rebuild(registry, digest)
    }

    /// Generate, compile and record, regardless of the current marker.
    pub fn rebuild(&self, registry: &CommandRegistry, digest: String) -> BridgeResult<BuildArtifact> {
        let dir = self.layout.dir();
        std::fs::create_dir_all(dir).map_err(|source| BuildError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let source_path = self.layout.source_path();
        write_atomic(dir, &source_path, shim::generate(registry).as_bytes())?;
        debug!("Wrote shim source to {:?}", source_path);

        let artifact = self.layout.artifact_path();
        let staging = tempfile::Builder::new()
            .prefix(".lln_host_plugin")
            .suffix(&format!(".{}", DLL_EXTENSION))
            .tempfile_in(dir)
            .map_err(|source| BuildError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .into_temp_path();

        // On failure the staging path is dropped, removing any partial output.
        self.compiler.compile(&source_path, &staging)?;

        let produced = std::fs::metadata(&staging)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(BuildError::MissingOutput(artifact).into());
        }

        staging.persist(&artifact).map_err(|e| BuildError::Io {
            path: artifact.clone(),
            source: e.error,
        })?;

        let manifest = BuildManifest::new(
            digest.clone(),
            SHIM_FORMAT_VERSION,
            registry.len(),
            self.compiler.invocation(),
        );
        let marker = self.layout.marker_path();
        write_atomic(dir, &marker, manifest.to_toml()?.as_bytes())?;

        info!("Built {:?} ({} commands)", artifact, registry.len());
        Ok(BuildArtifact {
            path: artifact,
            fingerprint: digest,
            outcome: BuildOutcome::Rebuilt,
        })
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Write `contents` to a temporary file in `dir`, then rename it to `path`.
pub fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), BuildError> {
    let io_err = |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = NamedTempFile::new_in(dir).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    file.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
