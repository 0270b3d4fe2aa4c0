//! Engine library discovery from well-known paths.
//!
//! The engine library (`liblln.so`, `liblln.dylib` or `lln.dll`) is looked
//! up in the following order:
//!
//! 1. An explicitly configured path
//! 2. `$LLN_ENGINE_LIBRARY`
//! 3. The platform library search path (`LD_LIBRARY_PATH`,
//!    `DYLD_LIBRARY_PATH` or `PATH`)
//! 4. Standard system library directories
//! 5. The dynamic loader's own search, by bare file name
//!
//! An explicit path or environment override that does not exist is an
//! error; it never falls through to the later steps.

use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the engine library path.
pub const ENGINE_ENV_VAR: &str = "LLN_ENGINE_LIBRARY";

/// Base name of the engine library.
pub const ENGINE_LIBRARY_NAME: &str = "lln";

#[cfg(target_os = "macos")]
const SEARCH_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(windows)]
const SEARCH_PATH_VAR: &str = "PATH";
#[cfg(not(any(target_os = "macos", windows)))]
const SEARCH_PATH_VAR: &str = "LD_LIBRARY_PATH";

const SYSTEM_LIBRARY_DIRS: [&str; 4] = [
    "/usr/local/lib",
    "/usr/lib",
    "/usr/local/lib64",
    "/usr/lib64",
];

/// How to find the engine. Deserializes from the `[engine]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLocator {
    /// Explicit path to the engine library.
    pub library: Option<PathBuf>,

    /// Fall back to the dynamic loader's search when no file is found.
    pub loader_fallback: bool,
}

impl Default for EngineLocator {
    fn default() -> Self {
        Self {
            library: None,
            loader_fallback: true,
        }
    }
}

impl EngineLocator {
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Where the engine will be loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLocation {
    /// A concrete file that exists.
    Path(PathBuf),

    /// A bare library name left to the dynamic loader.
    LoaderSearch(OsString),
}

impl EngineLocation {
    /// Name or path handed to the loader.
    pub fn as_os_str(&self) -> &std::ffi::OsStr {
        match self {
            EngineLocation::Path(path) => path.as_os_str(),
            EngineLocation::LoaderSearch(name) => name.as_os_str(),
        }
    }
}

impl fmt::Display for EngineLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineLocation::Path(path) => write!(f, "{}", path.display()),
            EngineLocation::LoaderSearch(name) => {
                write!(f, "{} (loader search)", name.to_string_lossy())
            }
        }
    }
}

/// Platform file name of the engine library.
pub fn engine_library_filename() -> OsString {
    libloading::library_filename(ENGINE_LIBRARY_NAME)
}

/// Standard system library directories that exist on this machine.
pub fn system_library_dirs() -> Vec<PathBuf> {
    SYSTEM_LIBRARY_DIRS
        .iter()
        .map(PathBuf::from)
        .filter(|dir| dir.is_dir())
        .collect()
}

/// Locate the engine using the process environment.
pub fn discover_engine(locator: &EngineLocator) -> Result<EngineLocation, DiscoveryError> {
    discover_with(locator, |var| std::env::var_os(var), &system_library_dirs())
}

/// Locate the engine with an injected environment lookup and system
/// directory list.
pub fn discover_with<F>(
    locator: &EngineLocator,
    env: F,
    system_dirs: &[PathBuf],
) -> Result<EngineLocation, DiscoveryError>
where
    F: Fn(&str) -> Option<OsString>,
{
    let file_name = engine_library_filename();

    if let Some(path) = &locator.library {
        return existing(path, &file_name);
    }

    if let Some(value) = env(ENGINE_ENV_VAR).filter(|v| !v.is_empty()) {
        debug!("Using {} override: {:?}", ENGINE_ENV_VAR, value);
        return existing(Path::new(&value), &file_name);
    }

    let mut searched = Vec::new();

    if let Some(paths) = env(SEARCH_PATH_VAR) {
        for dir in std::env::split_paths(&paths) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            if let Some(found) = probe(&dir, &file_name, &mut searched) {
                return Ok(found);
            }
        }
    }

    for dir in system_dirs {
        if let Some(found) = probe(dir, &file_name, &mut searched) {
            return Ok(found);
        }
    }

    if locator.loader_fallback {
        debug!(
            "Engine library not found in {} locations, deferring to the loader",
            searched.len()
        );
        return Ok(EngineLocation::LoaderSearch(file_name));
    }

    Err(DiscoveryError::NotFound {
        name: file_name.to_string_lossy().into_owned(),
        searched,
    })
}

fn existing(path: &Path, file_name: &OsString) -> Result<EngineLocation, DiscoveryError> {
    // A directory is searched for the platform file name.
    let candidate = if path.is_dir() {
        path.join(file_name)
    } else {
        path.to_path_buf()
    };

    if candidate.is_file() {
        info!("Using engine library at {:?}", candidate);
        Ok(EngineLocation::Path(candidate))
    } else {
        Err(DiscoveryError::NotFound {
            name: file_name.to_string_lossy().into_owned(),
            searched: vec![candidate],
        })
    }
}

fn probe(dir: &Path, file_name: &OsString, searched: &mut Vec<PathBuf>) -> Option<EngineLocation> {
    let candidate = dir.join(file_name);
    if candidate.is_file() {
        info!("Discovered engine library at {:?}", candidate);
        return Some(EngineLocation::Path(candidate));
    }
    searched.push(candidate);
    None
}
