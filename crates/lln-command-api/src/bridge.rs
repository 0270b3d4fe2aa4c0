//! High-level entry point tying the registry, build cache and dispatch loop
//! together.

use crate::cache::{BuildArtifact, BuildCache, BuildOptions};
use crate::compiler::{CcCompiler, NativeCompiler};
use crate::dispatch::{self, DispatchOptions, RunReport};
use crate::fingerprint;
use crate::registry::CommandRegistry;
use crate::shim;
use lln_runtime::{BridgeResult, ScriptEngine};
use std::path::Path;
use tracing::info;

/// A finalized registry plus the means to build and run it.
pub struct Bridge<C = CcCompiler> {
    registry: CommandRegistry,
    cache: BuildCache<C>,
    options: DispatchOptions,
}

impl Bridge<CcCompiler> {
    pub fn from_options(
        registry: CommandRegistry,
        build: &BuildOptions,
        options: DispatchOptions,
    ) -> Self {
        Self::new(registry, BuildCache::from_options(build), options)
    }
}

impl<C: NativeCompiler> Bridge<C> {
    pub fn new(registry: CommandRegistry, cache: BuildCache<C>, options: DispatchOptions) -> Self {
        Self {
            registry,
            cache,
            options,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &BuildCache<C> {
        &self.cache
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub fn fingerprint(&self) -> BridgeResult<String> {
        fingerprint::fingerprint(&self.registry)
    }

    pub fn generate_shim(&self) -> String {
        shim::generate(&self.registry)
    }

    /// Make sure a compiled artifact matching the registry exists.
    pub fn prepare(&self) -> BridgeResult<BuildArtifact> {
        self.cache.ensure(&self.registry)
    }

    /// Run `script` against an already prepared artifact.
    pub fn run_script<E>(
        &self,
        engine: &mut E,
        artifact: &BuildArtifact,
        script: &Path,
    ) -> BridgeResult<RunReport>
    where
        E: ScriptEngine + ?Sized,
    {
        info!("Running {}", script.display());
        dispatch::run(engine, &self.registry, &artifact.path, script, &self.options)
    }

    /// Build if needed, then run `script`.
    pub fn run<E>(&self, engine: &mut E, script: &Path) -> BridgeResult<RunReport>
    where
        E: ScriptEngine + ?Sized,
    {
        let artifact = self.prepare()?;
        self.run_script(engine, &artifact, script)
    }
}
