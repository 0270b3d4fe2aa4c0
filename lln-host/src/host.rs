//! Wiring of config, builtin commands, build cache and engine.

use crate::commands::{Builtins, Output};
use crate::config::Config;
use anyhow::{Context, Result};
use lln_command_api::{
    Bridge, BuildArtifact, CommandRegistry, DispatchOptions, RegistryBuilder, RunReport,
    UnknownCommandPolicy,
};
use lln_runtime::{discover_engine, EngineLocator, NativeEngine};
use std::path::Path;
use tracing::info;

/// The builtin command set bound to a build directory and an engine locator.
pub struct Host {
    bridge: Bridge,
    builtins: Builtins,
    engine: EngineLocator,
}

impl Host {
    /// Host printing to stdout.
    pub fn new(config: &Config, strict: bool) -> Result<Self> {
        Self::with_builtins(config, strict, Builtins::stdout())
    }

    /// Host whose builtins print to `output`.
    pub fn with_output(config: &Config, strict: bool, output: Output) -> Result<Self> {
        Self::with_builtins(config, strict, Builtins::with_output(output))
    }

    fn with_builtins(config: &Config, strict: bool, builtins: Builtins) -> Result<Self> {
        let mut builder = RegistryBuilder::new();
        builtins
            .register(&mut builder)
            .context("Failed to register builtin commands")?;

        let mut options: DispatchOptions = config.dispatch;
        if strict {
            options.unknown_command = UnknownCommandPolicy::Strict;
        }

        Ok(Self {
            bridge: Bridge::from_options(builder.build(), &config.build, options),
            builtins,
            engine: config.engine.clone(),
        })
    }

    pub fn registry(&self) -> &CommandRegistry {
        self.bridge.registry()
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Sum accumulated by `!printf`.
    pub fn total(&self) -> i64 {
        self.builtins.total()
    }

    pub fn fingerprint(&self) -> Result<String> {
        Ok(self.bridge.fingerprint()?)
    }

    pub fn shim(&self) -> String {
        self.bridge.generate_shim()
    }

    /// Generate and compile the shim unless the cached artifact matches.
    pub fn build(&self) -> Result<BuildArtifact> {
        Ok(self.bridge.prepare()?)
    }

    /// Locate the engine, build if needed and run `script`.
    pub fn run(&self, script: &Path) -> Result<RunReport> {
        let location = discover_engine(&self.engine)?;
        info!("Using engine {}", location);
        let mut engine = NativeEngine::open(&location)?;

        let artifact = self.build()?;
        let report = self
            .bridge
            .run_script(&mut engine, &artifact, script)
            .with_context(|| format!("Failed to run {}", script.display()))?;
        Ok(report)
    }
}
