//! # lln-command-api
//!
//! Host command API for LLN scripts.
//!
//! This crate lets a host program expose Rust functions as script
//! commands. It provides:
//!
//! - A registry of typed command declarations (`!name(int, str)`)
//! - Generation of the native shim the engine loads
//! - A fingerprinted build cache around the native compiler
//! - The dispatch loop that runs the engine and calls back into Rust
//!
//! ## Example
//!
//! ```no_run
//! use lln_command_api::{
//!     Bridge, BuildOptions, CommandArgs, CommandResult, DispatchOptions, RegistryBuilder,
//! };
//! use lln_runtime::{discover_engine, EngineLocator, NativeEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = RegistryBuilder::new();
//! builder.register("!greet", ["str"], |args: &CommandArgs| -> CommandResult {
//!     println!("hello, {}", args.str(0)?.unwrap_or("nobody"));
//!     Ok(())
//! })?;
//!
//! let bridge = Bridge::from_options(
//!     builder.build(),
//!     &BuildOptions::default(),
//!     DispatchOptions::default(),
//! );
//! let mut engine = NativeEngine::open(&discover_engine(&EngineLocator::default())?)?;
//! let report = bridge.run(&mut engine, "hello.lln".as_ref())?;
//! println!("{} commands run", report.invocations);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cache;
pub mod command;
pub mod compiler;
pub mod dispatch;
pub mod fingerprint;
pub mod registry;
pub mod shim;

pub use bridge::Bridge;
pub use cache::{needs_rebuild, BuildArtifact, BuildCache, BuildLayout, BuildOptions, BuildOutcome};
pub use command::{
    AsyncCommandHandler, CommandArgs, CommandHandler, CommandResult, CommandSpec, Handler,
    ParamDecl,
};
pub use compiler::{CcCompiler, NativeCompiler};
pub use dispatch::{
    DispatchOptions, DispatchState, MalformedPolicy, RunReport, UnknownCommandPolicy,
};
pub use fingerprint::fingerprint;
pub use registry::{CommandRegistry, IdentityMap, RegistryBuilder};
pub use shim::{generate, SHIM_FORMAT_VERSION};
