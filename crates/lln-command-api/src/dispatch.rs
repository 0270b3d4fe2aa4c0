//! The dispatch loop.
//!
//! Drives the engine one statement at a time and runs the matching host
//! callback before asking for the next one:
//!
//! ```text
//! Init -> Scanning -> Dispatching -> Scanning
//!                  -> Skipping    -> Scanning
//!                  -> Done
//! any  -> FatalAbort
//! ```
//!
//! The engine is torn down on every exit path.

use crate::command::{CommandArgs, CommandSpec, Handler, HookFn};
use crate::registry::{CommandRegistry, IdentityMap};
use lln_runtime::decode::{decode_args, decode_callables, decode_header};
use lln_runtime::{
    ArgValue, BridgeError, BridgeResult, CallbackError, RecordHeader, ScriptEngine, ScriptError,
    ScriptErrorKind,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

/// What to do with statements naming no registered command, or passing
/// arguments the command cannot take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCommandPolicy {
    /// Report and continue with the next statement.
    #[default]
    Lenient,
    /// Report and abort the run.
    Strict,
}

/// What to do with statements the engine flagged as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    #[default]
    Skip,
    Abort,
}

/// Dispatch settings. Deserializes from the `[dispatch]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    pub unknown_command: UnknownCommandPolicy,
    pub malformed: MalformedPolicy,
}

impl DispatchOptions {
    pub fn strict() -> Self {
        Self {
            unknown_command: UnknownCommandPolicy::Strict,
            ..Self::default()
        }
    }
}

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Init,
    Scanning,
    Dispatching,
    Skipping,
    Done,
    FatalAbort,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Init => "init",
            DispatchState::Scanning => "scanning",
            DispatchState::Dispatching => "dispatching",
            DispatchState::Skipping => "skipping",
            DispatchState::Done => "done",
            DispatchState::FatalAbort => "fatal-abort",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: DispatchState,
    pub invocations: usize,
    pub per_command: BTreeMap<String, usize>,
    pub diagnostics: Vec<ScriptError>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            state: DispatchState::Init,
            invocations: 0,
            per_command: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Number of times `command` ran.
    pub fn count(&self, command: &str) -> usize {
        self.per_command.get(command).copied().unwrap_or(0)
    }

    /// Statements reported and skipped.
    pub fn skipped(&self) -> usize {
        self.diagnostics.len()
    }
}

/// Run `script` through `engine`, dispatching to `registry`.
///
/// `artifact` must be the library compiled from `registry`'s shim. Fatal
/// errors are returned after the engine has been torn down.
///
/// Async handlers run on a private current-thread runtime. When called
/// from inside another runtime they are driven on a scoped helper thread.
pub fn run<E>(
    engine: &mut E,
    registry: &CommandRegistry,
    artifact: &Path,
    script: &Path,
    options: &DispatchOptions,
) -> BridgeResult<RunReport>
where
    E: ScriptEngine + ?Sized,
{
    let (result, report) = {
        let mut dispatch = DispatchLoop {
            engine: &mut *engine,
            registry,
            options: *options,
            identity: IdentityMap::default(),
            runtime: None,
            report: RunReport::new(),
        };

        let result = dispatch.execute(artifact, script);
        if result.is_err() {
            dispatch.transition(DispatchState::FatalAbort);
        }

        let DispatchLoop { runtime, report, .. } = dispatch;
        // Dropping a runtime from async context panics; this never blocks.
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        (result, report)
    };
    engine.teardown();

    match result {
        Ok(()) => {
            info!(
                "Script finished: {} commands run, {} statements skipped",
                report.invocations,
                report.skipped()
            );
            Ok(report)
        }
        Err(e) => {
            error!("Script aborted ({}): {}", e.class(), e);
            Err(e)
        }
    }
}

struct DispatchLoop<'a, E: ?Sized> {
    engine: &'a mut E,
    registry: &'a CommandRegistry,
    options: DispatchOptions,
    identity: IdentityMap,
    runtime: Option<Runtime>,
    report: RunReport,
}

/// A record copied out of engine memory. `args` is `None` for malformed
/// records, whose arguments are not decoded.
struct Statement {
    header: RecordHeader,
    args: Option<Vec<ArgValue>>,
}

impl<'a, E: ScriptEngine + ?Sized> DispatchLoop<'a, E> {
    fn transition(&mut self, next: DispatchState) {
        debug!("Dispatch state: {} -> {}", self.report.state, next);
        self.report.state = next;
    }

    fn execute(&mut self, artifact: &Path, script: &Path) -> BridgeResult<()> {
        self.init(artifact, script)?;

        while let Some(statement) = self.next_statement()? {
            self.handle(statement)?;
        }

        self.transition(DispatchState::Done);
        if let Some(hook) = self.registry.on_finish() {
            run_hook("on_finish", hook)?;
        }
        Ok(())
    }

    fn init(&mut self, artifact: &Path, script: &Path) -> BridgeResult<()> {
        let table = self.engine.load_artifact(artifact)?;
        // SAFETY: the engine guarantees the table layout until the next call.
        let entries = unsafe { decode_callables(table) }?;
        self.identity = self.registry.identity_map(&entries)?;
        debug!(
            "Artifact registered {} commands ({} resolvable by pointer)",
            entries.len(),
            self.identity.len()
        );

        self.engine.load_script(script)?;

        if let Some(hook) = self.registry.on_start() {
            run_hook("on_start", hook)?;
        }
        Ok(())
    }

    fn next_statement(&mut self) -> BridgeResult<Option<Statement>> {
        self.transition(DispatchState::Scanning);

        let Some(raw) = self.engine.next_record()? else {
            return Ok(None);
        };
        // SAFETY: the record stays valid until the next `next_record` call;
        // everything needed is copied before the borrow ends.
        let header = unsafe { decode_header(raw) }?;
        let args = if header.malformed {
            None
        } else {
            Some(unsafe { decode_args(raw, &header.name) }?)
        };
        Ok(Some(Statement { header, args }))
    }

    fn handle(&mut self, statement: Statement) -> BridgeResult<()> {
        let Statement { header, args } = statement;

        let Some(values) = args else {
            let fatal = self.options.malformed == MalformedPolicy::Abort;
            return self.reject(ScriptErrorKind::Malformed, header, fatal);
        };

        let strict = self.options.unknown_command == UnknownCommandPolicy::Strict;
        let Some(spec) = self.resolve(&header) else {
            return self.reject(ScriptErrorKind::UnknownCommand, header, strict);
        };

        let values = match coerce_args(spec, values) {
            Ok(values) => values,
            Err(kind) => return self.reject(kind, header, strict),
        };

        self.transition(DispatchState::Dispatching);
        debug!("Dispatching {} at {}", header.name, header.location);

        let args = CommandArgs::new(header.name.clone(), header.location.clone(), values);
        if let Err(source) = self.invoke(spec, &args) {
            return Err(BridgeError::Callback {
                command: header.name,
                location: header.location,
                source,
            });
        }

        self.report.invocations += 1;
        *self.report.per_command.entry(header.name).or_insert(0) += 1;
        Ok(())
    }

    /// Resolve by function pointer first, falling back to the name when the
    /// pointer is unknown or belongs to a differently named command.
    fn resolve(&self, header: &RecordHeader) -> Option<&'a Arc<CommandSpec>> {
        let registry = self.registry;
        if let Some(spec) = registry.resolve_by_native_identity(&self.identity, header.native_id) {
            if spec.name == header.name {
                return Some(spec);
            }
            warn!(
                "Statement '{}' carries the function pointer of '{}', resolving by name",
                header.name, spec.name
            );
        }
        registry.get(&header.name)
    }

    fn reject(&mut self, kind: ScriptErrorKind, header: RecordHeader, fatal: bool) -> BridgeResult<()> {
        let err = ScriptError::new(kind, header.name, header.location);
        if fatal {
            error!("{}", err.render().trim_end());
            return Err(err.into());
        }
        self.transition(DispatchState::Skipping);
        warn!("{}", err.render().trim_end());
        self.report.diagnostics.push(err);
        Ok(())
    }

    fn invoke(&mut self, spec: &CommandSpec, args: &CommandArgs) -> Result<(), CallbackError> {
        match &spec.handler {
            Handler::Blocking(handler) => {
                catch_unwind(AssertUnwindSafe(|| handler.call(args))).unwrap_or_else(|panic| {
                    Err(CallbackError::new(format!("panicked: {}", panic_message(&*panic))))
                })
            }
            Handler::Async(handler) => {
                let handler = Arc::clone(handler);
                self.block_on(async move { handler.call(args).await })
            }
        }
    }

    fn block_on<F>(&mut self, future: F) -> Result<(), CallbackError>
    where
        F: Future<Output = Result<(), CallbackError>> + Send,
    {
        if self.runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| CallbackError::with_source("failed to start async runtime", e))?;
            self.runtime = Some(runtime);
        }
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(CallbackError::new("async runtime unavailable"));
        };

        let outcome = if tokio::runtime::Handle::try_current().is_ok() {
            // Blocking inside a running runtime is not allowed on its own
            // threads.
            std::thread::scope(|scope| {
                scope
                    .spawn(|| runtime.block_on(future))
                    .join()
                    .map_err(|panic| panic_message(&*panic))
            })
        } else {
            catch_unwind(AssertUnwindSafe(|| runtime.block_on(future)))
                .map_err(|panic| panic_message(&*panic))
        };

        outcome.unwrap_or_else(|message| Err(CallbackError::new(format!("panicked: {}", message))))
    }
}

/// Check arity and apply the engine's coercions.
pub fn coerce_args(spec: &CommandSpec, values: Vec<ArgValue>) -> Result<Vec<ArgValue>, ScriptErrorKind> {
    if values.len() != spec.params.len() {
        return Err(ScriptErrorKind::ArityMismatch {
            expected: spec.params.len(),
            found: values.len(),
        });
    }

    values
        .into_iter()
        .zip(&spec.params)
        .enumerate()
        .map(|(index, (value, &expected))| {
            let found = value.arg_type();
            value
                .coerce(expected)
                .ok_or(ScriptErrorKind::TypeMismatch {
                    index,
                    expected,
                    found,
                })
        })
        .collect()
}

fn run_hook(name: &'static str, hook: &HookFn) -> BridgeResult<()> {
    debug!("Running {} hook", name);
    let result = catch_unwind(AssertUnwindSafe(|| (**hook)())).unwrap_or_else(|panic| {
        Err(CallbackError::new(format!("panicked: {}", panic_message(&*panic))))
    });
    result.map_err(|source| BridgeError::Hook { hook: name, source })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
