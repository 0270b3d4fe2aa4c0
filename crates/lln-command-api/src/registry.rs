//! Command registry.
//!
//! Commands are declared on a [`RegistryBuilder`] at startup and frozen
//! into an immutable [`CommandRegistry`] before the first build or run.
//! Registration order is significant: it fixes the shim layout and the
//! fingerprint.

use crate::command::{
    AsyncCommandHandler, CommandHandler, CommandResult, CommandSpec, Handler, HookFn, ParamDecl,
};
use lln_runtime::{AbiError, BridgeError, BridgeResult, CallableEntry, NativeId, RegistrationError};
use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker every command name starts with.
pub const COMMAND_MARKER: char = '!';

/// Check that `name` can be produced by the engine lexer: the marker
/// followed by one or more ASCII letters, digits or underscores.
pub fn validate_name(name: &str) -> Result<(), RegistrationError> {
    let invalid = |reason| RegistrationError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    let Some(symbol) = name.strip_prefix(COMMAND_MARKER) else {
        return Err(invalid("missing '!' marker"));
    };
    if symbol.is_empty() {
        return Err(invalid("nothing follows the '!' marker"));
    }
    if !symbol.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(invalid("only ASCII letters, digits and '_' may follow the marker"));
    }
    Ok(())
}

/// Collects command declarations.
#[derive(Default)]
pub struct RegistryBuilder {
    commands: Vec<Arc<CommandSpec>>,
    index: HashMap<String, usize>,
    on_start: Option<HookFn>,
    on_finish: Option<HookFn>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a synchronous command.
    ///
    /// The declaring module is taken from the caller's source file.
    /// Re-declaring a name replaces the earlier entry in place.
    #[track_caller]
    pub fn register<P, H>(
        &mut self,
        name: &str,
        params: impl IntoIterator<Item = P>,
        handler: H,
    ) -> Result<&mut Self, RegistrationError>
    where
        P: Into<ParamDecl>,
        H: CommandHandler + 'static,
    {
        let module = Location::caller().file().to_string();
        self.insert(name, params, Handler::Blocking(Arc::new(handler)), module)
    }

    /// Declare a command whose handler is async.
    #[track_caller]
    pub fn register_async<P, H>(
        &mut self,
        name: &str,
        params: impl IntoIterator<Item = P>,
        handler: H,
    ) -> Result<&mut Self, RegistrationError>
    where
        P: Into<ParamDecl>,
        H: AsyncCommandHandler + 'static,
    {
        let module = Location::caller().file().to_string();
        self.insert(name, params, Handler::Async(Arc::new(handler)), module)
    }

    /// Hook run once before the first statement.
    pub fn on_start<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Hook run once after the last statement.
    pub fn on_finish<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Freeze the declarations.
    pub fn build(self) -> CommandRegistry {
        debug!("Command registry built with {} commands", self.commands.len());
        CommandRegistry {
            commands: self.commands,
            index: self.index,
            on_start: self.on_start,
            on_finish: self.on_finish,
        }
    }

    fn insert<P>(
        &mut self,
        name: &str,
        params: impl IntoIterator<Item = P>,
        handler: Handler,
        module: String,
    ) -> Result<&mut Self, RegistrationError>
    where
        P: Into<ParamDecl>,
    {
        validate_name(name)?;

        // Resolve every parameter before touching the registry.
        let params = params
            .into_iter()
            .enumerate()
            .map(|(index, decl)| {
                let decl: ParamDecl = decl.into();
                decl.resolve()
                    .map_err(|type_name| RegistrationError::UnsupportedType {
                        command: name.to_string(),
                        index,
                        type_name,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let spec = Arc::new(CommandSpec {
            name: name.to_string(),
            params,
            handler,
            module,
        });

        match self.index.get(name) {
            Some(&position) => {
                warn!(
                    "Command '{}' re-registered (was declared in {}), replacing it",
                    name, self.commands[position].module
                );
                self.commands[position] = spec;
            }
            None => {
                debug!("Registered command {}", spec.signature());
                self.index.insert(name.to_string(), self.commands.len());
                self.commands.push(spec);
            }
        }
        Ok(self)
    }
}

/// Immutable set of declared commands, in registration order.
pub struct CommandRegistry {
    commands: Vec<Arc<CommandSpec>>,
    index: HashMap<String, usize>,
    on_start: Option<HookFn>,
    on_finish: Option<HookFn>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a command by name.
    pub fn resolve_by_name(&self, name: &str) -> BridgeResult<&Arc<CommandSpec>> {
        self.get(name)
            .ok_or_else(|| BridgeError::UnknownCommand(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CommandSpec>> {
        self.index.get(name).map(|&i| &self.commands[i])
    }

    /// Look up a command by the function pointer the engine carries.
    pub fn resolve_by_native_identity(
        &self,
        map: &IdentityMap,
        id: NativeId,
    ) -> Option<&Arc<CommandSpec>> {
        map.get(id).and_then(|i| self.commands.get(i))
    }

    pub fn commands(&self) -> &[Arc<CommandSpec>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn on_start(&self) -> Option<&HookFn> {
        self.on_start.as_ref()
    }

    pub fn on_finish(&self) -> Option<&HookFn> {
        self.on_finish.as_ref()
    }

    /// Check a decoded callable table against this registry and map each
    /// function pointer to the index of its command.
    ///
    /// Entry `i` must carry the name and signature of command `i`; anything
    /// else means the artifact was built from different declarations.
    pub fn identity_map(&self, entries: &[CallableEntry]) -> Result<IdentityMap, AbiError> {
        if entries.len() != self.commands.len() {
            return Err(AbiError::TableMismatch(format!(
                "artifact registers {} commands, registry has {}",
                entries.len(),
                self.commands.len()
            )));
        }

        let mut by_id: HashMap<NativeId, usize> = HashMap::with_capacity(entries.len());
        let mut shared = Vec::new();

        for (entry, spec) in entries.iter().zip(&self.commands) {
            if entry.name != spec.name || entry.signature != spec.params {
                return Err(AbiError::TableMismatch(format!(
                    "entry {} is '{}' with {} parameters, expected {}",
                    entry.index,
                    entry.name,
                    entry.signature.len(),
                    spec.signature()
                )));
            }
            if entry.native_id.is_null() {
                continue;
            }
            if by_id.insert(entry.native_id, entry.index).is_some() {
                shared.push(entry.native_id);
            }
        }

        for id in shared {
            if by_id.remove(&id).is_some() {
                warn!(
                    "Function pointer {} is shared by several commands; resolving them by name",
                    id
                );
            }
        }

        Ok(IdentityMap { by_id })
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands)
            .field("on_start", &self.on_start.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

/// Function pointer to registry index.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    by_id: HashMap<NativeId, usize>,
}

impl IdentityMap {
    pub fn get(&self, id: NativeId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
