//! Command model: declarations, handlers and the arguments they receive.

use async_trait::async_trait;
use lln_runtime::{ArgType, ArgValue, CallbackError, SourceLocation};
use std::fmt;
use std::sync::Arc;

/// Result returned by every command handler and hook.
pub type CommandResult = Result<(), CallbackError>;

/// A synchronous command handler.
///
/// Implemented for every `Fn(&CommandArgs) -> CommandResult` closure, so
/// most commands are registered as plain closures.
pub trait CommandHandler: Send + Sync {
    fn call(&self, args: &CommandArgs) -> CommandResult;
}

impl<F> CommandHandler for F
where
    F: Fn(&CommandArgs) -> CommandResult + Send + Sync,
{
    fn call(&self, args: &CommandArgs) -> CommandResult {
        self(args)
    }
}

/// A command handler that needs to await.
///
/// The dispatch loop drives it to completion before requesting the next
/// statement, so script order is preserved.
#[async_trait]
pub trait AsyncCommandHandler: Send + Sync {
    async fn call(&self, args: &CommandArgs) -> CommandResult;
}

/// Lifecycle hook run before the first or after the last statement.
pub type HookFn = Arc<dyn Fn() -> CommandResult + Send + Sync>;

/// The callback bound to a command.
#[derive(Clone)]
pub enum Handler {
    Blocking(Arc<dyn CommandHandler>),
    Async(Arc<dyn AsyncCommandHandler>),
}

impl Handler {
    pub fn is_async(&self) -> bool {
        matches!(self, Handler::Async(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Blocking(_) => f.write_str("Handler::Blocking"),
            Handler::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// A parameter as written in a declaration: a type, or a type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamDecl {
    Typed(ArgType),
    Named(String),
}

impl ParamDecl {
    /// Resolve to a supported type; the error carries the rejected name.
    pub fn resolve(&self) -> Result<ArgType, String> {
        match self {
            ParamDecl::Typed(ty) => Ok(*ty),
            ParamDecl::Named(name) => name.parse(),
        }
    }
}

impl From<ArgType> for ParamDecl {
    fn from(ty: ArgType) -> Self {
        ParamDecl::Typed(ty)
    }
}

impl From<&str> for ParamDecl {
    fn from(name: &str) -> Self {
        ParamDecl::Named(name.to_string())
    }
}

impl From<String> for ParamDecl {
    fn from(name: String) -> Self {
        ParamDecl::Named(name)
    }
}

/// A registered command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Name including the leading `!`.
    pub name: String,

    /// Declared parameter types, in order.
    pub params: Vec<ArgType>,

    /// Bound callback.
    pub handler: Handler,

    /// Source file of the registration call.
    pub module: String,
}

impl CommandSpec {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// `!name(type, type)`.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.as_str()).collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Decoded, coerced arguments of one statement.
#[derive(Debug, Clone)]
pub struct CommandArgs {
    command: String,
    location: SourceLocation,
    values: Vec<ArgValue>,
}

impl CommandArgs {
    pub fn new(command: impl Into<String>, location: SourceLocation, values: Vec<ArgValue>) -> Self {
        Self {
            command: command.into(),
            location,
            values,
        }
    }

    /// Name of the command being executed.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Where the statement appears in the script.
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn values(&self) -> &[ArgValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn int(&self, index: usize) -> Result<i32, CallbackError> {
        match self.arg(index)? {
            ArgValue::Int(i) => Ok(*i),
            other => Err(self.wrong_type(index, ArgType::Int, other)),
        }
    }

    pub fn float(&self, index: usize) -> Result<f32, CallbackError> {
        match self.arg(index)? {
            ArgValue::Float(f) => Ok(*f),
            other => Err(self.wrong_type(index, ArgType::Float, other)),
        }
    }

    /// String argument; `None` when the engine passed a null string.
    pub fn str(&self, index: usize) -> Result<Option<&str>, CallbackError> {
        match self.arg(index)? {
            ArgValue::Str(s) => Ok(s.as_deref()),
            other => Err(self.wrong_type(index, ArgType::Str, other)),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, CallbackError> {
        match self.arg(index)? {
            ArgValue::Bool(b) => Ok(*b),
            other => Err(self.wrong_type(index, ArgType::Bool, other)),
        }
    }

    fn arg(&self, index: usize) -> Result<&ArgValue, CallbackError> {
        self.values.get(index).ok_or_else(|| {
            CallbackError::new(format!(
                "{} has no argument {} ({} passed)",
                self.command,
                index,
                self.values.len()
            ))
        })
    }

    fn wrong_type(&self, index: usize, expected: ArgType, found: &ArgValue) -> CallbackError {
        CallbackError::new(format!(
            "{} argument {} is {}, not {}",
            self.command,
            index,
            found.arg_type(),
            expected
        ))
    }
}
