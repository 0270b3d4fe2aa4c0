//! Error types for the LLN host bridge.
//!
//! Every failure class of the bridge has its own type so that callers can
//! tell a bad declaration apart from a toolchain failure or a version skew
//! with the engine. `BridgeError` wraps them all; nothing in the bridge
//! terminates the process.

use crate::location::SourceLocation;
use crate::value::ArgType;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while declaring a command.
///
/// These are local to the declaring call and never leave the registry in a
/// partially updated state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Name is empty, lacks the `!` marker, or cannot be lexed by the engine.
    #[error("Invalid command name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// A parameter type outside {int, float, str, bool}.
    #[error(
        "Unsupported type '{type_name}' for parameter {index} of '{command}' \
         (supported: int, float, str, bool)"
    )]
    UnsupportedType {
        command: String,
        index: usize,
        type_name: String,
    },
}

/// Errors raised while producing the native artifact.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The compiler executable could not be spawned.
    #[error("Compiler '{program}' could not be started: {source}")]
    CompilerUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The compiler ran and reported failure.
    #[error("Compiler '{program}' failed ({status}):\n{stderr}")]
    CompilerFailed {
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    /// The compiler reported success but left no output behind.
    #[error("Compiler produced no artifact at {0}")]
    MissingOutput(PathBuf),

    /// Filesystem failure inside the build directory.
    #[error("Build directory error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while locating or opening the engine.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The engine library is not on any searched path.
    #[error("Engine library '{name}' not found ({} locations searched)", .searched.len())]
    NotFound { name: String, searched: Vec<PathBuf> },

    /// The dynamic loader rejected the library.
    #[error("Failed to load '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    /// The library is loaded but lacks a required export.
    #[error("Symbol '{symbol}' missing from '{path}': {reason}")]
    MissingSymbol {
        path: String,
        symbol: String,
        reason: String,
    },
}

/// The engine and the bridge disagree about memory layout or content.
///
/// Always fatal: it signals a version skew between the generated shim and
/// the engine, and is never coerced into something that looks valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// An argument or signature tag outside the known enumeration.
    #[error("Unknown type discriminant {value} at position {index} in {context}")]
    UnknownDiscriminant {
        context: String,
        index: usize,
        value: i32,
    },

    /// A pointer the layout requires was null.
    #[error("Null {field} pointer in {context}")]
    NullPointer { context: String, field: &'static str },

    /// An array header whose count is larger than its capacity.
    #[error("Array header in {context} has count {count} > capacity {capacity}")]
    CountExceedsCapacity {
        context: String,
        count: usize,
        capacity: usize,
    },

    /// Bytes that are not UTF-8 where a string is expected.
    #[error("Invalid UTF-8 in {field} of {context}")]
    InvalidUtf8 { context: String, field: &'static str },

    /// The callable table registered by the artifact is not the registry's.
    #[error("Callable table does not match the registry: {0}")]
    TableMismatch(String),
}

/// Kind of a statement-level script error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptErrorKind {
    /// The engine flagged the statement as malformed.
    Malformed,
    /// No registered command matches the statement.
    UnknownCommand,
    /// Wrong number of arguments.
    ArityMismatch { expected: usize, found: usize },
    /// An argument that cannot be coerced to the declared type.
    TypeMismatch {
        index: usize,
        expected: ArgType,
        found: ArgType,
    },
}

/// A statement the bridge refused to dispatch.
///
/// Whether it aborts the run depends on the dispatch policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub command: String,
    pub location: SourceLocation,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind, command: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind,
            command: command.into(),
            location,
        }
    }

    /// Human readable description, without the location prefix.
    pub fn message(&self) -> String {
        let name = &self.command;
        match &self.kind {
            ScriptErrorKind::Malformed => format!("Command '{}' is malformed.", name),
            ScriptErrorKind::UnknownCommand => format!("Command '{}' doesn't exist.", name),
            ScriptErrorKind::ArityMismatch { expected, found } if found < expected => format!(
                "Command '{}' needs {} arguments, only {} were passed.",
                name, expected, found
            ),
            ScriptErrorKind::ArityMismatch { expected, found } => format!(
                "Command '{}' needs {} arguments, but {} were passed.",
                name, expected, found
            ),
            ScriptErrorKind::TypeMismatch {
                index,
                expected,
                found,
            } => format!(
                "Command '{}' expects {} as {} argument, but {} was passed.",
                name,
                expected.label(),
                ordinal(index + 1),
                found.label()
            ),
        }
    }

    /// Message with the source excerpt and caret underneath.
    pub fn render(&self) -> String {
        self.location.render_context(&self.message())
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.message())
    }
}

impl std::error::Error for ScriptError {}

fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Failure raised by user command logic.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Top-level error of the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("ABI mismatch: {0}")]
    AbiMismatch(#[from] AbiError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// A command callback failed; the run was aborted.
    #[error("Command '{command}' failed at {location}: {source}")]
    Callback {
        command: String,
        location: SourceLocation,
        #[source]
        source: CallbackError,
    },

    /// A lifecycle hook failed.
    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: CallbackError,
    },

    /// Lookup of a name that was never registered.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The script cannot be handed to the engine.
    #[error("Script '{path}' cannot be read: {source}")]
    ScriptUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl BridgeError {
    /// Short class name used in logs and summaries.
    pub fn class(&self) -> &'static str {
        match self {
            BridgeError::Registration(_) => "RegistrationError",
            BridgeError::Build(_) => "BuildError",
            BridgeError::Discovery(_) => "DiscoveryError",
            BridgeError::AbiMismatch(_) => "ABIMismatchError",
            BridgeError::Script(_) | BridgeError::ScriptUnreadable { .. } => "ScriptError",
            BridgeError::Callback { .. } | BridgeError::Hook { .. } => "CallbackError",
            BridgeError::UnknownCommand(_) => "UnknownCommand",
            BridgeError::Io(_) | BridgeError::Json(_) | BridgeError::Toml(_) | BridgeError::TomlSer(_) => {
                "IoError"
            }
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
