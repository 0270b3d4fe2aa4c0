//! Host-side argument model.
//!
//! `ArgType` mirrors the engine's argument enumeration; its discriminants
//! must stay in the engine's order (`INT`, `FLT`, `STR`, `BOOL`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::raw::c_int;
use std::str::FromStr;

/// Type of a command parameter or argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    Int,
    Float,
    Str,
    Bool,
}

impl ArgType {
    /// All supported types, in discriminant order.
    pub const ALL: [ArgType; 4] = [ArgType::Int, ArgType::Float, ArgType::Str, ArgType::Bool];

    /// Engine discriminant.
    pub const fn discriminant(self) -> c_int {
        match self {
            ArgType::Int => 0,
            ArgType::Float => 1,
            ArgType::Str => 2,
            ArgType::Bool => 3,
        }
    }

    /// Inverse of [`ArgType::discriminant`]; `None` for anything the engine
    /// enumeration does not define (including its `-1` invalid marker).
    pub const fn from_discriminant(raw: c_int) -> Option<Self> {
        match raw {
            0 => Some(ArgType::Int),
            1 => Some(ArgType::Float),
            2 => Some(ArgType::Str),
            3 => Some(ArgType::Bool),
            _ => None,
        }
    }

    /// Enumerator name in the engine headers.
    pub const fn c_tag(self) -> &'static str {
        match self {
            ArgType::Int => "ARG_INT",
            ArgType::Float => "ARG_FLT",
            ArgType::Str => "ARG_STR",
            ArgType::Bool => "ARG_BOOL",
        }
    }

    /// Native primitive a trampoline uses for this parameter.
    pub const fn c_type(self) -> &'static str {
        match self {
            ArgType::Int => "int",
            ArgType::Float => "float",
            ArgType::Str => "const char *",
            ArgType::Bool => "bool",
        }
    }

    /// Union member holding a value of this type.
    pub const fn c_member(self) -> &'static str {
        match self {
            ArgType::Int => "i",
            ArgType::Float => "f",
            ArgType::Str => "s",
            ArgType::Bool => "b",
        }
    }

    /// Short upper-case label used in diagnostics.
    pub const fn label(self) -> &'static str {
        match self {
            ArgType::Int => "INT",
            ArgType::Float => "FLT",
            ArgType::Str => "STR",
            ArgType::Bool => "BOOL",
        }
    }

    /// Canonical lower-case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ArgType::Int => "int",
            ArgType::Float => "float",
            ArgType::Str => "str",
            ArgType::Bool => "bool",
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArgType {
    type Err = String;

    /// Accepts the names command authors write in declarations. The error
    /// carries the rejected name so the registry can report it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "int" | "i32" | "Int" | "Int32" => Ok(ArgType::Int),
            "float" | "f32" | "flt" | "Float" | "Float32" => Ok(ArgType::Float),
            "str" | "string" | "String" | "&str" | "Str" => Ok(ArgType::Str),
            "bool" | "Bool" => Ok(ArgType::Bool),
            other => Err(other.to_string()),
        }
    }
}

/// A decoded argument value.
///
/// Strings are nullable on the engine side; a null pointer decodes to
/// `Str(None)`.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i32),
    Float(f32),
    Str(Option<String>),
    Bool(bool),
}

impl ArgValue {
    pub fn arg_type(&self) -> ArgType {
        match self {
            ArgValue::Int(_) => ArgType::Int,
            ArgValue::Float(_) => ArgType::Float,
            ArgValue::Str(_) => ArgType::Str,
            ArgValue::Bool(_) => ArgType::Bool,
        }
    }

    /// Convert to `target` using the engine's casting rules, or `None` when
    /// the engine would reject the argument.
    ///
    /// - int accepts int and bool
    /// - float accepts float and int
    /// - str accepts only str
    /// - bool accepts bool and int (non-zero is true)
    pub fn coerce(self, target: ArgType) -> Option<ArgValue> {
        match (target, self) {
            (ArgType::Int, v @ ArgValue::Int(_)) => Some(v),
            (ArgType::Int, ArgValue::Bool(b)) => Some(ArgValue::Int(b as i32)),
            (ArgType::Float, v @ ArgValue::Float(_)) => Some(v),
            (ArgType::Float, ArgValue::Int(i)) => Some(ArgValue::Float(i as f32)),
            (ArgType::Str, v @ ArgValue::Str(_)) => Some(v),
            (ArgType::Bool, v @ ArgValue::Bool(_)) => Some(v),
            (ArgType::Bool, ArgValue::Int(i)) => Some(ArgValue::Bool(i != 0)),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(i) => write!(f, "{}", i),
            ArgValue::Float(x) => write!(f, "{}", x),
            ArgValue::Str(Some(s)) => write!(f, "{:?}", s),
            ArgValue::Str(None) => f.write_str("<null>"),
            ArgValue::Bool(b) => write!(f, "{}", b),
        }
    }
}
