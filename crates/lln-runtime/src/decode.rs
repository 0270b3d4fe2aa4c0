//! Decoding of engine-owned memory into owned host values.
//!
//! All functions here are `unsafe`: they follow raw pointers handed out by
//! the engine. Callers guarantee that the structure and everything it points
//! to stays valid for the duration of the call, which is what the
//! [`ScriptEngine`](crate::engine::ScriptEngine) contract provides.

use crate::abi::{RawArg, RawArray, RawCallables, RawCommandRecord, RawLocation};
use crate::error::AbiError;
use crate::location::SourceLocation;
use crate::value::{ArgType, ArgValue};
use std::ffi::CStr;
use std::fmt;
use std::os::raw::{c_char, c_void};
use std::ptr;

/// Longest line copied into a diagnostic.
const MAX_LINE_LEN: usize = 4096;

/// Address of a shim trampoline, used purely as a lookup token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(pub usize);

impl NativeId {
    pub fn from_ptr(ptr: *const c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Everything in a record except its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub name: String,
    pub malformed: bool,
    pub location: SourceLocation,
    pub native_id: NativeId,
}

/// A fully decoded command record.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub header: RecordHeader,
    pub args: Vec<ArgValue>,
}

/// One decoded entry of the callable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableEntry {
    pub index: usize,
    pub name: String,
    pub signature: Vec<ArgType>,
    pub native_id: NativeId,
}

/// Decode name, malformed flag, location and identity of a record.
///
/// Arguments are left alone so that malformed records, which may carry the
/// engine's invalid tag, can still be reported.
///
/// # Safety
///
/// `raw` and the strings it points to must be valid for reads.
pub unsafe fn decode_header(raw: &RawCommandRecord) -> Result<RecordHeader, AbiError> {
    let name = required_str(raw.name, "command record", "name")?;
    let location = decode_location(&raw.loc);
    Ok(RecordHeader {
        name,
        malformed: raw.malformed,
        location,
        native_id: NativeId::from_ptr(raw.fnptr),
    })
}

/// Decode the argument list of a record.
///
/// # Safety
///
/// `raw.args` must describe a valid array of `RawArg`, and every non-null
/// string pointer in it must point to a NUL-terminated string.
pub unsafe fn decode_args(raw: &RawCommandRecord, command: &str) -> Result<Vec<ArgValue>, AbiError> {
    let context = format!("arguments of '{}'", command);
    let items = array_slice(&raw.args, &context)?;
    items
        .iter()
        .enumerate()
        .map(|(index, arg)| decode_arg(arg, index, &context))
        .collect()
}

/// Decode a whole record.
///
/// # Safety
///
/// Same requirements as [`decode_header`] and [`decode_args`].
pub unsafe fn decode_record(raw: &RawCommandRecord) -> Result<CommandRecord, AbiError> {
    let header = decode_header(raw)?;
    let args = decode_args(raw, &header.name)?;
    Ok(CommandRecord { header, args })
}

/// Decode one tagged argument.
///
/// # Safety
///
/// A string argument's pointer must be null or point to a NUL-terminated
/// string.
pub unsafe fn decode_arg(arg: &RawArg, index: usize, context: &str) -> Result<ArgValue, AbiError> {
    let ty = ArgType::from_discriminant(arg.kind.0).ok_or_else(|| AbiError::UnknownDiscriminant {
        context: context.to_string(),
        index,
        value: arg.kind.0,
    })?;

    let value = match ty {
        ArgType::Int => ArgValue::Int(arg.value.i),
        ArgType::Float => ArgValue::Float(arg.value.f),
        ArgType::Str => ArgValue::Str(nullable_str(arg.value.s, context, "string argument")?),
        // Read the byte rather than `bool` so stray values cannot produce an
        // invalid Rust bool.
        ArgType::Bool => {
            let byte = *(ptr::addr_of!(arg.value) as *const u8);
            ArgValue::Bool(byte != 0)
        }
    };
    Ok(value)
}

/// Decode the callable table filled by the shim's registration routine.
///
/// # Safety
///
/// `raw` must describe a valid array of callables whose names are
/// NUL-terminated strings and whose signatures are valid arrays.
pub unsafe fn decode_callables(raw: &RawCallables) -> Result<Vec<CallableEntry>, AbiError> {
    let header = RawArray {
        items: raw.items,
        count: raw.count,
        capacity: raw.capacity,
    };
    let callables = array_slice(&header, "callable table")?;

    let mut entries = Vec::with_capacity(callables.len());
    for (index, callable) in callables.iter().enumerate() {
        let name = required_str(callable.name, "callable table", "name")?;
        let context = format!("signature of '{}'", name);
        let signature = array_slice(&callable.signature, &context)?
            .iter()
            .enumerate()
            .map(|(i, raw_ty)| {
                ArgType::from_discriminant(raw_ty.0).ok_or_else(|| AbiError::UnknownDiscriminant {
                    context: context.clone(),
                    index: i,
                    value: raw_ty.0,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        entries.push(CallableEntry {
            index,
            name,
            signature,
            native_id: NativeId::from_ptr(callable.fnptr),
        });
    }
    Ok(entries)
}

/// Copy an engine location, including the text of the lines it points at.
///
/// # Safety
///
/// Non-null pointers must point to NUL-terminated strings.
pub unsafe fn decode_location(raw: &RawLocation) -> SourceLocation {
    let file = if raw.filename.is_null() {
        "<script>".to_string()
    } else {
        CStr::from_ptr(raw.filename).to_string_lossy().into_owned()
    };
    SourceLocation::new(file, raw.row, raw.col)
        .with_lines(read_line(raw.line_start), read_line(raw.prev_line_start))
}

unsafe fn array_slice<'a, T>(array: &RawArray<T>, context: &str) -> Result<&'a [T], AbiError> {
    if array.count == 0 {
        return Ok(&[]);
    }
    if array.items.is_null() {
        return Err(AbiError::NullPointer {
            context: context.to_string(),
            field: "items",
        });
    }
    if array.count > array.capacity {
        return Err(AbiError::CountExceedsCapacity {
            context: context.to_string(),
            count: array.count,
            capacity: array.capacity,
        });
    }
    Ok(std::slice::from_raw_parts(array.items, array.count))
}

unsafe fn required_str(
    ptr: *const c_char,
    context: &str,
    field: &'static str,
) -> Result<String, AbiError> {
    nullable_str(ptr, context, field)?.ok_or_else(|| AbiError::NullPointer {
        context: context.to_string(),
        field,
    })
}

unsafe fn nullable_str(
    ptr: *const c_char,
    context: &str,
    field: &'static str,
) -> Result<Option<String>, AbiError> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| Some(s.to_owned()))
        .map_err(|_| AbiError::InvalidUtf8 {
            context: context.to_string(),
            field,
        })
}

/// Copy bytes up to the end of the line (or buffer).
unsafe fn read_line(start: *const c_char) -> Option<String> {
    if start.is_null() {
        return None;
    }
    let mut bytes = Vec::new();
    let mut cursor = start as *const u8;
    while bytes.len() < MAX_LINE_LEN {
        let byte = *cursor;
        if byte == 0 || byte == b'\n' {
            break;
        }
        bytes.push(byte);
        cursor = cursor.add(1);
    }
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
