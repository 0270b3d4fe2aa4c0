//! In-memory layouts shared with the engine.
//!
//! Values are read straight out of engine-owned memory, so every type here
//! must match the engine's C declarations byte for byte:
//!
//! ```text
//! typedef enum { ARG_INT, ARG_FLT, ARG_STR, ARG_BOOL, ARG_COUNT } lln_ArgType;
//! typedef union { int i; float f; bool b; char *s; } lln_ArgValue;
//! typedef struct { lln_ArgType type; lln_ArgValue value; } lln_Arg;
//! typedef struct { T *items; size_t count; size_t capacity; } <array>;
//! typedef struct {
//!     const char *filename; size_t row; size_t col;
//!     const char *prev_line_start; const char *line_start;
//! } Loc;
//! typedef struct {
//!     char *name; lln_Args args; bool malformed; Loc loc; lln_CommandFnPtr f;
//! } Comm;
//! typedef struct { const char *name; lln_ArgTypes signature; lln_CommandFnPtr fnptr; } lln_Callable;
//! typedef struct {
//!     lln_Callable *items; size_t count; size_t capacity;
//!     void (*pre)(void); void (*post)(void);
//! } lln_Callables;
//! ```
//!
//! Enum-typed fields are kept as raw `c_int` because the engine may store
//! values outside the Rust enum (its invalid marker is `-1`); turning them
//! into [`ArgType`](crate::value::ArgType) happens in the decoder.
//!
//! Function pointers are kept as `*const c_void`. The bridge never calls
//! them; they only serve as identity tokens.

use std::os::raw::{c_char, c_float, c_int, c_void};
use std::ptr;

/// Export of the compiled shim holding the callable table.
pub const CALLABLES_SYMBOL: &[u8] = b"__lln_preproc_callables\0";

/// Export of the compiled shim filling the callable table.
pub const REGISTER_SYMBOL: &[u8] = b"__lln_preproc_register_commands\0";

/// Growable array header: `{ items, count, capacity }`.
#[repr(C)]
#[derive(Debug)]
pub struct RawArray<T> {
    pub items: *mut T,
    pub count: usize,
    pub capacity: usize,
}

impl<T> RawArray<T> {
    pub const fn empty() -> Self {
        Self {
            items: ptr::null_mut(),
            count: 0,
            capacity: 0,
        }
    }
}

impl<T> Clone for RawArray<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawArray<T> {}

/// `lln_ArgType` as stored by the engine.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawArgType(pub c_int);

/// Marker the engine stores for an argument it could not parse.
pub const RAW_ARG_INVALID: RawArgType = RawArgType(-1);

/// `lln_ArgValue`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawArgValue {
    pub i: c_int,
    pub f: c_float,
    pub b: bool,
    pub s: *mut c_char,
}

impl std::fmt::Debug for RawArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawArgValue { .. }")
    }
}

/// `lln_Arg`: discriminant plus value.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawArg {
    pub kind: RawArgType,
    pub value: RawArgValue,
}

impl RawArg {
    pub fn int(i: c_int) -> Self {
        Self {
            kind: RawArgType(0),
            value: RawArgValue { i },
        }
    }

    pub fn float(f: c_float) -> Self {
        Self {
            kind: RawArgType(1),
            value: RawArgValue { f },
        }
    }

    /// A string argument; `s` may be null.
    pub fn str(s: *mut c_char) -> Self {
        Self {
            kind: RawArgType(2),
            value: RawArgValue { s },
        }
    }

    pub fn bool(b: bool) -> Self {
        // Zero the whole union first so the bytes beyond the bool are defined.
        let mut value = RawArgValue { s: ptr::null_mut() };
        value.b = b;
        Self {
            kind: RawArgType(3),
            value,
        }
    }
}

/// `lln_Args`.
pub type RawArgs = RawArray<RawArg>;

/// `lln_ArgTypes`.
pub type RawArgTypes = RawArray<RawArgType>;

/// `Loc`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawLocation {
    pub filename: *const c_char,
    pub row: usize,
    pub col: usize,
    pub prev_line_start: *const c_char,
    pub line_start: *const c_char,
}

impl Default for RawLocation {
    fn default() -> Self {
        Self {
            filename: ptr::null(),
            row: 0,
            col: 0,
            prev_line_start: ptr::null(),
            line_start: ptr::null(),
        }
    }
}

/// `Comm`: one parsed statement.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawCommandRecord {
    pub name: *mut c_char,
    pub args: RawArgs,
    pub malformed: bool,
    pub loc: RawLocation,
    pub fnptr: *const c_void,
}

/// `lln_Callable`: one (name, signature, function pointer) triple.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawCallable {
    pub name: *const c_char,
    pub signature: RawArgTypes,
    pub fnptr: *const c_void,
}

/// Optional `void (*)(void)` hook.
pub type RawHook = Option<unsafe extern "C" fn()>;

/// `lln_Callables`: the table filled by the shim's registration routine.
#[repr(C)]
#[derive(Debug)]
pub struct RawCallables {
    pub items: *mut RawCallable,
    pub count: usize,
    pub capacity: usize,
    pub pre: RawHook,
    pub post: RawHook,
}

impl RawCallables {
    pub const fn empty() -> Self {
        Self {
            items: ptr::null_mut(),
            count: 0,
            capacity: 0,
            pre: None,
            post: None,
        }
    }
}

/// Engine export `void load_file(const char *filename)`.
pub type LoadFileFn = unsafe extern "C" fn(*const c_char);

/// Engine export `Comm *lexer_next_command(Lexer *l)`.
///
/// Returns the next parsed statement, unvalidated, or null at end of input.
/// The lexer is opaque to the bridge.
pub type NextCommandFn = unsafe extern "C" fn(*mut c_void) -> *mut RawCommandRecord;

/// Shim export `void __lln_preproc_register_commands(void)`.
pub type RegisterCommandsFn = unsafe extern "C" fn();
