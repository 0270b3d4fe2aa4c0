//! The engine seam and its native implementation.

use crate::abi::{
    LoadFileFn, NextCommandFn, RawCallables, RawCommandRecord, RegisterCommandsFn,
    CALLABLES_SYMBOL, REGISTER_SYMBOL,
};
use crate::discovery::EngineLocation;
use crate::error::{AbiError, BridgeError, BridgeResult, DiscoveryError};
use libloading::Library;
use std::ffi::CString;
use std::os::raw::c_void;
use std::path::Path;
use std::ptr;
use tracing::{debug, info};

const LOAD_FILE_SYMBOL: &[u8] = b"load_file\0";
const NEXT_COMMAND_SYMBOL: &[u8] = b"lexer_next_command\0";
const LEXER_SYMBOL: &[u8] = b"g_l\0";

/// The script engine as seen by the dispatch loop.
///
/// # Safety
///
/// Implementors hand out references into memory the bridge decodes as raw
/// layouts. They must guarantee that:
///
/// - the table returned by `load_artifact` and every record returned by
///   `next_record` match the layouts in [`crate::abi`], including all memory
///   reachable through their pointers;
/// - that memory stays valid until the next `&mut self` call.
pub unsafe trait ScriptEngine {
    /// Load the compiled artifact, run its registration entry point once,
    /// and return the callable table it filled.
    fn load_artifact(&mut self, artifact: &Path) -> BridgeResult<&RawCallables>;

    /// Hand a script to the engine.
    fn load_script(&mut self, script: &Path) -> BridgeResult<()>;

    /// Next command record, or `None` once the engine reports end of input.
    ///
    /// Every parsed statement is returned, including unknown, malformed and
    /// mistyped ones. Validation and diagnostics belong to the dispatch loop.
    fn next_record(&mut self) -> BridgeResult<Option<&RawCommandRecord>>;

    fn teardown(&mut self);
}

/// Unvalidated statement stream over the engine's global lexer.
///
/// `load_file` resets the lexer, after which `lexer_next_command` yields one
/// record per statement, stored inside the lexer and overwritten on the next
/// call. The engine's own `next_comm` is not used: it drops every statement
/// failing its checks and only reports them on stderr.
struct StatementStream {
    next_command: NextCommandFn,
    lexer: *mut c_void,
    last: *mut RawCommandRecord,
    exhausted: bool,
}

impl StatementStream {
    fn new(next_command: NextCommandFn, lexer: *mut c_void) -> Self {
        Self {
            next_command,
            lexer,
            last: ptr::null_mut(),
            exhausted: true,
        }
    }

    /// A script was loaded; the lexer starts from its first statement.
    fn restart(&mut self) {
        self.last = ptr::null_mut();
        self.exhausted = false;
    }

    fn finish(&mut self) {
        self.last = ptr::null_mut();
        self.exhausted = true;
    }

    /// # Safety
    ///
    /// `lexer` must be a lexer `next_command` accepts, and the record it
    /// returns must stay valid until the next call.
    unsafe fn next(&mut self) -> Option<&RawCommandRecord> {
        if self.exhausted {
            return None;
        }
        // The parser sets `malformed` but never clears it, so the flag would
        // leak into every later statement.
        if !self.last.is_null() {
            (*self.last).malformed = false;
        }
        let record = (self.next_command)(self.lexer);
        if record.is_null() {
            self.finish();
            return None;
        }
        self.last = record;
        Some(&*record)
    }
}

/// `liblln` loaded through `libloading`.
pub struct NativeEngine {
    location: EngineLocation,
    load_file: LoadFileFn,
    statements: StatementStream,
    callables: *mut RawCallables,
    script: Option<CString>,
    // Field order is drop order: the artifact goes before the engine.
    artifact: Option<Library>,
    _engine: Library,
}

impl NativeEngine {
    /// Load the engine library and bind its exports.
    pub fn open(location: &EngineLocation) -> Result<Self, DiscoveryError> {
        let path = location.to_string();
        info!("Loading engine library: {}", path);

        // SAFETY: loading runs the library's initializers; the engine has none
        // beyond zeroing its globals.
        let engine = unsafe { Library::new(location.as_os_str()) }.map_err(|e| {
            DiscoveryError::LoadFailed {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;

        // SAFETY: the declared types match the engine's C prototypes. `g_l`
        // is a data symbol, so the symbol value is the lexer's address.
        let (load_file, next_command, lexer) = unsafe {
            let load_file: LoadFileFn = *engine
                .get::<LoadFileFn>(LOAD_FILE_SYMBOL)
                .map_err(|e| missing_symbol(&path, "load_file", e))?;
            let next_command: NextCommandFn = *engine
                .get::<NextCommandFn>(NEXT_COMMAND_SYMBOL)
                .map_err(|e| missing_symbol(&path, "lexer_next_command", e))?;
            let lexer: *mut c_void = *engine
                .get::<*mut c_void>(LEXER_SYMBOL)
                .map_err(|e| missing_symbol(&path, "g_l", e))?;
            (load_file, next_command, lexer)
        };

        Ok(Self {
            location: location.clone(),
            load_file,
            statements: StatementStream::new(next_command, lexer),
            callables: ptr::null_mut(),
            script: None,
            artifact: None,
            _engine: engine,
        })
    }

    pub fn location(&self) -> &EngineLocation {
        &self.location
    }
}

fn missing_symbol(path: &str, symbol: &str, err: libloading::Error) -> DiscoveryError {
    DiscoveryError::MissingSymbol {
        path: path.to_string(),
        symbol: symbol.to_string(),
        reason: err.to_string(),
    }
}

// SAFETY: the table lives in the artifact's data segment and records in the
// engine's lexer state, both owned by libraries this struct keeps loaded.
// The engine reuses its record storage for every statement, which the
// `&mut self` borrow on `next_record` accounts for.
unsafe impl ScriptEngine for NativeEngine {
    fn load_artifact(&mut self, artifact: &Path) -> BridgeResult<&RawCallables> {
        self.teardown();
        let path = artifact.display().to_string();
        debug!("Loading command artifact: {}", path);

        // SAFETY: the artifact is the shim generated and compiled by this
        // bridge; it has no initializers.
        let library = unsafe { Library::new(artifact) }.map_err(|e| DiscoveryError::LoadFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // SAFETY: symbol types match the generated shim's declarations, and
        // the registration routine is idempotent.
        let callables = unsafe {
            let register: RegisterCommandsFn = *library
                .get::<RegisterCommandsFn>(REGISTER_SYMBOL)
                .map_err(|e| missing_symbol(&path, "__lln_preproc_register_commands", e))?;
            let table = library
                .get::<*mut RawCallables>(CALLABLES_SYMBOL)
                .map_err(|e| missing_symbol(&path, "__lln_preproc_callables", e))?;
            register();
            *table
        };

        if callables.is_null() {
            return Err(AbiError::NullPointer {
                context: format!("artifact {}", path),
                field: "__lln_preproc_callables",
            }
            .into());
        }

        self.artifact = Some(library);
        self.callables = callables;
        // SAFETY: non-null and owned by the artifact held in `self`.
        Ok(unsafe { &*self.callables })
    }

    fn load_script(&mut self, script: &Path) -> BridgeResult<()> {
        // The engine aborts the process on unreadable input, so check first.
        std::fs::File::open(script).map_err(|source| BridgeError::ScriptUnreadable {
            path: script.to_path_buf(),
            source,
        })?;

        let c_path = CString::new(script.to_string_lossy().into_owned()).map_err(|_| {
            BridgeError::ScriptUnreadable {
                path: script.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path contains a NUL byte",
                ),
            }
        })?;

        debug!("Loading script: {}", script.display());
        // SAFETY: the engine keeps the filename pointer for locations, so the
        // CString is stored in `self` for the rest of the run.
        unsafe { (self.load_file)(c_path.as_ptr()) };
        self.script = Some(c_path);
        self.statements.restart();
        Ok(())
    }

    fn next_record(&mut self) -> BridgeResult<Option<&RawCommandRecord>> {
        if self.callables.is_null() || self.script.is_none() {
            return Err(AbiError::NullPointer {
                context: "engine state".to_string(),
                field: "callables",
            }
            .into());
        }

        // SAFETY: `g_l` was initialized by `load_file`, and records stay
        // valid until the next statement is requested.
        Ok(unsafe { self.statements.next() })
    }

    fn teardown(&mut self) {
        self.callables = ptr::null_mut();
        self.statements.finish();
        if self.artifact.take().is_some() {
            debug!("Unloaded command artifact");
        }
    }
}
