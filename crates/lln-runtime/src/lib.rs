//! # lln-runtime
//!
//! Native side of the LLN host bridge.
//!
//! This crate provides:
//! - Byte-exact mirrors of the engine's in-memory layouts
//! - Decoding of engine command records and callable tables into host values
//! - Engine library discovery from well-known paths
//! - The `ScriptEngine` seam and its `libloading` implementation
//! - The persisted build marker format
//!
//! ## Memory Model
//!
//! Everything the engine hands out is borrowed: a record stays valid only
//! until the next record is requested. Decoding copies the data into owned
//! host values (`CommandRecord`, `SourceLocation`) before the borrow ends.

pub mod abi;
pub mod decode;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod location;
pub mod manifest;
pub mod value;

pub use decode::{CallableEntry, CommandRecord, NativeId, RecordHeader};
pub use discovery::{discover_engine, EngineLocation, EngineLocator};
pub use engine::{NativeEngine, ScriptEngine};
pub use error::{
    AbiError, BridgeError, BridgeResult, BuildError, CallbackError, DiscoveryError,
    RegistrationError, ScriptError, ScriptErrorKind,
};
pub use location::SourceLocation;
pub use manifest::BuildManifest;
pub use value::{ArgType, ArgValue};
