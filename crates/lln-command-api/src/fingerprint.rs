//! Content fingerprint of a registry.
//!
//! The digest covers exactly what the generated shim depends on: the shim
//! format and each command's name and parameter types, in registration
//! order. Handlers and declaring modules do not affect it.

use crate::registry::CommandRegistry;
use crate::shim::SHIM_FORMAT_VERSION;
use lln_runtime::{ArgType, BridgeResult};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Serialize)]
struct FingerprintInput<'a> {
    shim_format: u32,
    commands: Vec<CommandSignature<'a>>,
}

#[derive(Serialize)]
struct CommandSignature<'a> {
    name: &'a str,
    params: &'a [ArgType],
}

/// Canonical JSON the fingerprint is computed over.
pub fn canonical_input(registry: &CommandRegistry) -> BridgeResult<Vec<u8>> {
    let input = FingerprintInput {
        shim_format: SHIM_FORMAT_VERSION,
        commands: registry
            .commands()
            .iter()
            .map(|spec| CommandSignature {
                name: &spec.name,
                params: &spec.params,
            })
            .collect(),
    };
    Ok(serde_json::to_vec(&input)?)
}

/// Hex SHA-256 of the registry content.
pub fn fingerprint(registry: &CommandRegistry) -> BridgeResult<String> {
    let input = canonical_input(registry)?;
    Ok(hex::encode(Sha256::digest(&input)))
}
