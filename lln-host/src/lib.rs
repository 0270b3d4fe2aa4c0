//! lln-host library
//!
//! This module exports the internal components of the host binary for testing purposes.

pub mod commands;
pub mod config;
pub mod host;
