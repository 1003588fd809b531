//! Shared types, error definitions, and utilities used across all warren crates.

pub mod error;
pub mod hooks;
pub mod time;
pub mod types;

pub use {
    error::{Classify, Error, ErrorKind, FromMessage, Result, WarrenError},
    types::CapabilityKind,
};
