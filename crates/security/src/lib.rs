//! Access control primitives shared by every entry point.
//!
//! - [`jail::PathJail`] confines filesystem access to the sandbox root.
//! - [`access`] holds the tool deny-list with its non-overridable floor.
//! - [`rate_limit::RateLimiter`] is the per-caller sliding window with lockout.

pub mod access;
pub mod error;
pub mod jail;
pub mod rate_limit;

pub use {
    access::{BUILTIN_DENIED_TOOLS, ToolPolicy, is_tool_denied},
    error::{Error, Result},
    jail::PathJail,
    rate_limit::RateLimiter,
};
