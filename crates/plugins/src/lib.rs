//! Plugin kernel: manifest validation, origin trust, static scanning, the
//! capability registry, hook dispatch, and the loader that ties them
//! together.
//!
//! Registration flow for every capability:
//! shape check → trust check → audit entry → registry insert.

pub mod api;
pub mod audit;
pub mod bundled;
pub mod capability;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod manifest;
pub mod origin;
pub mod registry;
pub mod scan;

pub use {
    api::{Admission, PluginApi, PluginLogger},
    audit::{AuditDecision, AuditEntry, AuditLog},
    capability::{Capability, PluginRequest, PluginResponse, RouteHandler, Tool},
    error::{Error, Result},
    hooks::{DispatchOutcome, HookFailure, HookRunner},
    loader::{LoadFailure, LoadReport, Plugin, PluginCatalog, PluginLoader},
    manifest::{FieldViolation, MANIFEST_FILE, ManifestError, PluginManifest, validate_manifest},
    origin::{PluginOrigin, TrustDecision, TrustPolicy},
    registry::{PluginRegistry, PluginSummary, ToolInfo, UnloadReport},
    scan::{ScanFinding, ScanReport, scan_plugin_dir},
};
