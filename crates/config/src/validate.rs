//! Configuration validation.
//!
//! Loads a config file, reports syntax errors and unknown top-level keys, and
//! runs semantic checks that serde alone cannot express.

use std::path::{Path, PathBuf};

use crate::{
    env_subst::substitute_env,
    loader::{find_config_file, parse_config},
    schema::WarrenConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "range", "policy", "timezone".
    pub category: &'static str,
    /// Dotted path, e.g. "rate_limit.window_ms"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

const KNOWN_SECTIONS: &[&str] = &[
    "server",
    "sandbox",
    "plugins",
    "tools",
    "rate_limit",
    "channels",
    "cron",
    "heartbeat",
    "watcher",
];

/// Validate the file at `path`, or the discovered config file.
pub fn validate(path: Option<&Path>, config_dir: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(|| find_config_file(config_dir));

    let Some(actual) = config_path.clone() else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file",
                path: String::new(),
                message: "no config file found, defaults apply".into(),
            }],
            config_path: None,
        };
    };

    let raw = match std::fs::read_to_string(&actual) {
        Ok(raw) => substitute_env(&raw),
        Err(e) => {
            return ValidationResult {
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    category: "file",
                    path: String::new(),
                    message: format!("cannot read {}: {e}", actual.display()),
                }],
                config_path,
            };
        },
    };

    let mut diagnostics = Vec::new();
    if actual.extension().and_then(|e| e.to_str()) == Some("toml") {
        check_unknown_sections(&raw, &mut diagnostics);
    }

    match parse_config(&raw, &actual) {
        Ok(cfg) => diagnostics.extend(validate_config(&cfg)),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "syntax",
            path: String::new(),
            message: e.to_string(),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path,
    }
}

fn check_unknown_sections(raw: &str, out: &mut Vec<Diagnostic>) {
    let Ok(toml::Value::Table(table)) = toml::from_str::<toml::Value>(raw) else {
        return;
    };
    for key in table.keys() {
        if !KNOWN_SECTIONS.contains(&key.as_str()) {
            out.push(Diagnostic {
                severity: Severity::Warning,
                category: "unknown-field",
                path: key.clone(),
                message: format!("unknown section \"{key}\" is ignored"),
            });
        }
    }
}

/// Semantic checks on an already-parsed config.
pub fn validate_config(cfg: &WarrenConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut push = |severity, category, path: &str, message: String| {
        out.push(Diagnostic {
            severity,
            category,
            path: path.to_string(),
            message,
        });
    };

    if cfg.rate_limit.max_attempts == 0 {
        push(
            Severity::Error,
            "range",
            "rate_limit.max_attempts",
            "must be at least 1".into(),
        );
    }
    if cfg.rate_limit.window_ms == 0 {
        push(
            Severity::Error,
            "range",
            "rate_limit.window_ms",
            "must be greater than 0".into(),
        );
    }

    for name in &cfg.tools.allow {
        if cfg.tools.deny.iter().any(|d| d.eq_ignore_ascii_case(name)) {
            push(
                Severity::Warning,
                "policy",
                "tools.allow",
                format!("\"{name}\" is also in tools.deny, the deny entry wins"),
            );
        }
    }

    for (id, channel) in &cfg.channels {
        if channel.allow_from.as_ref().is_some_and(Vec::is_empty) {
            push(
                Severity::Warning,
                "policy",
                &format!("channels.{id}.allow_from"),
                "empty allow-list drops every inbound message".into(),
            );
        }
    }

    for (id, pin) in &cfg.plugins.trust.pins {
        if pin.len() != 64 || !pin.chars().all(|c| c.is_ascii_hexdigit()) {
            push(
                Severity::Error,
                "policy",
                &format!("plugins.trust.pins.{id}"),
                "pin must be a 64-character hex sha256".into(),
            );
        }
    }

    let tz = cfg.heartbeat.active_hours.timezone.as_str();
    if !tz.is_empty() && tz != "local" && tz.parse::<chrono_tz::Tz>().is_err() {
        push(
            Severity::Warning,
            "timezone",
            "heartbeat.active_hours.timezone",
            format!("unknown timezone \"{tz}\", local time will be used"),
        );
    }

    if cfg.heartbeat.enabled && !looks_like_interval(&cfg.heartbeat.every) {
        push(
            Severity::Error,
            "range",
            "heartbeat.every",
            format!("\"{}\" is not an interval like 30m or 1h", cfg.heartbeat.every),
        );
    }

    out
}

fn looks_like_interval(s: &str) -> bool {
    let s = s.trim();
    let digits = s.trim_end_matches(|c: char| matches!(c, 's' | 'm' | 'h' | 'd'));
    !digits.is_empty()
        && digits.len() + 1 >= s.len()
        && digits.chars().all(|c| c.is_ascii_digit())
        && digits.parse::<u64>().is_ok_and(|n| n > 0)
}
