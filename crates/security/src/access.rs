//! Tool deny-list.
//!
//! A tool is denied if it is on the built-in floor or on the caller's deny
//! list. The allow list never lifts a denial of either kind.

use warren_config::ToolsConfig;

use crate::{Error, Result};

/// Tools that are always denied: agent spawning, scheduled job management,
/// and bulk file synchronisation.
pub const BUILTIN_DENIED_TOOLS: &[&str] = &[
    // agent spawning
    "agent_spawn",
    "agents_spawn",
    "sessions_spawn",
    "subagent_spawn",
    // scheduled job management
    "cron",
    "cron_add",
    "cron_update",
    "cron_remove",
    "cron_run",
    "jobs_manage",
    // bulk sync
    "files_sync",
    "workspace_sync",
    "bulk_sync",
];

fn matches(list: &[String], tool: &str) -> bool {
    list.iter().any(|entry| entry.eq_ignore_ascii_case(tool))
}

pub fn is_builtin_denied(tool: &str) -> bool {
    BUILTIN_DENIED_TOOLS
        .iter()
        .any(|entry| entry.eq_ignore_ascii_case(tool))
}

/// Returns true when `tool` must not be invoked. `_user_allow` is accepted
/// for callers that carry one and does not change the result.
pub fn is_tool_denied(tool: &str, user_deny: &[String], _user_allow: &[String]) -> bool {
    is_builtin_denied(tool) || matches(user_deny, tool)
}

/// Owned form of the deny/allow lists, built once from config.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    deny: Vec<String>,
    allow: Vec<String>,
}

impl ToolPolicy {
    pub fn new(deny: Vec<String>, allow: Vec<String>) -> Self {
        Self { deny, allow }
    }

    pub fn from_config(cfg: &ToolsConfig) -> Self {
        Self::new(cfg.deny.clone(), cfg.allow.clone())
    }

    pub fn is_denied(&self, tool: &str) -> bool {
        is_tool_denied(tool, &self.deny, &self.allow)
    }

    pub fn check(&self, tool: &str) -> Result<()> {
        if self.is_denied(tool) {
            return Err(Error::tool_denied(tool));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builtin_floor_ignores_allow_list() {
        for tool in BUILTIN_DENIED_TOOLS {
            let allow = list(&[*tool]);
            assert!(is_tool_denied(tool, &[], &allow), "{tool} escaped the floor");
        }
    }

    #[rstest]
    #[case("Sessions_Spawn")]
    #[case("CRON_ADD")]
    #[case("Workspace_Sync")]
    fn builtin_match_is_case_insensitive(#[case] tool: &str) {
        assert!(is_tool_denied(tool, &[], &[]));
    }

    #[test]
    fn user_deny_applies() {
        assert!(is_tool_denied("shell", &list(&["shell"]), &[]));
        assert!(!is_tool_denied("web_fetch", &list(&["shell"]), &[]));
    }

    #[test]
    fn user_allow_does_not_lift_user_deny() {
        assert!(is_tool_denied("shell", &list(&["shell"]), &list(&["shell"])));
        assert!(is_tool_denied("SHELL", &list(&["shell"]), &list(&["Shell"])));
        assert!(!is_tool_denied("weather", &list(&["shell"]), &list(&["weather"])));
    }

    #[test]
    fn policy_allow_entries_do_not_lift_denials() {
        let policy = ToolPolicy::new(list(&["shell"]), list(&["shell", "cron"]));
        assert!(policy.check("shell").is_err());
        assert!(policy.check("cron").is_err());
    }

    #[test]
    fn policy_check_reports_tool() {
        let policy = ToolPolicy::new(list(&["shell"]), vec![]);
        let err = policy.check("shell").unwrap_err();
        assert!(err.to_string().contains("shell"));
        assert!(policy.check("weather").is_ok());
        assert!(policy.check("agent_spawn").is_err());
    }
}
