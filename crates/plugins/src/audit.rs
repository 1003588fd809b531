//! Append-only record of every registration decision.

use std::sync::Mutex;

use {
    serde::Serialize,
    tracing::{info, warn},
    warren_common::{CapabilityKind, time::now_ms},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Admitted,
    Denied,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub plugin_id: String,
    pub kind: CapabilityKind,
    pub key: String,
    pub decision: AuditDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: u64,
}

impl AuditEntry {
    pub fn admitted(plugin_id: &str, kind: CapabilityKind, key: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            kind,
            key: key.to_string(),
            decision: AuditDecision::Admitted,
            reason: None,
            timestamp: now_ms(),
        }
    }

    pub fn denied(
        plugin_id: &str,
        kind: CapabilityKind,
        key: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            kind,
            key: key.to_string(),
            decision: AuditDecision::Denied,
            reason: Some(reason.into()),
            timestamp: now_ms(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: AuditEntry) {
        match entry.decision {
            AuditDecision::Admitted => info!(
                plugin = %entry.plugin_id,
                kind = %entry.kind,
                key = %entry.key,
                "capability admitted"
            ),
            AuditDecision::Denied => warn!(
                plugin = %entry.plugin_id,
                kind = %entry.kind,
                key = %entry.key,
                reason = entry.reason.as_deref().unwrap_or_default(),
                "capability denied"
            ),
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Copy of all entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn for_plugin(&self, plugin_id: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.plugin_id == plugin_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_order_and_serialize_camel_case() {
        let log = AuditLog::new();
        log.record(AuditEntry::admitted("p1", CapabilityKind::Tool, "weather"));
        log.record(AuditEntry::denied(
            "p2",
            CapabilityKind::HttpRoute,
            "GET /x",
            "origin not trusted",
        ));

        let all = log.entries();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "weather");
        assert_eq!(log.for_plugin("p2").len(), 1);

        let json = serde_json::to_value(&all[1]).unwrap_or_default();
        assert_eq!(json["pluginId"], "p2");
        assert_eq!(json["kind"], "http_route");
        assert_eq!(json["decision"], "denied");
        assert!(all[0].reason.is_none());
    }
}
