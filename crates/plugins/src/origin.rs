//! Where a plugin came from and how much it is trusted.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use {
    serde::Serialize,
    sha2::{Digest, Sha256},
    warren_common::CapabilityKind,
    warren_config::TrustConfig,
};

use crate::manifest::PluginManifest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "location", rename_all = "snake_case")]
pub enum PluginOrigin {
    /// Compiled into the binary.
    Bundled,
    Local(PathBuf),
    Remote(String),
}

impl PluginOrigin {
    /// Interpret an `.origin` file or CLI argument.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("https://") || raw.starts_with("http://") {
            Self::Remote(raw.to_string())
        } else {
            Self::Local(PathBuf::from(raw))
        }
    }

    fn matches_trusted(&self, trusted: &str) -> bool {
        match self {
            Self::Bundled => false,
            Self::Local(path) => path.starts_with(trusted),
            Self::Remote(url) => url.starts_with(trusted),
        }
    }
}

impl fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled => f.write_str("bundled"),
            Self::Local(path) => write!(f, "local:{}", path.display()),
            Self::Remote(url) => write!(f, "remote:{url}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum TrustDecision {
    /// Every capability kind may be registered.
    Trusted,
    /// Only the listed kinds may be registered.
    Restricted { capabilities: Vec<CapabilityKind> },
    Denied { reason: String },
}

impl TrustDecision {
    pub fn allows(&self, kind: CapabilityKind) -> bool {
        match self {
            Self::Trusted => true,
            Self::Restricted { capabilities } => capabilities.contains(&kind),
            Self::Denied { .. } => false,
        }
    }
}

/// Hex sha256 of the manifest file bytes.
pub fn manifest_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    trusted_origins: Vec<String>,
    pins: BTreeMap<String, String>,
    untrusted_capabilities: Vec<CapabilityKind>,
}

impl TrustPolicy {
    pub fn from_config(cfg: &TrustConfig) -> Self {
        Self {
            trusted_origins: cfg.trusted_origins.clone(),
            pins: cfg.pins.clone(),
            untrusted_capabilities: cfg.untrusted_capabilities.clone(),
        }
    }

    /// Decide what a plugin may register.
    ///
    /// A configured pin that does not match `digest` denies the plugin
    /// whatever its origin.
    pub fn evaluate(
        &self,
        manifest: &PluginManifest,
        origin: &PluginOrigin,
        digest: &str,
    ) -> TrustDecision {
        if let Some(pin) = self.pins.get(&manifest.id)
            && !pin.eq_ignore_ascii_case(digest)
        {
            return TrustDecision::Denied {
                reason: format!("manifest digest {digest} does not match pinned {pin}"),
            };
        }

        if *origin == PluginOrigin::Bundled
            || self
                .trusted_origins
                .iter()
                .any(|t| origin.matches_trusted(t))
        {
            return TrustDecision::Trusted;
        }

        TrustDecision::Restricted {
            capabilities: self.untrusted_capabilities.clone(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TrustPolicy {
        let mut cfg = TrustConfig::default();
        cfg.trusted_origins = vec![
            "https://plugins.example.com/".into(),
            "/opt/warren/plugins".into(),
        ];
        TrustPolicy::from_config(&cfg)
    }

    #[test]
    fn parse_origin() {
        assert_eq!(
            PluginOrigin::parse(" https://x.dev/p.tgz\n"),
            PluginOrigin::Remote("https://x.dev/p.tgz".into())
        );
        assert_eq!(
            PluginOrigin::parse("/srv/p"),
            PluginOrigin::Local("/srv/p".into())
        );
    }

    #[test]
    fn bundled_and_listed_origins_are_trusted() {
        let m = PluginManifest::new("a");
        let p = policy();
        assert_eq!(p.evaluate(&m, &PluginOrigin::Bundled, "d"), TrustDecision::Trusted);
        assert_eq!(
            p.evaluate(
                &m,
                &PluginOrigin::Remote("https://plugins.example.com/a.tgz".into()),
                "d"
            ),
            TrustDecision::Trusted
        );
        assert_eq!(
            p.evaluate(&m, &PluginOrigin::Local("/opt/warren/plugins/a".into()), "d"),
            TrustDecision::Trusted
        );
    }

    #[test]
    fn path_prefix_is_component_wise() {
        let m = PluginManifest::new("a");
        let decision = policy().evaluate(
            &m,
            &PluginOrigin::Local("/opt/warren/plugins-evil/a".into()),
            "d",
        );
        assert!(matches!(decision, TrustDecision::Restricted { .. }));
    }

    #[test]
    fn unknown_origin_gets_reduced_set() {
        let m = PluginManifest::new("a");
        let decision = policy().evaluate(&m, &PluginOrigin::Remote("https://evil.test/a".into()), "d");
        assert!(decision.allows(CapabilityKind::Tool));
        assert!(decision.allows(CapabilityKind::Hook));
        assert!(!decision.allows(CapabilityKind::Channel));
        assert!(!decision.allows(CapabilityKind::HttpRoute));
    }

    #[test]
    fn pin_mismatch_denies_even_bundled() {
        let mut cfg = TrustConfig::default();
        let digest = manifest_digest(br#"{"id":"a"}"#);
        cfg.pins.insert("a".into(), "0".repeat(64));
        let p = TrustPolicy::from_config(&cfg);
        let decision = p.evaluate(&PluginManifest::new("a"), &PluginOrigin::Bundled, &digest);
        assert!(matches!(decision, TrustDecision::Denied { .. }));
        assert!(!decision.allows(CapabilityKind::Hook));

        cfg.pins.insert("a".into(), digest.to_uppercase());
        let p = TrustPolicy::from_config(&cfg);
        assert_eq!(
            p.evaluate(&PluginManifest::new("a"), &PluginOrigin::Bundled, &digest),
            TrustDecision::Trusted
        );
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = manifest_digest(b"");
        assert_eq!(
            d,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
