use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// The four kinds of capability a plugin may contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Tool,
    Channel,
    Hook,
    HttpRoute,
}

impl CapabilityKind {
    pub const ALL: &'static [CapabilityKind] =
        &[Self::Tool, Self::Channel, Self::Hook, Self::HttpRoute];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Channel => "channel",
            Self::Hook => "hook",
            Self::HttpRoute => "http_route",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_as_str() {
        for kind in CapabilityKind::ALL {
            assert_eq!(
                serde_json::to_value(kind).ok(),
                Some(serde_json::Value::from(kind.as_str()))
            );
        }
    }
}
