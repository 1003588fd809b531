//! The four things a plugin can register.

use std::{fmt, sync::Arc};

use {
    async_trait::async_trait,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    serde_json::Value,
    warren_channels::ChannelAdapter,
    warren_common::{CapabilityKind, hooks::HookHandler},
};

use crate::manifest::is_valid_identifier;

/// Path prefixes owned by the gateway itself.
pub const RESERVED_ROUTE_PREFIXES: &[&str] = &["/api", "/health", "/files"];

/// A tool callable by the agent or over HTTP.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the `params` object.
    fn input_schema(&self) -> Value;

    async fn execute(&self, params: Value) -> anyhow::Result<Value>;
}

/// An HTTP request forwarded to a plugin route.
#[derive(Debug, Clone)]
pub struct PluginRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PluginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PluginResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut resp = Self::new(status, body.into().into_bytes());
        resp.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        resp
    }

    pub fn json(status: StatusCode, body: &Value) -> Self {
        let mut resp = Self::new(status, body.to_string().into_bytes());
        resp.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        resp
    }
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, req: PluginRequest) -> anyhow::Result<PluginResponse>;
}

/// A single registration request.
#[derive(Clone)]
pub enum Capability {
    Tool(Arc<dyn Tool>),
    Channel(Arc<dyn ChannelAdapter>),
    Hook {
        event: String,
        handler: Arc<dyn HookHandler>,
    },
    HttpRoute {
        method: Method,
        path: String,
        handler: Arc<dyn RouteHandler>,
    },
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Tool(_) => CapabilityKind::Tool,
            Self::Channel(_) => CapabilityKind::Channel,
            Self::Hook { .. } => CapabilityKind::Hook,
            Self::HttpRoute { .. } => CapabilityKind::HttpRoute,
        }
    }

    /// Registry key within the capability's kind.
    pub fn key(&self) -> String {
        match self {
            Self::Tool(tool) => tool.name().to_string(),
            Self::Channel(adapter) => adapter.id().to_string(),
            Self::Hook { event, handler } => format!("{event}:{}", handler.name()),
            Self::HttpRoute { method, path, .. } => route_key(method, path),
        }
    }

    /// Structural checks that do not depend on registry state.
    pub fn validate_shape(&self) -> Result<(), String> {
        match self {
            Self::Tool(tool) => {
                if !is_valid_identifier(tool.name()) {
                    return Err("tool name must be [A-Za-z0-9._-], at most 64 chars".into());
                }
                if !tool.input_schema().is_object() {
                    return Err("input schema must be a JSON object".into());
                }
                Ok(())
            },
            Self::Channel(adapter) => {
                if !is_valid_identifier(adapter.id()) {
                    return Err("channel id must be [A-Za-z0-9._-], at most 64 chars".into());
                }
                Ok(())
            },
            Self::Hook { event, .. } => {
                let ok = !event.is_empty()
                    && event
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
                if !ok {
                    return Err("event name must be lowercase snake_case".into());
                }
                Ok(())
            },
            Self::HttpRoute { path, .. } => validate_route_path(path),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability::{}({})", self.kind(), self.key())
    }
}

pub fn route_key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

fn validate_route_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err("route path must start with '/'".into());
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err("route path must not end with '/'".into());
    }
    if path
        .split('/')
        .any(|seg| seg == ".." || seg == "." || seg.contains(['?', '#', '\\']))
    {
        return Err("route path contains an invalid segment".into());
    }
    let reserved = RESERVED_ROUTE_PREFIXES
        .iter()
        .any(|p| path == *p || path.starts_with(&format!("{p}/")));
    if reserved {
        return Err(format!("route path {path} is reserved by the gateway"));
    }
    Ok(())
}
