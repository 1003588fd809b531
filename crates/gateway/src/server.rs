use std::{
    net::SocketAddr,
    panic::AssertUnwindSafe,
    path::{Path as FsPath, PathBuf},
    sync::Arc,
};

use {
    axum::{
        Json, Router,
        body::{Body, Bytes},
        extract::{ConnectInfo, Path, Query, Request, State},
        http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
        middleware::{self, Next},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    futures::FutureExt,
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tower::ServiceBuilder,
    tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer},
    tracing::{info, warn},
    uuid::Uuid,
    warren_channels::ChannelReply,
    warren_common::{ErrorKind, hooks::HookEvent, time::now_ms},
    warren_config::WarrenConfig,
    warren_cron::{CronJobCreate, CronJobPatch},
    warren_plugins::PluginRequest,
    warren_security::rate_limit::RateDecision,
};

use crate::{
    error::{ApiError, ApiResult},
    state::GatewayState,
};

/// Caller identity for rate limiting. Falls back to the peer address.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

const MAX_CALLER_ID_LEN: usize = 128;
const DEFAULT_RUNS_LIMIT: usize = 20;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

/// Build the gateway router.
///
/// Shared by [`start_gateway`] and the integration tests. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`: tool invocation
/// keys its rate limit on the peer address.
pub fn build_gateway_app(gateway: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway };

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/plugins", get(list_plugins_handler))
        .route(
            "/api/plugins/{id}",
            axum::routing::delete(unload_plugin_handler),
        )
        .route("/api/audit", get(audit_handler))
        .route("/api/tools", get(list_tools_handler))
        .route("/api/tools/{name}/invoke", post(invoke_tool_handler))
        .route("/api/channels", get(list_channels_handler))
        .route("/api/channels/{id}/send", post(channel_send_handler))
        .route("/api/cron", get(list_cron_handler).post(add_cron_handler))
        .route(
            "/api/cron/{id}",
            axum::routing::delete(remove_cron_handler).patch(update_cron_handler),
        )
        .route("/api/cron/{id}/run", post(run_cron_handler))
        .route("/api/cron/{id}/runs", get(cron_runs_handler))
        .route("/files/{*path}", get(file_handler))
        .fallback(plugin_route_handler);
    with_middleware(router).with_state(app_state)
}

/// Security headers wrap everything, so panics caught below still get them.
fn with_middleware<S: Clone + Send + Sync + 'static>(router: Router<S>) -> Router<S> {
    router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn(security_headers))
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::new()),
    )
}

/// Build state from `config`, bring every subsystem up, and serve until
/// Ctrl-C.
pub async fn start_gateway(config: WarrenConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    let state = GatewayState::builder(config, data_dir).build();
    run_gateway(state).await
}

/// Like [`start_gateway`] with prebuilt state.
pub async fn run_gateway(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let report = state.startup().await?;
    info!(
        plugins = report.plugins.loaded.len(),
        plugin_failures = report.plugins.failed.len(),
        channels = report.channels.started.len(),
        channel_failures = report.channels.failed.len(),
        cron = report.cron_running,
        watcher = report.watching,
        sandbox = %state.sandbox_root().display(),
        "gateway started"
    );

    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            state.shutdown().await;
            return Err(anyhow::anyhow!("failed to bind {addr}: {e}"));
        },
    };
    info!(addr = %listener.local_addr()?, "gateway listening");

    let app = build_gateway_app(Arc::clone(&state));
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    state.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        },
    }
}

/// Headers added to every response. Files may be framed by the UI.
async fn security_headers(req: Request, next: Next) -> Response {
    let frameable = req.uri().path().starts_with("/files/");
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    if !frameable {
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    }
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    response
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid JSON body: {e}")))
}

// ── Health ──────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gw = &state.gateway;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeMs": now_ms().saturating_sub(gw.started_at_ms),
        "plugins": gw.registry.plugins().len(),
        "cron": gw.cron.is_running(),
    }))
}

// ── Plugins ─────────────────────────────────────────────────────────────────

async fn list_plugins_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.registry.plugins())
}

async fn unload_plugin_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let (report, stopped) = state.gateway.unload_plugin(&id).await?;
    Ok(Json(json!({
        "unloaded": report,
        "stoppedChannels": stopped,
    })))
}

#[derive(Deserialize)]
struct AuditQuery {
    plugin: Option<String>,
}

async fn audit_handler(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let audit = state.gateway.registry.audit();
    let entries = match query.plugin {
        Some(id) => audit.for_plugin(&id),
        None => audit.entries(),
    };
    Json(entries)
}

// ── Tools ───────────────────────────────────────────────────────────────────

/// Deny-listed tools are left out; they cannot be invoked anyway.
async fn list_tools_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gw = &state.gateway;
    let tools: Vec<_> = gw
        .registry
        .tools()
        .into_iter()
        .filter(|t| !gw.tool_policy.is_denied(&t.name))
        .collect();
    Json(tools)
}

fn caller_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(CALLER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_CALLER_ID_LEN)
        .map(|id| format!("caller:{id}"))
        .unwrap_or_else(|| format!("ip:{}", peer.ip()))
}

/// Rate limit, then deny-list, then lookup. Every attempt counts against the
/// caller, including denied ones.
async fn invoke_tool_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let gw = &state.gateway;
    let caller = caller_key(&headers, peer);

    if let RateDecision::Denied { retry_after_ms } = gw.rate_limiter.check_at(&caller, now_ms()) {
        warn!(tool = %name, caller = %caller, retry_after_ms, "tool call rate limited");
        return Err(ApiError::rate_limited(retry_after_ms));
    }
    if let Err(e) = gw.tool_policy.check(&name) {
        warn!(tool = %name, caller = %caller, "denied tool call");
        return Err(e.into());
    }
    let tool = gw
        .registry
        .tool(&name)
        .ok_or_else(|| ApiError::not_found(format!("unknown tool: {name}")))?;

    let params: Value = if body.is_empty() {
        json!({})
    } else {
        parse_json(&body)?
    };

    let invocation = Uuid::new_v4().to_string();
    info!(tool = %name, caller = %caller, invocation = %invocation, "invoking tool");
    match AssertUnwindSafe(tool.execute(params)).catch_unwind().await {
        Ok(Ok(result)) => Ok(Json(json!({
            "tool": name,
            "invocation": invocation,
            "result": result,
        }))),
        Ok(Err(e)) => {
            warn!(tool = %name, invocation = %invocation, error = %e, "tool failed");
            Err(ApiError::new(
                ErrorKind::Internal,
                format!("tool {name} failed: {e:#}"),
            ))
        },
        Err(_) => {
            warn!(tool = %name, invocation = %invocation, "tool panicked");
            Err(ApiError::new(
                ErrorKind::Internal,
                format!("tool {name} panicked"),
            ))
        },
    }
}

// ── Channels ────────────────────────────────────────────────────────────────

async fn list_channels_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.channels.status().await)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    chat_id: String,
    text: String,
    #[serde(default)]
    reply_to_id: Option<String>,
}

async fn channel_send_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body: SendBody = parse_json(&body)?;
    let reply = ChannelReply {
        channel_id: id,
        chat_id: body.chat_id,
        text: body.text,
        reply_to_id: body.reply_to_id,
    };
    state.gateway.channels.send(&reply).await?;
    state
        .gateway
        .hooks
        .emit(HookEvent::MessageSent, json!(reply))
        .await;
    Ok(Json(json!({ "ok": true })))
}

// ── Cron ────────────────────────────────────────────────────────────────────

async fn list_cron_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cron = &state.gateway.cron;
    Json(json!({
        "jobs": cron.list().await,
        "status": cron.status().await,
    }))
}

/// System jobs are managed by the gateway and cannot be created here.
async fn add_cron_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut create: CronJobCreate = parse_json(&body)?;
    create.system = false;
    let job = state.gateway.cron.add(create).await?;
    Ok((StatusCode::CREATED, Json(json!(job))))
}

async fn update_cron_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let patch: CronJobPatch = parse_json(&body)?;
    let job = state.gateway.cron.update(&id, patch).await?;
    Ok(Json(json!(job)))
}

async fn remove_cron_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.gateway.cron.remove(&id).await?;
    Ok(Json(json!({ "removed": id })))
}

async fn run_cron_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = state.gateway.cron.run_now(&id).await?;
    Ok(Json(json!(record)))
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn cron_runs_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Value>> {
    let cron = &state.gateway.cron;
    if cron.get(&id).await.is_none() {
        return Err(warren_cron::Error::job_not_found(id).into());
    }
    let runs = cron
        .runs(&id, query.limit.unwrap_or(DEFAULT_RUNS_LIMIT))
        .await?;
    Ok(Json(json!(runs)))
}

// ── Files ───────────────────────────────────────────────────────────────────

async fn file_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let resolved = state.gateway.jail.resolve(&path)?;
    let not_found = || ApiError::not_found("file not found");
    let meta = tokio::fs::metadata(&resolved)
        .await
        .map_err(|_| not_found())?;
    if !meta.is_file() {
        return Err(not_found());
    }
    let bytes = tokio::fs::read(&resolved).await.map_err(|_| not_found())?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&resolved))],
        bytes,
    )
        .into_response())
}

fn content_type_for(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "md" | "txt" | "log" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ── Plugin routes ───────────────────────────────────────────────────────────

/// Everything no gateway route matched. Looked up in the registry on each
/// request so unloaded plugins stop answering immediately.
async fn plugin_route_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let registry = &state.gateway.registry;
    let path = uri.path();
    let Some((owner, handler)) = registry.route(&method, path) else {
        let err = if registry.has_route_path(path) {
            ApiError::not_found(format!("{method} not allowed for {path}"))
                .with_status(StatusCode::METHOD_NOT_ALLOWED)
        } else {
            ApiError::not_found(format!("no route for {method} {path}"))
        };
        return err.into_response();
    };

    let request = PluginRequest {
        method,
        path: path.to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: body.to_vec(),
    };
    match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
        Ok(Ok(out)) => {
            let mut response = Response::new(Body::from(out.body));
            *response.status_mut() = out.status;
            *response.headers_mut() = out.headers;
            response
        },
        Ok(Err(e)) => {
            warn!(plugin = %owner, path = %path, error = %e, "plugin route failed");
            ApiError::new(ErrorKind::Internal, "plugin route failed").into_response()
        },
        Err(_) => {
            warn!(plugin = %owner, path = %path, "plugin route panicked");
            ApiError::new(ErrorKind::Internal, "plugin route failed").into_response()
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_key_prefers_header() {
        let peer: SocketAddr = "10.0.0.7:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(caller_key(&headers, peer), "ip:10.0.0.7");

        headers.insert(CALLER_ID_HEADER, HeaderValue::from_static("  bot-7 "));
        assert_eq!(caller_key(&headers, peer), "caller:bot-7");

        headers.insert(CALLER_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(caller_key(&headers, peer), "ip:10.0.0.7");

        let long = "x".repeat(MAX_CALLER_ID_LEN + 1);
        headers.insert(CALLER_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert_eq!(caller_key(&headers, peer), "ip:10.0.0.7");
    }

    #[test]
    fn content_types() {
        assert_eq!(
            content_type_for(FsPath::new("apps/index.HTML")),
            "text/html; charset=utf-8"
        );
        assert_eq!(content_type_for(FsPath::new("a.png")), "image/png");
        assert_eq!(
            content_type_for(FsPath::new("Makefile")),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn panics_still_carry_security_headers() {
        async fn boom() -> &'static str {
            panic!("handler blew up")
        }

        let router: Router = with_middleware(Router::new().route("/boom", get(boom)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let resp = reqwest::get(format!("http://{addr}/boom")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let headers = resp.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["referrer-policy"], "no-referrer");
    }
}
