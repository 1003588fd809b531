//! Integration tests for the gateway HTTP API, served on a real socket.

use std::{net::SocketAddr, sync::Arc};

use {
    async_trait::async_trait,
    axum::http::{Method, StatusCode},
    serde_json::{Value, json},
    tokio::net::TcpListener,
    warren_channels::LoopbackAdapter,
    warren_config::{ChannelConfig, RateLimitConfig, WarrenConfig},
    warren_cron::InMemoryStore,
    warren_gateway::{GatewayState, build_gateway_app},
    warren_plugins::{
        Plugin, PluginApi, PluginCatalog, PluginManifest, PluginRequest, PluginResponse,
        RouteHandler, Tool, bundled::loopback::LoopbackPlugin,
    },
};

struct EchoTool(&'static str);

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "returns its params"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        if params.get("fail").is_some() {
            anyhow::bail!("asked to fail");
        }
        Ok(params)
    }
}

struct Hello;

#[async_trait]
impl RouteHandler for Hello {
    async fn handle(&self, req: PluginRequest) -> anyhow::Result<PluginResponse> {
        let who = req.query.unwrap_or_else(|| "world".into());
        Ok(PluginResponse::text(StatusCode::OK, format!("hello {who}")))
    }
}

struct Testkit;

impl Plugin for Testkit {
    fn id(&self) -> &str {
        "testkit"
    }

    fn bundled_manifest(&self) -> Option<PluginManifest> {
        Some(PluginManifest::new("testkit"))
    }

    fn register(&self, api: &mut PluginApi<'_>) -> anyhow::Result<()> {
        api.register_tool(Arc::new(EchoTool("echo"))).into_result()?;
        api.register_tool(Arc::new(EchoTool("danger")))
            .into_result()?;
        api.register_http_route(Method::GET, "/hello", Arc::new(Hello))
            .into_result()?;
        Ok(())
    }
}

struct Server {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    loopback: Arc<LoopbackAdapter>,
    dir: tempfile::TempDir,
    client: reqwest::Client,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn delete(&self, path: &str) -> reqwest::Response {
        self.client.delete(self.url(path)).send().await.unwrap()
    }
}

async fn start_server_with(tweak: impl FnOnce(&mut WarrenConfig)) -> Server {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WarrenConfig::default();
    config.sandbox.root = Some(dir.path().join("home"));
    config.sandbox.git_init = false;
    config.watcher.enabled = false;
    config.heartbeat.enabled = false;
    config.tools.deny = vec!["danger".into()];
    config
        .channels
        .insert("loopback".into(), ChannelConfig::default());
    tweak(&mut config);

    let loopback_plugin = Arc::new(LoopbackPlugin::default());
    let loopback = loopback_plugin.adapter();
    let catalog = PluginCatalog::new()
        .with(Arc::new(Testkit))
        .with(loopback_plugin);

    let state = GatewayState::builder(config, dir.path())
        .catalog(catalog)
        .cron_store(Arc::new(InMemoryStore::new()))
        .build();
    let report = state.startup().await.unwrap();
    assert!(report.plugins.failed.is_empty(), "{:?}", report.plugins);

    let app = build_gateway_app(Arc::clone(&state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Server {
        addr,
        state,
        loopback,
        dir,
        client: reqwest::Client::new(),
    }
}

async fn start_server() -> Server {
    start_server_with(|_| {}).await
}

async fn error_kind(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["error"]["kind"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_carries_security_headers() {
    let server = start_server().await;
    let resp = server.get("/health").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.headers()["x-frame-options"], "DENY");
    assert_eq!(resp.headers()["referrer-policy"], "no-referrer");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["plugins"], 2);
}

#[tokio::test]
async fn plugins_and_audit_are_listed() {
    let server = start_server().await;
    let plugins: Vec<Value> = server.get("/api/plugins").await.json().await.unwrap();
    let ids: Vec<&str> = plugins.iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"testkit"));
    assert!(ids.contains(&"loopback"));

    let audit: Vec<Value> = server
        .get("/api/audit?plugin=testkit")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(audit.len(), 3);
    assert!(audit.iter().all(|e| e["pluginId"] == "testkit"));
}

#[tokio::test]
async fn tool_invocation_and_deny_list() {
    let server = start_server().await;

    let tools: Vec<Value> = server.get("/api/tools").await.json().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["echo"]);

    let resp = server
        .post("/api/tools/echo/invoke", json!({"x": 1}))
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], json!({"x": 1}));
    assert!(body["invocation"].is_string());

    let resp = server.post("/api/tools/danger/invoke", json!({})).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(error_kind(resp).await, "access_denied");

    // Built-in deny-list applies even to tools nobody registered.
    let resp = server.post("/api/tools/cron/invoke", json!({})).await;
    assert_eq!(resp.status(), 403);

    let resp = server.post("/api/tools/missing/invoke", json!({})).await;
    assert_eq!(resp.status(), 404);
    assert_eq!(error_kind(resp).await, "not_found");

    let resp = server
        .post("/api/tools/echo/invoke", json!({"fail": true}))
        .await;
    assert_eq!(resp.status(), 500);

    let resp = server
        .client
        .post(server.url("/api/tools/echo/invoke"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(error_kind(resp).await, "validation");
}

#[tokio::test]
async fn tool_calls_are_rate_limited_per_caller() {
    let server = start_server_with(|c| {
        c.rate_limit = RateLimitConfig {
            max_attempts: 2,
            window_ms: 60_000,
            lockout_ms: 60_000,
        };
    })
    .await;

    let call = |caller: &'static str| {
        server
            .client
            .post(server.url("/api/tools/echo/invoke"))
            .header("x-caller-id", caller)
            .json(&json!({}))
            .send()
    };
    assert_eq!(call("alice").await.unwrap().status(), 200);
    assert_eq!(call("alice").await.unwrap().status(), 200);
    let limited = call("alice").await.unwrap();
    assert_eq!(limited.status(), 429);
    assert!(limited.headers().contains_key("retry-after"));
    assert_eq!(error_kind(limited).await, "rate_limited");

    assert_eq!(call("bob").await.unwrap().status(), 200);
}

#[tokio::test]
async fn channel_send_and_status() {
    let server = start_server().await;

    let resp = server
        .post(
            "/api/channels/loopback/send",
            json!({"chatId": "c1", "text": "hi there"}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let sent = server.loopback.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, "c1");
    assert_eq!(sent[0].text, "hi there");

    let resp = server
        .post("/api/channels/nope/send", json!({"chatId": "c", "text": "t"}))
        .await;
    assert_eq!(resp.status(), 404);

    let status: Vec<Value> = server.get("/api/channels").await.json().await.unwrap();
    assert_eq!(status[0]["id"], "loopback");
    assert_eq!(status[0]["running"], true);
}

#[tokio::test]
async fn cron_job_lifecycle() {
    let server = start_server().await;

    let resp = server
        .post(
            "/api/cron",
            json!({
                "id": "nightly",
                "name": "Nightly",
                "message": "summarize the day",
                "schedule": {"type": "interval", "intervalMs": 3_600_000},
                "target": {"channel": "loopback", "chatId": "ops"},
                "system": true,
            }),
        )
        .await;
    assert_eq!(resp.status(), 201);
    let job: Value = resp.json().await.unwrap();
    assert_eq!(job["id"], "nightly");
    assert!(job.get("system").is_none());
    assert!(job["state"]["nextRunAtMs"].is_u64());

    let resp = server
        .post(
            "/api/cron",
            json!({"id": "nightly", "name": "dup", "message": "m",
                   "schedule": {"type": "interval", "intervalMs": 1000}}),
        )
        .await;
    assert_eq!(resp.status(), 409);

    let resp = server
        .post(
            "/api/cron",
            json!({"name": "bad", "message": "m",
                   "schedule": {"type": "cron", "cron": "not a cron"}}),
        )
        .await;
    assert_eq!(resp.status(), 400);

    let listing: Value = server.get("/api/cron").await.json().await.unwrap();
    assert_eq!(listing["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(listing["status"]["jobCount"], 1);

    let resp = server.post("/api/cron/nightly/run", json!({})).await;
    assert_eq!(resp.status(), 200);
    let run: Value = resp.json().await.unwrap();
    assert_eq!(run["status"], "ok");
    assert_eq!(server.loopback.sent()[0].text, "echo: summarize the day");

    let runs: Vec<Value> = server
        .get("/api/cron/nightly/runs")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);

    assert_eq!(server.delete("/api/cron/nightly").await.status(), 200);
    assert_eq!(server.delete("/api/cron/nightly").await.status(), 404);
    assert_eq!(server.get("/api/cron/nightly/runs").await.status(), 404);
}

#[tokio::test]
async fn files_are_served_through_the_jail() {
    let server = start_server().await;
    let home = server.state.sandbox_root().to_path_buf();
    std::fs::create_dir_all(home.join("apps")).unwrap();
    std::fs::write(home.join("apps/index.html"), "<h1>hi</h1>").unwrap();
    std::fs::write(server.dir.path().join("secret.txt"), "nope").unwrap();

    let resp = server.get("/files/apps/index.html").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"],
        "text/html; charset=utf-8"
    );
    assert!(resp.headers().get("x-frame-options").is_none());
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.text().await.unwrap(), "<h1>hi</h1>");

    let resp = server.get("/files/..%2Fsecret.txt").await;
    assert_eq!(resp.status(), 403);
    assert_eq!(error_kind(resp).await, "security_denied");

    assert_eq!(server.get("/files/apps/missing.html").await.status(), 404);
    assert_eq!(server.get("/files/apps").await.status(), 404);
}

#[tokio::test]
async fn plugin_routes_and_unload() {
    let server = start_server().await;

    let resp = server.get("/hello?you").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.text().await.unwrap(), "hello you");

    assert_eq!(server.post("/hello", json!({})).await.status(), 405);

    let resp = server.get("/nowhere").await;
    assert_eq!(resp.status(), 404);
    assert_eq!(error_kind(resp).await, "not_found");

    let resp = server.delete("/api/plugins/testkit").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["unloaded"]["tools"].as_array().unwrap().len(), 2);

    assert_eq!(server.get("/hello").await.status(), 404);
    assert_eq!(
        server
            .post("/api/tools/echo/invoke", json!({}))
            .await
            .status(),
        404
    );
    assert_eq!(server.delete("/api/plugins/testkit").await.status(), 404);
}

#[tokio::test]
async fn unloading_a_channel_plugin_stops_its_channels() {
    let server = start_server().await;
    let resp = server.delete("/api/plugins/loopback").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["stoppedChannels"], json!(["loopback"]));
    assert!(!server.state.channels.is_running("loopback").await);

    let resp = server
        .post(
            "/api/channels/loopback/send",
            json!({"chatId": "c1", "text": "hi"}),
        )
        .await;
    assert!(resp.status().is_client_error());
}
