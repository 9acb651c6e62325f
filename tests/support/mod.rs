//! In-process mock of the dashboard backend: login endpoints, a few protected API routes,
//! the star list, the poll endpoint and the event-emitter websocket.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use starclient::error::ServerError;
use starclient::frontend::Frontend;
use starclient::storage::{MemoryStore, SharedLocalStore};
use starclient::{ClientConfig, StarClient};

pub const ADMIN_PASSWORD: &str = "secret";

#[derive(Debug, Clone)]
pub enum WsCmd {
    Send(String),
    /// Close handshake from the server side.
    Close,
    /// Drop the connection without a close frame.
    Kill,
}

#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub token: Option<String>,
    pub target: Option<String>,
}

pub struct MockState {
    pub base_url: Mutex<String>,
    pub admin_password: Mutex<Option<String>>,
    pub users: Mutex<HashMap<String, String>>,
    /// Authorization service only knows the bootstrap admin.
    pub bootstrap: AtomicBool,
    pub sso_version: Mutex<Option<String>>,
    pub login_delay: Mutex<Duration>,
    pub valid_tokens: Mutex<HashSet<String>>,
    token_seq: AtomicUsize,
    /// Protected routes answer 401 this many more times regardless of the token.
    pub expire_next: AtomicUsize,
    pub hits: Mutex<HashMap<String, usize>>,
    pub seen: Mutex<Vec<Seen>>,
    pub stars: Mutex<Value>,
    pub poll_queue: Mutex<VecDeque<Value>>,
    pub poll_sinces: Mutex<Vec<i64>>,
    pub poll_idle: Mutex<Duration>,
    pub ws_enabled: AtomicBool,
    pub ws_connects: AtomicUsize,
    pub ws_open: AtomicUsize,
    pub ws_paths: Mutex<Vec<String>>,
    pub pings: AtomicUsize,
    pub ws_cmds: broadcast::Sender<WsCmd>,
}

impl Default for MockState {
    fn default() -> Self {
        let (ws_cmds, _) = broadcast::channel(64);
        Self {
            base_url: Mutex::new(String::new()),
            admin_password: Mutex::new(Some(ADMIN_PASSWORD.to_string())),
            users: Mutex::new(HashMap::from([("alice".to_string(), "pw".to_string())])),
            bootstrap: AtomicBool::new(false),
            sso_version: Mutex::new(None),
            login_delay: Mutex::new(Duration::ZERO),
            valid_tokens: Mutex::new(HashSet::new()),
            token_seq: AtomicUsize::new(0),
            expire_next: AtomicUsize::new(0),
            hits: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
            stars: Mutex::new(json!([])),
            poll_queue: Mutex::new(VecDeque::new()),
            poll_sinces: Mutex::new(Vec::new()),
            poll_idle: Mutex::new(Duration::from_millis(100)),
            ws_enabled: AtomicBool::new(true),
            ws_connects: AtomicUsize::new(0),
            ws_open: AtomicUsize::new(0),
            ws_paths: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            ws_cmds,
        }
    }
}

impl MockState {
    pub fn issue_token(&self) -> String {
        let n = self.token_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let tok = format!("tok-{}", n);
        self.valid_tokens.lock().insert(tok.clone());
        tok
    }

    pub fn hits(&self, name: &str) -> usize { self.hits.lock().get(name).copied().unwrap_or(0) }

    fn hit(&self, name: &str) { *self.hits.lock().entry(name.to_string()).or_default() += 1; }

    fn record(&self, path: &str, headers: &HeaderMap) {
        let header = |n: &str| headers.get(n).and_then(|v| v.to_str().ok()).map(str::to_string);
        self.seen.lock().push(Seen { path: path.to_string(), token: header("x-auth-token"), target: header("x-star-target") });
    }

    fn authorize(&self, name: &str, headers: &HeaderMap) -> Result<String, StatusCode> {
        self.hit(name);
        self.record(name, headers);
        if self.expire_next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let token = headers.get("x-auth-token").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
        if self.valid_tokens.lock().contains(&token) {
            Ok(token)
        } else {
            Err(StatusCode::UNAUTHORIZED)
        }
    }

    pub fn push_poll_event(&self, kind: &str, data: Value, timestamp: i64) {
        self.poll_queue.lock().push_back(json!({"type": kind, "data": data, "timestamp": timestamp}));
    }

    pub fn send_ws(&self, kind: &str, data: Value) {
        let _ = self.ws_cmds.send(WsCmd::Send(json!({"type": kind, "data": data}).to_string()));
    }
}

type Shared = Arc<MockState>;

async fn whoami(State(st): State<Shared>, headers: HeaderMap) -> Response {
    st.hit("whoami");
    let cookie = headers.get("cookie").and_then(|v| v.to_str().ok()).unwrap_or_default();
    let token = cookie
        .split(';')
        .filter_map(|kv| kv.trim().strip_prefix("X-AUTH-TOKEN="))
        .next()
        .unwrap_or_default()
        .to_string();
    if st.valid_tokens.lock().contains(&token) {
        Json(json!({"token": token, "id": "7", "name": "alice", "email": "alice@example.com", "roles": ["ADMIN"]}))
            .into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn sso_version(State(st): State<Shared>) -> Response {
    st.hit("sso_version");
    match st.sso_version.lock().clone() {
        Some(v) => v.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn admin_login(State(st): State<Shared>, headers: HeaderMap) -> Response {
    st.hit("admin_login");
    let delay = *st.login_delay.lock();
    tokio::time::sleep(delay).await;
    let given = headers.get("x-auth-password").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    let expected = st.admin_password.lock().clone();
    match expected {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(p) if p == given => st.issue_token().into_response(),
        Some(_) => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn user_login(State(st): State<Shared>, Path(user): Path<String>, headers: HeaderMap) -> Response {
    st.hit("user_login");
    if st.bootstrap.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let given = headers.get("x-auth-password").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    let known = st.users.lock().get(&user).cloned();
    match known {
        Some(p) if p == given => st.issue_token().into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn api_data(State(st): State<Shared>, headers: HeaderMap) -> Response {
    match st.authorize("data", &headers) {
        Ok(_) => Json(json!({"value": 42})).into_response(),
        Err(s) => s.into_response(),
    }
}

async fn api_empty(State(st): State<Shared>, headers: HeaderMap) -> Response {
    match st.authorize("empty", &headers) {
        Ok(_) => "".into_response(),
        Err(s) => s.into_response(),
    }
}

async fn api_forbidden(State(st): State<Shared>, headers: HeaderMap) -> Response {
    match st.authorize("forbidden", &headers) {
        Ok(_) => StatusCode::FORBIDDEN.into_response(),
        Err(s) => s.into_response(),
    }
}

async fn api_missing(State(st): State<Shared>, headers: HeaderMap) -> Response {
    match st.authorize("missing", &headers) {
        Ok(_) => (StatusCode::NOT_FOUND, "no such thing").into_response(),
        Err(s) => s.into_response(),
    }
}

async fn api_gateway(State(st): State<Shared>, headers: HeaderMap) -> Response {
    match st.authorize("gateway", &headers) {
        Ok(_) => (StatusCode::GATEWAY_TIMEOUT, "<html>504 Gateway Time-out</html>").into_response(),
        Err(s) => s.into_response(),
    }
}

async fn api_broken(State(st): State<Shared>, headers: HeaderMap) -> Response {
    match st.authorize("broken", &headers) {
        Ok(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "boom", "path": "/elsewhere", "timestamp": 0, "service": "core"})),
        )
            .into_response(),
        Err(s) => s.into_response(),
    }
}

async fn stars(State(st): State<Shared>, headers: HeaderMap) -> Response {
    st.hit("stars");
    st.record("stars", &headers);
    let list = st.stars.lock().clone();
    ([("X-STAR-NAME", "east")], Json(list)).into_response()
}

async fn local_star(State(st): State<Shared>, headers: HeaderMap) -> Response {
    match st.authorize("star", &headers) {
        Ok(_) => Json(json!({
            "starName": "east",
            "starUrl": st.base_url.lock().trim_end_matches('/'),
            "dispatcherUrl": "http://dispatcher.invalid",
            "ipAddresses": ["127.0.0.1"]
        }))
        .into_response(),
        Err(s) => s.into_response(),
    }
}

async fn poll(State(st): State<Shared>, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Response {
    if let Err(s) = st.authorize("poll", &headers) {
        return s.into_response();
    }
    let since = q.get("since").and_then(|s| s.parse::<i64>().ok()).unwrap_or(-1);
    st.poll_sinces.lock().push(since);
    let next = st.poll_queue.lock().pop_front();
    match next {
        Some(ev) => Json(ev).into_response(),
        None => {
            let idle = *st.poll_idle.lock();
            tokio::time::sleep(idle).await;
            (StatusCode::GATEWAY_TIMEOUT, "<html>504</html>").into_response()
        }
    }
}

fn token_from_channel_path(path: &str) -> Option<String> {
    const MARK: &str = "@(X-AUTH-TOKEN/";
    let start = path.find(MARK)? + MARK.len();
    let end = path[start..].find(")@")? + start;
    urlencoding::decode(&path[start..end]).ok().map(|c| c.into_owned())
}

async fn event_emitter(State(st): State<Shared>, uri: Uri, ws: WebSocketUpgrade) -> Response {
    if !uri.path().ends_with("/event-emitter") {
        return StatusCode::NOT_FOUND.into_response();
    }
    st.ws_paths.lock().push(uri.path().to_string());
    if !st.ws_enabled.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let authorized = token_from_channel_path(uri.path()).is_some_and(|t| st.valid_tokens.lock().contains(&t));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    st.ws_connects.fetch_add(1, Ordering::SeqCst);
    let cmds = st.ws_cmds.subscribe();
    ws.on_upgrade(move |socket| serve_socket(st, socket, cmds))
}

async fn serve_socket(st: Shared, mut socket: WebSocket, mut cmds: broadcast::Receiver<WsCmd>) {
    st.ws_open.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            cmd = cmds.recv() => match cmd {
                Ok(WsCmd::Send(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() { break; }
                }
                Ok(WsCmd::Close) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Ok(WsCmd::Kill) | Err(_) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(t))) if t.as_str() == "ping" => { st.pings.fetch_add(1, Ordering::SeqCst); }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    st.ws_open.fetch_sub(1, Ordering::SeqCst);
}

pub fn router(state: Shared) -> Router {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/sso/version", get(sso_version))
        .route("/admin-login", post(admin_login))
        .route("/microstar-authorization/login/{user}", post(user_login))
        .route("/api/data", get(api_data))
        .route("/api/empty", get(api_empty))
        .route("/api/forbidden", get(api_forbidden))
        .route("/api/missing", get(api_missing))
        .route("/api/gateway", get(api_gateway))
        .route("/api/broken", get(api_broken))
        .route("/stars", get(stars))
        .route("/star", get(local_star))
        .route("/poll-for-event", get(poll))
        .route("/event-emitter", get(event_emitter))
        // Channel URLs carry path-encoded headers in front of `event-emitter`.
        .route("/{*rest}", get(event_emitter))
        .with_state(state)
}

#[derive(Default)]
pub struct RecordingFrontend {
    pub navigations: Mutex<Vec<String>>,
    pub reloads: AtomicUsize,
    pub prompts: AtomicUsize,
    pub errors: Mutex<Vec<ServerError>>,
}

impl Frontend for RecordingFrontend {
    fn navigate(&self, path: &str) { self.navigations.lock().push(path.to_string()); }
    fn reload(&self) { self.reloads.fetch_add(1, Ordering::SeqCst); }
    fn prompt_credentials(&self) { self.prompts.fetch_add(1, Ordering::SeqCst); }
    fn show_error(&self, error: &ServerError) { self.errors.lock().push(error.clone()); }
}

pub struct Harness {
    pub mock: Shared,
    pub base: String,
    pub frontend: Arc<RecordingFrontend>,
    pub store: SharedLocalStore,
    server: JoinHandle<()>,
}

impl Harness {
    pub async fn start() -> Self {
        let mock: Shared = Arc::new(MockState::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind 127.0.0.1:0");
        let addr = listener.local_addr().expect("local addr");
        let base = format!("http://{}/", addr);
        *mock.base_url.lock() = base.clone();
        *mock.stars.lock() = json!([
            {"url": format!("http://{}", addr), "name": "east", "isActive": true},
            {"url": "http://west.invalid:1", "name": "west", "isActive": true}
        ]);
        let app = router(mock.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("mock server error: {e:?}");
            }
        });
        Harness { mock, base, frontend: Arc::new(RecordingFrontend::default()), store: MemoryStore::shared(), server }
    }

    /// Short timers so reconnects and polls happen within a test's patience.
    pub fn config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new(self.base.clone());
        cfg.ping_interval_ms = 50;
        cfg.reconnect_interval_ms = 100;
        cfg.poll_retry_delay_ms = 30;
        cfg.debounce_ms = 20;
        cfg.throttle_ms = 20;
        cfg
    }

    pub fn client_with(&self, cfg: ClientConfig) -> StarClient {
        StarClient::new(cfg, self.frontend.clone(), self.store.clone()).expect("client")
    }

    pub fn client(&self) -> StarClient { self.client_with(self.config()) }

    /// Client with admin credentials already remembered.
    pub fn admin_client(&self) -> StarClient {
        let c = self.client();
        c.login().credentials().set(Some("admin"), Some(ADMIN_PASSWORD));
        c
    }
}

impl Drop for Harness {
    fn drop(&mut self) { self.server.abort(); }
}

/// Poll `cond` every 10ms until it holds or `timeout_ms` passes.
pub async fn wait_until(timeout_ms: u64, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
