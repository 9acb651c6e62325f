//! Event channel manager: one websocket to the event emitter, kept alive with pings,
//! reconnected on a fixed interval, with long-polling filling in while it is down.
//!
//! Only one transport delivers at a time. Every successful channel open (and every explicit
//! disconnect) bumps a generation counter; a poll result is delivered only if the generation
//! it started under is still current and the channel is not connected.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::dispatch::Dispatcher;
use super::types::EmittedEvent;
use crate::config::ClientConfig;
use crate::net::{RequestClient, RequestSpec, AUTH_TOKEN_HEADER};

pub const EVENT_EMITTER_PATH: &str = "event-emitter";
pub const POLL_PATH: &str = "/poll-for-event";
const PING: &str = "ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveTransport {
    None,
    Channel,
    Polling,
}

enum Closure {
    /// Peer sent a close frame.
    Normal,
    Error(String),
}

/// Timers and knobs. Taken from `ClientConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ChannelTimings {
    pub ping_interval: Duration,
    pub reconnect_interval: Duration,
    pub poll_retry_delay: Duration,
}

impl From<&ClientConfig> for ChannelTimings {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            ping_interval: cfg.ping_interval(),
            reconnect_interval: cfg.reconnect_interval(),
            poll_retry_delay: cfg.poll_retry_delay(),
        }
    }
}

struct ChannelState {
    phase: ChannelPhase,
    /// Caller asked for a channel (connect without a later disconnect).
    wanted: bool,
    instance_id: Option<String>,
    /// Identifies the socket task allowed to change state; bumped by every disconnect.
    attempt: u64,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    socket_task: Option<JoinHandle<()>>,
    ping_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    /// Generation of the poll loop that currently owns polling, if any.
    polling: Option<u64>,
    last_poll_event_time: i64,
}

struct ReceiverInner {
    client: RequestClient,
    dispatcher: Dispatcher,
    timings: ChannelTimings,
    state: Mutex<ChannelState>,
}

#[derive(Clone)]
pub struct EventReceiver {
    inner: Arc<ReceiverInner>,
}

impl EventReceiver {
    pub fn new(client: RequestClient, dispatcher: Dispatcher, timings: ChannelTimings) -> Self {
        Self {
            inner: Arc::new(ReceiverInner {
                client,
                dispatcher,
                timings,
                state: Mutex::new(ChannelState {
                    phase: ChannelPhase::Disconnected,
                    wanted: false,
                    instance_id: None,
                    attempt: 0,
                    generation: 0,
                    outbound: None,
                    socket_task: None,
                    ping_task: None,
                    reconnect_task: None,
                    polling: None,
                    last_poll_event_time: 0,
                }),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher { &self.inner.dispatcher }

    pub fn phase(&self) -> ChannelPhase { self.inner.state.lock().phase }

    pub fn is_connected(&self) -> bool { self.phase() == ChannelPhase::Connected }

    pub fn active_transport(&self) -> ActiveTransport {
        let st = self.inner.state.lock();
        match (st.phase, st.polling) {
            (ChannelPhase::Connected, _) => ActiveTransport::Channel,
            (_, Some(_)) => ActiveTransport::Polling,
            _ => ActiveTransport::None,
        }
    }

    /// Next `since` value the polling fallback will send.
    pub fn last_poll_event_time(&self) -> i64 { self.inner.state.lock().last_poll_event_time }

    pub fn generation(&self) -> u64 { self.inner.state.lock().generation }

    /// Open the channel, optionally scoped to one service instance. No-op unless disconnected.
    pub fn connect(&self, instance_id: Option<&str>) {
        {
            let mut st = self.inner.state.lock();
            if st.phase != ChannelPhase::Disconnected {
                return;
            }
            st.wanted = true;
            st.instance_id = instance_id.map(str::to_string);
        }
        self.inner.start_connect();
    }

    /// Cancel the ping and reconnect timers and close the socket. Explicit disconnects are
    /// not retried, and a poll already in flight is discarded when it answers.
    pub fn disconnect(&self) {
        let mut st = self.inner.state.lock();
        st.wanted = false;
        st.attempt += 1;
        st.generation += 1;
        for task in [st.reconnect_task.take(), st.ping_task.take(), st.socket_task.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(tx) = st.outbound.take() {
            let _ = tx.send(Message::Close(None));
        }
        if st.phase != ChannelPhase::Disconnected {
            info!(target: "starclient::events", "event channel disconnected");
        }
        st.phase = ChannelPhase::Disconnected;
    }

    /// Tear down and connect again with the same instance scope.
    pub fn reconnect(&self) {
        let instance = self.inner.state.lock().instance_id.clone();
        self.disconnect();
        self.connect(instance.as_deref());
    }

    /// Reconnect whenever a new session is established while the channel is wanted.
    pub fn watch_session(&self) -> JoinHandle<()> {
        let weak: Weak<ReceiverInner> = Arc::downgrade(&self.inner);
        let mut changes = self.inner.client.session().subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else { break };
                let wanted = inner.state.lock().wanted;
                if wanted && inner.client.session().get().is_some() {
                    debug!(target: "starclient::events", "session changed; reconnecting event channel");
                    EventReceiver { inner }.reconnect();
                }
            }
        })
    }
}

/// `ws(s)://host/@(x-star-target/<member>)@/@(X-AUTH-TOKEN/<token>)@/<instance>/event-emitter`.
/// Path-encoded headers, since a websocket upgrade from a browser cannot carry custom ones.
pub fn channel_url(base: &Url, member: Option<&str>, token: Option<&str>, instance_id: Option<&str>) -> Option<Url> {
    let mut url = base.clone();
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).ok()?;
    let mut segments: Vec<String> = Vec::new();
    if let Some(m) = member.filter(|m| !m.is_empty()) {
        segments.push(format!("@(x-star-target/{})@", urlencoding::encode(m)));
    }
    if let Some(t) = token.filter(|t| !t.is_empty()) {
        segments.push(format!("@({}/{})@", AUTH_TOKEN_HEADER, urlencoding::encode(t)));
    }
    if let Some(i) = instance_id.filter(|i| !i.is_empty()) {
        segments.push(i.to_string());
    }
    segments.push(EVENT_EMITTER_PATH.to_string());
    url.set_path(&format!("/{}", segments.join("/")));
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}

impl ReceiverInner {
    fn start_connect(self: &Arc<Self>) {
        let attempt = {
            let mut st = self.state.lock();
            if st.phase != ChannelPhase::Disconnected {
                return;
            }
            st.phase = ChannelPhase::Connecting;
            st.attempt
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_socket(attempt).await });
        let mut st = self.state.lock();
        if st.attempt == attempt {
            if let Some(prev) = st.socket_task.replace(handle) {
                prev.abort();
            }
        } else {
            handle.abort();
        }
    }

    async fn run_socket(self: Arc<Self>, attempt: u64) {
        if let Err(e) = self.client.login().user_info().await {
            // Nothing to reconnect with; the next successful login reconnects through the session watcher.
            warn!(target: "starclient::events", "event channel needs a session: {}", e);
            let mut st = self.state.lock();
            if st.attempt == attempt {
                st.phase = ChannelPhase::Disconnected;
                st.socket_task = None;
            }
            return;
        }
        let session = self.client.session();
        let instance = self.state.lock().instance_id.clone();
        let Some(url) = channel_url(
            self.client.base(),
            session.target_member().as_deref(),
            session.token().as_deref(),
            instance.as_deref(),
        ) else {
            self.on_closed(attempt, Closure::Error("unusable base url".to_string()));
            return;
        };
        debug!(target: "starclient::events", url = %url, "connecting event channel");

        let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                self.on_closed(attempt, Closure::Error(e.to_string()));
                return;
            }
        };
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        if !self.on_open(attempt, tx) {
            let _ = sink.close().await;
            return;
        }
        // Writer lives until every sender is gone, then closes the socket.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let closure = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.dispatcher.dispatch(EmittedEvent::parse_lenient(&text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    self.dispatcher.dispatch(EmittedEvent::parse_lenient(&String::from_utf8_lossy(&bytes)));
                }
                Some(Ok(Message::Close(_))) => break Closure::Normal,
                Some(Ok(_)) => {}
                Some(Err(e)) => break Closure::Error(e.to_string()),
                None => break Closure::Error("stream ended".to_string()),
            }
        };
        self.on_closed(attempt, closure);
    }

    fn on_open(self: &Arc<Self>, attempt: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
        let mut st = self.state.lock();
        if st.attempt != attempt || st.phase != ChannelPhase::Connecting {
            return false;
        }
        st.phase = ChannelPhase::Connected;
        st.generation += 1;
        if let Some(t) = st.reconnect_task.take() {
            t.abort();
        }
        if let Some(t) = st.ping_task.take() {
            t.abort();
        }
        let ping_tx = tx.clone();
        let every = self.timings.ping_interval;
        st.ping_task = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tick.tick().await;
                trace!(target: "starclient::events", "ping");
                if ping_tx.send(Message::Text(PING.to_string())).is_err() {
                    break;
                }
            }
        }));
        st.outbound = Some(tx);
        info!(target: "starclient::events", generation = st.generation, "event channel connected");
        true
    }

    fn on_closed(self: &Arc<Self>, attempt: u64, closure: Closure) {
        let transport_error = {
            let mut st = self.state.lock();
            if st.attempt != attempt {
                return;
            }
            if let Some(t) = st.ping_task.take() {
                t.abort();
            }
            st.outbound = None;
            // This runs on the socket task itself; drop the handle without aborting.
            st.socket_task = None;
            st.phase = ChannelPhase::Disconnected;
            self.ensure_reconnect_timer(&mut st);
            match closure {
                Closure::Normal => {
                    info!(target: "starclient::events", "event channel closed");
                    false
                }
                Closure::Error(e) => {
                    warn!(target: "starclient::events", "event channel error: {}", e);
                    true
                }
            }
        };
        if transport_error {
            self.poll_if_unconnected();
        }
    }

    fn ensure_reconnect_timer(self: &Arc<Self>, st: &mut ChannelState) {
        if st.reconnect_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let every = self.timings.reconnect_interval;
        st.reconnect_task = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tick.tick().await;
                let Some(this) = weak.upgrade() else { break };
                debug!(target: "starclient::events", "reconnect attempt");
                this.start_connect();
            }
        }));
    }

    fn poll_if_unconnected(self: &Arc<Self>) {
        let generation = {
            let mut st = self.state.lock();
            // A loop left over from an older generation only discards its answer; start a fresh one.
            if st.phase == ChannelPhase::Connected || st.polling == Some(st.generation) {
                return;
            }
            st.polling = Some(st.generation);
            st.generation
        };
        debug!(target: "starclient::events", generation, "polling for events");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.poll_loop(generation).await });
    }

    async fn poll_loop(self: Arc<Self>, generation: u64) {
        loop {
            let since = self.state.lock().last_poll_event_time;
            let spec = RequestSpec::get(format!("{}?since={}", POLL_PATH, since)).show_error(false);
            let result = self.client.request(spec).await;
            let event = {
                let mut st = self.state.lock();
                let resp = match result {
                    Ok(resp) => resp,
                    Err(e) => {
                        debug!(target: "starclient::events", "poll failed, stopping: {}", e);
                        st.release_polling(generation);
                        return;
                    }
                };
                let event =
                    if resp.status == 504 { EmittedEvent::default() } else { EmittedEvent::parse_lenient(&resp.body) };
                if let Some(ts) = event.timestamp {
                    st.last_poll_event_time = st.last_poll_event_time.max(ts.saturating_add(1));
                }
                if st.generation != generation || st.phase == ChannelPhase::Connected {
                    debug!(target: "starclient::events", kind = %event.kind, "poll result superseded");
                    st.release_polling(generation);
                    return;
                }
                event
            };
            self.dispatcher.dispatch(event);
            tokio::time::sleep(self.timings.poll_retry_delay).await;
            {
                let mut st = self.state.lock();
                if st.generation != generation || st.phase == ChannelPhase::Connected {
                    st.release_polling(generation);
                    return;
                }
            }
        }
    }
}

impl ChannelState {
    fn release_polling(&mut self, generation: u64) {
        if self.polling == Some(generation) {
            self.polling = None;
        }
    }
}
