//! Server-pushed events: the wire envelope and typed payloads, the handler registry, and the
//! channel manager that feeds it (websocket first, polling while the socket is down).

mod dispatch;
mod receiver;
mod types;

pub use dispatch::Dispatcher;
pub use receiver::{channel_url, ActiveTransport, ChannelPhase, ChannelTimings, EventReceiver, EVENT_EMITTER_PATH, POLL_PATH};
pub use types::{
    DataStoreEvent, EmittedEvent, Event, EventKind, JarEvent, LogEvent, ProcessInfo, ProgressEvent, RegisterEvent,
};
