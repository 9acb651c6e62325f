use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::types::*;

type TypedHandler = Arc<dyn Fn(&Event) + Send + Sync>;
type RawHandler = Arc<dyn Fn(&EmittedEvent) + Send + Sync>;

#[derive(Clone)]
enum Subscriber {
    Typed(TypedHandler),
    Raw(RawHandler),
}

/// Ordered handler registry keyed by event kind. Shared by the live channel and the
/// polling fallback so both deliver through the same subscribers.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Subscriber>>>>,
}

impl Dispatcher {
    pub fn new() -> Self { Self::default() }

    fn push(&self, kind: EventKind, sub: Subscriber) -> &Self {
        self.handlers.write().entry(kind).or_default().push(sub);
        self
    }

    fn on_typed(&self, kind: EventKind, f: impl Fn(&Event) + Send + Sync + 'static) -> &Self {
        self.push(kind, Subscriber::Typed(Arc::new(f)))
    }

    /// Raw access to any kind, including ones outside the known vocabulary.
    pub fn on_event(&self, kind: EventKind, f: impl Fn(&EmittedEvent) + Send + Sync + 'static) -> &Self {
        self.push(kind, Subscriber::Raw(Arc::new(f)))
    }

    pub fn on_log(&self, f: impl Fn(&LogEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::Log, move |e| if let Event::Log(v) = e { f(v) })
    }
    pub fn on_registered(&self, f: impl Fn(&RegisterEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::Registered, move |e| if let Event::Registered(v) = e { f(v) })
    }
    pub fn on_unregistered(&self, f: impl Fn(&RegisterEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::Unregistered, move |e| if let Event::Unregistered(v) = e { f(v) })
    }
    pub fn on_starting(&self, f: impl Fn(&RegisterEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::ServiceStarting, move |e| if let Event::ServiceStarting(v) = e { f(v) })
    }
    pub fn on_new_frontend_settings(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::FrontendSettingsChanged, move |_| f())
    }
    pub fn on_new_dispatcher_settings(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::DispatcherSettingsChanged, move |_| f())
    }
    pub fn on_stars_changed(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::StarsChanged, move |_| f())
    }
    pub fn on_added_jar(&self, f: impl Fn(&JarEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::AddedJar, move |e| if let Event::AddedJar(v) = e { f(v) })
    }
    pub fn on_removed_jar(&self, f: impl Fn(&JarEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::RemovedJar, move |e| if let Event::RemovedJar(v) = e { f(v) })
    }
    pub fn on_static_data_changed(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::StaticDataChanged, move |_| f())
    }
    pub fn on_data_stores_changed(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::DataStoresChanged, move |_| f())
    }
    pub fn on_data_store_changed(&self, f: impl Fn(&DataStoreEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::DataStoreChanged, move |e| if let Event::DataStoreChanged(v) = e { f(v) })
    }
    pub fn on_data_store_progress(&self, f: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::DataStoreProgress, move |e| if let Event::DataStoreProgress(v) = e { f(v) })
    }
    pub fn on_process_info(&self, f: impl Fn(&BTreeMap<String, ProcessInfo>) + Send + Sync + 'static) -> &Self {
        self.on_typed(EventKind::ProcessInfos, move |e| if let Event::ProcessInfos(v) = e { f(v) })
    }

    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.read().get(kind).map(Vec::len).unwrap_or(0)
    }

    /// Deliver one event to every subscriber of its kind, in registration order.
    /// A panicking handler is logged and skipped; the rest still run.
    /// Returns how many handlers were invoked.
    pub fn dispatch(&self, raw: EmittedEvent) -> usize {
        if raw.is_empty() {
            return 0;
        }
        let raw = raw.normalize();
        let kind = raw.event_kind();
        // Snapshot so handlers may register further handlers without deadlocking.
        let subs: Vec<Subscriber> = match self.handlers.read().get(&kind) {
            Some(v) => v.clone(),
            None => return 0,
        };
        let mut typed: Option<Option<Event>> = None;
        let mut invoked = 0usize;
        for sub in subs {
            let outcome = match &sub {
                Subscriber::Raw(h) => catch_unwind(AssertUnwindSafe(|| h(&raw))),
                Subscriber::Typed(h) => {
                    let decoded = typed.get_or_insert_with(|| match Event::decode(&raw) {
                        Ok(ev) => Some(ev),
                        Err(e) => {
                            warn!(target: "starclient::events", kind = %kind, "undecodable payload: {}", e);
                            None
                        }
                    });
                    let Some(ev) = decoded.as_ref() else { continue };
                    catch_unwind(AssertUnwindSafe(|| h(ev)))
                }
            };
            invoked += 1;
            if outcome.is_err() {
                warn!(target: "starclient::events", kind = %kind, "event handler panicked; continuing with the next one");
            }
        }
        trace!(target: "starclient::events", kind = %kind, invoked, "dispatched");
        invoked
    }
}
