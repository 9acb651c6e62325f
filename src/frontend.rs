//! UI collaborators: the `Frontend` hooks the client calls into, and the global error sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::ServerError;

/// What the client needs from whatever UI hosts it. Everything defaults to logging only.
pub trait Frontend: Send + Sync {
    /// Leave the current page (SSO redirect). The host is expected to come back logged in.
    fn navigate(&self, path: &str) {
        info!(target: "starclient::frontend", path, "navigate requested");
    }
    fn reload(&self) {
        info!(target: "starclient::frontend", "reload requested");
    }
    /// Credentials are missing or were rejected; ask the user again.
    fn prompt_credentials(&self) {
        info!(target: "starclient::frontend", "credentials needed");
    }
    fn show_error(&self, error: &ServerError) {
        warn!(target: "starclient::frontend", status = error.status, "{}", error);
    }
}

pub type SharedFrontend = Arc<dyn Frontend>;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessFrontend;

impl Frontend for HeadlessFrontend {}

/// Holds the one error currently on screen. New errors are dropped while one is shown.
#[derive(Clone)]
pub struct ErrorSink {
    frontend: SharedFrontend,
    current: Arc<Mutex<Option<ServerError>>>,
    reload_on_dismiss: Arc<AtomicBool>,
}

impl ErrorSink {
    pub fn new(frontend: SharedFrontend) -> Self {
        Self { frontend, current: Arc::new(Mutex::new(None)), reload_on_dismiss: Arc::new(AtomicBool::new(false)) }
    }

    /// Show `error` unless another one is displayed. Returns whether it was shown.
    /// Errors raised while a login is being negotiated reload the page when dismissed.
    pub fn report(&self, error: ServerError, mid_negotiation: bool) -> bool {
        {
            let mut cur = self.current.lock();
            if cur.is_some() { return false; }
            *cur = Some(error.clone());
        }
        if mid_negotiation { self.reload_on_dismiss.store(true, Ordering::SeqCst); }
        self.frontend.show_error(&error);
        true
    }

    pub fn has_error(&self) -> bool { self.current.lock().is_some() }

    pub fn current(&self) -> Option<ServerError> { self.current.lock().clone() }

    pub fn dismiss(&self) {
        self.current.lock().take();
        if self.reload_on_dismiss.swap(false, Ordering::SeqCst) {
            self.frontend.reload();
        }
    }
}
