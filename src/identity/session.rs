use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use super::principal::UserInfo;
use crate::storage::{SharedLocalStore, SELECTED_STAR_KEY};
use crate::tprintln;

pub type SessionToken = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    pub user: UserInfo,
    /// Optimistically true after login; a 403 with a valid token turns it off.
    pub is_admin: bool,
}

struct SessionInner {
    session: RwLock<Option<Session>>,
    target_member: RwLock<Option<String>>,
    store: SharedLocalStore,
    /// Bumped on every `set`/`clear`; dependents (the event channel) watch it.
    changes: watch::Sender<u64>,
}

/// Who am I, with what token, talking to which cluster member.
/// Writers: the login negotiator (`set`), the request client (`clear` on expiry, privilege
/// downgrade on 403) and explicit logout. Everyone else reads.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<SessionInner>,
}

impl SessionState {
    pub fn new(store: SharedLocalStore) -> Self {
        let target = store.get(SELECTED_STAR_KEY).filter(|s| !s.is_empty());
        let (changes, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(SessionInner {
                session: RwLock::new(None),
                target_member: RwLock::new(target),
                store,
                changes,
            }),
        }
    }

    pub fn get(&self) -> Option<Session> { self.inner.session.read().clone() }

    pub fn token(&self) -> Option<SessionToken> { self.inner.session.read().as_ref().map(|s| s.token.clone()) }

    pub fn user(&self) -> Option<UserInfo> { self.inner.session.read().as_ref().map(|s| s.user.clone()) }

    pub fn is_admin(&self) -> bool { self.inner.session.read().as_ref().is_some_and(|s| s.is_admin) }

    /// Replace the session wholesale and notify dependents.
    pub(crate) fn set(&self, user: UserInfo, token: SessionToken) -> Session {
        let session = Session { token, user, is_admin: true };
        *self.inner.session.write() = Some(session.clone());
        tprintln!("session.set user={}", session.user.name);
        self.inner.changes.send_modify(|v| *v += 1);
        session
    }

    /// Drop the session. Does not start a new login; the next request does that on demand.
    pub fn clear(&self) {
        let had = self.inner.session.write().take().is_some();
        if had {
            tprintln!("session.clear");
            self.inner.changes.send_modify(|v| *v += 1);
        }
    }

    pub(crate) fn downgrade_privilege(&self) {
        if let Some(s) = self.inner.session.write().as_mut() {
            s.is_admin = false;
        }
    }

    pub fn target_member(&self) -> Option<String> { self.inner.target_member.read().clone() }

    pub fn set_target_member(&self, name: Option<&str>) {
        let name = name.filter(|s| !s.is_empty()).map(str::to_string);
        match &name {
            Some(n) => self.inner.store.set(SELECTED_STAR_KEY, n),
            None => self.inner.store.remove(SELECTED_STAR_KEY),
        }
        *self.inner.target_member.write() = name;
    }

    /// Use `name` for this session without remembering it as the user's choice.
    pub(crate) fn adopt_target_member(&self, name: &str) {
        *self.inner.target_member.write() = Some(name.to_string()).filter(|s| !s.is_empty());
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> { self.inner.changes.subscribe() }
}
