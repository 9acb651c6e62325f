//! Keyed debounce and throttle for async operations.
//!
//! The key is supplied by the caller and names the logical operation ("refresh-services"),
//! so closures recreated on every call still coalesce. Debounce is trailing-edge: only the
//! last call inside the window runs, with that call's captured arguments. Throttle is
//! leading-edge: the first call runs and later calls inside the window are dropped (or, for
//! `throttle_future`, share the first call's result).

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalesceKey(Cow<'static, str>);

impl CoalesceKey {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self { Self(name.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&'static str> for CoalesceKey {
    fn from(s: &'static str) -> Self { Self(Cow::Borrowed(s)) }
}

impl From<String> for CoalesceKey {
    fn from(s: String) -> Self { Self(Cow::Owned(s)) }
}

impl Display for CoalesceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoalesceError {
    /// A later call with the same key replaced this one before it ran.
    #[error("superseded by a later call")]
    Superseded,
}

struct ThrottleEntry {
    last: Instant,
    /// `Shared<BoxFuture<'static, T>>` of the call that opened the window, if it has a result.
    result: Option<Arc<dyn Any + Send + Sync>>,
}

#[derive(Default)]
struct CoalescerInner {
    debounced: Mutex<HashMap<CoalesceKey, (u64, JoinHandle<()>)>>,
    throttled: Mutex<HashMap<CoalesceKey, ThrottleEntry>>,
    seq: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Coalescer {
    inner: Arc<CoalescerInner>,
}

impl Coalescer {
    pub fn new() -> Self { Self::default() }

    /// Run `op` after `delay` unless another call with the same key arrives first.
    /// Once `op` has started it is no longer cancelled by later calls.
    pub fn debounce<F, Fut>(&self, key: impl Into<CoalesceKey>, delay: Duration, op: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let id = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let mut map = self.inner.debounced.lock();
        if let Some((_, prev)) = map.remove(&key) {
            prev.abort();
        }
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = inner.debounced.lock();
                if map.get(&task_key).is_some_and(|(cur, _)| *cur == id) {
                    map.remove(&task_key);
                }
            }
            op().await;
        });
        map.insert(key, (id, handle));
    }

    /// Debounce with a result. Calls replaced by a later one resolve to `Superseded`.
    pub fn debounce_future<T, F, Fut>(
        &self,
        key: impl Into<CoalesceKey>,
        delay: Duration,
        op: F,
    ) -> impl Future<Output = Result<T, CoalesceError>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.debounce(key, delay, move || async move {
            let _ = tx.send(op().await);
        });
        async move { rx.await.map_err(|_| CoalesceError::Superseded) }
    }

    /// Cancel a pending debounced call, if any.
    pub fn reset_debounce(&self, key: &CoalesceKey) {
        if let Some((_, handle)) = self.inner.debounced.lock().remove(key) {
            handle.abort();
        }
    }

    pub fn is_debouncing(&self, key: &CoalesceKey) -> bool { self.inner.debounced.lock().contains_key(key) }

    /// Spawn `op` unless a call with the same key ran less than `interval` ago.
    /// Returns whether it was started.
    pub fn throttle<F, Fut>(&self, key: impl Into<CoalesceKey>, interval: Duration, op: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let now = Instant::now();
        {
            let mut map = self.inner.throttled.lock();
            if map.get(&key).is_some_and(|e| now < e.last + interval) {
                tracing::trace!(target: "starclient::coalesce", key = %key, "throttled");
                return false;
            }
            map.insert(key, ThrottleEntry { last: now, result: None });
        }
        tokio::spawn(op());
        true
    }

    /// Throttle with a result: calls inside the window share the result of the call that
    /// opened it instead of running `op` again.
    pub fn throttle_future<T, F, Fut>(
        &self,
        key: impl Into<CoalesceKey>,
        interval: Duration,
        op: F,
    ) -> Shared<BoxFuture<'static, T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let key = key.into();
        let now = Instant::now();
        let mut map = self.inner.throttled.lock();
        if let Some(entry) = map.get(&key).filter(|e| now < e.last + interval) {
            if let Some(shared) = entry.result.as_ref().and_then(|r| r.downcast_ref::<Shared<BoxFuture<'static, T>>>()) {
                return shared.clone();
            }
        }
        let fut = op().boxed().shared();
        map.insert(key, ThrottleEntry { last: now, result: Some(Arc::new(fut.clone())) });
        fut
    }

    pub fn reset_throttle(&self, key: &CoalesceKey) { self.inner.throttled.lock().remove(key); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn debounced_calls_collapse_into_latest() {
        let c = Coalescer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for arg in 1..=3 {
            let tx = tx.clone();
            c.debounce("refresh", Duration::from_millis(250), move || async move { tx.send(arg).unwrap(); });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(c.is_debouncing(&"refresh".into()));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rx.try_recv().ok(), Some(3));
        assert!(rx.try_recv().is_err());
        assert!(!c.is_debouncing(&"refresh".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_future_supersedes_earlier_callers() {
        let c = Coalescer::new();
        let first = c.debounce_future("load", Duration::from_millis(250), || async { 1 });
        let second = c.debounce_future("load", Duration::from_millis(250), || async { 2 });
        assert_eq!(first.await, Err(CoalesceError::Superseded));
        assert_eq!(second.await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_do_not_interfere() {
        let c = Coalescer::new();
        let a = c.debounce_future("a", Duration::from_millis(50), || async { "a" });
        let b = c.debounce_future("b", Duration::from_millis(50), || async { "b" });
        assert_eq!(a.await, Ok("a"));
        assert_eq!(b.await, Ok("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_debounce_cancels_pending_call() {
        let c = Coalescer::new();
        let pending = c.debounce_future("x", Duration::from_millis(50), || async { 1 });
        c.reset_debounce(&"x".into());
        assert_eq!(pending.await, Err(CoalesceError::Superseded));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_is_leading_edge() {
        let c = Coalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let bump = |runs: &Arc<AtomicUsize>| {
            let runs = runs.clone();
            move || async move { runs.fetch_add(1, Ordering::SeqCst); }
        };
        assert!(c.throttle("stars", Duration::from_millis(250), bump(&runs)));
        assert!(!c.throttle("stars", Duration::from_millis(250), bump(&runs)));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(c.throttle("stars", Duration::from_millis(250), bump(&runs)));
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        c.reset_throttle(&"stars".into());
        assert!(c.throttle("stars", Duration::from_millis(250), bump(&runs)));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_future_shares_result_inside_window() {
        let c = Coalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let call = |c: &Coalescer, runs: &Arc<AtomicUsize>| {
            let runs = runs.clone();
            c.throttle_future("versions", Duration::from_millis(250), move || async move {
                runs.fetch_add(1, Ordering::SeqCst) + 1
            })
        };
        let (a, b) = tokio::join!(call(&c, &runs), call(&c, &runs));
        assert_eq!((a, b), (1, 1));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(call(&c, &runs).await, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
