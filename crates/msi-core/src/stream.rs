// ── Push streams ──
//
// `Stream<T>` is the primitive behind every live feed: location, peer
// direction, navigation, periferals. Data is pushed in with `sync` and
// fanned out synchronously to every subscriber in registration order.
// Closing is idempotent and travels downstream only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::CoreError;

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&CoreError) + Send + Sync>;
type CloseHook = Box<dyn FnOnce() + Send>;

/// Lock a mutex, recovering the data if a subscriber panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Type-erased view of a stream, for pipe links between streams of
/// different item types.
trait Link: Send + Sync {
    fn close(&self);
    fn is_active(&self) -> bool;
}

struct Inner<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    on_error: Mutex<Option<ErrorHandler>>,
    on_close: Mutex<Option<CloseHook>>,
    alive: AtomicBool,
    downstream: Mutex<Option<Arc<dyn Link>>>,
    upstream: Mutex<Option<Weak<dyn Link>>>,
}

impl<T: 'static> Link for Inner<T> {
    fn close(&self) {
        if self
            .alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        lock(&self.subscribers).clear();
        lock(&self.on_error).take();

        let hook = lock(&self.on_close).take();
        if let Some(hook) = hook {
            hook();
        }

        let downstream = lock(&self.downstream).take();
        if let Some(downstream) = downstream {
            downstream.close();
        }
    }

    fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// A live feed of `T` values.
///
/// Cloning yields another handle to the same stream.
pub struct Stream<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Handle that does not keep the stream alive.
pub struct WeakStream<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakStream<T> {
    pub fn upgrade(&self) -> Option<Stream<T>> {
        self.inner.upgrade().map(|inner| Stream { inner })
    }
}

impl<T: 'static> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("active", &self.is_active())
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Stream<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                on_error: Mutex::new(None),
                on_close: Mutex::new(None),
                alive: AtomicBool::new(true),
                downstream: Mutex::new(None),
                upstream: Mutex::new(None),
            }),
        }
    }

    /// Deliver `data` to every subscriber, in registration order.
    /// No-op once closed. A subscriber may close the stream; later
    /// subscribers then see nothing.
    pub fn sync(&self, data: &T) {
        if !self.is_active() {
            return;
        }
        let subscribers: Vec<Subscriber<T>> = lock(&self.inner.subscribers).clone();
        for subscriber in subscribers {
            if !self.is_active() {
                break;
            }
            subscriber(data);
        }
    }

    /// Add a data subscriber.
    pub fn on_data(&self, f: impl Fn(&T) + Send + Sync + 'static) -> &Self {
        if self.is_active() {
            lock(&self.inner.subscribers).push(Arc::new(f));
        }
        self
    }

    /// Install the error handler, replacing any previous one.
    pub fn on_error(&self, f: impl Fn(&CoreError) + Send + Sync + 'static) -> &Self {
        *lock(&self.inner.on_error) = Some(Arc::new(f));
        self
    }

    /// Install the close hook, replacing any previous one. Runs at most once.
    pub fn on_close(&self, f: impl FnOnce() + Send + 'static) -> &Self {
        *lock(&self.inner.on_close) = Some(Box::new(f));
        self
    }

    /// Report a data error. The stream stays open.
    pub fn error(&self, err: CoreError) {
        if !self.is_active() {
            return;
        }
        let handler = lock(&self.inner.on_error).clone();
        match handler {
            Some(handler) => handler(&err),
            None => tracing::warn!(error = %err, "Stream error"),
        }
    }

    /// Close the stream: run the close hook, then close the downstream.
    /// Repeat calls do nothing.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// A handle for tasks fed by this stream's own subscribers, which must
    /// not keep it alive.
    pub fn downgrade(&self) -> WeakStream<T> {
        WeakStream {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Make `other` this stream's downstream. Closing `self` closes
    /// `other`; closing `other` leaves `self` alone. Data is not forwarded.
    pub fn pipe<U: 'static>(&self, other: &Stream<U>) -> &Self {
        let up: Weak<dyn Link> = Arc::downgrade(&self.inner) as Weak<dyn Link>;
        *lock(&other.inner.upstream) = Some(up);
        let down: Arc<dyn Link> = Arc::clone(&other.inner) as Arc<dyn Link>;
        *lock(&self.inner.downstream) = Some(down);
        self
    }

    /// Whether the stream this one was piped from is still live.
    /// `None` when nothing was piped into it.
    pub fn upstream_active(&self) -> Option<bool> {
        let upstream = lock(&self.inner.upstream).clone()?;
        Some(upstream.upgrade().is_some_and(|u| u.is_active()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
