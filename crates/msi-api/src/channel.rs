//! Bidirectional message channel between the host and the embedded widget.
//!
//! A [`Channel`] offers fire-and-forget emits, emits with a single
//! acknowledgement callback, and named-event subscriptions. [`MessageChannel`]
//! implements it over a [`Port`]: a pair of frame queues that some transport
//! (the WebSocket pump, or an in-memory [`Port::pair`]) keeps fed.
//!
//! # Example
//!
//! ```rust,ignore
//! use msi_api::channel::{handler, request, Channel, MessageChannel};
//!
//! let (host, widget) = MessageChannel::pair();
//! widget.on("get:current:location", handler(|_, responder| {
//!     if let Some(r) = responder {
//!         r.ok(serde_json::json!({ "lng": 2.35, "lat": 48.85 }));
//!     }
//! }));
//!
//! let location = request(&*host, "get:current:location", None, Duration::from_secs(12)).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::Error;
use crate::frame::{into_outcome, AckResult, Frame};

/// Single-use acknowledgement callback. Invoked at most once per emit.
pub type Ack = Box<dyn FnOnce(AckResult) + Send + 'static>;

/// Subscriber for a named event. Receives the payload (`Null` when absent)
/// and, when the sender asked for an acknowledgement, a [`Responder`].
pub type Handler = Arc<dyn Fn(Value, Option<Responder>) + Send + Sync + 'static>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(Value, Option<Responder>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identifies one registration made with [`Channel::on`] or [`Channel::once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Identifies one acknowledgement awaited by [`Channel::emit_acked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckId(u64);

// ── ConnectionState ──────────────────────────────────────────────────

/// Lifecycle of the transport under a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected and the `bind` handshake was acknowledged.
    Bound,
}

impl ConnectionState {
    /// Whether emits are delivered in this state.
    pub fn is_established(self) -> bool {
        matches!(self, Self::Connected | Self::Bound)
    }
}

// ── Channel ──────────────────────────────────────────────────────────

/// The request/response + pub/sub transport abstraction.
///
/// Implementations hold no business state. Emitting on a channel whose
/// transport is not established is a silent no-op; callers gate on the
/// host's ready signal or impose their own timeout.
pub trait Channel: Send + Sync {
    /// Send `event`. When `ack` is supplied it is invoked exactly once with
    /// the remote outcome, unless the channel is torn down first.
    fn emit(&self, event: &str, payload: Option<Value>, ack: Option<Ack>);

    /// Send `event` and register `ack` for its acknowledgement. Returns the
    /// id to [`forget`](Self::forget) it with, or `None` when the emit was
    /// dropped (and `ack` with it).
    fn emit_acked(&self, event: &str, payload: Option<Value>, ack: Ack) -> Option<AckId>;

    /// Stop waiting for an acknowledgement. A later answer is dropped.
    fn forget(&self, id: AckId);

    /// Register `handler` for `event`. Handlers fire in registration order.
    fn on(&self, event: &str, handler: Handler) -> HandlerId;

    /// Like [`on`](Self::on), but deregisters after the first delivery.
    fn once(&self, event: &str, handler: Handler) -> HandlerId;

    /// Remove one registration, or every handler for `event` when `None`.
    fn off(&self, event: &str, handler: Option<HandlerId>);

    fn state(&self) -> ConnectionState;

    /// Tear the channel down: stop the transport, drop every subscription
    /// and every pending acknowledgement. Nothing is migrated.
    fn reset(&self);
}

/// Emit `event` and wait for its acknowledgement, bounded by `timeout`.
///
/// A timeout forgets the acknowledgement; if it arrives later it is dropped
/// without effect.
pub async fn request(
    channel: &dyn Channel,
    event: &str,
    payload: Option<Value>,
    timeout: Duration,
) -> Result<Value, Error> {
    if !channel.state().is_established() {
        return Err(Error::NotConnected);
    }

    let (tx, rx) = oneshot::channel();
    let ack_id = channel.emit_acked(
        event,
        payload,
        Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
    );

    match tokio::time::timeout(timeout, rx).await {
        Err(_) => {
            if let Some(id) = ack_id {
                channel.forget(id);
            }
            debug!(event, timeout_ms = millis(timeout), "acknowledgement timed out");
            Err(Error::Timeout {
                timeout_ms: millis(timeout),
            })
        }
        Ok(Err(_)) => Err(Error::ChannelReset),
        Ok(Ok(Ok(result))) => Ok(result),
        Ok(Ok(Err(reason))) => Err(Error::Remote(reason)),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Port ─────────────────────────────────────────────────────────────

/// The frame queues a [`MessageChannel`] reads from and writes to.
pub struct Port {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

impl Port {
    /// Two ports wired back to back, for in-process peers and tests.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: a_tx,
                inbound: a_rx,
            },
            Self {
                outbound: b_tx,
                inbound: b_rx,
            },
        )
    }
}

/// Opens a [`Port`] to the widget served at a URL.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &Url) -> impl Future<Output = Result<Port, Error>> + Send;
}

// ── Responder ────────────────────────────────────────────────────────

/// Answers one inbound emit that asked for an acknowledgement.
///
/// Cloned to every handler of the event; the first answer wins and later
/// ones are ignored.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<ResponderInner>,
}

struct ResponderInner {
    id: u64,
    outbound: mpsc::UnboundedSender<Frame>,
    answered: AtomicBool,
}

impl Responder {
    fn new(id: u64, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                id,
                outbound,
                answered: AtomicBool::new(false),
            }),
        }
    }

    /// Send the acknowledgement. Returns `false` if it was already answered
    /// or the transport is gone.
    pub fn respond(&self, outcome: AckResult) -> bool {
        if self.inner.answered.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner
            .outbound
            .send(Frame::ack(self.inner.id, outcome))
            .is_ok()
    }

    pub fn ok(&self, result: Value) -> bool {
        self.respond(Ok(result))
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.respond(Err(reason.into()))
    }

    pub fn is_answered(&self) -> bool {
        self.inner.answered.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.inner.id)
            .field("answered", &self.is_answered())
            .finish()
    }
}

// ── MessageChannel ───────────────────────────────────────────────────

struct Registration {
    id: HandlerId,
    handler: Handler,
    once: bool,
}

/// [`Channel`] over a [`Port`], with ack correlation handled locally.
///
/// A background task pumps inbound frames into the handler table until the
/// channel is reset or dropped.
pub struct MessageChannel {
    outbound: mpsc::UnboundedSender<Frame>,
    handlers: Mutex<HashMap<String, Vec<Registration>>>,
    pending: Mutex<HashMap<u64, Ack>>,
    next_ack: AtomicU64,
    next_handler: AtomicU64,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl MessageChannel {
    /// Wrap an established port and start pumping its inbound frames.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(port: Port) -> Arc<Self> {
        let Port { outbound, inbound } = port;
        let (state, _) = watch::channel(ConnectionState::Connected);
        let cancel = CancellationToken::new();

        let channel = Arc::new(Self {
            outbound,
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
            next_handler: AtomicU64::new(1),
            state,
            cancel: cancel.clone(),
        });

        tokio::spawn(pump(Arc::downgrade(&channel), inbound, cancel));
        channel
    }

    /// Two channels talking to each other in-process. The second one
    /// usually plays the widget in tests.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (a, b) = Port::pair();
        (Self::new(a), Self::new(b))
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Advance the connection state (e.g. to `Bound` after the handshake).
    /// Ignored once the channel has been reset.
    pub fn set_state(&self, next: ConnectionState) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state.send_replace(next);
    }

    /// Number of emits still waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        lock(&self.pending).len()
    }

    fn register(&self, event: &str, handler: Handler, once: bool) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers)
            .entry(event.to_owned())
            .or_default()
            .push(Registration { id, handler, once });
        id
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Emit {
                event,
                payload,
                ack,
            } => {
                let responder = ack.map(|id| Responder::new(id, self.outbound.clone()));

                // Snapshot under the lock, fire outside it: handlers may
                // call back into the channel.
                let fired: Vec<Handler> = {
                    let mut table = lock(&self.handlers);
                    match table.get_mut(&event) {
                        Some(list) => {
                            let fired = list.iter().map(|r| Arc::clone(&r.handler)).collect();
                            list.retain(|r| !r.once);
                            fired
                        }
                        None => Vec::new(),
                    }
                };

                if fired.is_empty() {
                    trace!(event = %event, "no handler registered");
                }

                let payload = payload.unwrap_or(Value::Null);
                for handler in fired {
                    handler(payload.clone(), responder.clone());
                }
            }
            Frame::Ack { id, error, result } => {
                let ack = lock(&self.pending).remove(&id);
                match ack {
                    Some(ack) => ack(into_outcome(error, result)),
                    None => trace!(id, "unknown or late acknowledgement dropped"),
                }
            }
        }
    }
}

impl Channel for MessageChannel {
    fn emit(&self, event: &str, payload: Option<Value>, ack: Option<Ack>) {
        match ack {
            Some(ack) => {
                let _ = self.emit_acked(event, payload, ack);
            }
            None => {
                if !self.state().is_established() {
                    debug!(event, "channel not established, emit dropped");
                    return;
                }
                if self.outbound.send(Frame::emit(event, payload, None)).is_err() {
                    warn!(event, "channel transport closed, emit dropped");
                }
            }
        }
    }

    fn emit_acked(&self, event: &str, payload: Option<Value>, ack: Ack) -> Option<AckId> {
        if !self.state().is_established() {
            debug!(event, "channel not established, emit dropped");
            return None;
        }

        let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
        lock(&self.pending).insert(id, ack);

        if self.outbound.send(Frame::emit(event, payload, Some(id))).is_err() {
            warn!(event, "channel transport closed, emit dropped");
            lock(&self.pending).remove(&id);
            return None;
        }
        Some(AckId(id))
    }

    fn forget(&self, id: AckId) {
        if lock(&self.pending).remove(&id.0).is_some() {
            trace!(id = id.0, "acknowledgement forgotten");
        }
    }

    fn on(&self, event: &str, handler: Handler) -> HandlerId {
        self.register(event, handler, false)
    }

    fn once(&self, event: &str, handler: Handler) -> HandlerId {
        self.register(event, handler, true)
    }

    fn off(&self, event: &str, handler: Option<HandlerId>) {
        let mut table = lock(&self.handlers);
        match handler {
            None => {
                table.remove(event);
            }
            Some(id) => {
                if let Some(list) = table.get_mut(event) {
                    list.retain(|r| r.id != id);
                    if list.is_empty() {
                        table.remove(event);
                    }
                }
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn reset(&self) {
        self.cancel.cancel();
        lock(&self.handlers).clear();
        let orphaned: Vec<Ack> = lock(&self.pending).drain().map(|(_, ack)| ack).collect();
        if !orphaned.is_empty() {
            debug!(count = orphaned.len(), "dropping pending acknowledgements");
        }
        drop(orphaned);
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read inbound frames until cancelled or the peer hangs up.
async fn pump(
    channel: Weak<MessageChannel>,
    mut inbound: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = inbound.recv() => {
                let Some(channel) = channel.upgrade() else { break };
                let Some(frame) = frame else {
                    debug!("channel peer hung up");
                    let orphaned: Vec<Ack> =
                        lock(&channel.pending).drain().map(|(_, ack)| ack).collect();
                    drop(orphaned);
                    channel.state.send_replace(ConnectionState::Disconnected);
                    break;
                };
                channel.dispatch(frame);
            }
        }
    }
}

/// Lock a mutex, recovering the data if a handler panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (
        mpsc::UnboundedSender<(&'static str, Value)>,
        mpsc::UnboundedReceiver<(&'static str, Value)>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn handlers_fire_in_registration_order() {
        let (host, widget) = MessageChannel::pair();
        let (tx, mut rx) = recorder();

        let first = tx.clone();
        widget.on("ping", handler(move |v, _| drop(first.send(("first", v)))));
        widget.on("ping", handler(move |v, _| drop(tx.send(("second", v)))));

        host.emit("ping", Some(json!(1)), None);

        assert_eq!(rx.recv().await.unwrap(), ("first", json!(1)));
        assert_eq!(rx.recv().await.unwrap(), ("second", json!(1)));
    }

    #[tokio::test]
    async fn once_deregisters_after_first_delivery() {
        let (host, widget) = MessageChannel::pair();
        let (tx, mut rx) = recorder();

        let once_tx = tx.clone();
        widget.once("tick", handler(move |v, _| drop(once_tx.send(("once", v)))));
        widget.on("tick", handler(move |v, _| drop(tx.send(("on", v)))));

        host.emit("tick", Some(json!(1)), None);
        host.emit("tick", Some(json!(2)), None);

        assert_eq!(rx.recv().await.unwrap(), ("once", json!(1)));
        assert_eq!(rx.recv().await.unwrap(), ("on", json!(1)));
        assert_eq!(rx.recv().await.unwrap(), ("on", json!(2)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn off_removes_one_or_all_handlers() {
        let (host, widget) = MessageChannel::pair();
        let (tx, mut rx) = recorder();

        let a = tx.clone();
        let id = widget.on("evt", handler(move |v, _| drop(a.send(("a", v)))));
        let b = tx.clone();
        widget.on("evt", handler(move |v, _| drop(b.send(("b", v)))));
        widget.on("other", handler(move |v, _| drop(tx.send(("other", v)))));

        widget.off("evt", Some(id));
        host.emit("evt", None, None);
        assert_eq!(rx.recv().await.unwrap(), ("b", Value::Null));

        widget.off("evt", None);
        host.emit("evt", None, None);
        host.emit("other", None, None);
        assert_eq!(rx.recv().await.unwrap(), ("other", Value::Null));
    }

    #[tokio::test]
    async fn request_resolves_with_remote_result() {
        let (host, widget) = MessageChannel::pair();
        widget.on(
            "resolve:place",
            handler(|payload, responder| {
                assert_eq!(payload, json!("Accra"));
                responder.unwrap().ok(json!({ "lng": -0.19, "lat": 5.6 }));
            }),
        );

        let result = request(&*host, "resolve:place", Some(json!("Accra")), Duration::from_secs(12))
            .await
            .unwrap();
        assert_eq!(result["lat"], 5.6);
        assert_eq!(host.pending_acks(), 0);
    }

    #[tokio::test]
    async fn request_surfaces_remote_error_verbatim() {
        let (host, widget) = MessageChannel::pair();
        widget.on(
            "set:map:style",
            handler(|_, responder| drop(responder.unwrap().fail("Unknown style"))),
        );

        let err = request(&*host, "set:map:style", Some(json!("neon")), Duration::from_secs(12))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote(ref r) if r == "Unknown style"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledgement_after_timeout_is_dropped() {
        let (host, widget) = MessageChannel::pair();
        let parked: Arc<Mutex<Option<Responder>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&parked);
        widget.on("slow", handler(move |_, r| *slot.lock().unwrap() = r));
        widget.on("fast", handler(|_, r| drop(r.unwrap().ok(json!(true)))));

        let err = request(&*host, "slow", None, Duration::from_secs(12)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { timeout_ms: 12_000 }));
        assert_eq!(host.pending_acks(), 0);

        let late = parked.lock().unwrap().take().unwrap();
        assert!(late.ok(json!("too late")));
        assert!(!late.ok(json!("twice")), "responder answers at most once");

        // Frames are ordered: once `fast` resolves, the late ack was consumed.
        request(&*host, "fast", None, Duration::from_secs(12)).await.unwrap();
        assert_eq!(host.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_requests_do_not_pile_up() {
        let (host, widget) = MessageChannel::pair();
        widget.on("navigation:navigate", handler(|_, _| {}));

        for _ in 0..50 {
            let err = request(&*host, "navigation:navigate", None, Duration::from_secs(12))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
        }
        assert_eq!(host.pending_acks(), 0);
    }

    #[tokio::test]
    async fn emit_after_reset_is_a_no_op() {
        let (host, widget) = MessageChannel::pair();
        let (tx, mut rx) = recorder();
        widget.on("evt", handler(move |v, _| drop(tx.send(("evt", v)))));

        host.reset();
        assert_eq!(host.state(), ConnectionState::Disconnected);
        host.emit("evt", None, Some(Box::new(|_| panic!("ack must not fire"))));

        let err = request(&*host, "evt", None, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_invalidates_pending_requests() {
        let (host, widget) = MessageChannel::pair();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        widget.on("hang", handler(move |_, r| drop(seen_tx.send(r))));

        let pending = {
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                request(&*host, "hang", None, Duration::from_secs(60)).await
            })
        };

        // Keep the responder alive so the widget never answers.
        let _responder = seen_rx.recv().await.unwrap();
        host.reset();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ChannelReset));
    }

    #[tokio::test]
    async fn set_state_is_ignored_after_reset() {
        let (host, _widget) = MessageChannel::pair();
        host.set_state(ConnectionState::Bound);
        assert_eq!(host.state(), ConnectionState::Bound);

        host.reset();
        host.set_state(ConnectionState::Bound);
        assert_eq!(host.state(), ConnectionState::Disconnected);
    }
}
