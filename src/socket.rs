//! One established messaging connection over HTTP.
//!
//! A socket owns two cooperating workers coordinated through a single
//! monitor (a mutex plus a condition):
//!
//! ```text
//!   sender:   drain queue ─► POST batch ─► wait slot empty ─► park exchange
//!   receiver: wait slot parked ─► claim ─► read + reorder ─► free slot
//! ```
//!
//! The monitor guards the outbound queue and the receive-channel slot. The
//! slot holds at most one in-flight exchange; while the receiver is
//! consuming one, the slot stays occupied (`Claimed`) so the sender can
//! neither park a second exchange nor exit believing no return channel
//! exists. The sender only departs once the queue is empty *and* a channel
//! is outstanding, which guarantees the server can always reach us.

mod receiver;
mod sender;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

use crate::PROTOCOL;
use crate::address::UrlSocketAddress;
use crate::context::{HttpSocketContext, SocketId};
use crate::error::SocketError;
use crate::http_client::{HttpClient, HttpResponse};
use crate::message::Message;

/// Callback invoked once the receiver worker has been scheduled.
pub type OnStart<C> = Box<dyn FnOnce(HttpSocket<C>) + Send>;

/// Callback invoked when a worker hits a fatal error.
pub type OnError = Arc<dyn Fn(SocketError) + Send + Sync>;

/// Callback invoked with each in-order batch of inbound messages.
pub type OnMessages = Arc<dyn Fn(Vec<Message>) + Send + Sync>;

/// One established connection over HTTP.
///
/// Cheap to clone; clones share the same connection state. Sockets are
/// created through [`HttpSocketContext::socket`] once the server has
/// assigned an identifier, and must be [`start`](Self::start)ed from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct HttpSocket<C: HttpClient> {
    inner: Arc<Inner<C>>,
}

/// The in-flight HTTP exchange donated from the sender to the receiver.
///
/// The request bytes are already on the wire; the task resolves when the
/// server eventually answers.
type Exchange = JoinHandle<Result<HttpResponse, SocketError>>;

/// The single holder for the exchange awaiting the server's reply.
#[derive(Debug, Default)]
enum ReceiveSlot {
    /// No exchange outstanding.
    #[default]
    Empty,
    /// An exchange has been donated and awaits the receiver.
    Parked(Exchange),
    /// The receiver is consuming the donated exchange; the channel still
    /// counts as occupied until it finishes.
    Claimed,
}

impl ReceiveSlot {
    fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Claim a parked exchange, leaving the slot occupied.
    fn take_parked(&mut self) -> Option<Exchange> {
        if matches!(self, Self::Parked(_)) {
            match std::mem::replace(self, Self::Claimed) {
                Self::Parked(exchange) => Some(exchange),
                _ => None,
            }
        } else {
            None
        }
    }
}

/// State guarded by the socket's monitor.
struct MonitorState {
    slot: ReceiveSlot,
    /// Pending outbound messages; `Some` exactly while a sender worker is
    /// active.
    out_queue: Option<VecDeque<Message>>,
}

/// Inbound reordering state, guarded separately from the monitor.
struct InboundState {
    /// Out-of-order messages keyed by server sequence.
    buffer: BTreeMap<u64, Message>,
    /// Next server sequence to deliver upward.
    in_seq: u64,
}

struct Inner<C: HttpClient> {
    id: SocketId,
    endpoint: Url,
    address: UrlSocketAddress,
    connect_time: SystemTime,
    client: C,
    context: Weak<HttpSocketContext<C>>,

    monitor: Mutex<MonitorState>,
    /// Condition paired with `monitor`; always broadcast.
    monitor_changed: Notify,
    inbound: Mutex<InboundState>,
    /// Outbound sequence source; the first assigned value is 1.
    out_seq: AtomicU64,

    closed: AtomicBool,
    started: AtomicBool,
    /// Cancels blocked response reads when the socket closes.
    cancel: CancellationToken,

    on_messages: Mutex<Option<OnMessages>>,
    on_error: Mutex<Option<OnError>>,
}

impl<C: HttpClient> HttpSocket<C> {
    pub(crate) fn new(
        context: &Arc<HttpSocketContext<C>>,
        id: SocketId,
        connect_time: SystemTime,
        endpoint: Url,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                address: UrlSocketAddress::new(endpoint.clone()),
                id,
                endpoint,
                connect_time,
                client: context.client().clone(),
                context: Arc::downgrade(context),
                monitor: Mutex::new(MonitorState {
                    slot: ReceiveSlot::Empty,
                    out_queue: None,
                }),
                monitor_changed: Notify::new(),
                inbound: Mutex::new(InboundState {
                    buffer: BTreeMap::new(),
                    in_seq: 1,
                }),
                out_seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                on_messages: Mutex::new(None),
                on_error: Mutex::new(None),
            }),
        }
    }

    /// The wire protocol name.
    #[must_use]
    pub fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    /// The server-assigned identifier.
    #[must_use]
    pub fn id(&self) -> &SocketId {
        &self.inner.id
    }

    /// The endpoint address.
    #[must_use]
    pub fn address(&self) -> &UrlSocketAddress {
        &self.inner.address
    }

    /// When the session was established.
    #[must_use]
    pub fn connect_time(&self) -> SystemTime {
        self.inner.connect_time
    }

    /// Whether the socket has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Register the upward delivery callback, replacing any previous one.
    ///
    /// Batches arrive in strict sequence order. The callback runs on its
    /// own task; a panicking callback is logged and contained.
    pub fn on_messages(&self, callback: impl Fn(Vec<Message>) + Send + Sync + 'static) {
        *self.inner.on_messages.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Start the receiver worker.
    ///
    /// Idempotent. The receiver's first cycle finds no receive channel
    /// parked and kicks an empty POST, which bootstraps one. `on_start`
    /// runs once the worker is scheduled; all later failures are reported
    /// through `on_error`. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Closed`] if the socket was already closed;
    /// this is the only synchronous failure.
    pub fn start(
        &self,
        on_start: Option<OnStart<C>>,
        on_error: Option<OnError>,
    ) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        if let Some(on_error) = on_error {
            *self.inner.on_error.lock().unwrap() = Some(on_error);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let socket = self.clone();
        tokio::spawn(async move {
            if socket.is_closed() {
                socket.inner.call_on_error(SocketError::Closed);
            } else {
                tokio::spawn(receiver::run(Arc::clone(&socket.inner)));
            }
            if let Some(on_start) = on_start {
                let started = socket.clone();
                if panic::catch_unwind(AssertUnwindSafe(move || on_start(started))).is_err() {
                    error!("on_start callback panicked");
                }
            }
        });
        Ok(())
    }

    /// Enqueue an ordered batch for asynchronous transmission.
    ///
    /// Returns immediately; sequences are assigned later, as messages
    /// enter a POST body. After close this is a silent drop. Must be
    /// called from within a Tokio runtime.
    pub fn send(&self, messages: Vec<Message>) {
        self.inner.enqueue_messages(messages);
    }

    /// Enqueue a single message. See [`send`](Self::send).
    pub fn send_message(&self, message: Message) {
        self.send(vec![message]);
    }

    /// Close the socket.
    ///
    /// Idempotent. Wakes both workers, cancels any blocked response read,
    /// drops undelivered outbound messages, and deregisters from the
    /// owning context. No callback fires after this returns.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl<C: HttpClient> fmt::Debug for HttpSocket<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSocket")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<C: HttpClient> Inner<C> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next outbound sequence value: 1, 2, 3, ...
    fn next_out_seq(&self) -> u64 {
        self.out_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Append to the outbound queue, creating it (and spawning the sender
    /// worker) when absent.
    fn enqueue_messages(self: &Arc<Self>, messages: Vec<Message>) {
        if self.is_closed() {
            debug!(count = messages.len(), "dropping messages enqueued after close");
            return;
        }
        let spawn_sender = {
            let mut monitor = self.monitor.lock().unwrap();
            let first = monitor.out_queue.is_none();
            monitor
                .out_queue
                .get_or_insert_with(VecDeque::new)
                .extend(messages);
            first
        };
        if spawn_sender {
            tokio::spawn(sender::run(Arc::clone(self)));
        }
    }

    /// Report a fatal error upward. A panicking callback is contained.
    fn call_on_error(&self, error: SocketError) {
        let callback = self.on_error.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(error))).is_err() {
                    error!("on_error callback panicked");
                }
            }
            None => error!(%error, "socket failed with no error callback registered"),
        }
    }

    /// Deliver an in-order batch upward on its own task. The returned
    /// handle completes once the callback has run, which is what spill
    /// cleanup waits on.
    fn call_on_messages(&self, messages: Vec<Message>) -> JoinHandle<()> {
        let callback = self.on_messages.lock().unwrap().clone();
        tokio::spawn(async move {
            match callback {
                Some(callback) => {
                    if panic::catch_unwind(AssertUnwindSafe(|| callback(messages))).is_err() {
                        error!("on_messages callback panicked");
                    }
                }
                None => debug!(count = messages.len(), "no delivery callback registered"),
            }
        })
    }

    fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(id = %self.id, "closing socket");
        {
            let mut monitor = self.monitor.lock().unwrap();
            // Abort an exchange nobody has claimed; a claimed one is torn
            // down by the receiver through the cancellation token.
            if matches!(monitor.slot, ReceiveSlot::Parked(_)) {
                if let ReceiveSlot::Parked(exchange) =
                    std::mem::replace(&mut monitor.slot, ReceiveSlot::Empty)
                {
                    exchange.abort();
                }
            }
            monitor.out_queue = None;
        }
        self.cancel.cancel();
        self.monitor_changed.notify_waiters();
        *self.on_messages.lock().unwrap() = None;
        *self.on_error.lock().unwrap() = None;
        self.inbound.lock().unwrap().buffer.clear();
        if let Some(context) = self.context.upgrade() {
            context.remove(&self.id);
        }
    }
}
