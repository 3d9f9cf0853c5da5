//! Scenario tests for the long-poll engine against a scripted transport.
//!
//! Every POST the engine makes surfaces here as a pending exchange that
//! the test answers by hand, so schedules that are awkward to reproduce
//! against a live server (out-of-order batches, duplicate sequences,
//! error statuses) are exact and deterministic.

#![allow(
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::unwrap_used,
    missing_docs,
    unreachable_pub
)]

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::BoxFuture;
use messaging_http_longpoll::{
    HttpClient, HttpResponse, HttpSocket, HttpSocketContext, Message, SocketError, SocketId,
};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

// ─── Scripted Transport ──────────────────────────────────────────────────────

/// One POST captured by the scripted transport, waiting for its answer.
struct Exchange {
    body: Vec<u8>,
    respond: oneshot::Sender<HttpResponse>,
}

impl Exchange {
    fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).expect("utf-8 body")
    }

    fn respond_xml(self, xml: &str) {
        self.respond_with(200, xml);
    }

    fn respond_with(self, status: u16, body: &str) {
        let _ = self.respond.send(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        });
    }
}

#[derive(Debug, thiserror::Error)]
#[error("scripted transport hung up")]
struct ScriptError;

#[derive(Debug, Clone)]
struct ScriptedClient {
    exchanges: async_channel::Sender<Exchange>,
}

fn scripted() -> (ScriptedClient, async_channel::Receiver<Exchange>) {
    let (exchanges, observed) = async_channel::unbounded();
    (ScriptedClient { exchanges }, observed)
}

impl HttpClient for ScriptedClient {
    type Error = ScriptError;

    fn post(
        &self,
        _url: &str,
        _headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> BoxFuture<'static, Result<HttpResponse, Self::Error>> {
        let exchanges = self.exchanges.clone();
        async move {
            let (respond, response) = oneshot::channel();
            exchanges
                .send(Exchange { body, respond })
                .await
                .map_err(|_| ScriptError)?;
            response.await.map_err(|_| ScriptError)
        }
        .boxed()
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Rig {
    socket: HttpSocket<ScriptedClient>,
    exchanges: async_channel::Receiver<Exchange>,
    delivered: async_channel::Receiver<Vec<Message>>,
    errors: async_channel::Receiver<SocketError>,
}

fn endpoint() -> Url {
    Url::parse("http://longpoll.test/endpoint").expect("endpoint url")
}

/// Build a started socket whose deliveries and errors drain into channels.
fn rig(id: &str) -> Rig {
    init_tracing();
    let (client, exchanges) = scripted();
    let context = HttpSocketContext::new(client);
    let socket = context
        .socket(SocketId::new(id), SystemTime::now(), endpoint())
        .expect("register socket");

    let (delivered_tx, delivered) = async_channel::unbounded();
    socket.on_messages(move |batch| {
        let _ = delivered_tx.try_send(batch);
    });

    let (errors_tx, errors) = async_channel::unbounded();
    socket
        .start(
            None,
            Some(Arc::new(move |error| {
                let _ = errors_tx.try_send(error);
            })),
        )
        .expect("start socket");

    Rig {
        socket,
        exchanges,
        delivered,
        errors,
    }
}

async fn next_exchange(rig: &Rig) -> Exchange {
    tokio::time::timeout(WAIT, rig.exchanges.recv())
        .await
        .expect("timed out waiting for a POST")
        .expect("transport dropped")
}

async fn no_exchange(rig: &Rig) {
    assert!(
        tokio::time::timeout(QUIET, rig.exchanges.recv()).await.is_err(),
        "unexpected POST"
    );
}

async fn next_delivery(rig: &Rig) -> Vec<Message> {
    tokio::time::timeout(WAIT, rig.delivered.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("delivery channel dropped")
}

async fn next_error(rig: &Rig) -> SocketError {
    tokio::time::timeout(WAIT, rig.errors.recv())
        .await
        .expect("timed out waiting for an error")
        .expect("error channel dropped")
}

async fn closed_soon(socket: &HttpSocket<ScriptedClient>) {
    for _ in 0..500 {
        if socket.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket never closed");
}

/// Pull the `(s<i>, m<i>)` pairs out of a POST body, in index order.
fn batch_entries(body: &str) -> Vec<(u64, String)> {
    let pairs: HashMap<String, String> =
        url::form_urlencoded::parse(body.as_bytes()).into_owned().collect();
    let len: usize = pairs["l"].parse().expect("l field");
    (0..len)
        .map(|i| {
            (
                pairs[&format!("s{i}")].parse().expect("s field"),
                pairs[&format!("m{i}")].clone(),
            )
        })
        .collect()
}

fn text(payload: &str) -> Message {
    Message::Text(payload.into())
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn cold_start_emits_an_empty_kicker() {
    let rig = rig("abc");

    // No traffic at all still produces a POST: the kicker that stands up
    // the first receive channel.
    let kicker = next_exchange(&rig).await;
    assert_eq!(kicker.body_str(), "action=messages&id=abc&l=0");
    kicker.respond_xml("<messages/>");

    // An empty reply delivers nothing and the engine re-establishes the
    // channel with another kicker.
    let kicker = next_exchange(&rig).await;
    assert_eq!(kicker.body_str(), "action=messages&id=abc&l=0");
    assert!(rig.delivered.is_empty());
    assert!(rig.errors.is_empty());

    rig.socket.close();
}

#[tokio::test]
async fn single_send_round_trip() {
    let rig = rig("abc");
    let receive_channel = next_exchange(&rig).await;

    rig.socket.send_message(text("hi"));
    let post = next_exchange(&rig).await;
    assert_eq!(post.body_str(), "action=messages&id=abc&l=1&s0=1&t0=s&m0=hi");

    // The server replies on the channel established earlier.
    receive_channel.respond_xml(r#"<messages><message seq="1" type="s">ok</message></messages>"#);
    assert_eq!(next_delivery(&rig).await, vec![text("ok")]);

    rig.socket.close();
}

#[tokio::test]
async fn out_of_order_batches_are_reordered() {
    let rig = rig("abc");

    let poll = next_exchange(&rig).await;
    poll.respond_xml(r#"<messages><message seq="2" type="s">B</message></messages>"#);

    // seq 2 alone is not deliverable; by the time the replacement poll is
    // out, nothing has been handed upward.
    let poll = next_exchange(&rig).await;
    assert!(rig.delivered.is_empty());

    poll.respond_xml(r#"<messages><message seq="1" type="s">A</message></messages>"#);
    assert_eq!(next_delivery(&rig).await, vec![text("A"), text("B")]);

    rig.socket.close();
}

#[tokio::test]
async fn duplicate_sequence_is_fatal() {
    let rig = rig("abc");

    let poll = next_exchange(&rig).await;
    poll.respond_xml(r#"<messages><message seq="1" type="s">first</message></messages>"#);
    assert_eq!(next_delivery(&rig).await, vec![text("first")]);

    let poll = next_exchange(&rig).await;
    poll.respond_xml(r#"<messages><message seq="1" type="s">again</message></messages>"#);

    assert!(matches!(
        next_error(&rig).await,
        SocketError::DuplicateSequence { seq: 1 }
    ));
    closed_soon(&rig.socket).await;

    // A closed socket drops sends on the floor.
    rig.socket.send_message(text("late"));
    no_exchange(&rig).await;
}

#[tokio::test]
async fn non_200_status_is_fatal() {
    let rig = rig("abc");

    let poll = next_exchange(&rig).await;
    poll.respond_with(503, "service unavailable");

    let error = next_error(&rig).await;
    assert!(matches!(error, SocketError::Status { status: 503 }));
    assert!(error.to_string().contains("503"));
    closed_soon(&rig.socket).await;

    rig.socket.send_message(text("late"));
    no_exchange(&rig).await;
}

#[tokio::test]
async fn batched_send_shares_one_post() {
    let rig = rig("abc");
    let receive_channel = next_exchange(&rig).await;

    rig.socket.send(vec![text("a"), text("b")]);
    let post = next_exchange(&rig).await;
    assert_eq!(
        post.body_str(),
        "action=messages&id=abc&l=2&s0=1&t0=s&m0=a&s1=2&t1=s&m1=b"
    );

    receive_channel.respond_xml("<messages/>");
    rig.socket.close();
}

#[tokio::test]
async fn concurrent_sends_never_gap_the_sequence() {
    let rig = rig("abc");
    let kicker = next_exchange(&rig).await;
    kicker.respond_xml("<messages/>");

    let sender_a = rig.socket.clone();
    let sender_b = rig.socket.clone();
    let task_a = tokio::spawn(async move { sender_a.send_message(text("a")) });
    let task_b = tokio::spawn(async move { sender_b.send_message(text("b")) });
    task_a.await.expect("send a");
    task_b.await.expect("send b");

    // However the two sends interleave with the drain, the assigned
    // sequences must come out 1 then 2 with no gaps or duplicates.
    let mut entries = Vec::new();
    while entries.len() < 2 {
        let exchange = next_exchange(&rig).await;
        entries.extend(batch_entries(exchange.body_str()));
        exchange.respond_xml("<messages/>");
    }

    let seqs: Vec<u64> = entries.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    let mut payloads: Vec<String> = entries.into_iter().map(|(_, payload)| payload).collect();
    payloads.sort();
    assert_eq!(payloads, vec!["a".to_owned(), "b".to_owned()]);

    rig.socket.close();
}

// ─── Invariants ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn at_most_one_receive_channel_outstanding() {
    let rig = rig("abc");

    let poll = next_exchange(&rig).await;
    // While that channel is unanswered, the engine must not open another.
    no_exchange(&rig).await;

    poll.respond_xml("<messages/>");
    let _replacement = next_exchange(&rig).await;

    rig.socket.close();
}

#[tokio::test]
async fn close_stops_polling_and_callbacks() {
    let rig = rig("abc");

    let poll = next_exchange(&rig).await;
    rig.socket.close();
    assert!(rig.socket.is_closed());

    // No further POSTs, no start, and a late server reply goes nowhere.
    no_exchange(&rig).await;
    assert!(matches!(
        rig.socket.start(None, None),
        Err(SocketError::Closed)
    ));
    poll.respond_xml(r#"<messages><message seq="1" type="s">late</message></messages>"#);
    tokio::time::sleep(QUIET).await;
    assert!(rig.delivered.is_empty());
    assert!(rig.errors.is_empty());
}

#[tokio::test]
async fn file_payloads_are_deleted_after_delivery() {
    init_tracing();
    let (client, exchanges) = scripted();
    let context = HttpSocketContext::new(client);
    let socket = context
        .socket(SocketId::new("abc"), SystemTime::now(), endpoint())
        .expect("register socket");

    // The callback reads the spilled file while it is guaranteed alive.
    let (seen_tx, seen) = async_channel::unbounded();
    socket.on_messages(move |batch| {
        for message in batch {
            if let Message::File(file) = message {
                let content = file.read().expect("spill readable during delivery");
                let _ = seen_tx.try_send((file.path().to_owned(), content));
            }
        }
    });
    socket.start(None, None).expect("start socket");

    let poll = tokio::time::timeout(WAIT, exchanges.recv())
        .await
        .expect("timed out")
        .expect("transport dropped");
    // base64 of b"spilled"
    poll.respond_xml(r#"<messages><message seq="1" type="f">c3BpbGxlZA==</message></messages>"#);

    let (path, content) = tokio::time::timeout(WAIT, seen.recv())
        .await
        .expect("timed out")
        .expect("delivery channel dropped");
    assert_eq!(content, b"spilled");

    // Once the delivery completes, the spill context goes with it.
    for _ in 0..500 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!path.exists(), "spilled file survived its delivery");

    socket.close();
}

#[tokio::test]
async fn panicking_delivery_callback_is_contained() {
    let rig = rig("abc");
    rig.socket.on_messages(|_| panic!("application bug"));

    let poll = next_exchange(&rig).await;
    poll.respond_xml(r#"<messages><message seq="1" type="s">boom</message></messages>"#);

    // The engine keeps running: re-register a sane callback and keep
    // receiving on the replacement channel.
    let poll = next_exchange(&rig).await;
    let (delivered_tx, delivered) = async_channel::unbounded();
    rig.socket.on_messages(move |batch| {
        let _ = delivered_tx.try_send(batch);
    });
    poll.respond_xml(r#"<messages><message seq="2" type="s">calm</message></messages>"#);

    let batch = tokio::time::timeout(WAIT, delivered.recv())
        .await
        .expect("timed out")
        .expect("delivery channel dropped");
    assert_eq!(batch, vec![text("calm")]);
    assert!(rig.errors.is_empty());
    assert!(!rig.socket.is_closed());

    rig.socket.close();
}

#[tokio::test]
async fn on_start_runs_once_scheduled() {
    init_tracing();
    let (client, _exchanges) = scripted();
    let context = HttpSocketContext::new(client);
    let socket = context
        .socket(SocketId::new("abc"), SystemTime::now(), endpoint())
        .expect("register socket");

    let (started_tx, started) = async_channel::unbounded();
    socket
        .start(
            Some(Box::new(move |socket| {
                let _ = started_tx.try_send(socket.id().clone());
            })),
            None,
        )
        .expect("start socket");

    let id = tokio::time::timeout(WAIT, started.recv())
        .await
        .expect("timed out")
        .expect("start channel dropped");
    assert_eq!(id.as_str(), "abc");

    // Starting again is a no-op, not an error.
    socket.start(None, None).expect("second start");
    socket.close();
}
