//! # Bidirectional messaging over HTTP long-polling
//!
//! An asynchronous, reliable, in-order messaging transport layered on plain
//! HTTP request/response, for peers that can only *initiate* connections —
//! clients behind firewalls or proxies that permit nothing but outbound
//! HTTP POST.
//!
//! The transport emulates a full-duplex socket by keeping exactly one HTTP
//! request outstanding at all times to serve as the return channel. Every
//! outbound POST does double duty: its request body carries queued client
//! messages, and its still-open response becomes the next return channel
//! once the server chooses to reply.
//!
//! # Protocol
//!
//! ```text
//! ┌──────────┐                                        ┌──────────┐
//! │  Client   │                                        │  Server   │
//! └────┬─────┘                                        └────┬─────┘
//!      │                                                   │
//!      │  POST /endpoint                                   │
//!      │  action=messages&id=<id>&l=2                      │
//!      │      &s0=1&t0=s&m0=...&s1=2&t1=s&m1=...           │
//!      │ ────────────────────────────────────────────────► │
//!      │                 ... (response held open) ...      │
//!      │  200 <messages>                                   │
//!      │        <message seq="1" type="s">...</message>    │
//!      │      </messages>                                  │
//!      │ ◄──────────────────────────────────────────────── │
//! ```
//!
//! # Architecture
//!
//! Two cooperating workers per socket hand the "current receive channel"
//! back and forth through a single monitored slot:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        HttpSocket                         │
//! │                                                           │
//! │  send(msgs) ──► outbound queue ──► sender worker          │
//! │                                      │  POST, donate ──┐  │
//! │                                      ▼                 │  │
//! │                              receive-channel slot ◄────┘  │
//! │                                      │                    │
//! │  on_messages(..) ◄── reorder ◄── receiver worker          │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The sender drains the queue, POSTs a batch, and parks the in-flight
//! exchange in the slot; the receiver claims it, reads and reorders the
//! XML reply, delivers a contiguous prefix upward, and frees the slot.
//! When the receiver finds the slot empty it kicks an empty POST, which is
//! how the very first receive channel gets established.

pub mod address;
pub mod context;
pub mod error;
pub mod http_client;
pub mod message;
pub mod socket;
pub mod tempfiles;
pub mod wire;

pub use address::UrlSocketAddress;
pub use context::{HttpSocketContext, SocketId};
pub use error::{MessageError, ProtocolError, SocketError};
pub use http_client::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use message::{FileMessage, Message, MessageKind};
pub use socket::HttpSocket;

use std::time::Duration;

/// Wire protocol name reported by every socket.
pub const PROTOCOL: &str = "http";

/// Time allowed for the connect phase of each POST.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Time the server may hold a response open before the poll is failed.
///
/// Servers normally answer well inside this window even when they have no
/// traffic for us.
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);
