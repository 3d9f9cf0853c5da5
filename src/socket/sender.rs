//! Sender worker: drains the outbound queue and donates each POST's
//! in-flight exchange as the next receive channel.

use std::pin::pin;
use std::sync::Arc;

use tracing::{debug, trace};

use super::{Exchange, Inner, ReceiveSlot};
use crate::error::SocketError;
use crate::http_client::HttpClient;
use crate::message::Message;
use crate::wire;

/// Run the sender until the queue drains with a receive channel
/// outstanding, the socket closes, or a fatal error occurs.
///
/// There is at most one sender per socket: it is spawned when the queue is
/// created and its exit destroys the queue, so a later send spawns a fresh
/// one.
pub(super) async fn run<C: HttpClient>(inner: Arc<Inner<C>>) {
    if let Err(error) = run_loop(&inner).await {
        if !inner.is_closed() {
            inner.call_on_error(error);
            inner.close();
        }
    }
}

async fn run_loop<C: HttpClient>(inner: &Arc<Inner<C>>) -> Result<(), SocketError> {
    while !inner.is_closed() {
        // Drain everything queued, or exit once the queue is empty and a
        // receive channel is already outstanding. Departing only then
        // means the server always keeps a way to reach us.
        let batch: Vec<Message> = {
            let mut monitor = inner.monitor.lock().unwrap();
            let monitor = &mut *monitor;
            let Some(queue) = monitor.out_queue.as_mut() else {
                return Ok(());
            };
            if queue.is_empty() && !monitor.slot.is_empty() {
                monitor.out_queue = None;
                debug!("outbound queue drained, sender exiting");
                return Ok(());
            }
            queue.drain(..).collect()
        };

        // Sequences are assigned here, as messages enter the body, not at
        // enqueue time.
        let entries: Vec<(u64, Message)> = batch
            .into_iter()
            .map(|message| (inner.next_out_seq(), message))
            .collect();
        let body = wire::encode_post_body(inner.id.as_str(), &entries)?;
        trace!(messages = entries.len(), bytes = body.len(), "posting batch");

        // Spawning puts the request on the wire now; the response stays
        // unread until the receiver claims the exchange.
        let request = inner.client.post(
            inner.endpoint.as_str(),
            &[("content-type", wire::FORM_CONTENT_TYPE)],
            body,
        );
        let exchange: Exchange = tokio::spawn(async move {
            request
                .await
                .map_err(|error| SocketError::Request(error.to_string()))
        });

        if !donate(inner, exchange).await {
            return Ok(());
        }
    }
    Ok(())
}

/// Wait for the receive-channel slot to empty, then park the exchange and
/// signal. Returns `false` when the socket closed first, in which case the
/// exchange is aborted.
async fn donate<C: HttpClient>(inner: &Inner<C>, exchange: Exchange) -> bool {
    let mut exchange = Some(exchange);
    loop {
        let mut notified = pin!(inner.monitor_changed.notified());
        notified.as_mut().enable();
        {
            let mut monitor = inner.monitor.lock().unwrap();
            if inner.is_closed() {
                if let Some(exchange) = exchange.take() {
                    exchange.abort();
                }
                return false;
            }
            if monitor.slot.is_empty() {
                if let Some(exchange) = exchange.take() {
                    monitor.slot = ReceiveSlot::Parked(exchange);
                }
                inner.monitor_changed.notify_waiters();
                return true;
            }
        }
        notified.await;
    }
}
