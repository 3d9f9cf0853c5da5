//! Receiver worker: claims donated exchanges, parses inbound batches, and
//! delivers messages upward in strict sequence order.

use std::pin::pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Exchange, Inner, ReceiveSlot};
use crate::error::SocketError;
use crate::http_client::HttpClient;
use crate::message::Message;
use crate::tempfiles::TempFileContext;
use crate::wire;

/// Run the receiver until the socket closes or a fatal error occurs.
///
/// Receiver departure always tears the socket down; there is no reconnect
/// at this layer.
pub(super) async fn run<C: HttpClient>(inner: Arc<Inner<C>>) {
    if let Err(error) = run_loop(&inner).await {
        if !inner.is_closed() {
            inner.call_on_error(error);
        }
    }
    inner.close();
}

async fn run_loop<C: HttpClient>(inner: &Arc<Inner<C>>) -> Result<(), SocketError> {
    let mut spill = TempFileContext::new();
    while !inner.is_closed() {
        let Some(exchange) = claim(inner).await else {
            return Ok(()); // closed while waiting
        };

        let outcome = consume(inner, exchange, &mut spill).await;

        // The channel is consumed either way; free the slot and wake the
        // sender before surfacing any error.
        {
            let mut monitor = inner.monitor.lock().unwrap();
            debug_assert!(
                matches!(monitor.slot, ReceiveSlot::Claimed),
                "receive slot must still hold the claimed exchange"
            );
            monitor.slot = ReceiveSlot::Empty;
            inner.monitor_changed.notify_waiters();
        }

        outcome?;
    }
    Ok(())
}

/// Wait until an exchange is parked and claim it, kicking an empty POST
/// whenever the slot is empty. The kicker is what bootstraps the very
/// first receive channel. Returns `None` once the socket closes.
async fn claim<C: HttpClient>(inner: &Arc<Inner<C>>) -> Option<Exchange> {
    loop {
        let mut notified = pin!(inner.monitor_changed.notified());
        notified.as_mut().enable();
        let kick = {
            let mut monitor = inner.monitor.lock().unwrap();
            if inner.is_closed() {
                return None;
            }
            if let Some(exchange) = monitor.slot.take_parked() {
                return Some(exchange);
            }
            monitor.slot.is_empty()
        };
        if kick {
            // No receive channel and no sender about to produce one.
            inner.enqueue_messages(Vec::new());
        }
        notified.await;
    }
}

/// Read one response off the claimed exchange, reorder its messages, and
/// deliver the contiguous prefix upward.
async fn consume<C: HttpClient>(
    inner: &Arc<Inner<C>>,
    mut exchange: Exchange,
    spill: &mut TempFileContext,
) -> Result<(), SocketError> {
    let response = tokio::select! {
        () = inner.cancel.cancelled() => {
            exchange.abort();
            return Ok(());
        }
        joined = &mut exchange => joined
            .map_err(|error| SocketError::Request(format!("exchange task failed: {error}")))??,
    };

    if response.status != 200 {
        return Err(SocketError::Status {
            status: response.status,
        });
    }
    trace!(bytes = response.body.len(), "receive channel answered");

    let batch = wire::parse_message_batch(&response.body)?;
    let mut decoded = Vec::with_capacity(batch.len());
    for wire_message in batch {
        let message = Message::decode(wire_message.kind, &wire_message.payload, spill)?;
        decoded.push((wire_message.seq, message));
    }

    // Buffer by server sequence, then pull off the contiguous prefix.
    let ready: Vec<Message> = {
        let mut inbound = inner.inbound.lock().unwrap();
        let inbound = &mut *inbound;
        for (seq, message) in decoded {
            // A sequence at or below the cursor was already delivered;
            // either way the server repeated itself.
            if seq < inbound.in_seq || inbound.buffer.insert(seq, message).is_some() {
                return Err(SocketError::DuplicateSequence { seq });
            }
        }
        let mut ready = Vec::with_capacity(inbound.buffer.len());
        while let Some(message) = inbound.buffer.remove(&inbound.in_seq) {
            ready.push(message);
            inbound.in_seq += 1;
        }
        ready
    };

    if !ready.is_empty() {
        debug!(count = ready.len(), "delivering in-order messages");
        let completion = inner.call_on_messages(ready);
        if spill.file_count() > 0 {
            // Spilled payloads must outlive the delivery that references
            // them; tie their deletion to the callback's completion and
            // start a fresh context for the next cycle.
            let used = std::mem::replace(spill, TempFileContext::new());
            dispose_after(completion, used);
        }
    }

    Ok(())
}

/// Delete a spill context's files once the delivery holding them is done.
fn dispose_after(completion: JoinHandle<()>, spill: TempFileContext) {
    tokio::spawn(async move {
        if completion.await.is_err() {
            warn!("delivery task failed before spill cleanup");
        }
        drop(spill);
    });
}
