//! Outbound scheduler
//!
//! Control messages and audio chunks share one bounded queue per session,
//! drained strictly in enqueue order by a single task, so a control frame
//! is never interleaved into a half-sent audio chunk. A full queue pauses
//! the producers (bounded channel backpressure); nothing is dropped for
//! backpressure reasons. Audio is dropped only via the generation stamp,
//! which an explicit cancellation bumps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::protocol::OutboundMessage;

/// One queued outbound unit.
#[derive(Debug)]
pub enum OutboundItem {
    Control(OutboundMessage),
    Audio { generation: u64, bytes: Vec<u8> },
    Ping,
}

/// Producer half of a session's outbound queue.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundItem>,
    generation: Arc<AtomicU64>,
}

/// Consumer half; owns the single drain loop for the connection.
pub struct OutboundDrain {
    rx: mpsc::Receiver<OutboundItem>,
    generation: Arc<AtomicU64>,
}

impl OutboundQueue {
    pub fn new(depth: usize) -> (Self, OutboundDrain) {
        let (tx, rx) = mpsc::channel(depth);
        let generation = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                generation: generation.clone(),
            },
            OutboundDrain { rx, generation },
        )
    }

    /// Enqueue a control message. Returns false if the connection is gone.
    pub async fn send_control(&self, msg: OutboundMessage) -> bool {
        self.tx.send(OutboundItem::Control(msg)).await.is_ok()
    }

    /// Enqueue an audio chunk stamped with the current generation.
    pub async fn send_audio(&self, bytes: Vec<u8>) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        self.tx
            .send(OutboundItem::Audio { generation, bytes })
            .await
            .is_ok()
    }

    pub async fn send_ping(&self) -> bool {
        self.tx.send(OutboundItem::Ping).await.is_ok()
    }

    /// Invalidate all queued and future audio from the previous generation.
    /// Called on barge-in and reset; queued control messages still drain.
    pub fn drop_pending_audio(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl OutboundDrain {
    /// Drain the queue onto the connection, in enqueue order. Runs until
    /// every producer is dropped or the transport rejects a send.
    pub async fn run<S>(mut self, mut sink: S)
    where
        S: Sink<Message> + Unpin,
    {
        while let Some(item) = self.rx.recv().await {
            let message = match item {
                OutboundItem::Control(msg) => Message::Text(msg.to_json()),
                OutboundItem::Audio { generation, bytes } => {
                    if generation != self.generation.load(Ordering::Acquire) {
                        trace!(generation, "dropping audio chunk from cancelled reply");
                        continue;
                    }
                    Message::Binary(bytes)
                }
                OutboundItem::Ping => Message::Ping(Vec::new()),
            };

            if sink.send(message).await.is_err() {
                debug!("outbound sink closed, stopping drain");
                return;
            }
        }
    }
}
