//! # Source Adapter
//!
//! Bridges an externally pushed stream source to a viewer session. The source
//! drives two push events (metadata-update and data-packet) from its own
//! execution context; the adapter turns them into queued [`SourceEvent`]s the
//! session task drains, so no session-mutating logic ever runs on the foreign
//! context. Delivery is best-effort: when a slow viewer lets the queue back
//! up, whole packets are dropped, but metadata updates always get through.

use crate::relay_logic::model::PrecisionTime;
use lib_stream::StreamSri;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The peer side of the connection no longer exists. Teardown treats
    /// this as success.
    #[error("connection '{0}' is already gone")]
    AlreadyGone(String),
    #[error("connection id '{0}' is already in use on this port")]
    DuplicateConnection(String),
    #[error("source transport failure: {0}")]
    Transport(String),
}

/// Callback surface a source pushes into. Implementations must be cheap and
/// non-blocking; they are invoked on the source's own context.
pub trait PacketSink: Send + Sync {
    fn push_sri(&self, sri: StreamSri);
    fn push_packet(&self, words: Vec<f64>, timestamp: PrecisionTime, eos: bool, stream_id: &str);
}

/// One externally pushed stream source, e.g. an output port of a running
/// component. Exactly one connection per viewer session; connection ids must
/// be unique among concurrent connections on the same port.
pub trait StreamSource: Send + Sync {
    fn connect_port(
        &self,
        connection_id: &str,
        sink: Arc<dyn PacketSink>,
    ) -> Result<(), SourceError>;
    fn disconnect_port(&self, connection_id: &str) -> Result<(), SourceError>;
}

/// Push events after marshaling, in source order.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Metadata(StreamSri),
    Packet {
        words: Vec<f64>,
        timestamp: PrecisionTime,
        eos: bool,
        stream_id: String,
    },
}

/// Creates the bounded handoff between a source's push context and a session
/// task. `capacity` bounds queued *packets*; metadata bypasses the bound so
/// descriptor state can never be lost to backpressure.
pub fn event_queue(capacity: usize) -> (Arc<EventQueue>, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(EventQueue {
        tx,
        depth: Arc::clone(&depth),
        capacity: capacity.max(1),
        dropped: AtomicU64::new(0),
    });
    (queue, EventReceiver { rx, depth })
}

/// Sending half, handed to the source as its [`PacketSink`].
pub struct EventQueue {
    tx: mpsc::UnboundedSender<SourceEvent>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, event: SourceEvent, droppable: bool) {
        if droppable && self.depth.load(Ordering::Relaxed) >= self.capacity {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::trace!("Viewer queue full, dropping packet ({dropped} dropped so far)");
            return;
        }
        if self.tx.send(event).is_ok() {
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl PacketSink for EventQueue {
    fn push_sri(&self, sri: StreamSri) {
        self.enqueue(SourceEvent::Metadata(sri), false);
    }

    fn push_packet(&self, words: Vec<f64>, timestamp: PrecisionTime, eos: bool, stream_id: &str) {
        self.enqueue(
            SourceEvent::Packet {
                words,
                timestamp,
                eos,
                stream_id: stream_id.to_string(),
            },
            true,
        );
    }
}

/// Receiving half, drained on the session task.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<SourceEvent>,
    depth: Arc<AtomicUsize>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<SourceEvent> {
        let event = self.rx.recv().await;
        if event.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        event
    }
}

/// An established source connection. Unsubscribes exactly once, on explicit
/// release or on drop, and never lets teardown failures escape: a vanished
/// peer is success, anything else is logged and swallowed.
pub struct Subscription {
    source: Arc<dyn StreamSource>,
    connection_id: String,
    released: bool,
}

impl Subscription {
    pub fn subscribe(
        source: Arc<dyn StreamSource>,
        connection_id: &str,
        sink: Arc<dyn PacketSink>,
    ) -> Result<Self, SourceError> {
        source.connect_port(connection_id, sink)?;
        Ok(Subscription {
            source,
            connection_id: connection_id.to_string(),
            released: false,
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.source.disconnect_port(&self.connection_id) {
            Ok(()) => {}
            Err(SourceError::AlreadyGone(_)) => {
                log::debug!(
                    "Source for '{}' already gone on disconnect; ignoring",
                    self.connection_id
                );
            }
            Err(e) => {
                log::error!("Error disconnecting '{}': {}", self.connection_id, e);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
