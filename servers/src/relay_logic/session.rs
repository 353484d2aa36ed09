//! # Viewer Session
//!
//! One session per connected viewer: it owns the source subscription, the
//! per-axis viewport state, and the last descriptor seen per `streamID`. The
//! session task serializes control handling and packet processing, so a
//! packet always observes fully-committed viewport state. All per-packet and
//! per-message faults stay local to the session; only resolution failures and
//! the viewer's own disconnect end it.

use crate::relay_logic::adapter::{EventReceiver, SourceEvent, Subscription};
use crate::relay_logic::model::{ControlMessage, ErrorPayload, PrecisionTime, StreamPacket};
use crate::relay_logic::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use lib_stream::{limit, AxisViewport, LimitSettings, ResampleMode, StreamSri};
use std::collections::HashMap;

struct SriEntry {
    sri: StreamSri,
    /// Pending change announcement, consumed by the next packet delivery.
    changed: bool,
}

pub struct ViewerSession {
    connection_id: String,
    element_type: String,
    resample_mode: ResampleMode,
    x: AxisViewport,
    y: AxisViewport,
    sris: HashMap<String, SriEntry>,
}

impl ViewerSession {
    pub fn new(connection_id: &str, element_type: &str, resample_mode: ResampleMode) -> Self {
        ViewerSession {
            connection_id: connection_id.to_string(),
            element_type: element_type.to_string(),
            resample_mode,
            x: AxisViewport::new(),
            y: AxisViewport::new(),
            sris: HashMap::new(),
        }
    }

    /// Applies one inbound control message. Returns a payload to send back
    /// when the message could not be understood; the session continues either
    /// way.
    pub fn handle_control(&mut self, text: &str) -> Option<ErrorPayload> {
        let message: ControlMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[{}] Unrecognized control message: {}", self.connection_id, e);
                return Some(ErrorPayload::new("BadControl", e.to_string()));
            }
        };

        match message {
            ControlMessage::XMaxSamples { value } => {
                self.x.set_max(value);
                log::info!("[{}] X output limited to {:?} samples", self.connection_id, self.x.max_samples());
            }
            ControlMessage::YMaxSamples { value } => {
                self.y.set_max(value);
                log::info!("[{}] Y output limited to {:?} samples", self.connection_id, self.y.max_samples());
            }
            ControlMessage::XBeginIndex { value } => stage(&mut self.x, value, true, &self.connection_id),
            ControlMessage::XEndIndex { value } => stage(&mut self.x, value, false, &self.connection_id),
            ControlMessage::YBeginIndex { value } => stage(&mut self.y, value, true, &self.connection_id),
            ControlMessage::YEndIndex { value } => stage(&mut self.y, value, false, &self.connection_id),
            ControlMessage::XZoomIn => self.x.zoom_in(),
            ControlMessage::XZoomReset => self.x.zoom_reset(),
            ControlMessage::YZoomIn => self.y.zoom_in(),
            ControlMessage::YZoomReset => self.y.zoom_reset(),
            ControlMessage::MaxPps { .. } => {
                log::warn!("[{}] Packets per second (PPS) not implemented yet.", self.connection_id);
            }
        }
        None
    }

    /// Replaces the cached descriptor for its stream and remembers whether
    /// downstream must be told. A first-seen descriptor always counts as
    /// changed.
    pub fn handle_metadata(&mut self, sri: StreamSri) {
        let changed = match self.sris.get(&sri.stream_id) {
            Some(entry) => entry.sri.differs(&sri),
            None => true,
        };
        self.sris
            .insert(sri.stream_id.clone(), SriEntry { sri, changed });
    }

    /// Runs the engine over one packet with the currently active viewport and
    /// packages the result for delivery.
    pub fn handle_packet(
        &mut self,
        words: Vec<f64>,
        timestamp: PrecisionTime,
        eos: bool,
        stream_id: &str,
    ) -> StreamPacket {
        if !self.sris.contains_key(stream_id) {
            log::warn!(
                "[{}] Packet for '{}' arrived before its metadata; using defaults",
                self.connection_id,
                stream_id
            );
            self.handle_metadata(StreamSri::new(stream_id));
        }
        // Present per the insert above.
        let entry = self.sris.get_mut(stream_id).unwrap();

        let settings = LimitSettings {
            x: self.x.limit(),
            y: self.y.limit(),
            mode: self.resample_mode,
        };
        let limited = limit(&words, &entry.sri, &settings);

        self.x.record_factor(limited.x_factor);
        self.y.record_factor(limited.y_factor);

        if !limited.diagnostics.is_empty() {
            log::warn!(
                "[{}] Engine diagnostics for '{}': {}",
                self.connection_id,
                stream_id,
                limited.diagnostics.trim_end()
            );
        }

        let sri_changed = entry.changed || limited.sri_changed;
        entry.changed = false;

        StreamPacket {
            stream_id: stream_id.to_string(),
            timestamp,
            eos,
            sri_changed,
            sri: limited.sri,
            element_type: self.element_type.clone(),
            data_buffer: limited.data,
        }
    }

    /// Drives the session to completion: control messages from the viewer
    /// and marshaled source events, serialized on this task. Returns when
    /// either side disconnects; the subscription is released exactly once on
    /// the way out.
    pub async fn run(
        mut self,
        mut socket: WebSocket,
        mut events: EventReceiver,
        mut subscription: Subscription,
        state: AppState,
    ) {
        loop {
            tokio::select! {
                msg = socket.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(payload) = self.handle_control(text.as_str()) {
                                if socket.send(Message::Text(payload.to_json().into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::debug!("[{}] Viewer socket error: {}", self.connection_id, e);
                            break;
                        }
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(SourceEvent::Metadata(sri)) => self.handle_metadata(sri),
                        Some(SourceEvent::Packet { words, timestamp, eos, stream_id }) => {
                            let packet = self.handle_packet(words, timestamp, eos, &stream_id);
                            match serde_json::to_string(&packet) {
                                Ok(json) => {
                                    // Best-effort: a failed send means the viewer
                                    // is gone, so tear the session down.
                                    if socket.send(Message::Text(json.into())).await.is_err() {
                                        log::debug!("[{}] Viewer gone mid-send; closing", self.connection_id);
                                        break;
                                    }
                                    state.note_forwarded();
                                }
                                Err(e) => {
                                    log::error!("[{}] Failed to serialize packet: {}", self.connection_id, e);
                                }
                            }
                        }
                        None => {
                            log::debug!("[{}] Source side closed", self.connection_id);
                            break;
                        }
                    }
                }
            }
        }

        subscription.unsubscribe();
    }
}

/// Stages one index, translating negative values away rather than erroring:
/// out-of-range indices are an ignore-with-diagnostic case, not a fault.
fn stage(axis: &mut AxisViewport, value: i64, is_begin: bool, connection_id: &str) {
    if value < 0 {
        log::warn!("[{connection_id}] Ignoring negative viewport index {value}");
        return;
    }
    if is_begin {
        axis.stage_begin(value as usize);
    } else {
        axis.stage_end(value as usize);
    }
}
