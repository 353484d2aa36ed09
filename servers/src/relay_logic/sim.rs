//! Built-in simulated sources, so the relay can run and be demoed without a
//! live signal-processing domain attached. Each source is a free-running
//! generator task that pushes packets to every connected viewer sink.

use crate::relay_logic::adapter::{PacketSink, SourceError, StreamSource};
use crate::relay_logic::directory::{
    PortDirection, PortEntry, ResolveError, Resource, ResourceDirectory, ResourceKind,
    STREAM_NAMESPACE,
};
use crate::relay_logic::model::PrecisionTime;
use lib_stream::{DataMode, StreamSri};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimKind {
    /// Scalar ramp, one 1000-word packet per tick.
    Ramp1D,
    /// Complex framed data: five frames of 512 words per packet.
    ComplexRaster,
}

pub struct SimSource {
    kind: SimKind,
    stream_id: String,
    sinks: Mutex<HashMap<String, Arc<dyn PacketSink>>>,
    tick: AtomicU64,
}

impl SimSource {
    pub fn new(kind: SimKind, stream_id: &str) -> Arc<Self> {
        Arc::new(SimSource {
            kind,
            stream_id: stream_id.to_string(),
            sinks: Mutex::new(HashMap::new()),
            tick: AtomicU64::new(0),
        })
    }

    fn sri(&self) -> StreamSri {
        let mut sri = StreamSri::new(&self.stream_id);
        if self.kind == SimKind::ComplexRaster {
            sri.mode = DataMode::Complex;
            sri.subsize = 512;
            sri.ydelta = 1.0;
        }
        sri
    }

    fn generate(&self, tick: u64) -> Vec<f64> {
        match self.kind {
            SimKind::Ramp1D => {
                // Rolling ramp so successive packets are distinguishable.
                (0..1000).map(|i| ((i + tick as usize) % 1000) as f64).collect()
            }
            SimKind::ComplexRaster => {
                let frames = 5;
                let mut words = Vec::with_capacity(frames * 512);
                for row in 0..frames {
                    for col in 0..256 {
                        let phase =
                            (tick as f64 + row as f64 * 0.1) * 0.05 + col as f64 * 0.02;
                        words.push(phase.cos());
                        words.push(phase.sin());
                    }
                }
                words
            }
        }
    }

    /// Starts the generator. Packets go to whatever sinks are connected at
    /// each tick; with no viewers the tick is skipped entirely.
    pub fn spawn(
        self: &Arc<Self>,
        interval_ms: u64,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let source = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick_interval = interval(Duration::from_millis(interval_ms.max(1)));
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        log::info!("Simulated source '{}' shutting down.", source.stream_id);
                        break;
                    }
                    _ = tick_interval.tick() => {
                        let sinks: Vec<Arc<dyn PacketSink>> = {
                            let guard = source.sinks.lock().unwrap();
                            guard.values().cloned().collect()
                        };
                        if sinks.is_empty() {
                            continue;
                        }
                        let tick = source.tick.fetch_add(1, Ordering::Relaxed);
                        let words = source.generate(tick);
                        let timestamp = PrecisionTime::now();
                        for sink in sinks {
                            sink.push_packet(words.clone(), timestamp, false, &source.stream_id);
                        }
                    }
                }
            }
        })
    }
}

impl StreamSource for SimSource {
    fn connect_port(
        &self,
        connection_id: &str,
        sink: Arc<dyn PacketSink>,
    ) -> Result<(), SourceError> {
        let mut sinks = self.sinks.lock().unwrap();
        if sinks.contains_key(connection_id) {
            return Err(SourceError::DuplicateConnection(connection_id.to_string()));
        }
        // New viewers get the descriptor up front, ahead of any data.
        sink.push_sri(self.sri());
        sinks.insert(connection_id.to_string(), sink);
        log::debug!(
            "Connected '{}' to simulated source '{}'",
            connection_id,
            self.stream_id
        );
        Ok(())
    }

    fn disconnect_port(&self, connection_id: &str) -> Result<(), SourceError> {
        let mut sinks = self.sinks.lock().unwrap();
        match sinks.remove(connection_id) {
            Some(_) => {
                log::debug!(
                    "Disconnected '{}' from simulated source '{}'",
                    connection_id,
                    self.stream_id
                );
                Ok(())
            }
            None => Err(SourceError::AlreadyGone(connection_id.to_string())),
        }
    }
}

/// Static directory over the simulated sources.
pub struct SimDirectory {
    resources: HashMap<(ResourceKind, String), Resource>,
    sources: Vec<Arc<SimSource>>,
}

impl SimDirectory {
    /// One demo component, `demo/siggen`, with a scalar port, a framed port,
    /// and two ports that exist only to be rejected (an input port and a
    /// non-streaming one).
    pub fn demo() -> Self {
        let ramp = SimSource::new(SimKind::Ramp1D, "sim-ramp");
        let raster = SimSource::new(SimKind::ComplexRaster, "sim-raster");

        let null = SimSource::new(SimKind::Ramp1D, "sim-null");
        let siggen = Resource {
            name: "siggen".to_string(),
            ports: vec![
                PortEntry {
                    name: "out-float".to_string(),
                    direction: PortDirection::Uses,
                    namespace: STREAM_NAMESPACE.to_string(),
                    element_type: "dataFloat".to_string(),
                    source: ramp.clone(),
                },
                PortEntry {
                    name: "out-raster".to_string(),
                    direction: PortDirection::Uses,
                    namespace: STREAM_NAMESPACE.to_string(),
                    element_type: "dataDouble".to_string(),
                    source: raster.clone(),
                },
                PortEntry {
                    name: "in-float".to_string(),
                    direction: PortDirection::Provides,
                    namespace: STREAM_NAMESPACE.to_string(),
                    element_type: "dataFloat".to_string(),
                    source: null.clone(),
                },
                PortEntry {
                    name: "rf-info".to_string(),
                    direction: PortDirection::Uses,
                    namespace: "FRONTEND".to_string(),
                    element_type: "RFInfo".to_string(),
                    source: null.clone(),
                },
            ],
        };

        let mut resources = HashMap::new();
        resources.insert(
            (ResourceKind::Component, "demo/siggen".to_string()),
            siggen,
        );

        SimDirectory {
            resources,
            sources: vec![ramp, raster],
        }
    }

    /// Starts every generator; the relay keeps the handles for shutdown.
    pub fn spawn_sources(
        &self,
        interval_ms: u64,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        self.sources
            .iter()
            .map(|s| s.spawn(interval_ms, shutdown.subscribe()))
            .collect()
    }
}

impl ResourceDirectory for SimDirectory {
    fn resolve(&self, kind: ResourceKind, path: &[String]) -> Result<Resource, ResolveError> {
        let key = (kind, path.join("/"));
        self.resources
            .get(&key)
            .cloned()
            .ok_or(ResolveError::ResourceNotFound {
                kind: kind.as_str(),
                path: key.1,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay_logic::adapter::event_queue;
    use crate::relay_logic::directory::select_stream_port;

    #[test]
    fn duplicate_connection_is_rejected() {
        let source = SimSource::new(SimKind::Ramp1D, "s");
        let (sink_a, _rx_a) = event_queue(4);
        let (sink_b, _rx_b) = event_queue(4);

        source.connect_port("c1", sink_a).unwrap();
        assert!(matches!(
            source.connect_port("c1", sink_b),
            Err(SourceError::DuplicateConnection(_))
        ));
    }

    #[test]
    fn disconnect_of_unknown_connection_is_already_gone() {
        let source = SimSource::new(SimKind::Ramp1D, "s");
        assert!(matches!(
            source.disconnect_port("nope"),
            Err(SourceError::AlreadyGone(_))
        ));
    }

    #[tokio::test]
    async fn connect_delivers_sri_before_any_packet() {
        let source = SimSource::new(SimKind::ComplexRaster, "raster");
        let (sink, mut rx) = event_queue(4);
        source.connect_port("c1", sink).unwrap();

        match rx.recv().await.unwrap() {
            crate::relay_logic::adapter::SourceEvent::Metadata(sri) => {
                assert_eq!(sri.stream_id, "raster");
                assert_eq!(sri.subsize, 512);
                assert!(sri.mode.is_complex());
            }
            other => panic!("expected metadata first, got {other:?}"),
        }
    }

    #[test]
    fn raster_packets_are_five_full_frames() {
        let source = SimSource::new(SimKind::ComplexRaster, "raster");
        let words = source.generate(0);
        assert_eq!(words.len(), 5 * 512);
    }

    #[test]
    fn demo_directory_resolves_siggen() {
        let directory = SimDirectory::demo();
        let path = vec!["demo".to_string(), "siggen".to_string()];
        let resource = directory.resolve(ResourceKind::Component, &path).unwrap();

        let port = select_stream_port(&resource, "out-float").unwrap();
        assert_eq!(port.element_type, "dataFloat");

        assert!(directory
            .resolve(ResourceKind::Device, &path)
            .is_err());
    }
}
