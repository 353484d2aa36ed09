use crate::relay_logic::config::Config;
use crate::relay_logic::directory::ResourceDirectory;
use lib_stream::ResampleMode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Shared relay state. Cheap to clone; every field is behind an `Arc`.
/// Sessions are independent of each other — this carries only the directory
/// handle, relay-wide settings, and counters for ids and monitoring.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn ResourceDirectory>,
    pub resample_mode: ResampleMode,
    pub packet_queue_depth: usize,
    // Monotonic source for connection ids, never reused within the relay.
    next_connection: Arc<AtomicUsize>,
    live_sessions: Arc<AtomicUsize>,
    last_forward: Arc<Mutex<Instant>>,
}

impl AppState {
    pub fn new(directory: Arc<dyn ResourceDirectory>, config: &Config) -> Self {
        AppState {
            directory,
            resample_mode: config.resample_mode,
            packet_queue_depth: config.packet_queue_depth,
            next_connection: Arc::new(AtomicUsize::new(1)),
            live_sessions: Arc::new(AtomicUsize::new(0)),
            last_forward: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn next_connection_id(&self) -> String {
        format!("relay-{}", self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Bumps the live-session gauge for the lifetime of the returned guard.
    #[must_use]
    pub fn session_opened(&self) -> SessionGuard {
        self.live_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            live_sessions: Arc::clone(&self.live_sessions),
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::Relaxed)
    }

    pub fn note_forwarded(&self) {
        *self.last_forward.lock().unwrap() = Instant::now();
    }

    pub fn last_forward(&self) -> Instant {
        *self.last_forward.lock().unwrap()
    }
}

/// Decrements the live-session gauge on drop, so the count stays accurate
/// even when a session task unwinds.
pub struct SessionGuard {
    live_sessions: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.live_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}
