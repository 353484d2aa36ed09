use crate::relay_logic::config::Config;
use crate::relay_logic::state::AppState;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

/// Watchdog for stalled dataflow: when viewer sessions exist but no packet
/// has been forwarded within the threshold, log a warning so an operator can
/// look at the sources. Sessions themselves are left alone.
pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut check_interval = interval(Duration::from_secs(config.dataflow_check_interval_seconds));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Monitor service received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => {
                let current_time = tokio::time::Instant::now();
                let last_forward = app_state.last_forward();
                let sessions = app_state.live_sessions();

                if sessions > 0
                    && (current_time - last_forward)
                        > Duration::from_secs(config.dataflow_inactivity_threshold_seconds)
                {
                    log::warn!(
                        "No packets forwarded for {} seconds with {} viewer session(s) open; sources may be stalled.",
                        config.dataflow_inactivity_threshold_seconds,
                        sessions
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay_logic::directory::{Resource, ResolveError, ResourceDirectory, ResourceKind};
    use std::sync::Arc;

    struct EmptyDirectory;

    impl ResourceDirectory for EmptyDirectory {
        fn resolve(&self, kind: ResourceKind, path: &[String]) -> Result<Resource, ResolveError> {
            Err(ResolveError::ResourceNotFound {
                kind: kind.as_str(),
                path: path.join("/"),
            })
        }
    }

    #[tokio::test]
    async fn monitor_stops_on_shutdown() {
        let config = Config {
            dataflow_check_interval_seconds: 1,
            ..Config::default()
        };
        let state = AppState::new(Arc::new(EmptyDirectory), &config);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run(config, state, shutdown_rx));
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not shut down")
            .unwrap();
    }
}
