use anyhow::Result;
use std::sync::Arc;
use tokio::signal;

mod relay_logic;
use relay_logic::{config, downstream, logger, monitor, sim, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir, &config.log_level)?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let directory = sim::SimDirectory::demo();
    let source_handles = directory.spawn_sources(config.sim_interval_ms, &shutdown_tx);
    let app_state = state::AppState::new(Arc::new(directory), &config);

    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let monitor_handle = tokio::spawn(monitor::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let _ = tokio::try_join!(downstream_handle, monitor_handle);
    for handle in source_handles {
        let _ = handle.await;
    }

    log::info!("Shutdown complete.");
    Ok(())
}
