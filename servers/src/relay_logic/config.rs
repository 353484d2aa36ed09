use clap::Parser;
use lib_stream::ResampleMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Raw configuration sources: CLI flags, environment variables and the JSON
/// config file all deserialize into this optional form before merging.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Sample-stream relay server", version)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigArgs {
    #[clap(long, env = "RELAY_PORT", help = "Port to listen on for viewer connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RELAY_QUEUE_DEPTH", help = "Per-session packet queue depth before whole packets are dropped.")]
    pub packet_queue_depth: Option<usize>,

    #[clap(long, env = "RELAY_RESAMPLE_MODE", help = "Decimation mode: mean, stride or interp (reserved).")]
    pub resample_mode: Option<String>,

    #[clap(long, env = "RELAY_SIM_INTERVAL_MS", help = "Packet interval for the built-in simulated sources, in milliseconds.")]
    pub sim_interval_ms: Option<u64>,

    #[clap(long, env = "RELAY_DATAFLOW_CHECK_INTERVAL_SECONDS", help = "Interval in seconds to check relay dataflow.")]
    pub dataflow_check_interval_seconds: Option<u64>,

    #[clap(long, env = "RELAY_DATAFLOW_INACTIVITY_THRESHOLD_SECONDS", help = "Seconds of no forwarded packets (with sessions open) before a warning is logged.")]
    pub dataflow_inactivity_threshold_seconds: Option<u64>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl ConfigArgs {
    // Merge two ConfigArgs, where 'other' overrides 'self' for Some values
    fn merge(self, other: ConfigArgs) -> ConfigArgs {
        ConfigArgs {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            packet_queue_depth: other.packet_queue_depth.or(self.packet_queue_depth),
            resample_mode: other.resample_mode.or(self.resample_mode),
            sim_interval_ms: other.sim_interval_ms.or(self.sim_interval_ms),
            dataflow_check_interval_seconds: other
                .dataflow_check_interval_seconds
                .or(self.dataflow_check_interval_seconds),
            dataflow_inactivity_threshold_seconds: other
                .dataflow_inactivity_threshold_seconds
                .or(self.dataflow_inactivity_threshold_seconds),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }
}

/// Fully resolved configuration used by the running relay.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub packet_queue_depth: usize,
    pub resample_mode: ResampleMode,
    pub sim_interval_ms: u64,
    pub dataflow_check_interval_seconds: u64,
    pub dataflow_inactivity_threshold_seconds: u64,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
            packet_queue_depth: 64,
            resample_mode: ResampleMode::Mean,
            sim_interval_ms: 250,
            dataflow_check_interval_seconds: 10,
            dataflow_inactivity_threshold_seconds: 60,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

pub fn load_config() -> Config {
    // 1. CLI/env first, to pick up a config file path override early.
    let cli_args = ConfigArgs::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_relay.conf"));

    // 2. Config file under CLI/env.
    let mut merged = ConfigArgs::default();
    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<ConfigArgs>(&config_str) {
                Ok(file_args) => merged = merged.merge(file_args),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }
    merged = merged.merge(cli_args);

    resolve(merged)
}

fn resolve(args: ConfigArgs) -> Config {
    let defaults = Config::default();

    let resample_mode = match args.resample_mode.as_deref() {
        None => defaults.resample_mode,
        Some("mean") => ResampleMode::Mean,
        Some("stride") => ResampleMode::Stride,
        Some("interp") => ResampleMode::Interp,
        Some(other) => {
            log::warn!("Unknown resample mode '{other}', using mean");
            ResampleMode::Mean
        }
    };

    // Default TLS paths from ~/.letsencrypt, only when both files exist.
    let (tls_cert_path, tls_key_path) = match (args.tls_cert_path, args.tls_key_path) {
        (Some(cert), Some(key)) => (Some(cert), Some(key)),
        (cert, key) => {
            let letsencrypt = dirs::home_dir().map(|home| home.join(".letsencrypt"));
            let default_cert = letsencrypt.as_ref().map(|d| d.join("fullchain.pem"));
            let default_key = letsencrypt.as_ref().map(|d| d.join("privkey.pem"));
            let cert = cert.or_else(|| default_cert.filter(|p| p.exists()));
            let key = key.or_else(|| default_key.filter(|p| p.exists()));
            match (cert, key) {
                (Some(cert), Some(key)) => (Some(cert), Some(key)),
                _ => (None, None),
            }
        }
    };

    Config {
        port: args.port.unwrap_or(defaults.port),
        log_dir: args.log_dir.unwrap_or(defaults.log_dir),
        log_level: args.log_level.unwrap_or(defaults.log_level),
        packet_queue_depth: args
            .packet_queue_depth
            .unwrap_or(defaults.packet_queue_depth),
        resample_mode,
        sim_interval_ms: args.sim_interval_ms.unwrap_or(defaults.sim_interval_ms),
        dataflow_check_interval_seconds: args
            .dataflow_check_interval_seconds
            .unwrap_or(defaults.dataflow_check_interval_seconds),
        dataflow_inactivity_threshold_seconds: args
            .dataflow_inactivity_threshold_seconds
            .unwrap_or(defaults.dataflow_inactivity_threshold_seconds),
        tls_cert_path,
        tls_key_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_override_values() {
        let base = ConfigArgs {
            port: Some(8080),
            log_level: Some("info".to_string()),
            ..Default::default()
        };
        let over = ConfigArgs {
            port: Some(9000),
            resample_mode: Some("stride".to_string()),
            ..Default::default()
        };

        let merged = base.merge(over);
        assert_eq!(merged.port, Some(9000));
        assert_eq!(merged.log_level.as_deref(), Some("info"));
        assert_eq!(merged.resample_mode.as_deref(), Some("stride"));
    }

    #[test]
    fn resolve_applies_defaults_and_parses_mode() {
        let config = resolve(ConfigArgs {
            resample_mode: Some("stride".to_string()),
            ..Default::default()
        });
        assert_eq!(config.port, 8080);
        assert_eq!(config.packet_queue_depth, 64);
        assert_eq!(config.resample_mode, ResampleMode::Stride);
    }

    #[test]
    fn unknown_mode_falls_back_to_mean() {
        let config = resolve(ConfigArgs {
            resample_mode: Some("bicubic".to_string()),
            ..Default::default()
        });
        assert_eq!(config.resample_mode, ResampleMode::Mean);
    }

    #[test]
    fn config_file_form_is_camel_case() {
        let args: ConfigArgs = serde_json::from_str(
            r#"{"port": 9001, "packetQueueDepth": 16, "resampleMode": "mean"}"#,
        )
        .unwrap();
        assert_eq!(args.port, Some(9001));
        assert_eq!(args.packet_queue_depth, Some(16));
    }
}
