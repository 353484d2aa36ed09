use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use lib_stream::StreamSri;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Live harness: connects to a running relay, asks for a decimated stream and
/// reports packet rate plus payload sizes once a second. Run the server with
/// its built-in simulated sources first.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Stream endpoint to connect to
    #[clap(
        long,
        default_value = "ws://127.0.0.1:8080/bulkio/component/demo/siggen/out-float"
    )]
    url: String,

    /// Value for the initial x-max-samples control message (0 = no limit)
    #[clap(long, default_value_t = 100)]
    max_samples: i64,

    /// Stop after this many packets (0 = run until Ctrl+C)
    #[clap(long, default_value_t = 0)]
    packet_limit: u64,
}

#[derive(Debug, Deserialize)]
struct RelayPacket {
    #[serde(rename = "streamID")]
    stream_id: String,
    #[serde(rename = "sriChanged")]
    sri_changed: bool,
    #[serde(rename = "SRI")]
    sri: StreamSri,
    #[serde(rename = "dataBuffer")]
    data_buffer: Vec<f64>,
    #[serde(rename = "type")]
    element_type: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("Connecting to {}...", args.url);
    let (ws_stream, _) = connect_async(&args.url)
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    let (mut write, mut read) = ws_stream.split();

    if args.max_samples > 0 {
        let control = json!({ "type": "x-max-samples", "value": args.max_samples }).to_string();
        write
            .send(Message::Text(control.into()))
            .await
            .context("Failed to send control message")?;
        println!("Requested at most {} samples per packet.", args.max_samples);
    }

    let mut timestamps: VecDeque<chrono::DateTime<Utc>> = VecDeque::new();
    let mut packets: u64 = 0;
    let mut last_report = Utc::now();

    while let Some(Ok(msg)) = read.next().await {
        let Message::Text(text) = msg else { continue };

        match serde_json::from_str::<RelayPacket>(&text) {
            Ok(packet) => {
                packets += 1;
                let now = Utc::now();
                timestamps.push_back(now);
                while timestamps
                    .front()
                    .map_or(false, |&t| (now - t).num_seconds() >= 10)
                {
                    timestamps.pop_front();
                }

                if args.max_samples > 0 && packet.data_buffer.len() > args.max_samples as usize {
                    eprintln!(
                        "FAIL: packet of {} samples exceeds requested limit {}",
                        packet.data_buffer.len(),
                        args.max_samples
                    );
                    std::process::exit(1);
                }

                if packet.sri_changed {
                    println!(
                        "[{}] SRI changed ({}, xdelta={}, subsize={}, {} samples)",
                        packet.stream_id,
                        packet.element_type,
                        packet.sri.xdelta,
                        packet.sri.subsize,
                        packet.data_buffer.len()
                    );
                }

                if (now - last_report).num_seconds() >= 1 {
                    last_report = now;
                    println!(
                        "{} packets total, {:.1} pkt/s over last 10s, last payload {} samples",
                        packets,
                        timestamps.len() as f64 / 10.0,
                        packet.data_buffer.len()
                    );
                }

                if args.packet_limit > 0 && packets >= args.packet_limit {
                    println!("Reached packet limit of {}; PASS", args.packet_limit);
                    break;
                }
            }
            Err(_) => {
                // Error payloads arrive as plain JSON objects too.
                println!("Non-packet message: {}", text);
            }
        }
    }

    Ok(())
}
