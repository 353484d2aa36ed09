use lib_stream::StreamSri;
use serde::{Deserialize, Serialize};

/// BulkIO-style precision timestamp carried with every packet. The relay
/// never interprets it; it passes from the source straight to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PrecisionTime {
    pub tcmode: i16,
    pub tcstatus: i16,
    pub toff: f64,
    pub twsec: f64,
    pub tfsec: f64,
}

impl PrecisionTime {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        PrecisionTime {
            tcmode: 1,
            tcstatus: 1,
            toff: 0.0,
            twsec: now.timestamp() as f64,
            tfsec: f64::from(now.timestamp_subsec_nanos()) / 1e9,
        }
    }
}

/// Inbound control messages, one JSON object per message:
/// `{ "type": "x-max-samples", "value": 1024 }`. The axis is encoded in the
/// type string; X and Y are fully independent.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    XMaxSamples { value: i64 },
    XBeginIndex { value: i64 },
    XEndIndex { value: i64 },
    XZoomIn,
    XZoomReset,
    YMaxSamples { value: i64 },
    YBeginIndex { value: i64 },
    YEndIndex { value: i64 },
    YZoomIn,
    YZoomReset,
    /// Reserved: rate limiting is not implemented in-core.
    MaxPps { value: i64 },
}

/// Outbound per-packet payload forwarded to a viewer.
#[derive(Debug, Clone, Serialize)]
pub struct StreamPacket {
    #[serde(rename = "streamID")]
    pub stream_id: String,
    #[serde(rename = "T")]
    pub timestamp: PrecisionTime,
    #[serde(rename = "EOS")]
    pub eos: bool,
    #[serde(rename = "sriChanged")]
    pub sri_changed: bool,
    #[serde(rename = "SRI")]
    pub sri: StreamSri,
    /// Element type name of the stream port, e.g. `dataFloat`.
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(rename = "dataBuffer")]
    pub data_buffer: Vec<f64>,
}

/// Structured error payload. Sent once for resolution failures before the
/// connection closes, and per-message for non-fatal control faults.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        ErrorPayload {
            error: error.to_string(),
            message: message.into(),
        }
    }

    /// Best-effort JSON form; the payload itself can always serialize.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"error\":\"{}\",\"message\":\"\"}}", self.error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_types_are_kebab_case_per_axis() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type": "x-max-samples", "value": 1024}"#).unwrap();
        assert_eq!(msg, ControlMessage::XMaxSamples { value: 1024 });

        let msg: ControlMessage =
            serde_json::from_str(r#"{"type": "y-begin-index", "value": 3}"#).unwrap();
        assert_eq!(msg, ControlMessage::YBeginIndex { value: 3 });

        // Commit messages carry no meaningful value; an extra one is ignored.
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type": "x-zoom-in", "value": 0}"#).unwrap();
        assert_eq!(msg, ControlMessage::XZoomIn);
    }

    #[test]
    fn unknown_control_type_is_an_error() {
        assert!(serde_json::from_str::<ControlMessage>(
            r#"{"type": "warp-speed", "value": 9}"#
        )
        .is_err());
    }

    #[test]
    fn packet_wire_field_names() {
        let packet = StreamPacket {
            stream_id: "s1".to_string(),
            timestamp: PrecisionTime::default(),
            eos: false,
            sri_changed: true,
            sri: StreamSri::new("s1"),
            element_type: "dataFloat".to_string(),
            data_buffer: vec![1.0, 2.0],
        };
        let value = serde_json::to_value(&packet).unwrap();

        assert!(value.get("streamID").is_some());
        assert!(value.get("T").is_some());
        assert!(value.get("EOS").is_some());
        assert!(value.get("sriChanged").is_some());
        assert!(value.get("SRI").is_some());
        assert_eq!(value["type"], "dataFloat");
        assert_eq!(value["dataBuffer"], serde_json::json!([1.0, 2.0]));
    }
}
