//! # Stream Descriptor (SRI) Model
//!
//! The SRI describes one named stream instance: its shape (1-D sequence or
//! 2-D matrix of `subsize` words per frame), its timing origin and spacing on
//! both axes, and passthrough keyword metadata. Descriptors are produced only
//! by the upstream source; the relay keeps the last one seen per `streamID`
//! and the engine always works on a copy, never on the cached value.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Sample encoding of a stream. On the wire this is the numeric `mode` field:
/// 0 for scalar data, 1 for complex data where consecutive words pair into
/// one (re, im) sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    #[default]
    Scalar,
    Complex,
}

impl DataMode {
    /// Raw words per sample: 2 when complex, else 1.
    pub fn words_per_sample(self) -> usize {
        match self {
            DataMode::Scalar => 1,
            DataMode::Complex => 2,
        }
    }

    pub fn is_complex(self) -> bool {
        self == DataMode::Complex
    }
}

impl Serialize for DataMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(match self {
            DataMode::Scalar => 0,
            DataMode::Complex => 1,
        })
    }
}

impl<'de> Deserialize<'de> for DataMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i64::deserialize(deserializer)? {
            0 => Ok(DataMode::Scalar),
            1 => Ok(DataMode::Complex),
            other => Err(serde::de::Error::custom(format!(
                "invalid stream mode {other}, expected 0 (scalar) or 1 (complex)"
            ))),
        }
    }
}

/// Ordered name/value keyword list, serialized as a JSON object. Order is
/// preserved because keyword comparison is part of metadata change detection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Keywords(Vec<(String, Value)>);

impl Keywords {
    pub fn new() -> Self {
        Keywords(Vec::new())
    }

    /// Sets a keyword, replacing the value in place if the name exists so the
    /// original ordering is retained.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.0.iter()
    }
}

impl Serialize for Keywords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Keywords {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeywordsVisitor;

        impl<'de> Visitor<'de> for KeywordsVisitor {
            type Value = Keywords;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of keyword names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Keywords, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, Value>()? {
                    entries.push((name, value));
                }
                Ok(Keywords(entries))
            }
        }

        deserializer.deserialize_map(KeywordsVisitor)
    }
}

/// Stream metadata descriptor. Field names follow the wire form delivered to
/// viewers inside the `SRI` member of every forwarded packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSri {
    pub hversion: i32,
    pub xstart: f64,
    pub xdelta: f64,
    pub xunits: f64,
    /// 0 means a flat 1-D sequence; >0 means each packet reshapes into a
    /// matrix of `subsize` words per frame.
    pub subsize: usize,
    pub ystart: f64,
    pub ydelta: f64,
    pub yunits: f64,
    pub mode: DataMode,
    #[serde(rename = "streamID")]
    pub stream_id: String,
    pub blocking: bool,
    pub keywords: Keywords,
}

impl StreamSri {
    pub fn new(stream_id: &str) -> Self {
        StreamSri {
            hversion: 1,
            xstart: 0.0,
            xdelta: 1.0,
            xunits: 1.0,
            subsize: 0,
            ystart: 0.0,
            ydelta: 1.0,
            yunits: 1.0,
            mode: DataMode::Scalar,
            stream_id: stream_id.to_string(),
            blocking: false,
            keywords: Keywords::new(),
        }
    }

    /// Frame width in samples for the 2-D reshape. `subsize` counts raw
    /// words, so complex data packs half as many samples per frame.
    pub fn frame_size(&self) -> usize {
        self.subsize / self.mode.words_per_sample()
    }

    /// Strict field-by-field inequality, keywords included. This is the
    /// metadata change tracker: a `true` result means downstream consumers
    /// must be told the metadata changed.
    pub fn differs(&self, other: &StreamSri) -> bool {
        self != other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_sri() -> StreamSri {
        let mut sri = StreamSri::new("stream-1");
        sri.xdelta = 0.5;
        sri.keywords.set("COL_RF", json!(101.5e6));
        sri.keywords.set("SOURCE", json!("sim"));
        sri
    }

    #[test]
    fn change_tracker_is_strict_per_field() {
        let a = sample_sri();

        let mut b = a.clone();
        assert!(!a.differs(&b));

        b.xdelta = 0.25;
        assert!(a.differs(&b));

        let mut c = a.clone();
        c.keywords.set("SOURCE", json!("live"));
        assert!(a.differs(&c));

        let mut d = a.clone();
        d.blocking = true;
        assert!(a.differs(&d));
    }

    #[test]
    fn keyword_update_keeps_order() {
        let mut sri = sample_sri();
        sri.keywords.set("COL_RF", json!(88.1e6));

        let names: Vec<&str> = sri.keywords.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["COL_RF", "SOURCE"]);
        assert_eq!(sri.keywords.get("COL_RF"), Some(&json!(88.1e6)));
    }

    #[test]
    fn wire_form_round_trip() {
        let sri = sample_sri();
        let encoded = serde_json::to_value(&sri).unwrap();

        assert_eq!(encoded["streamID"], json!("stream-1"));
        assert_eq!(encoded["mode"], json!(0));
        assert_eq!(encoded["keywords"]["SOURCE"], json!("sim"));

        let decoded: StreamSri = serde_json::from_value(encoded).unwrap();
        assert!(!sri.differs(&decoded));
    }

    #[test]
    fn frame_size_halves_for_complex() {
        let mut sri = sample_sri();
        sri.subsize = 512;
        assert_eq!(sri.frame_size(), 512);

        sri.mode = DataMode::Complex;
        assert_eq!(sri.frame_size(), 256);
    }
}
