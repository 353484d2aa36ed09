//! # Window & Decimation Engine
//!
//! Pure per-packet resampling: takes a flat word sequence plus the stream's
//! descriptor and the active viewport for both axes, and returns the windowed,
//! decimated words together with an updated descriptor copy. No I/O and no
//! shared state; malformed input is truncated and reported through the
//! diagnostics string, never raised.
//!
//! All slicing bounds are in sample units regardless of scalar/complex mode,
//! and both `begin`/`end` bounds are inclusive. Decimation factors come from
//! ceiling division so the output never exceeds the requested maximum, and
//! mean decimation averages every input sample including a short trailing
//! group.

use crate::sri::StreamSri;

/// One sample as (re, im). Scalar data leaves im at 0 and drops it again when
/// flattening back to words.
type Sample = (f64, f64);

/// How samples are reduced when an axis is over its maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMode {
    /// Neighbor-mean grouping; a short trailing group averages what is left.
    #[default]
    Mean,
    /// Plain stride-drop, keeping every factor-th sample.
    Stride,
    /// Reserved. Selecting it disables decimation with a diagnostic.
    Interp,
}

/// Active window and output limit for one axis, in original sample indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisLimit {
    pub begin: Option<usize>,
    pub end: Option<usize>,
    /// Target output length; `None` or 0 means no limit.
    pub max: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimitSettings {
    pub x: AxisLimit,
    pub y: AxisLimit,
    pub mode: ResampleMode,
}

/// Engine output for one packet.
#[derive(Debug, Clone)]
pub struct Limited {
    /// Resampled words in the original interleaving.
    pub data: Vec<f64>,
    /// Updated descriptor copy; the input descriptor is never touched.
    pub sri: StreamSri,
    pub x_factor: usize,
    pub y_factor: usize,
    /// True when this call moved `xstart`/`ystart`, scaled a delta or rewrote
    /// `subsize` relative to the input descriptor.
    pub sri_changed: bool,
    /// Accumulated recovery/ignore notes; empty when the packet was clean.
    pub diagnostics: String,
}

/// Windows and decimates one packet. Slicing runs end-before-begin on X then
/// Y, decimation runs X then Y, then `subsize` is rewritten for 2-D streams
/// (doubled for complex data since `subsize` counts words, not samples).
pub fn limit(words: &[f64], sri: &StreamSri, settings: &LimitSettings) -> Limited {
    let mut out_sri = sri.clone();
    let mut sri_changed = false;
    let mut diagnostics = String::new();
    let complex = sri.mode.is_complex();
    let words_per_sample = sri.mode.words_per_sample();

    // Word -> sample pairing.
    let mut samples: Vec<Sample> = if complex {
        if words.len() % 2 != 0 {
            note(&mut diagnostics, format_args!(
                "Dropping trailing word! Complex data with length={} is not a whole number of samples",
                words.len()
            ));
        }
        words.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect()
    } else {
        words.iter().map(|&w| (w, 0.0)).collect()
    };

    // 2-D reshape, truncating to whole frames when the packet is malformed.
    let frame_size = out_sri.frame_size();
    let (mut x_len, mut y_len) = if out_sri.subsize == 0 || frame_size == 0 {
        if out_sri.subsize > 0 {
            note(&mut diagnostics, format_args!(
                "Ignoring subsize={} smaller than one sample; treating packet as one dimensional",
                out_sri.subsize
            ));
        }
        (samples.len(), 1)
    } else {
        if samples.len() % frame_size > 0 {
            note(&mut diagnostics, format_args!(
                "Malformed input packet! Data with length={} is not a multiple of the frame with length={}",
                samples.len(),
                frame_size
            ));
            let adjusted = (samples.len() / frame_size) * frame_size;
            samples.truncate(adjusted);
            note(&mut diagnostics, format_args!(
                "Dropped data to fix malformed input packet! Data now has length={adjusted}"
            ));
        }
        (frame_size, samples.len() / frame_size)
    };

    let mut rows: Vec<Vec<Sample>> = if out_sri.subsize == 0 || frame_size == 0 {
        vec![samples]
    } else {
        samples.chunks(frame_size).map(|frame| frame.to_vec()).collect()
    };

    // Slice X, end before begin, both bounds inclusive.
    if let Some(end) = settings.x.end {
        if end < x_len {
            for row in &mut rows {
                row.truncate(end + 1);
            }
            x_len = end + 1;
        } else {
            note(&mut diagnostics, format_args!(
                "Ignoring X axis end index! Index={end} does not exist in samples with length={x_len}"
            ));
        }
    }
    if let Some(begin) = settings.x.begin {
        if begin < x_len {
            for row in &mut rows {
                row.drain(..begin);
            }
            x_len -= begin;
            out_sri.xstart += begin as f64 * out_sri.xunits;
            if out_sri.xstart != sri.xstart {
                sri_changed = true;
            }
        } else {
            note(&mut diagnostics, format_args!(
                "Ignoring X axis beginning index! Index={begin} does not exist in samples with length={x_len}"
            ));
        }
    }

    // Slice Y the same way, over rows.
    if let Some(end) = settings.y.end {
        if end < y_len {
            rows.truncate(end + 1);
            y_len = end + 1;
        } else {
            note(&mut diagnostics, format_args!(
                "Ignoring Y axis end index! Index={end} does not exist in samples with length={y_len}"
            ));
        }
    }
    if let Some(begin) = settings.y.begin {
        if begin < y_len {
            rows.drain(..begin);
            y_len -= begin;
            out_sri.ystart += begin as f64 * out_sri.yunits;
            if out_sri.ystart != sri.ystart {
                sri_changed = true;
            }
        } else {
            note(&mut diagnostics, format_args!(
                "Ignoring Y axis beginning index! Index={begin} does not exist in samples with length={y_len}"
            ));
        }
    }

    // Decimate X.
    let mut x_factor = 1;
    if let Some(max) = effective_max(settings.x.max) {
        if max < x_len {
            if settings.mode == ResampleMode::Interp {
                note(&mut diagnostics, format_args!(
                    "Interpolate+decimate not supported. Ignoring X axis maximum of {max} samples"
                ));
            } else {
                x_factor = x_len.div_ceil(max);
                for row in &mut rows {
                    *row = downsample_row(row, x_factor, settings.mode);
                }
                x_len = x_len.div_ceil(x_factor);
                out_sri.xdelta *= x_factor as f64;
                sri_changed = true;
            }
        }
    }

    // Decimate Y.
    let mut y_factor = 1;
    if let Some(max) = effective_max(settings.y.max) {
        if max < y_len {
            if settings.mode == ResampleMode::Interp {
                note(&mut diagnostics, format_args!(
                    "Interpolate+decimate not supported. Ignoring Y axis maximum of {max} samples"
                ));
            } else {
                y_factor = y_len.div_ceil(max);
                rows = downsample_rows(&rows, y_factor, x_len, settings.mode);
                y_len = y_len.div_ceil(y_factor);
                out_sri.ydelta *= y_factor as f64;
                sri_changed = true;
            }
        }
    }

    // Subsize counts words, so complex frames report double the sample width.
    if out_sri.subsize > 0 {
        out_sri.subsize = x_len * words_per_sample;
        if out_sri.subsize != sri.subsize {
            sri_changed = true;
        }
    }

    // Sample -> word flatten, restoring the original interleaving.
    let mut data = Vec::with_capacity(x_len * y_len * words_per_sample);
    for row in &rows {
        for &(re, im) in row {
            data.push(re);
            if complex {
                data.push(im);
            }
        }
    }

    Limited {
        data,
        sri: out_sri,
        x_factor,
        y_factor,
        sri_changed,
        diagnostics,
    }
}

fn effective_max(max: Option<usize>) -> Option<usize> {
    max.filter(|&m| m > 0)
}

fn note(diagnostics: &mut String, message: std::fmt::Arguments) {
    use std::fmt::Write;
    let _ = writeln!(diagnostics, "{message}");
}

fn downsample_row(row: &[Sample], factor: usize, mode: ResampleMode) -> Vec<Sample> {
    match mode {
        ResampleMode::Stride => row.iter().step_by(factor).copied().collect(),
        _ => row
            .chunks(factor)
            .map(|group| {
                let n = group.len() as f64;
                let (re, im) = group
                    .iter()
                    .fold((0.0, 0.0), |acc, s| (acc.0 + s.0, acc.1 + s.1));
                (re / n, im / n)
            })
            .collect(),
    }
}

fn downsample_rows(
    rows: &[Vec<Sample>],
    factor: usize,
    x_len: usize,
    mode: ResampleMode,
) -> Vec<Vec<Sample>> {
    match mode {
        ResampleMode::Stride => rows.iter().step_by(factor).cloned().collect(),
        _ => rows
            .chunks(factor)
            .map(|group| {
                let n = group.len() as f64;
                (0..x_len)
                    .map(|col| {
                        let (re, im) = group
                            .iter()
                            .fold((0.0, 0.0), |acc, r| (acc.0 + r[col].0, acc.1 + r[col].1));
                        (re / n, im / n)
                    })
                    .collect()
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sri::DataMode;

    fn scalar_sri(subsize: usize) -> StreamSri {
        let mut sri = StreamSri::new("test-stream");
        sri.subsize = subsize;
        sri
    }

    fn ramp(len: usize) -> Vec<f64> {
        (0..len).map(|i| i as f64).collect()
    }

    fn x_limited(max: usize) -> LimitSettings {
        LimitSettings {
            x: AxisLimit { max: Some(max), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn one_dimensional_mean_decimation() {
        let sri = scalar_sri(0);
        let out = limit(&ramp(1000), &sri, &x_limited(100));

        assert_eq!(out.x_factor, 10);
        assert_eq!(out.data.len(), 100);
        assert_eq!(out.sri.xdelta, 10.0);
        assert!(out.sri_changed);
        assert!(out.diagnostics.is_empty());
        // First output is the mean of samples 0..10.
        assert_eq!(out.data[0], 4.5);
    }

    #[test]
    fn ceil_factor_bounds_output_length() {
        let sri = scalar_sri(0);
        for len in [3usize, 7, 10, 99, 100, 101, 1000, 1023] {
            for max in [1usize, 2, 3, 50, 99] {
                if max >= len {
                    continue;
                }
                let out = limit(&ramp(len), &sri, &x_limited(max));
                let factor = len.div_ceil(max);
                assert!(factor >= 2, "factor {factor} for len={len} max={max}");
                assert_eq!(out.x_factor, factor);
                assert_eq!(out.data.len(), len.div_ceil(factor));
                assert!(out.data.len() <= max, "len={len} max={max}");
            }
        }
    }

    #[test]
    fn mean_groups_cover_every_sample() {
        // 10 samples, max 4 -> factor 3 -> groups of 3,3,3,1.
        let sri = scalar_sri(0);
        let out = limit(&ramp(10), &sri, &x_limited(4));

        assert_eq!(out.x_factor, 3);
        assert_eq!(out.data, vec![1.0, 4.0, 7.0, 9.0]);
    }

    #[test]
    fn stride_mode_drops_samples() {
        let sri = scalar_sri(0);
        let settings = LimitSettings {
            x: AxisLimit { max: Some(4), ..Default::default() },
            mode: ResampleMode::Stride,
            ..Default::default()
        };
        let out = limit(&ramp(10), &sri, &settings);

        assert_eq!(out.data, vec![0.0, 3.0, 6.0, 9.0]);
        assert_eq!(out.sri.xdelta, 3.0);
    }

    #[test]
    fn interp_mode_falls_back_to_no_limit() {
        let sri = scalar_sri(0);
        let settings = LimitSettings {
            x: AxisLimit { max: Some(4), ..Default::default() },
            mode: ResampleMode::Interp,
            ..Default::default()
        };
        let out = limit(&ramp(10), &sri, &settings);

        assert_eq!(out.x_factor, 1);
        assert_eq!(out.data.len(), 10);
        assert!(!out.sri_changed);
        assert!(out.diagnostics.contains("Interpolate+decimate not supported"));
    }

    #[test]
    fn end_beyond_length_is_reported_no_op() {
        let sri = scalar_sri(0);
        let settings = LimitSettings {
            x: AxisLimit { end: Some(50), ..Default::default() },
            ..Default::default()
        };
        let out = limit(&ramp(10), &sri, &settings);

        assert_eq!(out.data, ramp(10));
        assert!(!out.sri_changed);
        assert!(out.diagnostics.contains("Ignoring X axis end index"));
    }

    #[test]
    fn begin_slice_advances_xstart_by_units() {
        let mut sri = scalar_sri(0);
        sri.xstart = 100.0;
        sri.xunits = 2.5;
        let settings = LimitSettings {
            x: AxisLimit { begin: Some(4), ..Default::default() },
            ..Default::default()
        };
        let out = limit(&ramp(10), &sri, &settings);

        assert_eq!(out.data, vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(out.sri.xstart, 110.0);
        assert!(out.sri_changed);
        // The cached descriptor is untouched.
        assert_eq!(sri.xstart, 100.0);
    }

    #[test]
    fn begin_zero_moves_nothing() {
        let sri = scalar_sri(0);
        let settings = LimitSettings {
            x: AxisLimit { begin: Some(0), ..Default::default() },
            ..Default::default()
        };
        let out = limit(&ramp(10), &sri, &settings);

        assert_eq!(out.data.len(), 10);
        assert!(!out.sri_changed);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn saturated_bounds_never_wrap() {
        let sri = scalar_sri(0);
        let settings = LimitSettings {
            x: AxisLimit {
                begin: Some(usize::MAX),
                end: Some(usize::MAX),
                ..Default::default()
            },
            ..Default::default()
        };
        let out = limit(&ramp(10), &sri, &settings);

        assert_eq!(out.data, ramp(10));
        assert!(!out.sri_changed);
        assert!(out.diagnostics.contains("Ignoring X axis end index"));
        assert!(out.diagnostics.contains("Ignoring X axis beginning index"));
    }

    #[test]
    fn inclusive_window_both_bounds() {
        let sri = scalar_sri(0);
        let settings = LimitSettings {
            x: AxisLimit { begin: Some(2), end: Some(6), ..Default::default() },
            ..Default::default()
        };
        let out = limit(&ramp(10), &sri, &settings);

        // End applies first ([0, 6]), then begin drops [0, 2).
        assert_eq!(out.data, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn complex_raster_row_slice() {
        // subsize=512 words = 256 complex samples per frame; 2560 words = 5 frames.
        let mut sri = scalar_sri(512);
        sri.mode = DataMode::Complex;
        sri.yunits = 3.0;
        let words = ramp(2560);
        let settings = LimitSettings {
            y: AxisLimit { begin: Some(1), end: Some(3), ..Default::default() },
            ..Default::default()
        };
        let out = limit(&words, &sri, &settings);

        // End keeps rows 0..=3, begin then drops row 0: 3 frames remain.
        assert_eq!(out.data.len(), 3 * 512);
        assert_eq!(out.sri.ystart, 3.0);
        assert_eq!(out.sri.subsize, 512);
        assert!(out.sri_changed);
        // First surviving word is the start of frame 1.
        assert_eq!(out.data[0], 512.0);
        assert_eq!(out.data[1], 513.0);
    }

    #[test]
    fn complex_x_decimation_rewrites_subsize_in_words() {
        let mut sri = scalar_sri(512);
        sri.mode = DataMode::Complex;
        let words = ramp(2560);
        let out = limit(&words, &sri, &x_limited(64));

        assert_eq!(out.x_factor, 4);
        // 64 samples per frame, 5 frames, 2 words per sample.
        assert_eq!(out.data.len(), 64 * 5 * 2);
        assert_eq!(out.sri.subsize, 128);
        assert_eq!(out.sri.xdelta, 4.0);
        assert!(out.sri_changed);
    }

    #[test]
    fn complex_mean_averages_components_separately() {
        let mut sri = scalar_sri(0);
        sri.mode = DataMode::Complex;
        // Two complex samples (1, 10) and (3, 30) -> mean (2, 20).
        let out = limit(&[1.0, 10.0, 3.0, 30.0], &sri, &x_limited(1));

        assert_eq!(out.data, vec![2.0, 20.0]);
    }

    #[test]
    fn malformed_packet_truncates_and_reports() {
        let sri = scalar_sri(100);
        let out = limit(&ramp(250), &sri, &LimitSettings::default());

        assert_eq!(out.data.len(), 200);
        assert!(out.diagnostics.contains("Malformed input packet"));
        assert!(out.diagnostics.contains("length=200"));
    }

    #[test]
    fn y_mean_decimation_scales_ydelta() {
        let mut sri = scalar_sri(4);
        sri.ydelta = 0.5;
        // 10 frames of 4 samples.
        let out = limit(
            &ramp(40),
            &sri,
            &LimitSettings {
                y: AxisLimit { max: Some(4), ..Default::default() },
                ..Default::default()
            },
        );

        assert_eq!(out.y_factor, 3);
        assert_eq!(out.data.len(), 4 * 4);
        assert_eq!(out.sri.ydelta, 1.5);
        // First output row is the column-wise mean of frames 0..3.
        assert_eq!(out.data[0], 4.0);
        assert!(out.sri_changed);
    }

    #[test]
    fn max_of_zero_means_no_limit() {
        let sri = scalar_sri(0);
        let out = limit(&ramp(10), &sri, &x_limited(0));

        assert_eq!(out.data.len(), 10);
        assert_eq!(out.x_factor, 1);
        assert!(!out.sri_changed);
    }
}
