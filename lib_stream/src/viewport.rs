//! # Staged/Active Viewport State
//!
//! Each axis of a viewer session carries a zoom window in two generations:
//! a *staged* window being assembled from begin/end control messages, and an
//! *active* window applied to every packet until replaced or reset. Staged
//! indices arrive in the viewer's already-decimated coordinate space and are
//! translated back to original stream coordinates on entry, so a commit never
//! has to re-interpret them.

use crate::limiter::AxisLimit;

/// Begin/end bounds in original (undecimated) sample indices, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub begin: Option<usize>,
    pub end: Option<usize>,
}

/// Tagged zoom state for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoomState {
    #[default]
    Unset,
    /// A window is being staged; nothing applies to packets yet.
    Staged { pending: Window },
    /// `window` applies to every packet; a further window may be staged.
    Active {
        window: Window,
        pending: Option<Window>,
    },
}

/// Full per-axis viewport: zoom state, output limit and the decimation ratio
/// the engine most recently reported for this axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisViewport {
    zoom: ZoomState,
    max_samples: Option<usize>,
    last_resample_factor: usize,
}

impl Default for AxisViewport {
    fn default() -> Self {
        AxisViewport {
            zoom: ZoomState::Unset,
            max_samples: None,
            last_resample_factor: 1,
        }
    }
}

impl AxisViewport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output limit; zero or negative clears it.
    pub fn set_max(&mut self, value: i64) {
        self.max_samples = if value > 0 { Some(value as usize) } else { None };
    }

    pub fn max_samples(&self) -> Option<usize> {
        self.max_samples
    }

    /// Stages a begin index given in the viewer's decimated coordinates.
    /// Composes with the active crop:
    /// `staged = idx * lastResampleFactor + activeBegin`.
    pub fn stage_begin(&mut self, index: usize) {
        let absolute = self.to_original(index);
        self.stage(|pending| pending.begin = Some(absolute));
    }

    /// Stages an end index, same coordinate translation as [`stage_begin`].
    ///
    /// [`stage_begin`]: AxisViewport::stage_begin
    pub fn stage_end(&mut self, index: usize) {
        let absolute = self.to_original(index);
        self.stage(|pending| pending.end = Some(absolute));
    }

    /// Commits the staged window: `active = staged`, staged cleared. A commit
    /// with nothing staged leaves the state unchanged.
    pub fn zoom_in(&mut self) {
        self.zoom = match self.zoom {
            ZoomState::Staged { pending } => ZoomState::Active {
                window: pending,
                pending: None,
            },
            ZoomState::Active {
                pending: Some(pending),
                ..
            } => ZoomState::Active {
                window: pending,
                pending: None,
            },
            other => other,
        };
    }

    /// Clears both staged and active windows. Idempotent.
    pub fn zoom_reset(&mut self) {
        self.zoom = ZoomState::Unset;
    }

    /// Records the decimation ratio the engine just used for this axis.
    pub fn record_factor(&mut self, factor: usize) {
        self.last_resample_factor = factor.max(1);
    }

    pub fn last_resample_factor(&self) -> usize {
        self.last_resample_factor
    }

    pub fn zoom(&self) -> ZoomState {
        self.zoom
    }

    pub fn active_window(&self) -> Option<Window> {
        match self.zoom {
            ZoomState::Active { window, .. } => Some(window),
            _ => None,
        }
    }

    /// The engine-facing view of this axis: active window plus output limit.
    pub fn limit(&self) -> AxisLimit {
        let window = self.active_window().unwrap_or_default();
        AxisLimit {
            begin: window.begin,
            end: window.end,
            max: self.max_samples,
        }
    }

    fn active_begin(&self) -> usize {
        self.active_window().and_then(|w| w.begin).unwrap_or(0)
    }

    // Saturates instead of wrapping: an index past the end of any real
    // packet is an ignore-with-diagnostic case downstream, never a panic.
    fn to_original(&self, index: usize) -> usize {
        index
            .saturating_mul(self.last_resample_factor)
            .saturating_add(self.active_begin())
    }

    fn stage(&mut self, update: impl FnOnce(&mut Window)) {
        self.zoom = match self.zoom {
            ZoomState::Unset => {
                let mut pending = Window::default();
                update(&mut pending);
                ZoomState::Staged { pending }
            }
            ZoomState::Staged { mut pending } => {
                update(&mut pending);
                ZoomState::Staged { pending }
            }
            ZoomState::Active { window, pending } => {
                let mut pending = pending.unwrap_or_default();
                update(&mut pending);
                ZoomState::Active {
                    window,
                    pending: Some(pending),
                }
            }
        };
    }
}
