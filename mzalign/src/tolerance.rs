//! Matching windows for m/z and retention time comparisons.

use serde::{Deserialize, Serialize};

/// An m/z matching window combining an absolute width with a
/// parts-per-million width. The wider of the two wins at any given m/z, so
/// the window behaves sensibly at both ends of the mass range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MzTolerance {
    /// Absolute half-window, in m/z units
    pub absolute: f64,
    /// Relative half-window, in parts-per-million
    pub ppm: f64,
}

impl MzTolerance {
    pub fn new(absolute: f64, ppm: f64) -> Self {
        Self { absolute, ppm }
    }

    /// The half-window width centered on `mz`
    pub fn window(&self, mz: f64) -> f64 {
        (mz * self.ppm * 1e-6).max(self.absolute)
    }

    /// The interval `[low, high]` of values matching `mz`
    pub fn bounds(&self, mz: f64) -> (f64, f64) {
        let width = self.window(mz);
        (mz - width, mz + width)
    }

    /// Test whether `other` falls within the window centered on `value`
    pub fn contains(&self, value: f64, other: f64) -> bool {
        (value - other).abs() <= self.window(value)
    }
}

/// A retention time matching window. The fixed form uses `value` as the
/// half-window everywhere; the adaptive form widens it proportionally with
/// elapsed run time, `|rt| * value`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RtTolerance {
    /// Half-window in retention time units, or the widening factor when
    /// adaptive
    pub value: f64,
    /// Whether the window grows with retention time
    pub adaptive: bool,
}

impl RtTolerance {
    pub fn new(value: f64, adaptive: bool) -> Self {
        Self { value, adaptive }
    }

    /// The half-window width centered on `rt`
    pub fn window(&self, rt: f64) -> f64 {
        if self.adaptive {
            rt.abs() * self.value
        } else {
            self.value
        }
    }

    /// The half-window ignoring any adaptive widening. Model-fit residual
    /// bounds are scaled against this rather than a moving target.
    pub fn nominal_window(&self) -> f64 {
        self.value
    }

    /// The interval `[low, high]` of values matching `rt`
    pub fn bounds(&self, rt: f64) -> (f64, f64) {
        let width = self.window(rt);
        (rt - width, rt + width)
    }

    /// Test whether `other` falls within the window centered on `value`
    pub fn contains(&self, value: f64, other: f64) -> bool {
        (value - other).abs() <= self.window(value)
    }
}
