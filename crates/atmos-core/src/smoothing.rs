//! Bounded moving-average filter.
//!
//! The filter averages the last `W` values. After a sustained step change the
//! output equals the new level after exactly `W` samples, so `W` is the
//! reaction bound. `W` is limited to [`MAX_WINDOW`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::ConfigIssue;

/// Largest permitted window, in polling intervals.
pub const MAX_WINDOW: usize = 5;

/// Smoothing filter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Number of samples averaged; also the reaction bound.
    pub window: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { window: 3 }
    }
}

impl SmoothingConfig {
    /// Validate the window size.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.window == 0 || self.window > MAX_WINDOW {
            issues.push(ConfigIssue::new(
                "window",
                format!("must be between 1 and {MAX_WINDOW}, got {}", self.window),
            ));
        }
        issues
    }
}

/// Smooth `new` against the most recent values of `history`.
///
/// Only the last `window - 1` entries of `history` are used.
///
/// ```
/// use atmos_core::smoothing::smooth;
///
/// assert_eq!(smooth(&[10.0, 20.0, 30.0], 40.0, 2), 35.0);
/// assert_eq!(smooth(&[], 7.0, 3), 7.0);
/// ```
pub fn smooth(history: &[f64], new: f64, window: usize) -> f64 {
    let keep = window.clamp(1, MAX_WINDOW) - 1;
    let recent = &history[history.len().saturating_sub(keep)..];
    let sum: f64 = recent.iter().sum::<f64>() + new;
    sum / (recent.len() + 1) as f64
}

/// Stateful moving-average filter.
#[derive(Debug, Clone)]
pub struct Smoother {
    window: usize,
    values: VecDeque<f64>,
}

impl Smoother {
    /// Create a filter. The window is clamped to `1..=MAX_WINDOW`.
    pub fn new(window: usize) -> Self {
        let window = window.clamp(1, MAX_WINDOW);
        Self {
            window,
            values: VecDeque::with_capacity(window),
        }
    }

    /// Push a value and return the smoothed output.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.current().unwrap_or(value)
    }

    /// Current smoothed value, if any value was pushed.
    pub fn current(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }

    /// Window size.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Drop all history.
    pub fn reset(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(SmoothingConfig::default().validate().is_empty());
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(SmoothingConfig { window: 0 }.validate().len(), 1);
        assert_eq!(SmoothingConfig { window: 6 }.validate().len(), 1);
        assert!(SmoothingConfig { window: 5 }.validate().is_empty());
        assert!(SmoothingConfig { window: 1 }.validate().is_empty());
    }

    #[test]
    fn test_smoother_partial_window() {
        let mut s = Smoother::new(3);
        assert_eq!(s.current(), None);
        assert_eq!(s.push(3.0), 3.0);
        assert_eq!(s.push(5.0), 4.0);
    }

    #[test]
    fn test_step_reaches_new_level_within_window() {
        for window in 1..=MAX_WINDOW {
            let mut s = Smoother::new(window);
            for _ in 0..10 {
                s.push(50_000.0);
            }
            let mut out = 0.0;
            for i in 1..=window {
                out = s.push(10_000.0);
                if i < window {
                    assert!(out > 10_000.0, "window {window} settled early at step {i}");
                }
            }
            assert!((out - 10_000.0).abs() < 1e-9, "window {window} did not settle");
        }
    }

    #[test]
    fn test_window_clamped() {
        assert_eq!(Smoother::new(0).window(), 1);
        assert_eq!(Smoother::new(99).window(), MAX_WINDOW);
    }

    #[test]
    fn test_reset() {
        let mut s = Smoother::new(2);
        s.push(1.0);
        s.reset();
        assert_eq!(s.current(), None);
        assert_eq!(s.push(9.0), 9.0);
    }

    #[test]
    fn test_free_function_matches_smoother() {
        let inputs = [4.0, 8.0, 15.0, 16.0, 23.0, 42.0];
        let mut s = Smoother::new(3);
        let mut history = Vec::new();
        for v in inputs {
            let a = s.push(v);
            let b = smooth(&history, v, 3);
            assert!((a - b).abs() < 1e-12);
            history.push(v);
        }
    }
}
