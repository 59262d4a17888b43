//! Sliding-window index computation over one dense series.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::densify::DenseSeries;

pub const DEFAULT_INPUT_SEQ_LEN: usize = 24 * 28;
pub const DEFAULT_STEP_SIZE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Historical hours used as features.
    pub input_seq_len: usize,
    /// Stride between consecutive window starts.
    pub step_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            input_seq_len: DEFAULT_INPUT_SEQ_LEN,
            step_size: DEFAULT_STEP_SIZE,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<(), WindowError> {
        if self.input_seq_len == 0 {
            return Err(WindowError::InvalidConfig(
                "input_seq_len must be > 0".to_string(),
            ));
        }
        if self.step_size == 0 {
            return Err(WindowError::InvalidConfig(
                "step_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Shortest series that yields at least one window.
    pub fn min_series_len(&self) -> usize {
        self.input_seq_len.saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub location_id: i64,
    pub start_idx: usize,
    pub target_idx: usize,
}

impl Window {
    pub fn feature_range(&self) -> std::ops::Range<usize> {
        self.start_idx..self.target_idx
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid window config: {0}")]
    InvalidConfig(String),
}

/// Windows over a series of `series_len` slots, in increasing `start_idx` order.
///
/// A window is emitted while `target_idx <= series_len - 1`. Series with
/// `series_len <= input_seq_len` produce no windows.
pub fn window_indices(
    location_id: i64,
    series_len: usize,
    cfg: &WindowConfig,
) -> Result<Vec<Window>, WindowError> {
    cfg.validate()?;

    let Some(stop_position) = series_len.checked_sub(1) else {
        return Ok(Vec::new());
    };

    let Some(last_start) = stop_position.checked_sub(cfg.input_seq_len) else {
        return Ok(Vec::new());
    };

    let windows = (0..=last_start)
        .step_by(cfg.step_size)
        .map(|start_idx| Window {
            location_id,
            start_idx,
            target_idx: start_idx + cfg.input_seq_len,
        })
        .collect();

    Ok(windows)
}

pub fn series_windows(
    series: &DenseSeries,
    cfg: &WindowConfig,
) -> Result<Vec<Window>, WindowError> {
    window_indices(series.location_id, series.len(), cfg)
}
