//! Engine configuration
//!
//! Everything here can be loaded from a JSON file. Missing fields fall back
//! to the defaults the engine has always shipped with.

use crate::error::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default FFT window in samples
pub const DEFAULT_WINDOW_SIZE: usize = 4096;

/// Default number of output spectrum bins
pub const DEFAULT_NUM_BINS: usize = 1024;

/// Default number of periods decoded ahead of the callback
pub const DEFAULT_PREDECODE_BUFFERS: usize = 5;

/// Default maximum number of loaded one-shot sounds
pub const DEFAULT_SOUND_CAPACITY: usize = 32;

/// Default debounce applied to repeated sound triggers, in seconds
pub const DEFAULT_REPEAT_DELAY: f32 = 0.1;

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: EngineConfig,
    pub fft: FftConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AudioError::NotFound(path.to_path_buf())
            } else {
                AudioError::Config(format!("{}: {}", path.display(), e))
            }
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.audio.validate()?;
        config.fft.validate()?;
        Ok(config)
    }
}

/// Sizing of the streaming pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the streaming ring buffer, in frames
    pub buffer_size_frames: usize,

    /// Number of periods kept decoded ahead of consumption
    pub predecode_buffers: usize,

    /// Frames delivered per hardware callback
    pub period_frames: usize,

    /// Maximum number of one-shot sounds held by the pool
    pub sound_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size_frames: DEFAULT_WINDOW_SIZE * (DEFAULT_PREDECODE_BUFFERS + 5),
            predecode_buffers: DEFAULT_PREDECODE_BUFFERS,
            period_frames: DEFAULT_WINDOW_SIZE,
            sound_capacity: DEFAULT_SOUND_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn new(buffer_size_frames: usize, predecode_buffers: usize, period_frames: usize) -> Self {
        Self {
            buffer_size_frames,
            predecode_buffers,
            period_frames,
            ..Default::default()
        }
    }

    /// Reject sizings no device could ever satisfy
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size_frames == 0 {
            return Err(AudioError::Init("buffer size must be non-zero".to_string()));
        }
        if self.period_frames == 0 {
            return Err(AudioError::Init("period must be non-zero".to_string()));
        }
        if u32::try_from(self.period_frames).is_err() {
            return Err(AudioError::Init(format!(
                "period of {} frames is too long for a device stream",
                self.period_frames
            )));
        }
        if self.predecode_buffers == 0 {
            return Err(AudioError::Init(
                "at least one predecode buffer is required".to_string(),
            ));
        }
        if self.sound_capacity == 0 {
            return Err(AudioError::Init("sound capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Frames the decoder keeps queued ahead of the callback.
    ///
    /// Clamped to the ring capacity when the configured look-ahead does not fit.
    pub fn predecode_frames(&self) -> usize {
        (self.period_frames * self.predecode_buffers).min(self.buffer_size_frames)
    }
}

/// Spectrum analysis setup
///
/// `freq_map` holds `[normalized_position, hz]` control points and
/// `weight_curve` holds `[hz, gain_db]` control points. Both are evaluated by
/// piecewise-linear interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FftConfig {
    pub freq_map: Vec<[f32; 2]>,
    pub weight_curve: Vec<[f32; 2]>,
    pub window_size: usize,
    pub num_bins: usize,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self {
            freq_map: vec![
                [0.0, 35.0],
                [0.2, 450.0],
                [0.3, 700.0],
                [0.4, 1200.0],
                [0.5, 1700.0],
                [0.6, 2600.0],
                [0.7, 4100.0],
                [0.8, 6500.0],
                [0.9, 10000.0],
                [1.0, 20000.0],
            ],
            weight_curve: vec![
                [63.0, -5.0],
                [200.0, -5.0],
                [250.0, -5.0],
                [315.0, -5.0],
                [400.0, -4.8],
                [500.0, -3.2],
                [630.0, -1.9],
                [800.0, -0.8],
                [1000.0, 0.0],
                [1250.0, 0.6],
                [1600.0, 1.0],
                [2000.0, 1.2],
                [2500.0, 3.3],
                [3150.0, 4.2],
                [4000.0, 5.0],
            ],
            window_size: DEFAULT_WINDOW_SIZE,
            num_bins: DEFAULT_NUM_BINS,
        }
    }
}

impl FftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 || self.window_size % 2 != 0 {
            return Err(AudioError::invalid_argument(format!(
                "window size must be even and at least 2, got {}",
                self.window_size
            )));
        }
        if self.num_bins == 0 {
            return Err(AudioError::invalid_argument("num_bins must be non-zero"));
        }
        if self.freq_map.len() < 2 {
            return Err(AudioError::invalid_argument(
                "freq_map needs at least two control points",
            ));
        }
        if self.weight_curve.is_empty() {
            return Err(AudioError::invalid_argument(
                "weight_curve needs at least one control point",
            ));
        }
        if !is_ascending(&self.freq_map) {
            return Err(AudioError::invalid_argument(
                "freq_map positions must be ascending",
            ));
        }
        if self
            .freq_map
            .iter()
            .any(|[pos, hz]| !(0.0..=1.0).contains(pos) || *hz < 0.0)
        {
            return Err(AudioError::invalid_argument(
                "freq_map positions must lie in [0, 1] with non-negative frequencies",
            ));
        }
        if !is_ascending(&self.weight_curve) {
            return Err(AudioError::invalid_argument(
                "weight_curve frequencies must be ascending",
            ));
        }
        Ok(())
    }
}

fn is_ascending(points: &[[f32; 2]]) -> bool {
    points.windows(2).all(|pair| pair[0][0] <= pair[1][0])
}
