//! Spectrum analysis for visualization
//!
//! Pipeline per call: latest window from a tap, Hann window, forward FFT,
//! power spectrum, remap onto `num_bins` output bins along the configured
//! frequency map, perceptual weighting in dB, then normalization against a
//! running maximum that only grows until the source changes.

use super::tap::SharedTap;
use crate::config::FftConfig;
use crate::error::{AudioError, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lowest value the normalization maximum may take, in dB
pub const ADAPTIVE_MAX_FLOOR: f32 = 50.0;

/// Which tap feeds the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FftInputMode {
    /// No source; analysis yields silence
    #[default]
    None,

    /// Music going out to the playback device
    Playback,

    /// Samples arriving from the capture device
    Capture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Uninitialized,
    Configured,
    Disposed,
}

/// Output of one analysis pass, borrowed from the analyzer
#[derive(Debug, Clone, Copy)]
pub struct SpectrumFrame<'a> {
    /// Magnitude per output bin
    pub raw: &'a [f32],

    /// Weighted level per output bin in dB, floored at 0
    pub weighted: &'a [f32],

    /// `weighted` scaled by the running maximum into [0, 1]
    pub result: &'a [f32],

    /// RMS of the requested level window
    pub level: f32,
}

/// How one output bin reads the power spectrum
#[derive(Debug, Clone, Copy, PartialEq)]
enum BinSource {
    /// Narrower than one FFT bin: linear interpolation at a fractional index
    Interpolate { index: usize, t: f32 },

    /// Covers several FFT bins: mean power over `start..end`
    Average { start: usize, end: usize },
}

/// Output-bin layout for one sample rate
struct BinMap {
    sample_rate: u32,
    sources: Vec<BinSource>,
    /// Weighting gain in dB per output bin
    gains: Vec<f32>,
}

impl BinMap {
    fn new(config: &FftConfig, sample_rate: u32) -> Self {
        let half = config.window_size / 2;
        let bins = config.num_bins;
        let step = if bins > 1 { 1.0 / (bins - 1) as f32 } else { 0.0 };
        let hz_to_index = |hz: f32| {
            (hz * config.window_size as f32 / sample_rate as f32).clamp(0.0, (half - 1) as f32)
        };

        let mut sources = Vec::with_capacity(bins);
        let mut gains = Vec::with_capacity(bins);
        for b in 0..bins {
            let pos = b as f32 * step;
            let center_hz = interpolate(&config.freq_map, pos);
            let lo = hz_to_index(interpolate(&config.freq_map, (pos - step / 2.0).max(0.0)));
            let hi = hz_to_index(interpolate(&config.freq_map, (pos + step / 2.0).min(1.0)));

            let source = if hi - lo < 1.0 {
                let center = hz_to_index(center_hz);
                BinSource::Interpolate {
                    index: center as usize,
                    t: center.fract(),
                }
            } else {
                BinSource::Average {
                    start: lo.floor() as usize,
                    end: (hi.ceil() as usize).min(half),
                }
            };
            sources.push(source);
            gains.push(interpolate(&config.weight_curve, center_hz));
        }

        Self {
            sample_rate,
            sources,
            gains,
        }
    }
}

/// Piecewise-linear lookup through `[x, y]` control points, flat outside the ends
fn interpolate(points: &[[f32; 2]], x: f32) -> f32 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.0,
    };
    if x <= first[0] {
        return first[1];
    }
    if x >= last[0] {
        return last[1];
    }

    for pair in points.windows(2) {
        let ([x0, y0], [x1, y1]) = (pair[0], pair[1]);
        if x <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    last[1]
}

/// Windowed-FFT spectrum analyzer with adaptive normalization
pub struct SpectrumAnalyzer {
    config: Option<FftConfig>,
    disposed: bool,
    planner: FftPlanner<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    window: Vec<f32>,
    bin_map: Option<BinMap>,

    // Scratch reused across calls
    samples: Vec<f32>,
    level_samples: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    power: Vec<f32>,

    raw: Vec<f32>,
    weighted: Vec<f32>,
    result: Vec<f32>,
    level: f32,
    adaptive_max: f32,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            config: None,
            disposed: false,
            planner: FftPlanner::new(),
            fft: None,
            window: Vec::new(),
            bin_map: None,
            samples: Vec::new(),
            level_samples: Vec::new(),
            buffer: Vec::new(),
            power: Vec::new(),
            raw: Vec::new(),
            weighted: Vec::new(),
            result: Vec::new(),
            level: 0.0,
            adaptive_max: ADAPTIVE_MAX_FLOOR,
        }
    }

    pub fn state(&self) -> AnalyzerState {
        match (self.disposed, &self.config) {
            (true, _) => AnalyzerState::Disposed,
            (false, Some(_)) => AnalyzerState::Configured,
            (false, None) => AnalyzerState::Uninitialized,
        }
    }

    /// Validate and apply a setup, replacing any previous one
    pub fn configure(&mut self, config: FftConfig) -> Result<()> {
        config.validate()?;

        let n = config.window_size;
        self.fft = Some(self.planner.plan_fft_forward(n));
        self.window = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos()))
            .collect();
        self.samples = vec![0.0; n];
        self.buffer = vec![Complex::new(0.0, 0.0); n];
        self.power = vec![0.0; n / 2];
        self.raw = vec![0.0; config.num_bins];
        self.weighted = vec![0.0; config.num_bins];
        self.result = vec![0.0; config.num_bins];
        self.level = 0.0;
        self.bin_map = None;
        self.adaptive_max = ADAPTIVE_MAX_FLOOR;
        self.disposed = false;

        log::debug!(
            "Spectrum analyzer configured: window {}, {} bins",
            n,
            config.num_bins
        );
        self.config = Some(config);
        Ok(())
    }

    /// Analyze the most recent audio in `source`.
    ///
    /// `window_ms` sets how much history the level is measured over. Without
    /// a source, or before any samples arrived, every output is zero and the
    /// running maximum is left alone.
    pub fn analyze(
        &mut self,
        source: Option<&SharedTap>,
        window_ms: i32,
    ) -> Result<SpectrumFrame<'_>> {
        if window_ms < 0 {
            return Err(AudioError::invalid_argument(format!(
                "window_ms must be non-negative, got {}",
                window_ms
            )));
        }
        if self.disposed {
            return Err(AudioError::NotInitialized);
        }
        if self.config.is_none() {
            self.configure(FftConfig::default())?;
        }

        let tap = match source {
            Some(tap) if tap.sample_rate() > 0 => tap,
            _ => {
                self.clear_output();
                return Ok(self.frame());
            }
        };
        let sample_rate = tap.sample_rate();

        if tap.copy_latest(&mut self.samples) == 0 {
            self.clear_output();
            return Ok(self.frame());
        }

        self.level = self.measure_level(tap, window_ms);
        self.transform();
        self.remap(sample_rate);
        self.normalize();

        Ok(self.frame())
    }

    /// Forget the running maximum; called whenever the source changes
    pub fn reset_normalization(&mut self) {
        self.adaptive_max = ADAPTIVE_MAX_FLOOR;
    }

    pub fn adaptive_max(&self) -> f32 {
        self.adaptive_max
    }

    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    pub fn weighted(&self) -> &[f32] {
        &self.weighted
    }

    pub fn result(&self) -> &[f32] {
        &self.result
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Output bins per analysis, the default count when unconfigured
    pub fn num_bins(&self) -> usize {
        self.config
            .as_ref()
            .map(|c| c.num_bins)
            .unwrap_or(crate::config::DEFAULT_NUM_BINS)
    }

    pub fn dispose(&mut self) {
        self.config = None;
        self.fft = None;
        self.bin_map = None;
        self.raw.clear();
        self.weighted.clear();
        self.result.clear();
        self.level = 0.0;
        self.adaptive_max = ADAPTIVE_MAX_FLOOR;
        self.disposed = true;
    }

    fn frame(&self) -> SpectrumFrame<'_> {
        SpectrumFrame {
            raw: &self.raw,
            weighted: &self.weighted,
            result: &self.result,
            level: self.level,
        }
    }

    fn clear_output(&mut self) {
        self.raw.fill(0.0);
        self.weighted.fill(0.0);
        self.result.fill(0.0);
        self.level = 0.0;
    }

    fn measure_level(&mut self, tap: &SharedTap, window_ms: i32) -> f32 {
        let len = window_ms as u64 * tap.sample_rate() as u64 / 1000;
        let len = len.min(tap.capacity() as u64) as usize;
        if len == 0 {
            return 0.0;
        }
        self.level_samples.resize(len, 0.0);
        let count = tap.copy_latest(&mut self.level_samples);
        if count == 0 {
            return 0.0;
        }

        let recent = &self.level_samples[len - count..];
        let sum_sq: f32 = recent.iter().map(|s| s * s).sum();
        (sum_sq / count as f32).sqrt()
    }

    fn transform(&mut self) {
        for ((dst, &s), &w) in self
            .buffer
            .iter_mut()
            .zip(self.samples.iter())
            .zip(self.window.iter())
        {
            *dst = Complex::new(s * w, 0.0);
        }

        if let Some(fft) = &self.fft {
            fft.process(&mut self.buffer);
        }

        for (p, c) in self.power.iter_mut().zip(self.buffer.iter()) {
            *p = c.norm_sqr();
        }
    }

    fn remap(&mut self, sample_rate: u32) {
        let config = match &self.config {
            Some(config) => config,
            None => return,
        };
        if self.bin_map.as_ref().map(|m| m.sample_rate) != Some(sample_rate) {
            self.bin_map = Some(BinMap::new(config, sample_rate));
        }
        let map = match &self.bin_map {
            Some(map) => map,
            None => return,
        };

        let power = &self.power;
        for ((raw, weighted), (source, &gain)) in self
            .raw
            .iter_mut()
            .zip(self.weighted.iter_mut())
            .zip(map.sources.iter().zip(map.gains.iter()))
        {
            let p = match *source {
                BinSource::Interpolate { index, t } => {
                    let a = power[index];
                    let b = power.get(index + 1).copied().unwrap_or(a);
                    a + (b - a) * t
                }
                BinSource::Average { start, end } if end > start => {
                    power[start..end].iter().sum::<f32>() / (end - start) as f32
                }
                BinSource::Average { start, .. } => power[start],
            };

            *raw = p.sqrt();
            *weighted = (20.0 * (1.0 + *raw).log10() + gain).max(0.0);
        }
    }

    fn normalize(&mut self) {
        let peak = self.weighted.iter().copied().fold(0.0f32, f32::max);
        self.adaptive_max = self.adaptive_max.max(peak);

        for (out, &w) in self.result.iter_mut().zip(self.weighted.iter()) {
            *out = (w / self.adaptive_max).clamp(0.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    fn sine_tap(hz: f32, amplitude: f32, sample_rate: u32, len: usize) -> SharedTap {
        let tap = SharedTap::new(len, sample_rate);
        let samples: Vec<f32> = (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * hz * i as f32 / sample_rate as f32).sin()
            })
            .collect();
        tap.push_samples(&samples);
        tap
    }

    fn argmax(values: &[f32]) -> usize {
        values
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    }

    #[test]
    fn interpolate_is_flat_outside_and_linear_inside() {
        let points = [[0.0, 10.0], [1.0, 20.0], [3.0, 0.0]];
        assert_eq!(interpolate(&points, -1.0), 10.0);
        assert_eq!(interpolate(&points, 5.0), 0.0);
        assert_approx(interpolate(&points, 0.5), 15.0, 1e-6);
        assert_approx(interpolate(&points, 2.0), 10.0, 1e-6);
    }

    #[test]
    fn analyze_auto_configures_defaults() {
        let mut analyzer = SpectrumAnalyzer::new();
        assert_eq!(analyzer.state(), AnalyzerState::Uninitialized);

        let frame = analyzer.analyze(None, 10).unwrap();
        assert_eq!(frame.result.len(), 1024);
        assert_eq!(analyzer.state(), AnalyzerState::Configured);
    }

    #[test]
    fn no_source_yields_zeros() {
        let mut analyzer = SpectrumAnalyzer::new();
        let frame = analyzer.analyze(None, 50).unwrap();

        assert!(frame.raw.iter().all(|&v| v == 0.0));
        assert!(frame.result.iter().all(|&v| v == 0.0));
        assert_eq!(frame.level, 0.0);
        assert_eq!(analyzer.adaptive_max(), ADAPTIVE_MAX_FLOOR);
    }

    #[test]
    fn empty_tap_yields_zeros() {
        let mut analyzer = SpectrumAnalyzer::new();
        let tap = SharedTap::new(4096, 48_000);
        let frame = analyzer.analyze(Some(&tap), 50).unwrap();
        assert!(frame.result.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn negative_window_is_rejected_without_side_effects() {
        let mut analyzer = SpectrumAnalyzer::new();
        let tap = sine_tap(440.0, 0.8, 48_000, 8192);

        let result = analyzer.analyze(Some(&tap), -1);

        assert!(matches!(result, Err(AudioError::InvalidArgument(_))));
        assert_eq!(analyzer.state(), AnalyzerState::Uninitialized);
        assert_eq!(analyzer.adaptive_max(), ADAPTIVE_MAX_FLOOR);
    }

    #[test]
    fn sine_peaks_at_mapped_bin() {
        let mut analyzer = SpectrumAnalyzer::new();
        let tap = sine_tap(1000.0, 0.8, 48_000, 8192);

        let frame = analyzer.analyze(Some(&tap), 20).unwrap();

        // 1 kHz sits at position 0.36 of the default frequency map
        let peak = argmax(frame.raw) as i64;
        assert!((peak - 368).abs() <= 6, "peak at bin {}", peak);
        assert!(frame.result.iter().all(|v| (0.0..=1.0).contains(v)));
        let top = frame.result.iter().copied().fold(0.0f32, f32::max);
        assert_approx(top, 1.0, 1e-6);
    }

    #[test]
    fn level_is_rms_of_recent_window() {
        let mut analyzer = SpectrumAnalyzer::new();
        let tap = SharedTap::new(8192, 48_000);
        tap.push_samples(&vec![0.5; 8192]);

        let frame = analyzer.analyze(Some(&tap), 10).unwrap();
        assert_approx(frame.level, 0.5, 1e-6);

        let frame = analyzer.analyze(Some(&tap), 0).unwrap();
        assert_eq!(frame.level, 0.0);
    }

    #[test]
    fn level_window_longer_than_history_uses_what_is_buffered() {
        let mut analyzer = SpectrumAnalyzer::new();
        let tap = SharedTap::new(8192, 48_000);
        tap.push_samples(&vec![0.25; 2048]);
        tap.push_samples(&vec![-0.75; 2048]);

        let frame = analyzer.analyze(Some(&tap), i32::MAX).unwrap();
        let expected = ((0.25f32 * 0.25 + 0.75 * 0.75) / 2.0).sqrt();
        assert_approx(frame.level, expected, 1e-5);
    }

    #[test]
    fn adaptive_max_only_grows_until_reset() {
        let mut analyzer = SpectrumAnalyzer::new();
        let loud = sine_tap(1000.0, 0.9, 48_000, 8192);
        let quiet = sine_tap(1000.0, 0.01, 48_000, 8192);

        analyzer.analyze(Some(&loud), 10).unwrap();
        let after_loud = analyzer.adaptive_max();
        assert!(after_loud > ADAPTIVE_MAX_FLOOR);

        analyzer.analyze(Some(&quiet), 10).unwrap();
        assert_eq!(analyzer.adaptive_max(), after_loud);

        analyzer.reset_normalization();
        assert_eq!(analyzer.adaptive_max(), ADAPTIVE_MAX_FLOOR);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut analyzer = SpectrumAnalyzer::new();
        let config = FftConfig {
            window_size: 1023,
            ..FftConfig::default()
        };
        assert!(matches!(
            analyzer.configure(config),
            Err(AudioError::InvalidArgument(_))
        ));
        assert_eq!(analyzer.state(), AnalyzerState::Uninitialized);
    }

    #[test]
    fn wide_bins_average_and_narrow_bins_interpolate() {
        let config = FftConfig {
            num_bins: 16,
            ..FftConfig::default()
        };
        let map = BinMap::new(&config, 48_000);

        assert!(matches!(map.sources[15], BinSource::Average { .. }));

        let fine = FftConfig::default();
        let map = BinMap::new(&fine, 48_000);
        assert!(matches!(map.sources[0], BinSource::Interpolate { .. }));
        assert_eq!(map.gains[0], -5.0);
    }

    #[test]
    fn disposed_analyzer_reports_not_initialized() {
        let mut analyzer = SpectrumAnalyzer::new();
        analyzer.dispose();
        assert!(matches!(
            analyzer.analyze(None, 10),
            Err(AudioError::NotInitialized)
        ));

        analyzer.configure(FftConfig::default()).unwrap();
        assert_eq!(analyzer.state(), AnalyzerState::Configured);
    }
}
