//! Caller-facing engine: audio session plus spectrum analysis

use crate::audio::{
    AnalyzerState, AudioBackend, AudioContext, Device, DeviceCatalog, FftInputMode,
    HardwareBackend, Sound, SpectrumAnalyzer, SpectrumFrame,
};
use crate::config::{EngineConfig, FftConfig};
use crate::error::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Coarse engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    AudioReady,
    Disposed,
}

/// Snapshot of engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub lifecycle: Lifecycle,
    pub fft_ready: bool,
    pub engine_ready: bool,
    pub input_mode: FftInputMode,
    pub paused: bool,
    pub finished: bool,
    pub cursor_seconds: f64,
    pub length_seconds: f64,
    pub underruns: u64,
    pub music_volume: f32,
    pub other_volume: f32,
    pub adaptive_max: f32,
}

/// Audio engine
///
/// `init_audio` first; devices, songs and sounds are then available.
/// `init_fft` is optional, analysis falls back to the default setup.
pub struct Engine {
    audio: Option<AudioContext>,
    analyzer: SpectrumAnalyzer,
    input_mode: FftInputMode,
    disposed: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            audio: None,
            analyzer: SpectrumAnalyzer::new(),
            input_mode: FftInputMode::None,
            disposed: false,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match (&self.audio, self.disposed) {
            (Some(_), _) => Lifecycle::AudioReady,
            (None, true) => Lifecycle::Disposed,
            (None, false) => Lifecycle::Uninitialized,
        }
    }

    /// Analyzer explicitly configured
    pub fn fft_ready(&self) -> bool {
        self.audio.is_some() && self.analyzer.state() == AnalyzerState::Configured
    }

    /// Playback device open with the sound pool bound to it
    pub fn engine_ready(&self) -> bool {
        self.audio
            .as_ref()
            .map(|a| a.has_playback_device() && a.sounds().is_bound())
            .unwrap_or(false)
    }

    /// Initialize audio on the platform's default host
    pub fn init_audio(&mut self, config: EngineConfig) -> Result<()> {
        self.init_audio_with(config, Box::new(HardwareBackend::new()))
    }

    /// Initialize audio on a specific backend, replacing any previous session
    pub fn init_audio_with(
        &mut self,
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
    ) -> Result<()> {
        if let Some(mut previous) = self.audio.take() {
            log::info!("Reinitializing audio");
            previous.deinit();
        }

        let context = AudioContext::new(config, backend)?;
        self.audio = Some(context);
        self.disposed = false;
        Ok(())
    }

    /// Configure spectrum analysis
    pub fn init_fft(&mut self, config: FftConfig) -> Result<()> {
        self.audio()?;
        self.analyzer.configure(config)
    }

    /// Release everything. Never fails; calling it again does nothing.
    pub fn dispose(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.deinit();
        }
        if self.analyzer.state() != AnalyzerState::Disposed {
            self.analyzer.dispose();
        }
        self.input_mode = FftInputMode::None;
        self.disposed = true;
    }

    pub fn context(&self) -> Option<&AudioContext> {
        self.audio.as_ref()
    }

    fn audio(&self) -> Result<&AudioContext> {
        self.audio.as_ref().ok_or(AudioError::NotInitialized)
    }

    fn audio_mut(&mut self) -> Result<&mut AudioContext> {
        self.audio.as_mut().ok_or(AudioError::NotInitialized)
    }

    pub fn enumerate_devices(&mut self) -> Result<DeviceCatalog> {
        Ok(self.audio_mut()?.enumerate_devices()?.clone())
    }

    pub fn open_playback_device(&mut self, device: Option<&Device>) -> Result<()> {
        self.audio_mut()?.open_playback_device(device)?;
        self.analyzer.reset_normalization();
        Ok(())
    }

    pub fn open_capture_device(&mut self, device: Option<&Device>) -> Result<()> {
        self.audio_mut()?.open_capture_device(device)?;
        self.analyzer.reset_normalization();
        Ok(())
    }

    pub fn play_song(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.audio_mut()?.play_song(path)?;
        self.analyzer.reset_normalization();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.audio_mut()?.pause()
    }

    pub fn resume(&mut self) -> Result<()> {
        self.audio_mut()?.resume()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.audio_mut()?.stop()
    }

    pub fn cursor_seconds(&self) -> Result<f64> {
        self.audio()?.cursor_seconds()
    }

    pub fn length_seconds(&self) -> Result<f64> {
        self.audio()?.length_seconds()
    }

    pub fn is_finished(&self) -> Result<bool> {
        self.audio()?.is_finished()
    }

    pub fn set_music_volume(&mut self, gain: f32) -> Result<()> {
        self.audio_mut()?.set_music_volume(gain)
    }

    pub fn set_other_volume(&mut self, gain: f32) -> Result<()> {
        self.audio_mut()?.set_other_volume(gain)
    }

    pub fn load_sound(&mut self, path: impl AsRef<Path>) -> Result<Sound> {
        self.audio_mut()?.load_sound(path)
    }

    pub fn play_sound(&mut self, sound: &Sound, repeat_delay: f32) -> Result<()> {
        self.audio_mut()?.play_sound(sound, repeat_delay)
    }

    pub fn resolve_sound(&self, sound: &mut Sound) -> Result<()> {
        self.audio()?.resolve_sound(sound)
    }

    pub fn clear_sounds(&mut self) -> Result<()> {
        self.audio_mut()?.clear_sounds()
    }

    pub fn fft_input_mode(&self) -> FftInputMode {
        self.input_mode
    }

    /// Choose the analysis source. `None` is always accepted.
    pub fn set_fft_input_mode(&mut self, mode: FftInputMode) -> Result<()> {
        if mode != FftInputMode::None {
            self.audio()?;
        }
        if mode != self.input_mode {
            self.analyzer.reset_normalization();
        }
        self.input_mode = mode;
        Ok(())
    }

    /// Analyze the latest audio from the selected source
    pub fn analyze(&mut self, window_ms: i32) -> Result<SpectrumFrame<'_>> {
        if window_ms < 0 {
            return Err(AudioError::invalid_argument(format!(
                "window_ms must be non-negative, got {}",
                window_ms
            )));
        }

        let tap = match self.input_mode {
            FftInputMode::None => None,
            FftInputMode::Playback => Some(self.audio()?.playback_tap().clone()),
            FftInputMode::Capture => Some(self.audio()?.capture_tap().clone()),
        };
        if self.analyzer.state() == AnalyzerState::Disposed {
            self.analyzer = SpectrumAnalyzer::new();
        }
        self.analyzer.analyze(tap.as_ref(), window_ms)
    }

    pub fn num_bins(&self) -> usize {
        self.analyzer.num_bins()
    }

    /// Level from the last analysis
    pub fn level(&self) -> f32 {
        self.analyzer.level()
    }

    pub fn adaptive_max(&self) -> f32 {
        self.analyzer.adaptive_max()
    }

    pub fn status(&self) -> EngineStatus {
        let audio = self.audio.as_ref();
        EngineStatus {
            lifecycle: self.lifecycle(),
            fft_ready: self.fft_ready(),
            engine_ready: self.engine_ready(),
            input_mode: self.input_mode,
            paused: audio.map(|a| a.is_paused()).unwrap_or(false),
            finished: audio.and_then(|a| a.is_finished().ok()).unwrap_or(true),
            cursor_seconds: audio.and_then(|a| a.cursor_seconds().ok()).unwrap_or(0.0),
            length_seconds: audio.and_then(|a| a.length_seconds().ok()).unwrap_or(0.0),
            underruns: audio.map(|a| a.underruns()).unwrap_or(0),
            music_volume: audio.map(|a| a.music_volume()).unwrap_or(1.0),
            other_volume: audio.map(|a| a.other_volume()).unwrap_or(1.0),
            adaptive_max: self.analyzer.adaptive_max(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}
