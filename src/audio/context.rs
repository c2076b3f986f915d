//! Playback/capture session: devices, song streaming, sound mixing, taps
//!
//! Threads involved:
//! - the control thread owning [`AudioContext`]
//! - the playback callback (real time, never blocks)
//! - the capture callback (real time, never blocks)
//! - one `stream-decode` worker per song, feeding the ring ahead of the callback
//! - the pool's `sound-loader`

use super::backend::{ActiveStream, AudioBackend, PlaybackCallback, StreamFormat, StreamRequest};
use super::decoder::{SongDecoder, StereoStream};
use super::devices::{Device, DeviceCatalog, DeviceKind};
use super::pool::{Sound, SoundBank, SoundPool};
use super::tap::SharedTap;
use crate::config::{EngineConfig, DEFAULT_WINDOW_SIZE};
use crate::error::{AudioError, Result};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Samples per frame on the internal mix bus
const MIX_CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Ready,
    Disposed,
}

/// Map any gain onto [0, 1]; NaN is silence
fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, 1.0)
    }
}

/// State shared with the playback callback
struct PlaybackShared {
    /// Consumer side of the current song's ring; swapped whole on `play_song`
    stream: Mutex<Option<HeapCons<f32>>>,
    paused: AtomicBool,
    music_gain: AtomicU32,
    other_gain: AtomicU32,
    frames_played: AtomicU64,
    decode_finished: AtomicBool,
    underruns: AtomicU64,
    bank: Arc<Mutex<SoundBank>>,
    tap: SharedTap,
}

impl PlaybackShared {
    fn music_gain(&self) -> f32 {
        f32::from_bits(self.music_gain.load(Ordering::Relaxed))
    }

    fn other_gain(&self) -> f32 {
        f32::from_bits(self.other_gain.load(Ordering::Relaxed))
    }

    /// Pull song frames into the front of `mix`; the rest stays silent
    fn render_music(&self, mix: &mut [f32]) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }

        // Cursor and tap are updated under the ring guard; swaps reset both
        // while holding it
        let popped = match self.stream.try_lock() {
            Some(mut guard) => match guard.as_mut() {
                Some(consumer) => {
                    let popped = consumer.pop_slice(mix);
                    if popped < mix.len() && !self.decode_finished.load(Ordering::Acquire) {
                        self.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                    if popped > 0 {
                        self.frames_played
                            .fetch_add((popped / MIX_CHANNELS) as u64, Ordering::Relaxed);
                        // Analysis sees the song before the fader
                        self.tap.push_interleaved(&mix[..popped], MIX_CHANNELS);
                    }
                    popped
                }
                None => 0,
            },
            // Ring is being swapped; skip this period
            None => 0,
        };
        if popped == 0 {
            return;
        }

        let gain = self.music_gain();
        for s in &mut mix[..popped] {
            *s *= gain;
        }
    }
}

/// Mix buffer sized for one period, so the callback never allocates for the
/// period it was opened with
fn mix_scratch(period_frames: usize) -> Vec<f32> {
    vec![0.0; period_frames * MIX_CHANNELS]
}

fn playback_callback(shared: Arc<PlaybackShared>, period_frames: usize) -> PlaybackCallback {
    let mut scratch = mix_scratch(period_frames);

    Box::new(move |data: &mut [f32], channels: usize| {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        // Driver chose a longer period than requested
        if scratch.len() < frames * MIX_CHANNELS {
            scratch.resize(frames * MIX_CHANNELS, 0.0);
        }
        let mix = &mut scratch[..frames * MIX_CHANNELS];
        mix.fill(0.0);

        shared.render_music(mix);

        if let Some(mut bank) = shared.bank.try_lock() {
            bank.mix_into(mix, shared.other_gain());
        }

        for (out, src) in data.chunks_exact_mut(channels).zip(mix.chunks_exact(MIX_CHANNELS)) {
            if channels == 1 {
                out[0] = ((src[0] + src[1]) * 0.5).clamp(-1.0, 1.0);
            } else {
                out[0] = src[0].clamp(-1.0, 1.0);
                out[1] = src[1].clamp(-1.0, 1.0);
                out[2..].fill(0.0);
            }
        }
    })
}

/// Decode worker for one song
struct DecodeWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DecodeWorker {
    fn spawn(
        mut song: StereoStream,
        mut producer: HeapProd<f32>,
        shared: Arc<PlaybackShared>,
        predecode_frames: usize,
        period_frames: usize,
        idle: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let target = predecode_frames * MIX_CHANNELS;

        let handle = thread::Builder::new()
            .name("stream-decode".to_string())
            .spawn(move || {
                let mut pending: Vec<f32> = Vec::with_capacity(period_frames * MIX_CHANNELS);
                let mut offset = 0;

                while !stop_flag.load(Ordering::Acquire) {
                    if offset < pending.len() {
                        offset += producer.push_slice(&pending[offset..]);
                        if offset < pending.len() {
                            thread::sleep(idle);
                        }
                        continue;
                    }

                    let queued = producer.occupied_len();
                    if queued >= target {
                        thread::sleep(idle);
                        continue;
                    }

                    pending.clear();
                    offset = 0;
                    let want = ((target - queued) / MIX_CHANNELS).clamp(1, period_frames);
                    match song.fill(&mut pending, want) {
                        Ok(0) => {
                            log::debug!("Song decode reached end of input");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("Song decode stopped: {}", e);
                            break;
                        }
                    }
                }

                shared.decode_finished.store(true, Ordering::Release);
            })
            .map_err(|e| AudioError::Init(format!("Failed to spawn decode thread: {}", e)))?;

        Ok(Self { stop, handle })
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            log::error!("Decode thread panicked");
        }
    }
}

/// An open device stream
struct OpenStream {
    // Dropping this stops the device
    _stream: Box<dyn ActiveStream>,
    device: Option<Device>,
    format: StreamFormat,
}

/// Audio session owning devices, the song pipeline and the sound pool
pub struct AudioContext {
    config: EngineConfig,
    backend: Box<dyn AudioBackend>,
    catalog: DeviceCatalog,
    shared: Arc<PlaybackShared>,
    pool: SoundPool,
    capture_tap: SharedTap,
    playback: Option<OpenStream>,
    capture: Option<OpenStream>,
    worker: Option<DecodeWorker>,
    song_active: bool,
    length_seconds: f64,
    state: ContextState,
}

impl AudioContext {
    /// Set up a session on `backend`. No device is opened yet.
    pub fn new(config: EngineConfig, backend: Box<dyn AudioBackend>) -> Result<Self> {
        config.validate()?;

        if config.buffer_size_frames < config.period_frames * config.predecode_buffers {
            log::warn!(
                "Buffer of {} frames cannot hold {} predecode periods of {} frames, clamping look-ahead to {} frames",
                config.buffer_size_frames,
                config.predecode_buffers,
                config.period_frames,
                config.predecode_frames()
            );
        }

        let catalog = DeviceCatalog::enumerate(backend.as_ref());
        let pool = SoundPool::new(config.sound_capacity)?;
        let tap_capacity = config.buffer_size_frames.max(DEFAULT_WINDOW_SIZE * 2);

        let shared = Arc::new(PlaybackShared {
            stream: Mutex::new(None),
            paused: AtomicBool::new(false),
            music_gain: AtomicU32::new(1.0f32.to_bits()),
            other_gain: AtomicU32::new(1.0f32.to_bits()),
            frames_played: AtomicU64::new(0),
            decode_finished: AtomicBool::new(true),
            underruns: AtomicU64::new(0),
            bank: pool.bank(),
            tap: SharedTap::new(tap_capacity, 0),
        });

        log::info!(
            "Audio context ready on {} backend: {} playback, {} capture devices",
            backend.name(),
            catalog.playback.len(),
            catalog.capture.len()
        );

        Ok(Self {
            config,
            backend,
            catalog,
            shared,
            pool,
            capture_tap: SharedTap::new(tap_capacity, 0),
            playback: None,
            capture: None,
            worker: None,
            song_active: false,
            length_seconds: 0.0,
            state: ContextState::Ready,
        })
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ContextState::Ready => Ok(()),
            ContextState::Disposed => Err(AudioError::NotInitialized),
        }
    }

    /// Re-enumerate devices. Previously returned devices may become stale.
    pub fn enumerate_devices(&mut self) -> Result<&DeviceCatalog> {
        self.ensure_ready()?;
        self.catalog = DeviceCatalog::enumerate(self.backend.as_ref());
        Ok(&self.catalog)
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    fn resolve_device(&self, device: Option<&Device>, kind: DeviceKind) -> Result<Option<usize>> {
        match device {
            None => Ok(None),
            Some(d) if d.kind != kind => Err(AudioError::Device(format!(
                "{} is a {} device, expected {}",
                d.name, d.kind, kind
            ))),
            Some(d) if !self.catalog.contains(d) => Err(AudioError::Device(format!(
                "{} device {} ({}) is no longer available",
                kind, d.index, d.name
            ))),
            Some(d) => Ok(Some(d.index)),
        }
    }

    /// Open a playback device, `None` for the default.
    ///
    /// Any current song is stopped. The sound pool is rebuilt at the new
    /// device rate, so existing sound handles must be re-resolved.
    pub fn open_playback_device(&mut self, device: Option<&Device>) -> Result<()> {
        self.ensure_ready()?;
        let index = self.resolve_device(device, DeviceKind::Playback)?;

        self.stop_song();
        self.playback = None;
        self.pool.unbind();

        let request = self.stream_request();
        let stream = self
            .backend
            .open_playback(
                index,
                request,
                playback_callback(self.shared.clone(), self.config.period_frames),
            )?;
        let format = stream.format();

        self.shared.tap.set_sample_rate(format.sample_rate);
        self.shared.tap.clear();
        self.pool.bind(format.sample_rate);

        log::info!(
            "Playback device open: {} Hz, {} channels",
            format.sample_rate,
            format.channels
        );
        self.playback = Some(OpenStream {
            _stream: stream,
            device: device.cloned(),
            format,
        });
        Ok(())
    }

    /// Open a capture device, `None` for the default
    pub fn open_capture_device(&mut self, device: Option<&Device>) -> Result<()> {
        self.ensure_ready()?;
        let index = self.resolve_device(device, DeviceKind::Capture)?;

        self.capture = None;

        let request = self.stream_request();
        let tap = self.capture_tap.clone();
        let stream = self.backend.open_capture(
            index,
            request,
            Box::new(move |data: &[f32], channels: usize| {
                tap.push_interleaved(data, channels);
            }),
        )?;
        let format = stream.format();

        self.capture_tap.set_sample_rate(format.sample_rate);
        self.capture_tap.clear();

        log::info!(
            "Capture device open: {} Hz, {} channels",
            format.sample_rate,
            format.channels
        );
        self.capture = Some(OpenStream {
            _stream: stream,
            device: device.cloned(),
            format,
        });
        Ok(())
    }

    fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            period_frames: u32::try_from(self.config.period_frames).unwrap_or(u32::MAX),
        }
    }

    pub fn has_playback_device(&self) -> bool {
        self.playback.is_some()
    }

    pub fn has_capture_device(&self) -> bool {
        self.capture.is_some()
    }

    /// Device explicitly chosen for playback; `None` also when the default is open
    pub fn playback_device(&self) -> Option<&Device> {
        self.playback.as_ref().and_then(|s| s.device.as_ref())
    }

    pub fn capture_device(&self) -> Option<&Device> {
        self.capture.as_ref().and_then(|s| s.device.as_ref())
    }

    pub fn playback_format(&self) -> Option<StreamFormat> {
        self.playback.as_ref().map(|s| s.format)
    }

    pub fn capture_format(&self) -> Option<StreamFormat> {
        self.capture.as_ref().map(|s| s.format)
    }

    /// Start streaming `path`, replacing any current song
    pub fn play_song(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_ready()?;
        let path = path.as_ref();
        let decoder = SongDecoder::open(path)?;

        if self.playback.is_none() {
            self.open_playback_device(None)?;
        }
        let sample_rate = self
            .playback
            .as_ref()
            .map(|s| s.format.sample_rate)
            .ok_or_else(|| AudioError::Device("No playback device".to_string()))?;

        self.stop_worker();

        let (producer, consumer) =
            HeapRb::<f32>::new(self.config.buffer_size_frames * MIX_CHANNELS).split();
        {
            let mut stream = self.shared.stream.lock();
            *stream = Some(consumer);
            self.shared.frames_played.store(0, Ordering::Relaxed);
            self.shared.underruns.store(0, Ordering::Relaxed);
            self.shared.decode_finished.store(false, Ordering::Release);
            self.shared.tap.clear();
            self.shared.paused.store(false, Ordering::Release);
        }

        let song = StereoStream::new(decoder, sample_rate);
        self.length_seconds = song.length_seconds();

        let period_ms = self.config.period_frames as u64 * 1000 / sample_rate.max(1) as u64;
        let idle = Duration::from_millis((period_ms / 2).clamp(1, 20));
        self.worker = Some(DecodeWorker::spawn(
            song,
            producer,
            self.shared.clone(),
            self.config.predecode_frames(),
            self.config.period_frames,
            idle,
        )?);
        self.song_active = true;

        log::info!("Playing {} ({:.1}s)", path.display(), self.length_seconds);
        Ok(())
    }

    /// Stop the current song without closing the device
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.stop_song();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.shared.paused.store(true, Ordering::Release);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Seconds of the current song delivered to the device
    pub fn cursor_seconds(&self) -> Result<f64> {
        self.ensure_ready()?;
        let rate = match self.playback_format() {
            Some(format) if format.sample_rate > 0 => format.sample_rate,
            _ => return Ok(0.0),
        };
        Ok(self.shared.frames_played.load(Ordering::Relaxed) as f64 / rate as f64)
    }

    /// Length of the current song, 0 when unknown or idle
    pub fn length_seconds(&self) -> Result<f64> {
        self.ensure_ready()?;
        Ok(self.length_seconds)
    }

    /// True once the song is fully decoded and drained, or when none is playing
    pub fn is_finished(&self) -> Result<bool> {
        self.ensure_ready()?;
        if !self.song_active {
            return Ok(true);
        }
        if !self.shared.decode_finished.load(Ordering::Acquire) {
            return Ok(false);
        }
        Ok(self
            .shared
            .stream
            .lock()
            .as_ref()
            .map(|c| c.is_empty())
            .unwrap_or(true))
    }

    /// Frames decoded ahead of the callback
    pub fn buffered_frames(&self) -> usize {
        self.shared
            .stream
            .lock()
            .as_ref()
            .map(|c| c.occupied_len() / MIX_CHANNELS)
            .unwrap_or(0)
    }

    /// Periods the callback came up short while the song was still decoding
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    pub fn set_music_volume(&mut self, gain: f32) -> Result<()> {
        self.ensure_ready()?;
        self.shared
            .music_gain
            .store(clamp_gain(gain).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn set_other_volume(&mut self, gain: f32) -> Result<()> {
        self.ensure_ready()?;
        self.shared
            .other_gain
            .store(clamp_gain(gain).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn music_volume(&self) -> f32 {
        self.shared.music_gain()
    }

    pub fn other_volume(&self) -> f32 {
        self.shared.other_gain()
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn stop_song(&mut self) {
        self.stop_worker();
        let mut stream = self.shared.stream.lock();
        *stream = None;
        self.shared.decode_finished.store(true, Ordering::Release);
        self.shared.frames_played.store(0, Ordering::Relaxed);
        drop(stream);
        self.song_active = false;
        self.length_seconds = 0.0;
    }

    pub fn load_sound(&mut self, path: impl AsRef<Path>) -> Result<Sound> {
        self.ensure_ready()?;
        self.pool.load_sound(path)
    }

    pub fn play_sound(&mut self, sound: &Sound, repeat_delay: f32) -> Result<()> {
        self.ensure_ready()?;
        self.pool.play_sound(sound, repeat_delay)
    }

    pub fn resolve_sound(&self, sound: &mut Sound) -> Result<()> {
        self.ensure_ready()?;
        self.pool.resolve(sound)
    }

    pub fn clear_sounds(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.pool.clear_sounds();
        Ok(())
    }

    pub fn sounds(&self) -> &SoundPool {
        &self.pool
    }

    /// Pre-fader song samples as delivered to the playback device
    pub fn playback_tap(&self) -> &SharedTap {
        &self.shared.tap
    }

    pub fn capture_tap(&self) -> &SharedTap {
        &self.capture_tap
    }

    /// Tear everything down. Safe to call more than once.
    pub fn deinit(&mut self) {
        if self.state == ContextState::Disposed {
            return;
        }

        self.pool.shutdown();
        self.stop_song();
        self.playback = None;
        self.capture = None;
        self.state = ContextState::Disposed;
        log::info!("Audio context disposed");
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::OfflineBackend;
    use crate::audio::decoder::write_test_wav;
    use std::time::Instant;

    const RATE: u32 = 8_000;

    fn context(backend: &OfflineBackend) -> AudioContext {
        let config = EngineConfig::new(4096, 2, 512);
        AudioContext::new(config, Box::new(backend.clone())).unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn gains_are_clamped() {
        assert_eq!(clamp_gain(1.5), 1.0);
        assert_eq!(clamp_gain(-0.1), 0.0);
        assert_eq!(clamp_gain(f32::NAN), 0.0);
        assert_eq!(clamp_gain(0.25), 0.25);
    }

    #[test]
    fn callback_writes_silence_without_a_song() {
        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.open_playback_device(None).unwrap();

        assert!(backend.render(64).iter().all(|&s| s == 0.0));
        assert!(ctx.is_finished().unwrap());
    }

    #[test]
    fn song_streams_through_the_ring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_test_wav(&path, RATE, 1, &vec![0.5; 2_000]);

        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.play_song(&path).unwrap();
        assert!(ctx.has_playback_device());
        assert!((ctx.length_seconds().unwrap() - 0.25).abs() < 1e-9);

        wait_for(|| ctx.buffered_frames() >= 1_000);
        let out = backend.render(1_000);
        assert!((out[0] - 0.5).abs() < 1e-3);
        assert!((ctx.cursor_seconds().unwrap() - 0.125).abs() < 1e-9);
        assert!(!ctx.is_finished().unwrap());

        wait_for(|| ctx.buffered_frames() >= 1_000);
        backend.render(1_500);
        wait_for(|| ctx.is_finished().unwrap());
        assert!((ctx.cursor_seconds().unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn music_volume_scales_output_but_not_tap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_test_wav(&path, RATE, 1, &vec![0.5; 2_000]);

        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.set_music_volume(0.5).unwrap();
        ctx.play_song(&path).unwrap();
        wait_for(|| ctx.buffered_frames() >= 100);

        let out = backend.render(100);
        assert!((out[0] - 0.25).abs() < 1e-3);

        let mut latest = [0.0f32; 1];
        ctx.playback_tap().copy_latest(&mut latest);
        assert!((latest[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn paused_song_holds_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_test_wav(&path, RATE, 1, &vec![0.5; 2_000]);

        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.play_song(&path).unwrap();
        wait_for(|| ctx.buffered_frames() >= 200);

        ctx.pause().unwrap();
        ctx.pause().unwrap();
        assert!(backend.render(200).iter().all(|&s| s == 0.0));
        assert_eq!(ctx.cursor_seconds().unwrap(), 0.0);

        ctx.resume().unwrap();
        backend.render(200);
        assert!((ctx.cursor_seconds().unwrap() - 0.025).abs() < 1e-9);
    }

    #[test]
    fn stop_keeps_the_device_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_test_wav(&path, RATE, 1, &vec![0.5; 2_000]);

        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.play_song(&path).unwrap();
        ctx.stop().unwrap();

        assert!(ctx.has_playback_device());
        assert!(ctx.is_finished().unwrap());
        assert_eq!(ctx.length_seconds().unwrap(), 0.0);
    }

    #[test]
    fn wrong_kind_and_stale_devices_are_rejected() {
        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        let capture = ctx.catalog().capture[0].clone();

        assert!(matches!(
            ctx.open_playback_device(Some(&capture)),
            Err(AudioError::Device(_))
        ));

        let mut stale = ctx.catalog().playback[0].clone();
        stale.index = 7;
        assert!(matches!(
            ctx.open_playback_device(Some(&stale)),
            Err(AudioError::Device(_))
        ));
    }

    #[test]
    fn capture_feeds_its_tap() {
        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.open_capture_device(None).unwrap();
        assert!(backend.feed_capture(&[0.2, 0.4, 0.6, 0.8]));

        let mut latest = [0.0f32; 2];
        assert_eq!(ctx.capture_tap().copy_latest(&mut latest), 2);
        assert!((latest[0] - 0.3).abs() < 1e-6);
        assert!((latest[1] - 0.7).abs() < 1e-6);
        assert_eq!(ctx.capture_tap().sample_rate(), RATE);
    }

    #[test]
    fn reopening_playback_replaces_the_stream() {
        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.open_playback_device(None).unwrap();
        ctx.open_playback_device(None).unwrap();
        assert!(backend.has_playback_stream());
    }

    #[test]
    fn disposed_context_rejects_operations() {
        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.open_playback_device(None).unwrap();

        ctx.deinit();
        ctx.deinit();

        assert!(!backend.has_playback_stream());
        assert!(matches!(ctx.pause(), Err(AudioError::NotInitialized)));
        assert!(matches!(
            ctx.play_song("missing.flac"),
            Err(AudioError::NotInitialized)
        ));
    }

    #[test]
    fn mono_device_gets_a_downmix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let interleaved: Vec<f32> = (0..500).flat_map(|_| [0.6, 0.2]).collect();
        write_test_wav(&path, RATE, 2, &interleaved);

        let backend = OfflineBackend::new(RATE, 1);
        let mut ctx = context(&backend);
        ctx.play_song(&path).unwrap();
        wait_for(|| ctx.buffered_frames() >= 10);

        let out = backend.render(10);
        assert_eq!(out.len(), 10);
        assert!((out[0] - 0.4).abs() < 1e-3);
    }

    #[test]
    fn mix_scratch_holds_one_period() {
        assert_eq!(mix_scratch(512).len(), 512 * MIX_CHANNELS);
        assert_eq!(mix_scratch(4096).len(), 4096 * MIX_CHANNELS);
    }

    #[test]
    fn song_swap_under_a_running_callback_keeps_old_frames_out() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.wav");
        let second = dir.path().join("second.wav");
        write_test_wav(&first, RATE, 1, &vec![0.25; 40_000]);
        write_test_wav(&second, RATE, 1, &vec![-0.25; 40_000]);

        let backend = OfflineBackend::new(RATE, 2);
        let mut ctx = context(&backend);
        ctx.play_song(&first).unwrap();
        wait_for(|| ctx.buffered_frames() >= 512);

        let running = Arc::new(AtomicBool::new(true));
        let driver = {
            let backend = backend.clone();
            let running = running.clone();
            thread::spawn(move || {
                while running.load(Ordering::Acquire) {
                    backend.render(64);
                }
            })
        };

        thread::sleep(Duration::from_millis(5));
        ctx.play_song(&second).unwrap();
        thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Release);
        driver.join().unwrap();

        let mut latest = vec![0.0; 4096];
        let count = ctx.playback_tap().copy_latest(&mut latest);
        assert!(latest[4096 - count..].iter().all(|&s| s <= 0.0));
        let played = (ctx.cursor_seconds().unwrap() * RATE as f64).round() as usize;
        assert!(count <= played);
    }
}
