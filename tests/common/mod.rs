#![allow(dead_code)]

use jumaudio::audio::OfflineBackend;
use jumaudio::{Engine, EngineConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub const RATE: u32 = 8_000;

/// Write a 16-bit PCM WAV file
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[f32]) {
    let data_len = (samples.len() * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }

    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
}

pub fn sine(hz: f32, amplitude: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * hz * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Mono WAV fixture at `RATE`
pub fn fixture(dir: &Path, name: &str, samples: &[f32]) -> PathBuf {
    let path = dir.join(name);
    write_wav(&path, RATE, 1, samples);
    path
}

pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Engine on an offline backend, plus a handle that drives its callbacks
pub fn offline_engine(config: EngineConfig) -> (Engine, OfflineBackend) {
    let backend = OfflineBackend::new(RATE, 2);
    let mut engine = Engine::new();
    engine
        .init_audio_with(config, Box::new(backend.clone()))
        .unwrap();
    (engine, backend)
}

pub fn small_config() -> EngineConfig {
    EngineConfig::new(16_384, 4, 1_024)
}

/// Wait until `frames` are queued, or whatever is left of the song
pub fn wait_buffered(engine: &Engine, frames: usize) {
    let ok = wait_for(Duration::from_secs(5), || {
        let ctx = match engine.context() {
            Some(ctx) => ctx,
            None => return false,
        };
        let left = ctx.length_seconds().unwrap_or(0.0) - ctx.cursor_seconds().unwrap_or(0.0);
        let left = (left * RATE as f64).round().max(0.0) as usize;
        ctx.buffered_frames() >= frames.min(left)
    });
    assert!(ok, "decoder never buffered {} frames", frames);
}
