//! Jum Audio
//!
//! Real-time audio engine for games and visualizers: streams a song to a
//! playback device, mixes a pool of one-shot sounds over it, and turns
//! whatever is playing (or being captured) into a perceptually weighted
//! spectrum suitable for drawing every frame.
//!
//! ```no_run
//! use jumaudio::{Engine, EngineConfig, FftInputMode};
//!
//! let mut engine = Engine::new();
//! engine.init_audio(EngineConfig::default())?;
//! engine.set_fft_input_mode(FftInputMode::Playback)?;
//! engine.play_song("song.flac")?;
//!
//! while !engine.is_finished()? {
//!     let frame = engine.analyze(16)?;
//!     println!("level {:.3}", frame.level);
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! # Ok::<(), jumaudio::AudioError>(())
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;

pub use audio::{Device, DeviceCatalog, DeviceKind, FftInputMode, Sound, SpectrumFrame};
pub use config::{Config, EngineConfig, FftConfig};
pub use engine::{Engine, EngineStatus, Lifecycle};
pub use error::{AudioError, Result};
