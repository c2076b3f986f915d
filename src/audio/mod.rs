//! Audio devices, streaming playback, sounds and spectrum analysis

pub mod backend;
mod context;
mod decoder;
mod devices;
mod fft;
mod pool;
mod tap;

pub use backend::{AudioBackend, HardwareBackend, OfflineBackend, StreamFormat};
pub use context::{AudioContext, ContextState};
pub use decoder::{decode_all, LinearResampler, SongDecoder, StereoStream};
pub use devices::{Device, DeviceCatalog, DeviceKind};
pub use fft::{AnalyzerState, FftInputMode, SpectrumAnalyzer, SpectrumFrame, ADAPTIVE_MAX_FLOOR};
pub use pool::{Sound, SoundHandle, SoundPool};
pub use tap::{AudioBuffer, SharedTap};
