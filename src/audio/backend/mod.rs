//! Platform seam between the engine and whatever drives the audio clock
//!
//! - `hardware` talks to real devices through cpal
//! - `offline` has no clock of its own; callers pull periods explicitly,
//!   which makes headless rendering and deterministic tests possible

mod hardware;
mod offline;

pub use hardware::HardwareBackend;
pub use offline::OfflineBackend;

use super::devices::DeviceKind;
use crate::error::Result;

/// Playback callback: fill an interleaved buffer with `channels` channels
pub type PlaybackCallback = Box<dyn FnMut(&mut [f32], usize) + Send + 'static>;

/// Capture callback: consume an interleaved buffer with `channels` channels
pub type CaptureCallback = Box<dyn FnMut(&[f32], usize) + Send + 'static>;

/// Device as reported by a backend, before the catalog assigns indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// What the engine asks of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub period_frames: u32,
}

/// What the device actually runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An open, running stream.
///
/// Dropping it stops the stream; once drop returns the callback will not be
/// invoked again.
pub trait ActiveStream: Send {
    fn format(&self) -> StreamFormat;
}

/// Provider of devices and callback-driven streams
pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    /// Devices of one kind, in backend order
    fn devices(&self, kind: DeviceKind) -> Result<Vec<DeviceInfo>>;

    /// Open a playback stream on the device at `index`, or the default when `None`
    fn open_playback(
        &mut self,
        index: Option<usize>,
        request: StreamRequest,
        callback: PlaybackCallback,
    ) -> Result<Box<dyn ActiveStream>>;

    /// Open a capture stream on the device at `index`, or the default when `None`
    fn open_capture(
        &mut self,
        index: Option<usize>,
        request: StreamRequest,
        callback: CaptureCallback,
    ) -> Result<Box<dyn ActiveStream>>;
}
