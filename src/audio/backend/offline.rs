//! Clockless backend: periods are rendered on demand by the caller

use super::{
    ActiveStream, AudioBackend, CaptureCallback, DeviceInfo, PlaybackCallback, StreamFormat,
    StreamRequest,
};
use crate::audio::devices::DeviceKind;
use crate::error::{AudioError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Backend whose "hardware" is whoever calls [`OfflineBackend::render`] and
/// [`OfflineBackend::feed_capture`].
///
/// Clones share the same virtual devices, so one clone can be handed to the
/// engine while another drives the callbacks.
#[derive(Clone)]
pub struct OfflineBackend {
    shared: Arc<Mutex<OfflineState>>,
}

struct OfflineState {
    format: StreamFormat,
    playback_devices: Vec<String>,
    capture_devices: Vec<String>,
    default_playback: Option<usize>,
    default_capture: Option<usize>,
    playback: Option<(u64, PlaybackCallback)>,
    capture: Option<(u64, CaptureCallback)>,
    next_stream_id: u64,
}

impl OfflineBackend {
    /// One default playback and one default capture device at the given format
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            shared: Arc::new(Mutex::new(OfflineState {
                format: StreamFormat {
                    sample_rate,
                    channels: channels.max(1),
                },
                playback_devices: vec!["Offline Output".to_string()],
                capture_devices: vec!["Offline Input".to_string()],
                default_playback: Some(0),
                default_capture: Some(0),
                playback: None,
                capture: None,
                next_stream_id: 0,
            })),
        }
    }

    /// Replace the virtual device list of one kind
    pub fn with_devices(self, kind: DeviceKind, names: &[&str], default: Option<usize>) -> Self {
        {
            let mut state = self.shared.lock();
            let names = names.iter().map(|n| n.to_string()).collect();
            match kind {
                DeviceKind::Playback => {
                    state.playback_devices = names;
                    state.default_playback = default;
                }
                DeviceKind::Capture => {
                    state.capture_devices = names;
                    state.default_capture = default;
                }
            }
        }
        self
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.lock().format
    }

    /// Run the playback callback for `frames` frames and return the
    /// interleaved output. Silence if no playback stream is open.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut state = self.shared.lock();
        let channels = state.format.channels as usize;
        let mut out = vec![0.0f32; frames * channels];
        if let Some((_, callback)) = state.playback.as_mut() {
            callback(&mut out, channels);
        }
        out
    }

    /// Hand interleaved samples to the capture callback.
    /// Returns false if no capture stream is open.
    pub fn feed_capture(&self, data: &[f32]) -> bool {
        let mut state = self.shared.lock();
        let channels = state.format.channels as usize;
        match state.capture.as_mut() {
            Some((_, callback)) => {
                callback(data, channels);
                true
            }
            None => false,
        }
    }

    pub fn has_playback_stream(&self) -> bool {
        self.shared.lock().playback.is_some()
    }

    pub fn has_capture_stream(&self) -> bool {
        self.shared.lock().capture.is_some()
    }

    fn resolve_index(
        names: &[String],
        default: Option<usize>,
        index: Option<usize>,
        kind: DeviceKind,
    ) -> Result<usize> {
        match index.or(default) {
            Some(i) if i < names.len() => Ok(i),
            Some(i) => Err(AudioError::Device(format!(
                "No {} device at index {}",
                kind, i
            ))),
            None => Err(AudioError::Device(format!("No default {} device", kind))),
        }
    }
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn devices(&self, kind: DeviceKind) -> Result<Vec<DeviceInfo>> {
        let state = self.shared.lock();
        let (names, default) = match kind {
            DeviceKind::Playback => (&state.playback_devices, state.default_playback),
            DeviceKind::Capture => (&state.capture_devices, state.default_capture),
        };
        Ok(names
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceInfo {
                name: name.clone(),
                is_default: default == Some(i),
            })
            .collect())
    }

    fn open_playback(
        &mut self,
        index: Option<usize>,
        _request: StreamRequest,
        callback: PlaybackCallback,
    ) -> Result<Box<dyn ActiveStream>> {
        let mut state = self.shared.lock();
        Self::resolve_index(
            &state.playback_devices,
            state.default_playback,
            index,
            DeviceKind::Playback,
        )?;
        if state.playback.is_some() {
            return Err(AudioError::Device(
                "Offline playback device already in use".to_string(),
            ));
        }

        state.next_stream_id += 1;
        let id = state.next_stream_id;
        state.playback = Some((id, callback));

        Ok(Box::new(OfflineStream {
            shared: self.shared.clone(),
            id,
            kind: DeviceKind::Playback,
            format: state.format,
        }))
    }

    fn open_capture(
        &mut self,
        index: Option<usize>,
        _request: StreamRequest,
        callback: CaptureCallback,
    ) -> Result<Box<dyn ActiveStream>> {
        let mut state = self.shared.lock();
        Self::resolve_index(
            &state.capture_devices,
            state.default_capture,
            index,
            DeviceKind::Capture,
        )?;
        if state.capture.is_some() {
            return Err(AudioError::Device(
                "Offline capture device already in use".to_string(),
            ));
        }

        state.next_stream_id += 1;
        let id = state.next_stream_id;
        state.capture = Some((id, callback));

        Ok(Box::new(OfflineStream {
            shared: self.shared.clone(),
            id,
            kind: DeviceKind::Capture,
            format: state.format,
        }))
    }
}

struct OfflineStream {
    shared: Arc<Mutex<OfflineState>>,
    id: u64,
    kind: DeviceKind,
    format: StreamFormat,
}

impl ActiveStream for OfflineStream {
    fn format(&self) -> StreamFormat {
        self.format
    }
}

impl Drop for OfflineStream {
    fn drop(&mut self) {
        // Taking the lock waits out any render in flight
        let mut state = self.shared.lock();
        let slot_id = match self.kind {
            DeviceKind::Playback => state.playback.as_ref().map(|(id, _)| *id),
            DeviceKind::Capture => state.capture.as_ref().map(|(id, _)| *id),
        };
        if slot_id == Some(self.id) {
            match self.kind {
                DeviceKind::Playback => state.playback = None,
                DeviceKind::Capture => state.capture = None,
            }
        }
    }
}
