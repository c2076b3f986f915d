//! cpal-backed streams, each owned by a dedicated thread
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream never leaves
//! the thread that built it. The handle handed back to the engine only holds
//! a command sender and the join handle.

use super::{
    ActiveStream, AudioBackend, CaptureCallback, DeviceInfo, PlaybackCallback, StreamFormat,
    StreamRequest,
};
use crate::audio::devices::DeviceKind;
use crate::error::{AudioError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize,
};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Commands sent to a stream thread
enum StreamCommand {
    Stop,
}

/// Backend for the platform's default cpal host
#[derive(Debug, Default)]
pub struct HardwareBackend;

impl HardwareBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for HardwareBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn devices(&self, kind: DeviceKind) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();

        let default_name = default_device(&host, kind).and_then(|d| d.name().ok());
        let devices = list_devices(&host, kind)?;

        let mut default_seen = false;
        let infos = devices
            .iter()
            .map(|device| {
                let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                let is_default = !default_seen && default_name.as_deref() == Some(name.as_str());
                default_seen |= is_default;
                DeviceInfo { name, is_default }
            })
            .collect();

        Ok(infos)
    }

    fn open_playback(
        &mut self,
        index: Option<usize>,
        request: StreamRequest,
        callback: PlaybackCallback,
    ) -> Result<Box<dyn ActiveStream>> {
        let stream = HardwareStream::spawn("audio-playback", move || {
            build_playback(index, request, callback)
        })?;
        Ok(Box::new(stream))
    }

    fn open_capture(
        &mut self,
        index: Option<usize>,
        request: StreamRequest,
        callback: CaptureCallback,
    ) -> Result<Box<dyn ActiveStream>> {
        let stream = HardwareStream::spawn("audio-capture", move || {
            build_capture(index, request, callback)
        })?;
        Ok(Box::new(stream))
    }
}

/// Handle to a stream living on its own thread
struct HardwareStream {
    command_tx: mpsc::Sender<StreamCommand>,
    thread_handle: Option<JoinHandle<()>>,
    format: StreamFormat,
}

impl HardwareStream {
    fn spawn<F>(thread_name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<(cpal::Stream, StreamFormat)> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until told to stop or the handle goes away
                match command_rx.recv() {
                    Ok(StreamCommand::Stop) => log::debug!("Stream thread stopping"),
                    Err(_) => log::debug!("Stream command channel disconnected"),
                }
                drop(stream);
            })
            .map_err(|e| AudioError::Device(format!("Failed to spawn stream thread: {}", e)))?;

        let format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(AudioError::Device(
                    "Stream thread exited before reporting".to_string(),
                ));
            }
        };

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
            format,
        })
    }
}

impl ActiveStream for HardwareStream {
    fn format(&self) -> StreamFormat {
        self.format
    }
}

impl Drop for HardwareStream {
    fn drop(&mut self) {
        let _ = self.command_tx.send(StreamCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn default_device(host: &cpal::Host, kind: DeviceKind) -> Option<Device> {
    match kind {
        DeviceKind::Playback => host.default_output_device(),
        DeviceKind::Capture => host.default_input_device(),
    }
}

fn list_devices(host: &cpal::Host, kind: DeviceKind) -> Result<Vec<Device>> {
    let devices = match kind {
        DeviceKind::Playback => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        DeviceKind::Capture => host.input_devices().map(|d| d.collect::<Vec<_>>()),
    };
    devices.map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))
}

fn find_device(kind: DeviceKind, index: Option<usize>) -> Result<Device> {
    let host = cpal::default_host();
    match index {
        None => default_device(&host, kind)
            .ok_or_else(|| AudioError::Device(format!("No default {} device", kind))),
        Some(i) => list_devices(&host, kind)?
            .into_iter()
            .nth(i)
            .ok_or_else(|| AudioError::Device(format!("No {} device at index {}", kind, i))),
    }
}

/// Ask for the requested period when the device advertises it, else let the driver pick
fn buffer_size_for(supported: &SupportedBufferSize, period_frames: u32) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&period_frames) => {
            BufferSize::Fixed(period_frames)
        }
        _ => BufferSize::Default,
    }
}

fn build_playback(
    index: Option<usize>,
    request: StreamRequest,
    callback: PlaybackCallback,
) -> Result<(cpal::Stream, StreamFormat)> {
    let device = find_device(DeviceKind::Playback, index)?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Device(format!("Failed to get device config: {}", e)))?;

    let mut config: StreamConfig = supported.config();
    config.buffer_size = buffer_size_for(supported.buffer_size(), request.period_frames);
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };
    let scratch_len = request.period_frames as usize * config.channels as usize * 2;

    log::info!(
        "Opening playback on {}: {} Hz, {} channels, {:?}",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        format.sample_rate,
        format.channels,
        supported.sample_format()
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, callback, scratch_len),
        SampleFormat::I16 => build_output::<i16>(&device, &config, callback, scratch_len),
        SampleFormat::U16 => build_output::<u16>(&device, &config, callback, scratch_len),
        other => {
            return Err(AudioError::Device(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| AudioError::Device(format!("Failed to start stream: {}", e)))?;

    Ok((stream, format))
}

fn build_capture(
    index: Option<usize>,
    request: StreamRequest,
    callback: CaptureCallback,
) -> Result<(cpal::Stream, StreamFormat)> {
    let device = find_device(DeviceKind::Capture, index)?;
    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Device(format!("Failed to get device config: {}", e)))?;

    let mut config: StreamConfig = supported.config();
    config.buffer_size = buffer_size_for(supported.buffer_size(), request.period_frames);
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };
    let scratch_len = request.period_frames as usize * config.channels as usize * 2;

    log::info!(
        "Opening capture on {}: {} Hz, {} channels",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        format.sample_rate,
        format.channels
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, callback, scratch_len),
        SampleFormat::I16 => build_input::<i16>(&device, &config, callback, scratch_len),
        SampleFormat::U16 => build_input::<u16>(&device, &config, callback, scratch_len),
        other => {
            return Err(AudioError::Device(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| AudioError::Device(format!("Failed to start stream: {}", e)))?;

    Ok((stream, format))
}

/// Build output stream for given sample type
fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    mut callback: PlaybackCallback,
    scratch_len: usize,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch = vec![0.0f32; scratch_len];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Only grows if the driver hands us a bigger period than we asked for
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let mix = &mut scratch[..data.len()];
                callback(mix, channels);
                for (dst, &src) in data.iter_mut().zip(mix.iter()) {
                    *dst = <T as cpal::Sample>::from_sample(src);
                }
            },
            |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::Device(format!("Failed to build audio stream: {}", e)))
}

/// Build input stream for given sample type
fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut callback: CaptureCallback,
    scratch_len: usize,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut scratch = vec![0.0f32; scratch_len];

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let converted = &mut scratch[..data.len()];
                for (dst, &src) in converted.iter_mut().zip(data.iter()) {
                    *dst = cpal::Sample::from_sample(src);
                }
                callback(converted, channels);
            },
            |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::Device(format!("Failed to build audio stream: {}", e)))
}
