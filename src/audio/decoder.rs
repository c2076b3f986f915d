//! File decoding to the stereo mix bus
//!
//! Songs are pulled incrementally by the decode worker through
//! [`StereoStream`]; one-shot sounds are decoded whole with [`decode_all`].
//! Both end up as interleaved stereo f32 at the device rate.

use crate::error::{AudioError, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// One stereo frame
pub type Frame = [f32; 2];

/// Packet-level decoder for one audio file
pub struct SongDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    n_frames: Option<u64>,
    sample_buf: Option<SampleBuffer<f32>>,
    eof: bool,
}

impl SongDecoder {
    /// Probe `path` and set up a decoder for its default track.
    ///
    /// Fails with `NotFound` before touching the codec stack if the file
    /// does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(AudioError::NotFound(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AudioError::NotFound(path.to_path_buf()),
            _ => AudioError::Decode(format!("Failed to open {}: {}", path.display(), e)),
        })?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::Decode(format!("Unrecognized format: {}", e)))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Decode("No audio track".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioError::Decode("Missing sample rate".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(2);
        let n_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::Decode(format!("Unsupported codec: {}", e)))?;

        log::debug!(
            "Opened {}: {} Hz, {} channels, {:?} frames",
            path.display(),
            sample_rate,
            channels,
            n_frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            n_frames,
            sample_buf: None,
            eof: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Length in source frames, when the container reports it
    pub fn length_frames(&self) -> Option<u64> {
        self.n_frames
    }

    /// Length in seconds, 0 when unknown
    pub fn length_seconds(&self) -> f64 {
        match self.n_frames {
            Some(frames) if self.sample_rate > 0 => frames as f64 / self.sample_rate as f64,
            _ => 0.0,
        }
    }

    /// Decode the next packet and append it as stereo frames.
    ///
    /// Returns `Ok(false)` at end of input. Corrupt packets are skipped.
    pub fn decode_next(&mut self, out: &mut Vec<Frame>) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    log::warn!("Track list changed mid-stream, ending song");
                    self.eof = true;
                    return Ok(false);
                }
                Err(e) => {
                    self.eof = true;
                    return Err(AudioError::Decode(format!("Failed to read packet: {}", e)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(SymphoniaError::IoError(e)) => {
                    log::warn!("Skipping unreadable packet: {}", e);
                    continue;
                }
                Err(e) => {
                    self.eof = true;
                    return Err(AudioError::Decode(format!("Failed to decode packet: {}", e)));
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needs_new = self
                .sample_buf
                .as_ref()
                .map(|b| (b.capacity() as u64) < capacity * spec.channels.count() as u64)
                .unwrap_or(true);
            if needs_new {
                self.sample_buf = Some(SampleBuffer::new(capacity, spec));
            }

            let channels = spec.channels.count();
            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                push_stereo(buf.samples(), channels, out);
            }
            self.channels = channels;
            return Ok(true);
        }
    }
}

/// Adapt interleaved samples with any channel count to stereo frames.
/// Mono is duplicated; beyond two channels only front left/right are kept.
fn push_stereo(samples: &[f32], channels: usize, out: &mut Vec<Frame>) {
    match channels {
        0 => {}
        1 => out.extend(samples.iter().map(|&s| [s, s])),
        _ => out.extend(samples.chunks_exact(channels).map(|f| [f[0], f[1]])),
    }
}

/// Streaming linear-interpolation resampler over stereo frames
pub struct LinearResampler {
    step: f64,
    pos: f64,
    input: Vec<Frame>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate.max(1) as f64,
            pos: 0.0,
            input: Vec::new(),
        }
    }

    /// Feed source frames, emitting every output frame that is fully determined
    pub fn process(&mut self, frames: &[Frame], out: &mut VecDeque<Frame>) {
        self.input.extend_from_slice(frames);

        while self.pos + 1.0 < self.input.len() as f64 {
            let i = self.pos as usize;
            let t = (self.pos - i as f64) as f32;
            let (a, b) = (self.input[i], self.input[i + 1]);
            out.push_back([a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]);
            self.pos += self.step;
        }

        let consumed = (self.pos as usize).min(self.input.len());
        self.input.drain(..consumed);
        self.pos -= consumed as f64;
    }

    /// Emit the tail once the source has ended, holding the last frame
    pub fn flush(&mut self, out: &mut VecDeque<Frame>) {
        if let Some(&last) = self.input.last() {
            while self.pos < self.input.len() as f64 {
                out.push_back(last);
                self.pos += self.step;
            }
        }
        self.input.clear();
        self.pos = 0.0;
    }
}

/// A song decoded on demand into interleaved stereo at the target rate
pub struct StereoStream {
    decoder: SongDecoder,
    resampler: Option<LinearResampler>,
    scratch: Vec<Frame>,
    pending: VecDeque<Frame>,
    ended: bool,
}

impl StereoStream {
    pub fn new(decoder: SongDecoder, target_rate: u32) -> Self {
        let resampler = if decoder.sample_rate() != target_rate && target_rate > 0 {
            log::debug!(
                "Resampling {} Hz -> {} Hz",
                decoder.sample_rate(),
                target_rate
            );
            Some(LinearResampler::new(decoder.sample_rate(), target_rate))
        } else {
            None
        };

        Self {
            decoder,
            resampler,
            scratch: Vec::new(),
            pending: VecDeque::new(),
            ended: false,
        }
    }

    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        Ok(Self::new(SongDecoder::open(path)?, target_rate))
    }

    pub fn length_seconds(&self) -> f64 {
        self.decoder.length_seconds()
    }

    /// Append up to `frames` interleaved stereo frames to `out`.
    /// Returns the number of frames appended; 0 means end of input.
    pub fn fill(&mut self, out: &mut Vec<f32>, frames: usize) -> Result<usize> {
        while self.pending.len() < frames && !self.ended {
            self.scratch.clear();
            let more = self.decoder.decode_next(&mut self.scratch)?;
            match self.resampler.as_mut() {
                Some(resampler) => {
                    resampler.process(&self.scratch, &mut self.pending);
                    if !more {
                        resampler.flush(&mut self.pending);
                    }
                }
                None => self.pending.extend(self.scratch.iter().copied()),
            }
            self.ended = !more;
        }

        let count = frames.min(self.pending.len());
        out.reserve(count * 2);
        for frame in self.pending.drain(..count) {
            out.extend_from_slice(&frame);
        }
        Ok(count)
    }
}

/// Decode a whole file into interleaved stereo at `target_rate`
pub fn decode_all(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let mut stream = StereoStream::open(path, target_rate)?;
    let mut samples = Vec::new();
    while stream.fill(&mut samples, 4096)? > 0 {}
    Ok(samples)
}

/// Write a 16-bit PCM WAV file
#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[f32]) {
    use std::io::Write;

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

    let mut file = File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let result = SongDecoder::open(Path::new("definitely/missing.flac"));
        assert!(matches!(result, Err(AudioError::NotFound(_))));
    }

    #[test]
    fn garbage_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        assert!(matches!(
            SongDecoder::open(&path),
            Err(AudioError::Decode(_))
        ));
    }

    #[test]
    fn wav_metadata_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8_000, 1, &[0.25; 4_000]);

        let decoder = SongDecoder::open(&path).unwrap();
        assert_eq!(decoder.sample_rate(), 8_000);
        assert_eq!(decoder.channels(), 1);
        assert_eq!(decoder.length_frames(), Some(4_000));
        assert!((decoder.length_seconds() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_test_wav(&path, 8_000, 1, &[0.5; 100]);

        let samples = decode_all(&path, 8_000).unwrap();
        assert_eq!(samples.len(), 200);
        assert!(samples.iter().all(|&s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn stereo_channels_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let interleaved: Vec<f32> = (0..50).flat_map(|_| [0.5, -0.5]).collect();
        write_test_wav(&path, 8_000, 2, &interleaved);

        let samples = decode_all(&path, 8_000).unwrap();
        assert_eq!(samples.len(), 100);
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!((samples[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn upsampling_doubles_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.wav");
        write_test_wav(&path, 8_000, 1, &[0.5; 800]);

        let samples = decode_all(&path, 16_000).unwrap();
        let frames = samples.len() / 2;
        assert!((1_598..=1_602).contains(&frames), "got {} frames", frames);
    }

    #[test]
    fn resampler_interpolates_between_frames() {
        let mut resampler = LinearResampler::new(1, 2);
        let mut out = VecDeque::new();
        resampler.process(&[[0.0, 0.0], [1.0, -1.0]], &mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[1], [0.5, -0.5]);

        resampler.flush(&mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(out[3], [1.0, -1.0]);
    }

    #[test]
    fn fill_respects_the_requested_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.wav");
        write_test_wav(&path, 8_000, 2, &[0.1; 2_000]);

        let mut stream = StereoStream::open(&path, 8_000).unwrap();
        let mut out = Vec::new();
        assert_eq!(stream.fill(&mut out, 300).unwrap(), 300);
        assert_eq!(out.len(), 600);

        let mut total = 300;
        loop {
            let n = stream.fill(&mut out, 300).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 1_000);
    }
}
