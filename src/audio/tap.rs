//! Analysis taps: the most recent mono samples seen by a callback

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Circular audio buffer
pub struct AudioBuffer {
    samples: Vec<f32>,
    write_pos: usize,
    filled: usize,
    capacity: usize,
}

impl AudioBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: vec![0.0; capacity],
            write_pos: 0,
            filled: 0,
            capacity,
        }
    }

    pub fn push_samples(&mut self, data: &[f32]) {
        for &sample in data {
            self.push(sample);
        }
    }

    /// Push interleaved frames, downmixed to mono
    pub fn push_frames(&mut self, data: &[f32], channels: usize) {
        let channels = channels.max(1);
        for frame in data.chunks_exact(channels) {
            let sum: f32 = frame.iter().sum();
            self.push(sum / channels as f32);
        }
    }

    fn push(&mut self, sample: f32) {
        self.samples[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.capacity;
        self.filled = (self.filled + 1).min(self.capacity);
    }

    /// Copy the most recent samples into `dst`, oldest first.
    ///
    /// When fewer than `dst.len()` samples have been written, the start of
    /// `dst` is zero-filled. Returns how many trailing samples are real.
    pub fn copy_latest(&self, dst: &mut [f32]) -> usize {
        let count = dst.len().min(self.filled);
        let pad = dst.len() - count;
        dst[..pad].fill(0.0);

        let start = (self.write_pos + self.capacity - count) % self.capacity;
        for (i, slot) in dst[pad..].iter_mut().enumerate() {
            *slot = self.samples[(start + i) % self.capacity];
        }

        count
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.filled = 0;
    }
}

/// Shared, thread-safe tap written by a stream callback and read by the analyzer.
///
/// The callback side only ever uses `try_lock`, so a reader holding the lock
/// costs the tap one period of history and never stalls the audio clock.
#[derive(Clone)]
pub struct SharedTap {
    inner: Arc<TapInner>,
}

struct TapInner {
    buffer: Mutex<AudioBuffer>,
    sample_rate: AtomicU32,
}

impl SharedTap {
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(TapInner {
                buffer: Mutex::new(AudioBuffer::new(capacity)),
                sample_rate: AtomicU32::new(sample_rate),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate.load(Ordering::Acquire)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.inner.sample_rate.store(sample_rate, Ordering::Release);
    }

    /// Non-blocking write from a real-time callback. Returns false if the
    /// block was dropped because a reader held the buffer.
    pub fn push_interleaved(&self, data: &[f32], channels: usize) -> bool {
        match self.inner.buffer.try_lock() {
            Some(mut buffer) => {
                buffer.push_frames(data, channels);
                true
            }
            None => false,
        }
    }

    /// Blocking write of mono samples
    pub fn push_samples(&self, data: &[f32]) {
        self.inner.buffer.lock().push_samples(data);
    }

    pub fn copy_latest(&self, dst: &mut [f32]) -> usize {
        self.inner.buffer.lock().copy_latest(dst)
    }

    pub fn len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Most samples the tap can ever return
    pub fn capacity(&self) -> usize {
        self.inner.buffer.lock().capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.buffer.lock().clear();
    }
}

impl std::fmt::Debug for SharedTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTap")
            .field("sample_rate", &self.sample_rate())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_latest_returns_recent_samples_in_order() {
        let mut buffer = AudioBuffer::new(8);
        buffer.push_samples(&[1.0, 2.0, 3.0, 4.0]);

        let mut latest = [0.0; 3];
        assert_eq!(buffer.copy_latest(&mut latest), 3);
        assert_eq!(latest, [2.0, 3.0, 4.0]);
    }

    #[test]
    fn circular_buffer_wraps_and_preserves_time_order() {
        let mut buffer = AudioBuffer::new(5);
        buffer.push_samples(&[1.0, 2.0, 3.0]);
        buffer.push_samples(&[4.0, 5.0, 6.0]);

        let mut latest = [0.0; 5];
        buffer.copy_latest(&mut latest);
        assert_eq!(latest, [2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn short_history_is_zero_padded_at_the_start() {
        let mut buffer = AudioBuffer::new(16);
        buffer.push_samples(&[1.0, 2.0]);

        let mut latest = [9.0; 5];
        assert_eq!(buffer.copy_latest(&mut latest), 2);
        assert_eq!(latest, [0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn copy_latest_caps_count_to_capacity() {
        let mut buffer = AudioBuffer::new(4);
        buffer.push_samples(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut latest = [0.0; 6];
        assert_eq!(buffer.copy_latest(&mut latest), 4);
        assert_eq!(latest, [0.0, 0.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn interleaved_frames_are_downmixed() {
        let mut buffer = AudioBuffer::new(4);
        buffer.push_frames(&[1.0, 0.0, 0.5, 0.5], 2);

        let mut latest = [0.0; 2];
        buffer.copy_latest(&mut latest);
        assert_eq!(latest, [0.5, 0.5]);
    }

    #[test]
    fn clear_forgets_history() {
        let tap = SharedTap::new(8, 48_000);
        tap.push_samples(&[1.0; 4]);
        assert_eq!(tap.len(), 4);

        tap.clear();
        assert!(tap.is_empty());
    }
}
