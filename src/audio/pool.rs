//! One-shot sound pool mixed on the "other" bus
//!
//! Slots live in a fixed arena shared with the playback callback. Each slot
//! carries a generation that is bumped whenever the pool is cleared or
//! rebuilt, so a [`SoundHandle`] issued before that point stops resolving.
//! Files are decoded on a loader thread; the slot becomes audible once the
//! decoded samples are installed.

use super::decoder;
use crate::error::{AudioError, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Arena index plus the generation it was issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle {
    pool: u32,
    index: usize,
    generation: u32,
}

impl SoundHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// A loaded (or remembered) sound. Its logical identity is the file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sound {
    filepath: PathBuf,
    handle: Option<SoundHandle>,
}

impl Sound {
    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    pub fn handle(&self) -> Option<SoundHandle> {
        self.handle
    }

    /// Unbound sounds were loaded while no playback device was open
    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }
}

enum SlotData {
    Empty,
    Loading,
    Ready(Arc<[f32]>),
    Failed,
}

struct Slot {
    generation: u32,
    data: SlotData,
    playing: bool,
    /// Playback position in frames
    cursor: usize,
}

impl Slot {
    fn release(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.data = SlotData::Empty;
        self.playing = false;
        self.cursor = 0;
    }
}

/// Slot arena shared with the playback callback
pub(crate) struct SoundBank {
    slots: Vec<Slot>,
    sample_rate: u32,
}

impl SoundBank {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| Slot {
                    generation: 0,
                    data: SlotData::Empty,
                    playing: false,
                    cursor: 0,
                })
                .collect(),
            sample_rate: 0,
        }
    }

    /// Add every playing sound into an interleaved stereo buffer
    pub(crate) fn mix_into(&mut self, mix: &mut [f32], gain: f32) {
        let mix_frames = mix.len() / 2;
        for slot in self.slots.iter_mut().filter(|s| s.playing) {
            let data = match &slot.data {
                SlotData::Ready(data) => data,
                _ => continue,
            };

            let total = data.len() / 2;
            let n = total.saturating_sub(slot.cursor).min(mix_frames);
            let src = &data[slot.cursor * 2..(slot.cursor + n) * 2];
            for (dst, &s) in mix.iter_mut().zip(src) {
                *dst += s * gain;
            }

            slot.cursor += n;
            if slot.cursor >= total {
                slot.playing = false;
                slot.cursor = 0;
            }
        }
    }
}

struct LoadJob {
    index: usize,
    generation: u32,
    path: PathBuf,
    sample_rate: u32,
}

/// Fixed-capacity pool of one-shot sounds
pub struct SoundPool {
    id: u32,
    bank: Arc<Mutex<SoundBank>>,
    capacity: usize,
    /// Paths in slot order; survives rebinding
    remembered: Vec<PathBuf>,
    bound: bool,
    jobs: Option<mpsc::Sender<LoadJob>>,
    loader: Option<JoinHandle<()>>,
}

impl SoundPool {
    pub fn new(capacity: usize) -> Result<Self> {
        let bank = Arc::new(Mutex::new(SoundBank::new(capacity)));
        let (jobs_tx, jobs_rx) = mpsc::channel::<LoadJob>();

        let loader_bank = bank.clone();
        let loader = thread::Builder::new()
            .name("sound-loader".to_string())
            .spawn(move || {
                for job in jobs_rx {
                    load_job(&loader_bank, job);
                }
                log::debug!("Sound loader exiting");
            })
            .map_err(|e| AudioError::Init(format!("Failed to spawn sound loader: {}", e)))?;

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            bank,
            capacity,
            remembered: Vec::new(),
            bound: false,
            jobs: Some(jobs_tx),
            loader: Some(loader),
        })
    }

    pub(crate) fn bank(&self) -> Arc<Mutex<SoundBank>> {
        self.bank.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.remembered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remembered.is_empty()
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Bind to a playback device running at `sample_rate`.
    ///
    /// Every remembered sound is reloaded into a fresh slot generation.
    pub fn bind(&mut self, sample_rate: u32) {
        {
            let mut bank = self.bank.lock();
            bank.sample_rate = sample_rate;
            for slot in bank.slots.iter_mut() {
                slot.release();
            }
        }
        self.bound = true;

        let paths = self.remembered.clone();
        for (index, path) in paths.into_iter().enumerate() {
            self.submit(index, path);
        }
        log::debug!(
            "Sound pool bound at {} Hz, reloading {} sounds",
            sample_rate,
            self.remembered.len()
        );
    }

    /// Detach from the playback device; sounds stay remembered
    pub fn unbind(&mut self) {
        let mut bank = self.bank.lock();
        for slot in bank.slots.iter_mut() {
            slot.release();
        }
        self.bound = false;
    }

    /// Reserve a slot for `path` and start decoding it.
    ///
    /// Loading a path that is already in the pool returns the existing sound.
    pub fn load_sound(&mut self, path: impl AsRef<Path>) -> Result<Sound> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AudioError::NotFound(path.to_path_buf()));
        }

        let index = match self.remembered.iter().position(|p| p == path) {
            Some(index) => index,
            None => {
                if self.remembered.len() >= self.capacity {
                    return Err(AudioError::PoolFull(self.capacity));
                }
                self.remembered.push(path.to_path_buf());
                let index = self.remembered.len() - 1;
                if self.bound {
                    self.submit(index, path.to_path_buf());
                }
                index
            }
        };

        Ok(Sound {
            filepath: path.to_path_buf(),
            handle: self.handle_at(index),
        })
    }

    /// Trigger a sound.
    ///
    /// While it is playing, a retrigger within `repeat_delay` seconds of its
    /// start is ignored; a later one restarts it from the beginning.
    pub fn play_sound(&mut self, sound: &Sound, repeat_delay: f32) -> Result<()> {
        let handle = match sound.handle {
            Some(handle) => handle,
            None if self.remembered.iter().any(|p| p == &sound.filepath) => {
                log::debug!("{} is not bound to a device", sound.filepath.display());
                return Ok(());
            }
            None => return Err(AudioError::InvalidHandle),
        };

        let mut bank = self.bank.lock();
        let sample_rate = bank.sample_rate.max(1);
        let slot = self.slot_mut(&mut bank, handle)?;

        match slot.data {
            SlotData::Failed => {
                log::debug!("{} failed to load, not playing", sound.filepath.display());
                return Ok(());
            }
            SlotData::Empty => return Err(AudioError::InvalidHandle),
            SlotData::Loading | SlotData::Ready(_) => {}
        }

        if slot.playing {
            let elapsed = slot.cursor as f32 / sample_rate as f32;
            if elapsed < repeat_delay.max(0.0) {
                return Ok(());
            }
        }
        slot.playing = true;
        slot.cursor = 0;
        Ok(())
    }

    /// Stop and release every sound. All handles become stale.
    pub fn clear_sounds(&mut self) {
        let mut bank = self.bank.lock();
        for slot in bank.slots.iter_mut() {
            slot.release();
        }
        self.remembered.clear();
    }

    /// Refresh a sound's handle from its file path, e.g. after the pool was
    /// rebuilt for a new playback device
    pub fn resolve(&self, sound: &mut Sound) -> Result<()> {
        let index = self
            .remembered
            .iter()
            .position(|p| p == &sound.filepath)
            .ok_or(AudioError::InvalidHandle)?;
        sound.handle = self.handle_at(index);
        Ok(())
    }

    /// Whether the sound's samples are decoded and mixable
    pub fn is_ready(&self, sound: &Sound) -> Result<bool> {
        self.with_slot(sound, |slot| matches!(slot.data, SlotData::Ready(_)))
    }

    pub fn is_playing(&self, sound: &Sound) -> Result<bool> {
        self.with_slot(sound, |slot| slot.playing)
    }

    pub fn cursor_seconds(&self, sound: &Sound) -> Result<f32> {
        let sample_rate = self.bank.lock().sample_rate.max(1);
        self.with_slot(sound, |slot| slot.cursor as f32 / sample_rate as f32)
    }

    /// Stop the loader thread. Pending loads are abandoned.
    pub fn shutdown(&mut self) {
        self.unbind();
        self.jobs = None;
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }

    fn handle_at(&self, index: usize) -> Option<SoundHandle> {
        if !self.bound {
            return None;
        }
        let generation = self.bank.lock().slots.get(index)?.generation;
        Some(SoundHandle {
            pool: self.id,
            index,
            generation,
        })
    }

    fn submit(&mut self, index: usize, path: PathBuf) {
        let mut bank = self.bank.lock();
        let sample_rate = bank.sample_rate;
        let slot = match bank.slots.get_mut(index) {
            Some(slot) => slot,
            None => return,
        };
        slot.data = SlotData::Loading;
        let job = LoadJob {
            index,
            generation: slot.generation,
            path,
            sample_rate,
        };
        drop(bank);

        let sent = self.jobs.as_ref().map(|tx| tx.send(job).is_ok());
        if sent != Some(true) {
            log::warn!("Sound loader is not running");
        }
    }

    fn slot_mut<'a>(&self, bank: &'a mut SoundBank, handle: SoundHandle) -> Result<&'a mut Slot> {
        if handle.pool != self.id {
            return Err(AudioError::InvalidHandle);
        }
        match bank.slots.get_mut(handle.index) {
            Some(slot) if slot.generation == handle.generation => Ok(slot),
            _ => Err(AudioError::InvalidHandle),
        }
    }

    fn with_slot<T>(&self, sound: &Sound, f: impl FnOnce(&Slot) -> T) -> Result<T> {
        let handle = sound.handle.ok_or(AudioError::InvalidHandle)?;
        let mut bank = self.bank.lock();
        let slot = self.slot_mut(&mut bank, handle)?;
        Ok(f(slot))
    }
}

impl Drop for SoundPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn load_job(bank: &Mutex<SoundBank>, job: LoadJob) {
    let current = |bank: &SoundBank| {
        bank.slots
            .get(job.index)
            .map(|s| s.generation == job.generation)
            .unwrap_or(false)
    };

    if !current(&*bank.lock()) {
        return;
    }

    let result = decoder::decode_all(&job.path, job.sample_rate);

    let mut bank = bank.lock();
    if !current(&*bank) {
        return;
    }
    let slot = &mut bank.slots[job.index];
    slot.data = match result {
        Ok(samples) => {
            log::debug!(
                "Loaded sound {} ({} frames)",
                job.path.display(),
                samples.len() / 2
            );
            SlotData::Ready(samples.into())
        }
        Err(e) => {
            log::warn!("Failed to load sound {}: {}", job.path.display(), e);
            SlotData::Failed
        }
    };
}
