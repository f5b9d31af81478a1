//! Lock-free SPSC ring buffer holding a client's most recent routed audio.
//!
//! One RT callback (the source client's) writes, other RT callbacks (clients
//! the source routes to) read. `write_pos` is the single synchronization
//! word: samples are written with relaxed stores, then published by a
//! release store of the new position; readers acquire it before loading
//! samples. Samples are stored as `f32` bit patterns in `AtomicU32` so the
//! whole structure stays free of `unsafe`.
//!
//! Reads address samples by offset from the newest frame: offset 1 is the
//! most recently written frame, offset N the frame written N steps ago.
//! Overwrite is silent; capacity is sized so any realistic routing lag is
//! far smaller than the ring.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Interleaved channels per frame. The engine is stereo-only.
pub const RING_CHANNELS: usize = 2;

/// Fixed-capacity circular buffer of interleaved stereo frames.
pub struct RoutingBuffer {
    /// `capacity_frames * RING_CHANNELS` f32 bit patterns.
    samples: Box<[AtomicU32]>,
    /// Monotonic count of frames ever written. Modulo capacity locates the
    /// next write slot.
    write_pos: AtomicU64,
    /// Written on every store, never read. Reserved.
    sample_time: AtomicU64,
    capacity_frames: usize,
}

impl RoutingBuffer {
    /// Creates a zero-filled ring with the given frame capacity.
    ///
    /// `capacity_frames` must be a power of two.
    pub fn new(capacity_frames: usize) -> Self {
        debug_assert!(capacity_frames.is_power_of_two());
        let samples = (0..capacity_frames * RING_CHANNELS)
            .map(|_| AtomicU32::new(0))
            .collect();
        Self {
            samples,
            write_pos: AtomicU64::new(0),
            sample_time: AtomicU64::new(0),
            capacity_frames,
        }
    }

    /// Returns the ring's capacity in frames.
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Returns the total number of frames ever written.
    pub fn frames_written(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Appends `num_frames` interleaved stereo frames from `buffer`.
    ///
    /// RT producer side. All sample stores are published by a single release
    /// store of the new write position, so a reader that acquires the
    /// position sees every sample written before it.
    pub fn store(&self, buffer: &[f32], num_frames: u32, sample_time: f64) {
        let num_frames = (num_frames as usize).min(buffer.len() / RING_CHANNELS);
        let mut pos = self.write_pos.load(Ordering::Relaxed);

        for frame in 0..num_frames {
            let slot = (pos as usize % self.capacity_frames) * RING_CHANNELS;
            for ch in 0..RING_CHANNELS {
                self.samples[slot + ch]
                    .store(buffer[frame * RING_CHANNELS + ch].to_bits(), Ordering::Relaxed);
            }
            pos += 1;
        }

        self.write_pos.store(pos, Ordering::Release);
        self.sample_time
            .store((sample_time + num_frames as f64).to_bits(), Ordering::Relaxed);
    }

    /// Reads one sample `sample_offset` frames behind the newest frame.
    ///
    /// RT consumer side. Offset 1 is the most recently written frame.
    /// Returns silence when the ring holds fewer than `sample_offset` frames
    /// or `channel` is out of range.
    pub fn fetch(&self, channel: usize, sample_offset: u64) -> f32 {
        if channel >= RING_CHANNELS {
            return 0.0;
        }

        let pos = self.write_pos.load(Ordering::Acquire);
        if pos < sample_offset {
            return 0.0;
        }

        let target = pos - sample_offset;
        let slot = (target as usize % self.capacity_frames) * RING_CHANNELS;
        f32::from_bits(self.samples[slot + channel].load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for RoutingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingBuffer")
            .field("capacity_frames", &self.capacity_frames)
            .field("write_pos", &self.write_pos.load(Ordering::Relaxed))
            .finish()
    }
}
