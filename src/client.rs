//! Client records, one per stream an application has opened against the
//! virtual device.
//!
//! A record's identity is fixed at attach time. Its control state (volume,
//! pan, EQ, IO and music-player flags) lives in atomics so the RT path can
//! read a record in place while control threads update it: a reader observes
//! each field pre- or post-mutation, never torn. Records are shared as
//! `Arc<Client>` between the control-side registry and the RT snapshot
//! generations.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::controls::PAN_CENTER_RAW;
use crate::engine::ring_buffer::RoutingBuffer;

/// Host-assigned identifier for one attached stream.
pub type ClientId = u32;

/// OS process id of an attaching application.
pub type ProcessId = i32;

/// One attached client stream and its control state.
pub struct Client {
    /// Host-assigned id, stable for the client's lifetime.
    pub client_id: ClientId,
    /// PID of the owning process. Several clients may share a PID.
    pub process_id: ProcessId,
    /// Application bundle id, when the host knows it.
    pub bundle_id: Option<Arc<str>>,
    /// Whether the client's samples arrive in native endianness.
    pub is_native_endian: bool,

    doing_io: AtomicBool,
    is_music_player: AtomicBool,
    /// Linear gain as f32 bits. Default 1.0.
    relative_volume: AtomicU32,
    /// Raw pan position, center = 0.
    pan_position: AtomicI32,
    /// EQ band gains in dB as f32 bits. Default 0.0 (flat).
    eq_low_gain: AtomicU32,
    eq_mid_gain: AtomicU32,
    eq_high_gain: AtomicU32,

    /// Ring holding this client's routed audio. Allocated on demand when the
    /// client becomes a routing source; never shared between records.
    routing_buffer: ArcSwapOption<RoutingBuffer>,
}

impl Client {
    /// Creates a record for a newly attached client.
    pub fn new(
        client_id: ClientId,
        process_id: ProcessId,
        bundle_id: Option<&str>,
        is_native_endian: bool,
    ) -> Self {
        Self {
            client_id,
            process_id,
            bundle_id: bundle_id.map(Arc::from),
            is_native_endian,
            doing_io: AtomicBool::new(false),
            is_music_player: AtomicBool::new(false),
            relative_volume: AtomicU32::new(1.0f32.to_bits()),
            pan_position: AtomicI32::new(PAN_CENTER_RAW),
            eq_low_gain: AtomicU32::new(0.0f32.to_bits()),
            eq_mid_gain: AtomicU32::new(0.0f32.to_bits()),
            eq_high_gain: AtomicU32::new(0.0f32.to_bits()),
            routing_buffer: ArcSwapOption::empty(),
        }
    }

    /// True while the client is between StartIO and StopIO.
    pub fn doing_io(&self) -> bool {
        self.doing_io.load(Ordering::Relaxed)
    }

    pub(crate) fn set_doing_io(&self, doing_io: bool) {
        self.doing_io.store(doing_io, Ordering::Relaxed);
    }

    /// True if this client is the designated music player.
    pub fn is_music_player(&self) -> bool {
        self.is_music_player.load(Ordering::Relaxed)
    }

    pub(crate) fn set_is_music_player(&self, is_music_player: bool) {
        self.is_music_player.store(is_music_player, Ordering::Relaxed);
    }

    /// The client's relative volume as linear gain.
    pub fn relative_volume(&self) -> f32 {
        f32::from_bits(self.relative_volume.load(Ordering::Relaxed))
    }

    pub(crate) fn set_relative_volume(&self, gain: f32) {
        self.relative_volume.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// The client's raw pan position.
    pub fn pan_position(&self) -> i32 {
        self.pan_position.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pan_position(&self, pan: i32) {
        self.pan_position.store(pan, Ordering::Relaxed);
    }

    /// EQ band gains in dB as (low, mid, high).
    pub fn eq_gains(&self) -> (f32, f32, f32) {
        (
            f32::from_bits(self.eq_low_gain.load(Ordering::Relaxed)),
            f32::from_bits(self.eq_mid_gain.load(Ordering::Relaxed)),
            f32::from_bits(self.eq_high_gain.load(Ordering::Relaxed)),
        )
    }

    /// Updates the EQ bands that are present. Absent bands keep their value.
    pub(crate) fn set_eq_gains(&self, low: Option<f32>, mid: Option<f32>, high: Option<f32>) {
        if let Some(db) = low {
            self.eq_low_gain.store(db.to_bits(), Ordering::Relaxed);
        }
        if let Some(db) = mid {
            self.eq_mid_gain.store(db.to_bits(), Ordering::Relaxed);
        }
        if let Some(db) = high {
            self.eq_high_gain.store(db.to_bits(), Ordering::Relaxed);
        }
    }

    /// Allocates the routing ring. Idempotent; NRT only.
    pub(crate) fn allocate_routing_buffer(&self, capacity_frames: usize) {
        if self.routing_buffer.load().is_none() {
            self.routing_buffer
                .store(Some(Arc::new(RoutingBuffer::new(capacity_frames))));
        }
    }

    /// Releases the routing ring. Idempotent; NRT only.
    ///
    /// An RT callback still holding the ring keeps its storage alive until
    /// the callback returns; new lookups see it gone immediately.
    pub(crate) fn deallocate_routing_buffer(&self) {
        self.routing_buffer.store(None);
    }

    /// True if the routing ring is currently allocated.
    pub fn has_routing_buffer(&self) -> bool {
        self.routing_buffer.load().is_some()
    }

    /// Writes `num_frames` interleaved stereo frames into the routing ring.
    ///
    /// RT producer side; no-op while the ring is unallocated.
    pub(crate) fn store_to_routing_buffer(&self, buffer: &[f32], num_frames: u32, sample_time: f64) {
        if let Some(ring) = &*self.routing_buffer.load() {
            ring.store(buffer, num_frames, sample_time);
        }
    }

    /// Reads one sample `sample_offset` frames behind the newest write.
    ///
    /// RT consumer side; silence while the ring is unallocated.
    pub(crate) fn fetch_from_routing_buffer(&self, channel: usize, sample_offset: u64) -> f32 {
        match &*self.routing_buffer.load() {
            Some(ring) => ring.fetch(channel, sample_offset),
            None => 0.0,
        }
    }

    /// Copies the record's identity and control state by value.
    ///
    /// The routing buffer is deliberately not part of the copy: each record
    /// owns its own ring or none.
    pub fn info(&self) -> ClientInfo {
        let (eq_low_gain, eq_mid_gain, eq_high_gain) = self.eq_gains();
        ClientInfo {
            client_id: self.client_id,
            process_id: self.process_id,
            bundle_id: self.bundle_id.clone(),
            is_native_endian: self.is_native_endian,
            doing_io: self.doing_io(),
            is_music_player: self.is_music_player(),
            relative_volume: self.relative_volume(),
            pan_position: self.pan_position(),
            eq_low_gain,
            eq_mid_gain,
            eq_high_gain,
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("process_id", &self.process_id)
            .field("bundle_id", &self.bundle_id)
            .field("doing_io", &self.doing_io())
            .field("is_music_player", &self.is_music_player())
            .finish()
    }
}

/// Value snapshot of a client record.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    /// Host-assigned id.
    pub client_id: ClientId,
    /// PID of the owning process.
    pub process_id: ProcessId,
    /// Application bundle id, when known.
    pub bundle_id: Option<Arc<str>>,
    /// Whether samples arrive in native endianness.
    pub is_native_endian: bool,
    /// True while the client is between StartIO and StopIO.
    pub doing_io: bool,
    /// True if this client is the designated music player.
    pub is_music_player: bool,
    /// Linear gain.
    pub relative_volume: f32,
    /// Raw pan position, center = 0.
    pub pan_position: i32,
    /// Low-band EQ gain in dB.
    pub eq_low_gain: f32,
    /// Mid-band EQ gain in dB.
    pub eq_mid_gain: f32,
    /// High-band EQ gain in dB.
    pub eq_high_gain: f32,
}
