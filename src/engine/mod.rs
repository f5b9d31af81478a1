//! The mixing engine: client lifecycle, IO reference counting, per-app
//! controls, and the inter-application routing graph.
//!
//! The engine has two faces. Control threads call the `*_non_rt` and
//! setter methods, which serialize on one mutex and may allocate. The host's
//! audio callbacks call the `*_rt` methods, which never touch the mutex:
//! they read the client-map and route-list generations published through
//! `ArcSwap` and the per-client atomics inside them. An RT reader observes
//! the state before or after any single control mutation, never a torn
//! record.

pub(crate) mod client_map;
pub(crate) mod ring_buffer;
pub(crate) mod routes;

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::client::{Client, ClientId, ClientInfo, ProcessId};
use crate::config::EngineConfig;
use crate::controls::{self, VolumeCurve, PAN_CENTER_RAW};
use crate::error::EngineError;
use crate::notify::{EngineNotification, NotificationQueue};
use crate::wire::{AppVolumeEntry, RouteEntry};

use client_map::{ClientMap, MapSnapshot};
use routes::{AudioRoute, RouteTable, RouteUpdate};

/// Identifier of the virtual device that owns an engine instance.
pub type DeviceId = u32;

/// Which app, if any, is currently designated the music player.
enum MusicPlayerDesignator {
    Unset,
    Pid(ProcessId),
    BundleId(Arc<str>),
}

/// State guarded by the engine mutex.
struct EngineState {
    map: ClientMap,
    routes: RouteTable,
    music_player: MusicPlayerDesignator,
    /// Count of clients currently between StartIO and StopIO.
    start_count: u64,
    /// Same, excluding the control app's client.
    start_count_excluding_control_app: u64,
    /// Cached id of the control app's client while it is attached.
    control_app_client_id: Option<ClientId>,
}

/// Per-client mixing and routing engine of one virtual audio device.
///
/// Create one with [`Engine::new`] or, to receive running-state
/// notifications, through [`Engine::builder`].
///
/// # Example
///
/// ```
/// use appmix::{Client, Engine};
///
/// let engine = Engine::new(1);
/// engine.add_client(Client::new(10, 4242, Some("com.example.game"), true));
/// assert!(engine.start_io_non_rt(10).unwrap());
/// ```
pub struct Engine {
    device_id: DeviceId,
    config: EngineConfig,
    volume_curve: VolumeCurve,
    state: Mutex<EngineState>,
    /// Client-map generation for RT readers.
    rt_clients: Arc<ArcSwap<MapSnapshot>>,
    /// Route-list generation for RT readers.
    rt_routes: Arc<ArcSwap<Vec<AudioRoute>>>,
    notifications: NotificationQueue,
}

impl Engine {
    /// Creates an engine with default configuration and no notification
    /// callback.
    pub fn new(device_id: DeviceId) -> Self {
        Self::with_parts(device_id, EngineConfig::default(), NotificationQueue::disabled())
    }

    /// Starts building an engine with custom configuration.
    pub fn builder(device_id: DeviceId) -> crate::EngineBuilder {
        crate::EngineBuilder::new(device_id)
    }

    pub(crate) fn with_parts(
        device_id: DeviceId,
        mut config: EngineConfig,
        notifications: NotificationQueue,
    ) -> Self {
        if !config.ring_capacity_valid() {
            tracing::warn!(
                requested = config.routing_buffer_frames,
                "routing buffer capacity must be a power of two; using default"
            );
            config.routing_buffer_frames = crate::config::DEFAULT_ROUTING_BUFFER_FRAMES;
        }

        let map = ClientMap::new();
        let routes = RouteTable::new();
        let rt_clients = map.snapshot_handle();
        let rt_routes = routes.snapshot_handle();

        Self {
            device_id,
            config,
            volume_curve: VolumeCurve::default(),
            state: Mutex::new(EngineState {
                map,
                routes,
                music_player: MusicPlayerDesignator::Unset,
                start_count: 0,
                start_count_excluding_control_app: 0,
                control_app_client_id: None,
            }),
            rt_clients,
            rt_routes,
            notifications,
        }
    }

    /// The id of the owning virtual device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    // ---------------------------------------------------------------------
    // Client lifecycle (NRT)
    // ---------------------------------------------------------------------

    /// Registers a newly attached client.
    ///
    /// The record's music-player flag is derived from the current
    /// designator, and the routing ring is allocated up front when an
    /// enabled route already names this client's PID as a source.
    pub fn add_client(&self, client: Client) {
        let mut state = self.state.lock();

        let is_music_player = match &state.music_player {
            MusicPlayerDesignator::Pid(pid) => *pid == client.process_id,
            MusicPlayerDesignator::BundleId(bundle) => {
                client.bundle_id.as_deref() == Some(&**bundle)
            }
            MusicPlayerDesignator::Unset => false,
        };
        client.set_is_music_player(is_music_player);
        if is_music_player {
            tracing::debug!(client_id = client.client_id, "adding music player client");
        }

        let is_control_app =
            client.bundle_id.as_deref() == Some(self.config.control_app_bundle_id.as_str());
        let client_id = client.client_id;
        let process_id = client.process_id;

        let client = Arc::new(client);
        if state
            .routes
            .routes()
            .iter()
            .any(|r| r.enabled && r.source_pid == process_id)
        {
            client.allocate_routing_buffer(self.config.routing_buffer_frames);
        }
        state.map.add_client(client);

        if is_control_app {
            state.control_app_client_id = Some(client_id);
        }

        tracing::debug!(client_id, process_id, "client attached");
    }

    /// Unregisters a detached client, releasing its routing ring and
    /// dropping every route its process participates in.
    pub fn remove_client(&self, client_id: ClientId) -> Result<(), EngineError> {
        let mut state = self.state.lock();

        let removed = state
            .map
            .remove_client(client_id)
            .ok_or(EngineError::InvalidClient { client_id })?;

        if state.control_app_client_id == Some(client_id) {
            state.control_app_client_id = None;
        }

        removed.deallocate_routing_buffer();
        Self::clear_routes_for_client_locked(&mut state, removed.process_id);

        tracing::debug!(client_id, process_id = removed.process_id, "client detached");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // IO reference counting (NRT)
    // ---------------------------------------------------------------------

    /// Marks a client as doing IO.
    ///
    /// Returns `Ok(true)` when this start transitioned the device as a
    /// whole from idle to active, `Ok(false)` when other clients were
    /// already running (or this client had already started).
    pub fn start_io_non_rt(&self, client_id: ClientId) -> Result<bool, EngineError> {
        let mut state = self.state.lock();

        let client = Arc::clone(
            state
                .map
                .get_client(client_id)
                .ok_or(EngineError::InvalidClient { client_id })?,
        );

        let mut did_start_device = false;
        let mut send_is_running = false;
        let mut send_running_elsewhere = false;

        if !client.doing_io() {
            if state.start_count == u64::MAX {
                return Err(EngineError::IllegalOperation {
                    reason: "IO start count is already at its maximum",
                });
            }
            let is_control_app = state.control_app_client_id == Some(client_id);
            if !is_control_app && state.start_count_excluding_control_app == u64::MAX {
                return Err(EngineError::IllegalOperation {
                    reason: "non-control-app IO start count is already at its maximum",
                });
            }

            tracing::debug!(
                client_id,
                process_id = client.process_id,
                "client starting IO"
            );

            client.set_doing_io(true);
            state.start_count += 1;

            if !is_control_app {
                state.start_count_excluding_control_app += 1;
                if state.start_count_excluding_control_app == 1 {
                    send_running_elsewhere = true;
                }
            }

            did_start_device = state.start_count == 1;
            send_is_running = did_start_device;
        }

        debug_assert!(
            state.start_count_excluding_control_app == state.start_count
                || state.start_count_excluding_control_app + 1 == state.start_count,
            "IO start counts are out of sync"
        );

        self.send_io_running_notifications(send_is_running, send_running_elsewhere);
        Ok(did_start_device)
    }

    /// Marks a client as no longer doing IO.
    ///
    /// Returns `Ok(true)` when this stop transitioned the device from
    /// active to idle.
    pub fn stop_io_non_rt(&self, client_id: ClientId) -> Result<bool, EngineError> {
        let mut state = self.state.lock();

        let client = Arc::clone(
            state
                .map
                .get_client(client_id)
                .ok_or(EngineError::InvalidClient { client_id })?,
        );

        let mut did_stop_device = false;
        let mut send_is_running = false;
        let mut send_running_elsewhere = false;

        if client.doing_io() {
            if state.start_count == 0 {
                return Err(EngineError::IllegalOperation {
                    reason: "IO start count would underflow",
                });
            }
            let is_control_app = state.control_app_client_id == Some(client_id);
            if !is_control_app && state.start_count_excluding_control_app == 0 {
                return Err(EngineError::IllegalOperation {
                    reason: "non-control-app IO start count would underflow",
                });
            }

            tracing::debug!(
                client_id,
                process_id = client.process_id,
                "client stopping IO"
            );

            client.set_doing_io(false);
            state.start_count -= 1;

            if !is_control_app {
                state.start_count_excluding_control_app -= 1;
                if state.start_count_excluding_control_app == 0 {
                    send_running_elsewhere = true;
                }
            }

            did_stop_device = state.start_count == 0;
            send_is_running = did_stop_device;
        }

        debug_assert!(
            state.start_count_excluding_control_app == state.start_count
                || state.start_count_excluding_control_app + 1 == state.start_count,
            "IO start counts are out of sync"
        );

        self.send_io_running_notifications(send_is_running, send_running_elsewhere);
        Ok(did_stop_device)
    }

    /// True while any client is doing IO.
    pub fn clients_running_io(&self) -> bool {
        self.state.lock().start_count > 0
    }

    /// True while any client other than the control app is doing IO.
    pub fn clients_other_than_control_app_running_io(&self) -> bool {
        self.state.lock().start_count_excluding_control_app > 0
    }

    fn send_io_running_notifications(&self, is_running: bool, running_elsewhere: bool) {
        if is_running {
            self.notifications
                .dispatch(EngineNotification::DeviceIsRunningChanged {
                    device_id: self.device_id,
                });
        }
        if running_elsewhere {
            self.notifications
                .dispatch(EngineNotification::RunningSomewhereElseChanged {
                    device_id: self.device_id,
                });
        }
    }

    // ---------------------------------------------------------------------
    // Music player designation (NRT)
    // ---------------------------------------------------------------------

    /// Designates the music player by PID, clearing any bundle-id
    /// designation. Returns `Ok(false)` when the designator was already this
    /// PID.
    pub fn set_music_player_by_pid(&self, pid: ProcessId) -> Result<bool, EngineError> {
        if pid < 0 {
            return Err(EngineError::InvalidPid { pid });
        }

        let mut state = self.state.lock();
        if matches!(state.music_player, MusicPlayerDesignator::Pid(p) if p == pid) {
            return Ok(false);
        }

        state.music_player = MusicPlayerDesignator::Pid(pid);
        state.map.update_music_player_flags(|c| c.process_id == pid);
        tracing::debug!(pid, "music player designated by PID");
        Ok(true)
    }

    /// Designates the music player by bundle id, clearing any PID
    /// designation. Returns `false` when the designator was already this
    /// bundle id.
    pub fn set_music_player_by_bundle_id(&self, bundle_id: &str) -> bool {
        let mut state = self.state.lock();
        if matches!(&state.music_player, MusicPlayerDesignator::BundleId(b) if &**b == bundle_id) {
            return false;
        }

        state.music_player = MusicPlayerDesignator::BundleId(Arc::from(bundle_id));
        state
            .map
            .update_music_player_flags(|c| c.bundle_id.as_deref() == Some(bundle_id));
        tracing::debug!(bundle_id, "music player designated by bundle id");
        true
    }

    // ---------------------------------------------------------------------
    // Per-client controls (NRT)
    // ---------------------------------------------------------------------

    /// Applies a batch of app volume/pan/EQ updates.
    ///
    /// Each entry is validated in full before any of its fields are
    /// applied, so a failing entry changes nothing. Controls are applied to
    /// every client matching the entry's PID and to every client matching
    /// its bundle id, since apps can have several streams under either key.
    /// Returns `Ok(true)` if any client record changed.
    pub fn set_clients_relative_volumes(
        &self,
        entries: &[AppVolumeEntry],
    ) -> Result<bool, EngineError> {
        let state = self.state.lock();
        let mut changed = false;

        for entry in entries {
            if entry.process_id.is_none() && entry.bundle_id.is_none() {
                return Err(EngineError::InvalidRelativeVolume {
                    reason: "entry has neither PID nor bundle id",
                });
            }

            let has_eq = entry.eq_low_gain.is_some()
                || entry.eq_mid_gain.is_some()
                || entry.eq_high_gain.is_some();
            if entry.relative_volume.is_none() && entry.pan_position.is_none() && !has_eq {
                return Err(EngineError::InvalidRelativeVolume {
                    reason: "entry carries no volume, pan, or EQ",
                });
            }

            if let Some(raw) = entry.relative_volume {
                if !self.volume_curve.contains(raw) {
                    return Err(EngineError::InvalidRelativeVolume {
                        reason: "relative volume out of range",
                    });
                }
            }
            if let Some(pan) = entry.pan_position {
                if !controls::pan_in_range(pan) {
                    return Err(EngineError::InvalidPanPosition { value: pan });
                }
            }
            for band in [entry.eq_low_gain, entry.eq_mid_gain, entry.eq_high_gain]
                .into_iter()
                .flatten()
            {
                if !controls::eq_gain_in_range(band) {
                    return Err(EngineError::InvalidRelativeVolume {
                        reason: "EQ gain out of range",
                    });
                }
            }

            if let Some(raw) = entry.relative_volume {
                // The curve's midpoint maps to 0.25; the ×4 keeps apps at the
                // default volume passing through at unity.
                let gain = self.volume_curve.raw_to_scalar(raw) * 4.0;
                if let Some(pid) = entry.process_id {
                    changed |= state.map.set_relative_volume_by_pid(pid, gain);
                }
                if let Some(bundle_id) = &entry.bundle_id {
                    changed |= state.map.set_relative_volume_by_bundle_id(bundle_id, gain);
                }
            }

            if let Some(pan) = entry.pan_position {
                if let Some(pid) = entry.process_id {
                    changed |= state.map.set_pan_position_by_pid(pid, pan);
                }
                if let Some(bundle_id) = &entry.bundle_id {
                    changed |= state.map.set_pan_position_by_bundle_id(bundle_id, pan);
                }
            }

            if has_eq {
                let low = entry.eq_low_gain.map(controls::eq_raw_to_db);
                let mid = entry.eq_mid_gain.map(controls::eq_raw_to_db);
                let high = entry.eq_high_gain.map(controls::eq_raw_to_db);
                if let Some(pid) = entry.process_id {
                    changed |= state.map.set_eq_by_pid(pid, low, mid, high);
                }
                if let Some(bundle_id) = &entry.bundle_id {
                    changed |= state.map.set_eq_by_bundle_id(bundle_id, low, mid, high);
                }
            }
        }

        Ok(changed)
    }

    // ---------------------------------------------------------------------
    // Routing graph (NRT)
    // ---------------------------------------------------------------------

    /// Inserts or updates the route `source_pid → dest_pid`.
    ///
    /// Returns `true` iff the stored edge differs from what was there
    /// before. Creating a new enabled edge allocates the routing ring on
    /// every client of the source process.
    pub fn set_route(
        &self,
        source_pid: ProcessId,
        dest_pid: ProcessId,
        gain: f32,
        enabled: bool,
    ) -> bool {
        let mut state = self.state.lock();
        Self::upsert_route_locked(
            &mut state,
            source_pid,
            dest_pid,
            gain,
            enabled,
            self.config.routing_buffer_frames,
        )
    }

    /// Applies a batch of route entries parsed from wire values.
    ///
    /// Defaults are gain = 1.0 and enabled = true; entries that don't parse
    /// are skipped silently. Returns `true` if any edge was added or
    /// modified.
    pub fn set_routes_from_array(&self, entries: &[serde_json::Value]) -> bool {
        let mut state = self.state.lock();
        let mut changed = false;

        for value in entries {
            let Ok(entry) = serde_json::from_value::<RouteEntry>(value.clone()) else {
                continue;
            };
            changed |= Self::upsert_route_locked(
                &mut state,
                entry.source_process_id,
                entry.dest_process_id,
                entry.gain,
                entry.enabled,
                self.config.routing_buffer_frames,
            );
        }

        changed
    }

    /// Snapshot of all edges in append order.
    pub fn copy_routes_as_array(&self) -> Vec<RouteEntry> {
        self.state.lock().routes.as_entries()
    }

    /// Removes every route where `pid` is source or destination and
    /// releases the routing ring on that process's clients.
    pub fn clear_routes_for_client(&self, pid: ProcessId) {
        let mut state = self.state.lock();
        Self::clear_routes_for_client_locked(&mut state, pid);
    }

    fn upsert_route_locked(
        state: &mut EngineState,
        source_pid: ProcessId,
        dest_pid: ProcessId,
        gain: f32,
        enabled: bool,
        ring_frames: usize,
    ) -> bool {
        let update = state.routes.upsert(source_pid, dest_pid, gain, enabled);
        if update == RouteUpdate::Added {
            state.map.allocate_routing_buffer_for_pid(source_pid, ring_frames);
            tracing::debug!(source_pid, dest_pid, gain, "route added");
        }
        update.changed()
    }

    fn clear_routes_for_client_locked(state: &mut EngineState, pid: ProcessId) {
        if state.routes.clear_for_pid(pid) {
            tracing::debug!(pid, "routes cleared for client");
        }
        state.map.deallocate_routing_buffer_for_pid(pid);
    }

    // ---------------------------------------------------------------------
    // Real-time audio path
    // ---------------------------------------------------------------------

    /// Captures a client's produced audio into its routing ring.
    ///
    /// Called from the client's RT callback with its interleaved stereo
    /// output. The ring is only touched when some enabled route names the
    /// client's process as a source, so non-routed clients cost one
    /// snapshot lookup and a scan.
    pub fn store_client_audio_rt(&self, client_id: ClientId, buffer: &[f32], num_frames: u32) {
        let clients = self.rt_clients.load();
        let Some(client) = clients.client(client_id) else {
            return;
        };

        let routes = self.rt_routes.load();
        let is_routing_source = routes
            .iter()
            .any(|r| r.enabled && r.source_pid == client.process_id);

        if is_routing_source {
            // The timeline argument is reserved; nothing reads it back.
            client.store_to_routing_buffer(buffer, num_frames, 0.0);
        }
    }

    /// Adds routed source audio into a destination client's output.
    ///
    /// For each enabled route targeting the client's process, reads the
    /// last `num_frames` frames the source produced (output frame `i` comes
    /// from sample offset `num_frames − i`, so the block ends on the
    /// source's newest frame), scales them by the route gain, and adds them
    /// into `io_buffer`. Sources that never stored audio contribute
    /// silence.
    pub fn mix_routed_audio_rt(&self, client_id: ClientId, io_buffer: &mut [f32], num_frames: u32) {
        let clients = self.rt_clients.load();
        let Some(dest) = clients.client(client_id) else {
            return;
        };
        let dest_pid = dest.process_id;

        let routes = self.rt_routes.load();
        let num_frames = (num_frames as usize).min(io_buffer.len() / 2);

        for route in routes.iter().filter(|r| r.enabled && r.dest_pid == dest_pid) {
            let Some(source) = clients.client_by_pid(route.source_pid) else {
                continue;
            };

            for frame in 0..num_frames {
                let sample_offset = (num_frames - frame) as u64;
                let left = source.fetch_from_routing_buffer(0, sample_offset);
                let right = source.fetch_from_routing_buffer(1, sample_offset);
                io_buffer[frame * 2] += left * route.gain;
                io_buffer[frame * 2 + 1] += right * route.gain;
            }
        }
    }

    /// True iff any enabled route targets the client's process.
    pub fn has_incoming_routes_rt(&self, client_id: ClientId) -> bool {
        let clients = self.rt_clients.load();
        let Some(client) = clients.client(client_id) else {
            return false;
        };

        self.rt_routes
            .load()
            .iter()
            .any(|r| r.enabled && r.dest_pid == client.process_id)
    }

    /// True iff the client is the designated music player. Unknown clients
    /// are not.
    pub fn is_music_player_rt(&self, client_id: ClientId) -> bool {
        self.rt_clients
            .load()
            .client(client_id)
            .is_some_and(|c| c.is_music_player())
    }

    /// The client's relative volume as linear gain; unity for unknown
    /// clients.
    pub fn client_relative_volume_rt(&self, client_id: ClientId) -> f32 {
        self.rt_clients
            .load()
            .client(client_id)
            .map_or(1.0, |c| c.relative_volume())
    }

    /// The client's raw pan position; center for unknown clients.
    pub fn client_pan_position_rt(&self, client_id: ClientId) -> i32 {
        self.rt_clients
            .load()
            .client(client_id)
            .map_or(PAN_CENTER_RAW, |c| c.pan_position())
    }

    /// The shared client record, for in-place EQ processing access.
    pub fn client_for_eq_rt(&self, client_id: ClientId) -> Option<Arc<Client>> {
        self.rt_clients.load().client(client_id).cloned()
    }

    /// Value snapshot of a client record.
    pub fn client_info_rt(&self, client_id: ClientId) -> Option<ClientInfo> {
        self.rt_clients.load().client(client_id).map(|c| c.info())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("device_id", &self.device_id)
            .field("config", &self.config)
            .finish()
    }
}
