//! Client registry with lock-free RT snapshots.
//!
//! The map keeps two views of the attached clients. The authoritative
//! `HashMap` is mutated by control threads under the engine mutex. Every
//! structural change (attach/detach) rebuilds an immutable snapshot indexed
//! by client id and by PID and publishes it through an `ArcSwap`, so RT
//! callbacks look clients up without taking the mutex: a reader sees either
//! the generation before a mutation or the one after it, and records inside
//! a generation are shared `Arc`s whose control fields are individually
//! atomic. Retiring generations are freed once the last RT reader drops its
//! guard.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::client::{Client, ClientId, ProcessId};

/// Immutable generation of the client map, shared with RT readers.
#[derive(Default)]
pub(crate) struct MapSnapshot {
    by_client_id: HashMap<ClientId, Arc<Client>>,
    by_process_id: HashMap<ProcessId, Vec<Arc<Client>>>,
}

impl MapSnapshot {
    /// Looks a client up by id.
    pub(crate) fn client(&self, client_id: ClientId) -> Option<&Arc<Client>> {
        self.by_client_id.get(&client_id)
    }

    /// Returns some client with the given PID, preferring the earliest
    /// attached when a process has several streams.
    pub(crate) fn client_by_pid(&self, pid: ProcessId) -> Option<&Arc<Client>> {
        self.by_process_id.get(&pid).and_then(|v| v.first())
    }
}

/// The authoritative client registry. All mutation happens under the engine
/// mutex; RT access goes through the published snapshot.
pub(crate) struct ClientMap {
    clients: HashMap<ClientId, Arc<Client>>,
    snapshot: Arc<ArcSwap<MapSnapshot>>,
}

impl ClientMap {
    pub(crate) fn new() -> Self {
        Self {
            clients: HashMap::new(),
            snapshot: Arc::new(ArcSwap::from_pointee(MapSnapshot::default())),
        }
    }

    /// Handle RT readers use to load the current generation.
    pub(crate) fn snapshot_handle(&self) -> Arc<ArcSwap<MapSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    /// Inserts a newly attached client and publishes a new generation.
    pub(crate) fn add_client(&mut self, client: Arc<Client>) {
        let replaced = self.clients.insert(client.client_id, client);
        if let Some(old) = replaced {
            tracing::warn!(client_id = old.client_id, "replacing client that was never removed");
        }
        self.publish();
    }

    /// Removes a client and publishes a new generation. Returns the removed
    /// record so the caller can inspect its identity.
    pub(crate) fn remove_client(&mut self, client_id: ClientId) -> Option<Arc<Client>> {
        let removed = self.clients.remove(&client_id);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Looks a client up on the control path.
    pub(crate) fn get_client(&self, client_id: ClientId) -> Option<&Arc<Client>> {
        self.clients.get(&client_id)
    }

    /// Iterates all attached clients in unspecified order.
    pub(crate) fn clients(&self) -> impl Iterator<Item = &Arc<Client>> {
        self.clients.values()
    }

    /// Number of attached clients.
    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    /// Re-evaluates every record's music-player flag against `is_player`.
    pub(crate) fn update_music_player_flags(&self, is_player: impl Fn(&Client) -> bool) {
        for client in self.clients.values() {
            let client: &Client = client;
            client.set_is_music_player(is_player(client));
        }
    }

    /// Sets the relative volume on every client of `pid`. Returns true if
    /// any record changed.
    pub(crate) fn set_relative_volume_by_pid(&self, pid: ProcessId, gain: f32) -> bool {
        self.update_matching(|c| c.process_id == pid, |c| {
            let changed = c.relative_volume() != gain;
            c.set_relative_volume(gain);
            changed
        })
    }

    /// Sets the relative volume on every client of `bundle_id`.
    pub(crate) fn set_relative_volume_by_bundle_id(&self, bundle_id: &str, gain: f32) -> bool {
        self.update_matching(|c| c.bundle_id.as_deref() == Some(bundle_id), |c| {
            let changed = c.relative_volume() != gain;
            c.set_relative_volume(gain);
            changed
        })
    }

    /// Sets the pan position on every client of `pid`.
    pub(crate) fn set_pan_position_by_pid(&self, pid: ProcessId, pan: i32) -> bool {
        self.update_matching(|c| c.process_id == pid, |c| {
            let changed = c.pan_position() != pan;
            c.set_pan_position(pan);
            changed
        })
    }

    /// Sets the pan position on every client of `bundle_id`.
    pub(crate) fn set_pan_position_by_bundle_id(&self, bundle_id: &str, pan: i32) -> bool {
        self.update_matching(|c| c.bundle_id.as_deref() == Some(bundle_id), |c| {
            let changed = c.pan_position() != pan;
            c.set_pan_position(pan);
            changed
        })
    }

    /// Updates the present EQ bands on every client of `pid`.
    pub(crate) fn set_eq_by_pid(
        &self,
        pid: ProcessId,
        low: Option<f32>,
        mid: Option<f32>,
        high: Option<f32>,
    ) -> bool {
        self.update_matching(|c| c.process_id == pid, |c| {
            let before = c.eq_gains();
            c.set_eq_gains(low, mid, high);
            c.eq_gains() != before
        })
    }

    /// Updates the present EQ bands on every client of `bundle_id`.
    pub(crate) fn set_eq_by_bundle_id(
        &self,
        bundle_id: &str,
        low: Option<f32>,
        mid: Option<f32>,
        high: Option<f32>,
    ) -> bool {
        self.update_matching(|c| c.bundle_id.as_deref() == Some(bundle_id), |c| {
            let before = c.eq_gains();
            c.set_eq_gains(low, mid, high);
            c.eq_gains() != before
        })
    }

    /// Allocates the routing ring on every client of `pid`.
    pub(crate) fn allocate_routing_buffer_for_pid(&self, pid: ProcessId, capacity_frames: usize) {
        for client in self.clients.values().filter(|c| c.process_id == pid) {
            client.allocate_routing_buffer(capacity_frames);
        }
    }

    /// Releases the routing ring on every client of `pid`.
    pub(crate) fn deallocate_routing_buffer_for_pid(&self, pid: ProcessId) {
        for client in self.clients.values().filter(|c| c.process_id == pid) {
            client.deallocate_routing_buffer();
        }
    }

    fn update_matching(
        &self,
        matches: impl Fn(&Client) -> bool,
        update: impl Fn(&Client) -> bool,
    ) -> bool {
        let mut changed = false;
        for client in self.clients.values() {
            let client: &Client = client;
            if matches(client) {
                changed |= update(client);
            }
        }
        changed
    }

    /// Rebuilds the RT snapshot from the authoritative map and swaps it in.
    fn publish(&self) {
        let mut by_process_id: HashMap<ProcessId, Vec<Arc<Client>>> = HashMap::new();
        for client in self.clients.values() {
            by_process_id
                .entry(client.process_id)
                .or_default()
                .push(Arc::clone(client));
        }
        // Deterministic "first match" for PID lookups.
        for group in by_process_id.values_mut() {
            group.sort_by_key(|c| c.client_id);
        }

        self.snapshot.store(Arc::new(MapSnapshot {
            by_client_id: self.clients.clone(),
            by_process_id,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc_client(id: ClientId, pid: ProcessId) -> Arc<Client> {
        Arc::new(Client::new(id, pid, None, true))
    }

    #[test]
    fn test_add_remove_reflects_multiset() {
        let mut map = ClientMap::new();
        for id in 0..8u32 {
            map.add_client(arc_client(id, 100 + id as i32 % 3));
        }
        assert_eq!(map.len(), 8);

        map.remove_client(3);
        map.remove_client(5);
        assert_eq!(map.len(), 6);

        let mut ids: Vec<ClientId> = map.clients().map(|c| c.client_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 4, 6, 7]);

        // Removing an id twice is a no-op.
        assert!(map.remove_client(3).is_none());
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_snapshot_tracks_generations() {
        let mut map = ClientMap::new();
        let handle = map.snapshot_handle();

        let before = handle.load_full();
        map.add_client(arc_client(1, 100));
        let after = handle.load_full();

        assert!(before.client(1).is_none());
        assert!(after.client(1).is_some());
        // The pre-mutation generation is still a coherent view.
        assert!(before.client_by_pid(100).is_none());
    }

    #[test]
    fn test_pid_lookup_prefers_earliest_client() {
        let mut map = ClientMap::new();
        map.add_client(arc_client(9, 100));
        map.add_client(arc_client(2, 100));
        map.add_client(arc_client(5, 200));

        let snapshot = map.snapshot_handle().load_full();
        assert_eq!(snapshot.client_by_pid(100).unwrap().client_id, 2);
        assert_eq!(snapshot.client_by_pid(200).unwrap().client_id, 5);
        assert!(snapshot.client_by_pid(300).is_none());
    }

    #[test]
    fn test_control_updates_report_change() {
        let mut map = ClientMap::new();
        map.add_client(arc_client(1, 100));
        map.add_client(arc_client(2, 100));

        assert!(map.set_relative_volume_by_pid(100, 0.5));
        // Same value again: nothing changed.
        assert!(!map.set_relative_volume_by_pid(100, 0.5));
        // Unknown pid: nothing changed.
        assert!(!map.set_relative_volume_by_pid(999, 0.5));

        for client in map.clients() {
            assert_eq!(client.relative_volume(), 0.5);
        }
    }

    #[test]
    fn test_bundle_id_updates() {
        let mut map = ClientMap::new();
        map.add_client(Arc::new(Client::new(1, 100, Some("com.example.a"), true)));
        map.add_client(Arc::new(Client::new(2, 200, Some("com.example.a"), true)));
        map.add_client(Arc::new(Client::new(3, 300, Some("com.example.b"), true)));

        assert!(map.set_pan_position_by_bundle_id("com.example.a", -50));
        assert_eq!(map.get_client(1).unwrap().pan_position(), -50);
        assert_eq!(map.get_client(2).unwrap().pan_position(), -50);
        assert_eq!(map.get_client(3).unwrap().pan_position(), 0);
    }

    #[test]
    fn test_music_player_flags_follow_predicate() {
        let mut map = ClientMap::new();
        map.add_client(arc_client(1, 100));
        map.add_client(arc_client(2, 200));

        map.update_music_player_flags(|c| c.process_id == 200);
        assert!(!map.get_client(1).unwrap().is_music_player());
        assert!(map.get_client(2).unwrap().is_music_player());

        map.update_music_player_flags(|_| false);
        assert!(!map.get_client(2).unwrap().is_music_player());
    }

    #[test]
    fn test_routing_buffer_lifecycle_by_pid() {
        let mut map = ClientMap::new();
        map.add_client(arc_client(1, 100));
        map.add_client(arc_client(2, 100));
        map.add_client(arc_client(3, 200));

        map.allocate_routing_buffer_for_pid(100, 64);
        assert!(map.get_client(1).unwrap().has_routing_buffer());
        assert!(map.get_client(2).unwrap().has_routing_buffer());
        assert!(!map.get_client(3).unwrap().has_routing_buffer());

        map.deallocate_routing_buffer_for_pid(100);
        assert!(!map.get_client(1).unwrap().has_routing_buffer());
        assert!(!map.get_client(2).unwrap().has_routing_buffer());
    }
}
