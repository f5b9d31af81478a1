//! The directed routing graph: which process feeds audio into which.
//!
//! Edges are mutated by control threads under the engine mutex and scanned
//! by RT callbacks through a published snapshot, the same generation scheme
//! the client map uses. Edge order is append order; `(source, dest)` pairs
//! are unique.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::client::ProcessId;
use crate::wire::RouteEntry;

/// One directed routing edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AudioRoute {
    pub source_pid: ProcessId,
    pub dest_pid: ProcessId,
    pub gain: f32,
    pub enabled: bool,
}

/// What an upsert did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteUpdate {
    /// The edge existed with identical values, or a disabled edge was never
    /// created.
    Unchanged,
    /// An existing edge's gain or enabled flag changed.
    Updated,
    /// A new edge was appended.
    Added,
}

impl RouteUpdate {
    pub(crate) fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

/// Authoritative edge list plus its RT snapshot.
pub(crate) struct RouteTable {
    routes: Vec<AudioRoute>,
    snapshot: Arc<ArcSwap<Vec<AudioRoute>>>,
}

impl RouteTable {
    pub(crate) fn new() -> Self {
        Self {
            routes: Vec::new(),
            snapshot: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Handle RT readers use to scan the current edges.
    pub(crate) fn snapshot_handle(&self) -> Arc<ArcSwap<Vec<AudioRoute>>> {
        Arc::clone(&self.snapshot)
    }

    /// Inserts or updates the edge `(source, dest)`.
    ///
    /// A matching edge is updated in place. A new edge is only created when
    /// `enabled`; disabling a route that was never set is a no-op. A
    /// disabled existing edge is kept so re-enabling is cheap.
    pub(crate) fn upsert(
        &mut self,
        source_pid: ProcessId,
        dest_pid: ProcessId,
        gain: f32,
        enabled: bool,
    ) -> RouteUpdate {
        if let Some(route) = self
            .routes
            .iter_mut()
            .find(|r| r.source_pid == source_pid && r.dest_pid == dest_pid)
        {
            if route.gain == gain && route.enabled == enabled {
                return RouteUpdate::Unchanged;
            }
            route.gain = gain;
            route.enabled = enabled;
            self.publish();
            return RouteUpdate::Updated;
        }

        if !enabled {
            return RouteUpdate::Unchanged;
        }

        self.routes.push(AudioRoute {
            source_pid,
            dest_pid,
            gain,
            enabled,
        });
        self.publish();
        RouteUpdate::Added
    }

    /// Removes every edge where `pid` is source or destination. Returns true
    /// if any edge was removed.
    pub(crate) fn clear_for_pid(&mut self, pid: ProcessId) -> bool {
        let before = self.routes.len();
        self.routes
            .retain(|r| r.source_pid != pid && r.dest_pid != pid);
        let removed = self.routes.len() != before;
        if removed {
            self.publish();
        }
        removed
    }

    /// The current edges in append order.
    pub(crate) fn routes(&self) -> &[AudioRoute] {
        &self.routes
    }

    /// The current edges as wire entries.
    pub(crate) fn as_entries(&self) -> Vec<RouteEntry> {
        self.routes
            .iter()
            .map(|r| RouteEntry {
                source_process_id: r.source_pid,
                dest_process_id: r.dest_pid,
                gain: r.gain,
                enabled: r.enabled,
            })
            .collect()
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(self.routes.clone()));
    }
}
