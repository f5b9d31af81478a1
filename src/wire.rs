//! Wire contracts shared with the control app.
//!
//! Field names are part of the cross-process protocol and must not change.

use serde::{Deserialize, Serialize};

use crate::client::ProcessId;

/// One entry of a batch app-volume update.
///
/// An entry identifies an app by PID and/or bundle id and carries any
/// combination of volume, pan, and EQ band values. Absent fields leave the
/// corresponding control unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppVolumeEntry {
    /// PID of the target app, if identified by process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,

    /// Bundle id of the target app, if identified by bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    /// Raw relative volume in [0, 100].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_volume: Option<i32>,

    /// Raw pan position in [−100, 100], 0 = center.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan_position: Option<i32>,

    /// Low-band EQ gain in tenths of a dB, [−120, 120].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq_low_gain: Option<i32>,

    /// Mid-band EQ gain in tenths of a dB, [−120, 120].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq_mid_gain: Option<i32>,

    /// High-band EQ gain in tenths of a dB, [−120, 120].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq_high_gain: Option<i32>,
}

fn default_gain() -> f32 {
    1.0
}

fn default_enabled() -> bool {
    true
}

/// One routing edge as carried over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// PID of the process whose audio is captured.
    pub source_process_id: ProcessId,

    /// PID of the process whose playback receives the mix.
    pub dest_process_id: ProcessId,

    /// Linear gain applied while mixing. Default: 1.0.
    #[serde(default = "default_gain")]
    pub gain: f32,

    /// Whether the edge is active. Default: true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}
