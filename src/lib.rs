//! # appmix
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Per-app audio mixing and inter-application routing for a virtual audio
//! device.
//!
//! `appmix` is the engine a virtual output device driver embeds to track the
//! application streams attached to it, hold per-app controls (relative
//! volume, pan, three-band EQ, music-player designation), and route audio
//! produced by one process into the playback of another. The host plugin
//! marshals OS audio-server callbacks into the engine; the engine owns the
//! state and the thread discipline.
//!
//! ## Quick Start
//!
//! ```rust
//! use appmix::{Client, Engine};
//!
//! let engine = Engine::builder(1)
//!     .control_app_bundle_id("com.example.mixerapp")
//!     .on_notification(|n| tracing::info!(?n, "device state"))
//!     .build();
//!
//! // Control thread: a game and a voice chat attach.
//! engine.add_client(Client::new(10, 2001, Some("com.example.game"), true));
//! engine.add_client(Client::new(11, 2002, Some("com.example.chat"), true));
//! engine.start_io_non_rt(10).unwrap();
//!
//! // Route the game's audio into the chat app's stream at half gain.
//! engine.set_route(2001, 2002, 0.5, true);
//!
//! // RT callbacks: the game contributes audio, the chat stream mixes it in.
//! let game_block = [0.25f32; 128];
//! engine.store_client_audio_rt(10, &game_block, 64);
//! let mut chat_io = [0.0f32; 128];
//! if engine.has_incoming_routes_rt(11) {
//!     engine.mix_routed_audio_rt(11, &mut chat_io, 64);
//! }
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Control (NRT) threads**: serialize on the engine mutex; may allocate
//!   and block while mutating clients, routes, and controls
//! - **RT audio callbacks**: never take the mutex; they read lock-free
//!   snapshots of the client map and route list, and per-source SPSC ring
//!   buffers carry routed audio between callbacks
//! - **Notification worker**: a serial background thread delivers device
//!   running-state changes to the host without holding the engine lock
//!
//! This design keeps the audio callback free of allocation, locking, and
//! unbounded work regardless of what the control app is doing.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod client;
mod config;
pub mod controls;
mod engine;
mod error;
mod notify;
mod wire;

pub use builder::EngineBuilder;
pub use client::{Client, ClientId, ClientInfo, ProcessId};
pub use config::{EngineConfig, DEFAULT_ROUTING_BUFFER_FRAMES};
pub use engine::{DeviceId, Engine};
pub use error::EngineError;
pub use notify::{notification_callback, EngineNotification, NotificationCallback};
pub use wire::{AppVolumeEntry, RouteEntry};
