//! Integration tests for appmix.
//!
//! These drive the engine the way the host driver does: control operations
//! from an NRT thread, audio through the `*_rt` entry points.

use std::sync::{Arc, Mutex};

use appmix::{AppVolumeEntry, Client, Engine, EngineNotification};

const CONTROL_APP: &str = "com.appmix.controller";

fn collecting_engine() -> (Engine, Arc<Mutex<Vec<EngineNotification>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let engine = Engine::builder(1)
        .on_notification(move |n| sink.lock().unwrap().push(n))
        .build();
    (engine, received)
}

#[test]
fn test_device_start_notifications() {
    let (engine, received) = collecting_engine();

    engine.add_client(Client::new(1, 100, None, true));
    assert!(engine.start_io_non_rt(1).unwrap());

    engine.add_client(Client::new(2, 101, None, true));
    assert!(!engine.start_io_non_rt(2).unwrap());

    assert!(!engine.stop_io_non_rt(1).unwrap());
    assert!(engine.stop_io_non_rt(2).unwrap());

    // Dropping the engine joins the notification worker, so everything
    // queued has been delivered.
    drop(engine);
    let got = received.lock().unwrap();
    assert_eq!(
        *got,
        vec![
            // Start of the first client: device went idle → active, and IO
            // is now running outside the control app.
            EngineNotification::DeviceIsRunningChanged { device_id: 1 },
            EngineNotification::RunningSomewhereElseChanged { device_id: 1 },
            // Second start and first stop change neither flag. Final stop
            // flips both back.
            EngineNotification::DeviceIsRunningChanged { device_id: 1 },
            EngineNotification::RunningSomewhereElseChanged { device_id: 1 },
        ]
    );
}

#[test]
fn test_control_app_only_start() {
    let (engine, received) = collecting_engine();

    engine.add_client(Client::new(1, 100, Some(CONTROL_APP), true));
    assert!(engine.start_io_non_rt(1).unwrap());
    assert!(engine.clients_running_io());
    assert!(!engine.clients_other_than_control_app_running_io());

    drop(engine);
    let got = received.lock().unwrap();
    // The device started, but the control app never counts as "running
    // somewhere else".
    assert_eq!(
        *got,
        vec![EngineNotification::DeviceIsRunningChanged { device_id: 1 }]
    );
}

#[test]
fn test_routing_mixes_scaled_source_audio() {
    let engine = Engine::new(1);
    engine.add_client(Client::new(20, 200, None, true)); // source
    engine.add_client(Client::new(21, 201, None, true)); // destination

    assert!(engine.set_route(200, 201, 0.5, true));
    assert!(engine.has_incoming_routes_rt(21));
    assert!(!engine.has_incoming_routes_rt(20));

    // Source contributes 64 frames: left channel a ramp, right silent.
    let mut block = [0.0f32; 128];
    for (i, frame) in block.chunks_exact_mut(2).enumerate() {
        frame[0] = i as f32;
    }
    engine.store_client_audio_rt(20, &block, 64);

    let mut io = [0.0f32; 128];
    engine.mix_routed_audio_rt(21, &mut io, 64);

    // Output frame i reads sample offset 64 − i, so the block ends on the
    // newest source frame.
    for i in 0..64 {
        assert_eq!(io[i * 2], i as f32 * 0.5, "left frame {i}");
        assert_eq!(io[i * 2 + 1], 0.0, "right frame {i}");
    }
    assert_eq!(io[0], 0.0);
    assert_eq!(io[126], 31.5);
}

#[test]
fn test_mixing_adds_rather_than_overwrites() {
    let engine = Engine::new(1);
    engine.add_client(Client::new(20, 200, None, true));
    engine.add_client(Client::new(21, 201, None, true));
    engine.set_route(200, 201, 1.0, true);

    engine.store_client_audio_rt(20, &[0.25f32; 128], 64);

    // The destination already has its own audio in the buffer.
    let mut io = [0.5f32; 128];
    engine.mix_routed_audio_rt(21, &mut io, 64);
    for sample in io {
        assert_eq!(sample, 0.75);
    }
}

#[test]
fn test_multiple_sources_into_one_destination() {
    let engine = Engine::new(1);
    engine.add_client(Client::new(20, 200, None, true));
    engine.add_client(Client::new(22, 202, None, true));
    engine.add_client(Client::new(21, 201, None, true));

    engine.set_route(200, 201, 1.0, true);
    engine.set_route(202, 201, 0.5, true);

    engine.store_client_audio_rt(20, &[1.0f32; 32], 16);
    engine.store_client_audio_rt(22, &[1.0f32; 32], 16);

    let mut io = [0.0f32; 32];
    engine.mix_routed_audio_rt(21, &mut io, 16);
    for sample in io {
        assert_eq!(sample, 1.5);
    }
}

#[test]
fn test_unfed_source_mixes_silence() {
    let engine = Engine::new(1);
    engine.add_client(Client::new(20, 200, None, true));
    engine.add_client(Client::new(21, 201, None, true));
    engine.set_route(200, 201, 1.0, true);

    let mut io = [0.25f32; 64];
    engine.mix_routed_audio_rt(21, &mut io, 32);
    for sample in io {
        assert_eq!(sample, 0.25);
    }
}

#[test]
fn test_route_cleanup_for_client() {
    let engine = Engine::new(1);
    engine.add_client(Client::new(20, 200, None, true));
    engine.add_client(Client::new(21, 201, None, true));
    engine.add_client(Client::new(22, 202, None, true));
    engine.add_client(Client::new(23, 203, None, true));

    engine.set_route(200, 201, 1.0, true);
    engine.set_route(202, 201, 1.0, true);
    engine.set_route(200, 203, 1.0, true);
    assert!(engine.client_for_eq_rt(20).unwrap().has_routing_buffer());

    engine.clear_routes_for_client(200);

    let routes = engine.copy_routes_as_array();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].source_process_id, 202);
    assert_eq!(routes[0].dest_process_id, 201);
    assert!(!engine.client_for_eq_rt(20).unwrap().has_routing_buffer());
    assert!(engine.client_for_eq_rt(22).unwrap().has_routing_buffer());
}

#[test]
fn test_routes_round_trip_through_array() {
    let engine = Engine::new(1);
    engine.set_route(200, 201, 0.5, true);
    engine.set_route(202, 201, 1.0, true);
    engine.set_route(200, 203, 0.75, true);

    let exported = engine.copy_routes_as_array();
    let values: Vec<serde_json::Value> = exported
        .iter()
        .map(|e| serde_json::to_value(e).unwrap())
        .collect();

    let restored = Engine::new(2);
    assert!(restored.set_routes_from_array(&values));

    let mut before = exported;
    let mut after = restored.copy_routes_as_array();
    before.sort_by_key(|e| (e.source_process_id, e.dest_process_id));
    after.sort_by_key(|e| (e.source_process_id, e.dest_process_id));
    assert_eq!(before, after);

    // Replaying the same array again changes nothing.
    let values: Vec<serde_json::Value> = after
        .iter()
        .map(|e| serde_json::to_value(e).unwrap())
        .collect();
    assert!(!restored.set_routes_from_array(&values));
}

#[test]
fn test_set_route_idempotence() {
    let engine = Engine::new(1);
    assert!(engine.set_route(200, 201, 0.5, true));
    assert!(!engine.set_route(200, 201, 0.5, true));
    assert!(engine.set_route(200, 201, 0.6, true));
    assert!(!engine.set_route(300, 301, 1.0, false));
}

#[test]
fn test_volume_batch_end_to_end() {
    let engine = Engine::new(1);
    engine.add_client(Client::new(1, 100, Some("com.example.app"), true));

    // Midpoint raw volume calibrates to unity gain.
    engine
        .set_clients_relative_volumes(&[AppVolumeEntry {
            process_id: Some(100),
            relative_volume: Some(50),
            ..Default::default()
        }])
        .unwrap();
    assert_eq!(engine.client_relative_volume_rt(1), 1.0);

    // EQ arrives in tenths of a dB and only touches present bands.
    engine
        .set_clients_relative_volumes(&[AppVolumeEntry {
            process_id: Some(100),
            eq_low_gain: Some(60),
            ..Default::default()
        }])
        .unwrap();
    let client = engine.client_for_eq_rt(1).unwrap();
    assert_eq!(client.eq_gains(), (6.0, 0.0, 0.0));

    let info = engine.client_info_rt(1).unwrap();
    assert_eq!(info.relative_volume, 1.0);
    assert_eq!(info.eq_low_gain, 6.0);
}

#[test]
fn test_concurrent_store_and_mix_never_tear() {
    let engine = Arc::new(Engine::new(1));
    engine.add_client(Client::new(20, 200, None, true));
    engine.add_client(Client::new(21, 201, None, true));
    engine.set_route(200, 201, 0.5, true);

    // A producer thread stores a constant-valued block while the consumer
    // mixes. With a constant source every mixed sample must be exactly the
    // scaled constant or silence, whatever interleaving occurs.
    let producer = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            let block = [0.5f32; 256];
            for _ in 0..2000 {
                engine.store_client_audio_rt(20, &block, 128);
            }
        })
    };

    for _ in 0..500 {
        let mut io = [0.0f32; 256];
        engine.mix_routed_audio_rt(21, &mut io, 128);
        for sample in io {
            assert!(
                sample == 0.0 || sample == 0.25,
                "unexpected mixed sample {sample}"
            );
        }
    }

    producer.join().unwrap();
}

#[test]
fn test_detach_while_audio_flows() {
    let engine = Engine::new(1);
    engine.add_client(Client::new(20, 200, None, true));
    engine.add_client(Client::new(21, 201, None, true));
    engine.set_route(200, 201, 1.0, true);
    engine.store_client_audio_rt(20, &[1.0f32; 64], 32);

    engine.remove_client(20).unwrap();

    // The route went with the source; mixing is a silent no-op, and the RT
    // predicates fall back to defaults.
    let mut io = [0.0f32; 64];
    engine.mix_routed_audio_rt(21, &mut io, 32);
    assert!(io.iter().all(|&s| s == 0.0));
    assert!(!engine.has_incoming_routes_rt(21));
    assert!(engine.client_info_rt(20).is_none());
}
