//! End-to-end engine tests against the mock transport.
//!
//! All timing-sensitive paths run under the paused tokio clock, so the
//! 1-second resend delay and the 1 Hz samplers fire deterministically.

use std::sync::Arc;
use std::time::Duration;

use vitals_hub::codec::jump_rope::{
    set_mode_command, ROPE_NOTIFY_UUID, ROPE_SERVICE_UUID, ROPE_WRITE_UUID,
};
use vitals_hub::codec::thermometer::{QUERY_COMMAND, THERMOMETER_WRITE_UUID};
use vitals_hub::engine::{Engine, EngineConfig, HubHandle, RecordingError, RopeGoal};
use vitals_hub::model::{DeviceCategory, RopeMode};
use vitals_hub::store::{MemoryStore, PairedRecord, PairedStore};
use vitals_hub::transport::mock::{IssuedCommand, MockTransport};
use vitals_hub::transport::TransportEvent;

fn spawn_hub() -> (HubHandle, Arc<MockTransport>, Arc<MemoryStore>) {
    let (mock, events) = MockTransport::new();
    let store = Arc::new(MemoryStore::new());
    let hub = Engine::spawn(
        mock.clone(),
        store.clone(),
        events,
        EngineConfig::default(),
    );
    (hub, mock, store)
}

/// Let the engine task drain both of its channels.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Drive a freshly spawned hub through pairing and connection of a jump
/// rope, leaving the codec owning `handle` and the write path discovered.
async fn connect_rope(hub: &HubHandle, mock: &MockTransport, handle: &str) {
    hub.start_pairing(DeviceCategory::JumpRope).await;
    settle().await;
    mock.advertise(handle, "QN-Rope-01", -50).await;
    settle().await;
    mock.emit(TransportEvent::Connected {
        handle: handle.to_string(),
    })
    .await;
    settle().await;
    mock.emit(TransportEvent::ServicesDiscovered {
        handle: handle.to_string(),
        services: vec![ROPE_SERVICE_UUID],
    })
    .await;
    settle().await;
    mock.emit(TransportEvent::CharacteristicsDiscovered {
        handle: handle.to_string(),
        service: ROPE_SERVICE_UUID,
        characteristics: vec![ROPE_NOTIFY_UUID, ROPE_WRITE_UUID],
    })
    .await;
    settle().await;
}

/// Inject a telemetry frame reporting `count` jumps in a running session.
async fn report_count(mock: &MockTransport, handle: &str, count: u16) {
    let [hi, lo] = count.to_be_bytes();
    mock.emit(TransportEvent::CharacteristicValueUpdated {
        handle: handle.to_string(),
        characteristic: ROPE_NOTIFY_UUID,
        value: vec![0xA5, 0x00, 0x00, 0x00, hi, lo, 0x00, 0x05, 0x01],
    })
    .await;
    settle().await;
}

#[tokio::test]
async fn connect_without_record_is_a_noop() {
    let (hub, mock, _store) = spawn_hub();

    hub.connect(DeviceCategory::Thermometer).await;
    settle().await;

    assert!(mock.issued().is_empty(), "no scan may start without a record");
    let snapshot = hub.snapshot(DeviceCategory::Thermometer).await.unwrap();
    assert!(!snapshot.status.is_connecting);
    assert!(!snapshot.status.is_pairing);
}

#[tokio::test]
async fn weak_advertisement_is_discarded_during_pairing() {
    let (hub, mock, store) = spawn_hub();

    hub.start_pairing(DeviceCategory::JumpRope).await;
    settle().await;
    mock.advertise("rope-1", "QN-Rope-01", -70).await;
    settle().await;

    assert!(store.load_all().await.unwrap().is_empty());
    let snapshot = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(snapshot.status.is_pairing, "pairing must remain active");
    assert!(!snapshot.status.is_paired);
    assert!(
        !mock.issued().contains(&IssuedCommand::StopScan),
        "scan must keep running after a discarded advertisement"
    );
}

#[tokio::test]
async fn strong_advertisement_completes_pairing() {
    let (hub, mock, store) = spawn_hub();

    hub.start_pairing(DeviceCategory::JumpRope).await;
    settle().await;
    mock.advertise("rope-1", "QN-Rope-01", -55).await;
    settle().await;

    let records = store.load_all().await.unwrap();
    assert_eq!(
        records.get(&DeviceCategory::JumpRope).unwrap().identifier,
        "rope-1"
    );

    let snapshot = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(snapshot.status.is_paired);
    assert!(!snapshot.status.is_pairing);

    let issued = mock.issued();
    assert!(issued.contains(&IssuedCommand::StopScan));
    assert!(issued.contains(&IssuedCommand::Connect("rope-1".to_string())));
}

#[tokio::test]
async fn start_pairing_clears_the_previous_record() {
    let (mock, events) = MockTransport::new();
    let store = Arc::new(MemoryStore::new());
    store.seed(
        DeviceCategory::JumpRope,
        PairedRecord {
            identifier: "old-rope".to_string(),
            display_name: None,
            physical_address: None,
        },
    );
    let hub = Engine::spawn(
        mock.clone(),
        store.clone(),
        events,
        EngineConfig::default(),
    );

    hub.start_pairing(DeviceCategory::JumpRope).await;
    settle().await;
    assert!(
        !store
            .load_all()
            .await
            .unwrap()
            .contains_key(&DeviceCategory::JumpRope),
        "stale record must be cleared before a new handshake"
    );

    mock.advertise("new-rope", "QN-Rope-01", -40).await;
    settle().await;
    let records = store.load_all().await.unwrap();
    assert_eq!(
        records.get(&DeviceCategory::JumpRope).unwrap().identifier,
        "new-rope"
    );
}

#[tokio::test]
async fn reconnect_target_bypasses_rssi_threshold() {
    let (mock, events) = MockTransport::new();
    let store = Arc::new(MemoryStore::new());
    store.seed(
        DeviceCategory::JumpRope,
        PairedRecord {
            identifier: "rope-1".to_string(),
            display_name: Some("QN-Rope-01".to_string()),
            physical_address: None,
        },
    );
    let hub = Engine::spawn(
        mock.clone(),
        store.clone(),
        events,
        EngineConfig::default(),
    );

    hub.connect(DeviceCategory::JumpRope).await;
    settle().await;
    assert!(mock
        .issued()
        .contains(&IssuedCommand::StartScan { duplicates: true }));

    // Far below threshold, but explicitly targeted.
    mock.advertise("rope-1", "QN-Rope-01", -90).await;
    settle().await;
    assert!(mock.issued().contains(&IssuedCommand::Connect("rope-1".to_string())));

    // The record is not rewritten on reconnect.
    assert_eq!(
        store
            .load_all()
            .await
            .unwrap()
            .get(&DeviceCategory::JumpRope)
            .unwrap()
            .identifier,
        "rope-1"
    );
}

#[tokio::test]
async fn stop_pairing_is_idempotent() {
    let (hub, _mock, _store) = spawn_hub();

    hub.start_pairing(DeviceCategory::Oximeter).await;
    hub.stop_pairing().await;
    let first = hub.snapshot(DeviceCategory::Oximeter).await.unwrap();
    hub.stop_pairing().await;
    let second = hub.snapshot(DeviceCategory::Oximeter).await.unwrap();

    assert_eq!(first.status, second.status);
    assert!(!second.status.is_pairing);
}

#[tokio::test(start_paused = true)]
async fn thermometer_gets_query_on_characteristic_discovery() {
    let (hub, mock, _store) = spawn_hub();

    hub.start_pairing(DeviceCategory::Thermometer).await;
    settle().await;
    mock.advertise("therm-1", "AOJ-20A", -45).await;
    settle().await;
    mock.emit(TransportEvent::Connected {
        handle: "therm-1".to_string(),
    })
    .await;
    settle().await;
    mock.emit(TransportEvent::CharacteristicsDiscovered {
        handle: "therm-1".to_string(),
        service: vitals_hub::codec::thermometer::THERMOMETER_SERVICE_UUID,
        characteristics: vec![
            vitals_hub::codec::thermometer::THERMOMETER_NOTIFY_UUID,
            THERMOMETER_WRITE_UUID,
        ],
    })
    .await;
    settle().await;

    let writes = mock.writes();
    assert_eq!(
        writes,
        vec![IssuedCommand::WriteValue {
            handle: "therm-1".to_string(),
            characteristic: THERMOMETER_WRITE_UUID,
            value: QUERY_COMMAND.to_vec(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn rope_setup_queries_battery_then_parks_in_free_mode() {
    let (hub, mock, _store) = spawn_hub();
    connect_rope(&hub, &mock, "rope-1").await;

    let writes = mock.writes();
    assert_eq!(
        writes,
        vec![
            IssuedCommand::WriteValue {
                handle: "rope-1".to_string(),
                characteristic: ROPE_WRITE_UUID,
                value: vec![0xA4, 0x00, 0x00, 0x00, 0x00],
            },
            IssuedCommand::WriteValue {
                handle: "rope-1".to_string(),
                characteristic: ROPE_WRITE_UUID,
                value: set_mode_command(RopeMode::Free, 0),
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_goals_fail_before_any_write() {
    let (hub, mock, _store) = spawn_hub();
    connect_rope(&hub, &mock, "rope-1").await;
    mock.take_issued();

    assert_eq!(
        hub.start_jump_rope_recording(RopeGoal::Time(-1)).await,
        Err(RecordingError::InvalidTime)
    );
    assert_eq!(
        hub.start_jump_rope_recording(RopeGoal::Count(-1)).await,
        Err(RecordingError::InvalidCount)
    );
    assert!(mock.writes().is_empty(), "validation must precede writes");
}

#[tokio::test(start_paused = true)]
async fn recording_without_a_connected_rope_reports_not_connected() {
    let (hub, mock, _store) = spawn_hub();

    assert_eq!(
        hub.start_jump_rope_recording(RopeGoal::Free).await,
        Err(RecordingError::NotConnected)
    );
    assert!(mock.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rope_mode_is_sent_twice_with_a_settle_delay() {
    let (hub, mock, _store) = spawn_hub();
    connect_rope(&hub, &mock, "rope-1").await;
    mock.take_issued();

    hub.start_jump_rope_recording(RopeGoal::Time(60))
        .await
        .unwrap();

    let expected = IssuedCommand::WriteValue {
        handle: "rope-1".to_string(),
        characteristic: ROPE_WRITE_UUID,
        value: set_mode_command(RopeMode::Timed, 60),
    };
    assert_eq!(mock.writes(), vec![expected.clone(), expected]);

    let snapshot = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(snapshot.status.is_measuring);
}

#[tokio::test(start_paused = true)]
async fn sampler_appends_history_and_restart_clears_it() {
    let (hub, mock, _store) = spawn_hub();
    connect_rope(&hub, &mock, "rope-1").await;

    hub.start_jump_rope_recording(RopeGoal::Free).await.unwrap();
    report_count(&mock, "rope-1", 12).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    let first_len = hub
        .snapshot(DeviceCategory::JumpRope)
        .await
        .unwrap()
        .rope_history()
        .len();
    assert!(first_len >= 2, "sampler must append at 1 Hz, got {}", first_len);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    let longer_len = hub
        .snapshot(DeviceCategory::JumpRope)
        .await
        .unwrap()
        .rope_history()
        .len();
    assert!(longer_len >= first_len, "history is append-only while measuring");

    hub.stop_jump_rope_recording().await;
    settle().await;
    let stopped_len = hub
        .snapshot(DeviceCategory::JumpRope)
        .await
        .unwrap()
        .rope_history()
        .len();
    assert!(stopped_len >= longer_len, "stop must not clear history");

    // A new session starts from an empty sequence.
    hub.start_jump_rope_recording(RopeGoal::Free).await.unwrap();
    let restarted = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(restarted.rope_history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopping_the_rope_stops_heart_rate_recording() {
    let (hub, mock, _store) = spawn_hub();
    connect_rope(&hub, &mock, "rope-1").await;

    // Pair and connect a belt the same way.
    hub.start_pairing(DeviceCategory::HeartRateBelt).await;
    settle().await;
    mock.advertise("belt-1", "CL831-0042", -45).await;
    settle().await;
    mock.emit(TransportEvent::Connected {
        handle: "belt-1".to_string(),
    })
    .await;
    settle().await;

    hub.start_jump_rope_recording(RopeGoal::Free).await.unwrap();
    hub.start_heart_rate_recording().await;
    settle().await;
    let belt = hub.snapshot(DeviceCategory::HeartRateBelt).await.unwrap();
    assert!(belt.status.is_measuring);

    hub.stop_jump_rope_recording().await;
    settle().await;

    let rope = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    let belt = hub.snapshot(DeviceCategory::HeartRateBelt).await.unwrap();
    assert!(!rope.status.is_measuring);
    assert!(
        !belt.status.is_measuring,
        "rope stop must cascade to an in-progress belt session"
    );
    // The stop command itself still goes to the rope only.
    assert!(mock.writes().contains(&IssuedCommand::WriteValue {
        handle: "rope-1".to_string(),
        characteristic: ROPE_WRITE_UUID,
        value: vec![0xA2, 0x00, 0x00, 0x00, 0x00],
    }));
}

#[tokio::test]
async fn wildcard_claim_ends_pairing_for_every_category() {
    let (hub, mock, store) = spawn_hub();

    hub.start_pairing(DeviceCategory::AllDevices).await;
    settle().await;
    let thermometer = hub.snapshot(DeviceCategory::Thermometer).await.unwrap();
    assert!(thermometer.status.is_pairing);

    mock.advertise("rope-1", "QN-Rope-01", -50).await;
    settle().await;

    let rope = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(rope.status.is_paired);
    assert!(!rope.status.is_pairing);
    for category in [
        DeviceCategory::Thermometer,
        DeviceCategory::Oximeter,
        DeviceCategory::Sphygmometer,
        DeviceCategory::Scale,
        DeviceCategory::HeartRateBelt,
    ] {
        let snapshot = hub.snapshot(category).await.unwrap();
        assert!(
            !snapshot.status.is_pairing,
            "{:?} must not stay flagged after the wildcard scan ends",
            category
        );
    }
    assert!(store
        .load_all()
        .await
        .unwrap()
        .contains_key(&DeviceCategory::JumpRope));
}

#[tokio::test]
async fn rssi_threshold_change_applies_to_the_next_advertisement() {
    let (hub, mock, store) = spawn_hub();

    hub.start_pairing(DeviceCategory::JumpRope).await;
    settle().await;
    mock.advertise("rope-1", "QN-Rope-01", -70).await;
    settle().await;
    assert!(store.load_all().await.unwrap().is_empty());

    // Lowering the gate rescues the same device on its next advertisement.
    hub.set_rssi_threshold(-80).await;
    settle().await;
    mock.advertise("rope-1", "QN-Rope-01", -70).await;
    settle().await;

    let records = store.load_all().await.unwrap();
    assert_eq!(
        records.get(&DeviceCategory::JumpRope).unwrap().identifier,
        "rope-1"
    );
}

#[tokio::test(start_paused = true)]
async fn measurement_completed_pulse_resets_within_a_second() {
    let (hub, mock, _store) = spawn_hub();
    connect_rope(&hub, &mock, "rope-1").await;
    hub.start_jump_rope_recording(RopeGoal::Free).await.unwrap();

    hub.stop_jump_rope_recording().await;
    settle().await;
    let stopped = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(stopped.status.is_measurement_completed);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    let later = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(
        !later.status.is_measurement_completed,
        "completion is a pulse, not a latched flag"
    );
}

#[tokio::test(start_paused = true)]
async fn rope_disconnect_ends_the_recording_session() {
    let (hub, mock, _store) = spawn_hub();
    connect_rope(&hub, &mock, "rope-1").await;
    hub.start_jump_rope_recording(RopeGoal::Free).await.unwrap();

    mock.emit(TransportEvent::Disconnected {
        handle: "rope-1".to_string(),
    })
    .await;
    settle().await;

    let snapshot = hub.snapshot(DeviceCategory::JumpRope).await.unwrap();
    assert!(!snapshot.status.is_measuring);
    assert!(snapshot.status.is_disconnected);
    assert!(!snapshot.status.is_connected);
}
