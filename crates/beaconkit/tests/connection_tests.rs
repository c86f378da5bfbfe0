//! GATT connection sub-protocol tests

mod common;

use std::time::Duration;

use beaconkit::advertisement::uuid_from_u16;
use beaconkit::{
    AdapterCall, AdapterError, AdapterEvent, ConnectionEvent, ConnectionHandle, ConnectionState,
    ControllerConfig, ControllerError, ControllerEvent, DeviceAddress, DiscoveryPolicy,
    GattCharacteristic, GattService, LinkState, MockAdapter, ReadTarget, Role, ScanEndReason,
};
use common::*;

const PEER: &str = "C0:FF:EE:00:00:01";

fn service(short: u16, characteristics: &[(u16, bool)]) -> GattService {
    GattService {
        uuid: uuid_from_u16(short),
        characteristics: characteristics
            .iter()
            .map(|&(uuid, readable)| GattCharacteristic {
                uuid: uuid_from_u16(uuid),
                readable,
            })
            .collect(),
    }
}

/// Peripheral exposing Generic Access plus a Battery service at 87%
fn battery_peripheral() -> MockAdapter {
    MockAdapter::new().with_peripheral(
        vec![
            service(0x1800, &[(0x2A00, true)]),
            service(0x180F, &[(0x2A19, true)]),
        ],
        [
            (uuid_from_u16(0x2A00), b"Sensor".to_vec()),
            (uuid_from_u16(0x2A19), vec![87]),
        ],
    )
}

fn connection_events(events: Vec<ControllerEvent>) -> Vec<ConnectionEvent> {
    events
        .into_iter()
        .filter_map(|e| match e {
            ControllerEvent::Connection(event) => Some(event),
            _ => None,
        })
        .collect()
}

fn state(state: ConnectionState) -> ConnectionEvent {
    ConnectionEvent::StateChanged {
        address: DeviceAddress::new(PEER),
        state,
    }
}

// ----------------------------------------------------------------------------
// Successful Reads
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_first_policy_reads_then_disconnects() {
    let config = ControllerConfig::new().with_discovery_policy(DiscoveryPolicy::ConnectFirst);
    let (controller, adapter) = controller_with(battery_peripheral(), config);
    let mut events = controller.subscribe();

    let mut scan = controller
        .start_scan(vec![], Duration::from_secs(10))
        .await
        .unwrap();
    adapter.emit_device(named_device(PEER, "Sensor", -48));
    adapter.emit_device(named_device("C0:FF:EE:00:00:02", "Other", -60));
    settle().await;

    assert_eq!(controller.role(), Role::Idle);
    assert_eq!(
        scan.devices().next_device().await.map(|d| d.address),
        Some(DeviceAddress::new(PEER))
    );
    assert!(scan.devices().next_device().await.is_none());

    let handle = ConnectionHandle(1);
    assert_eq!(
        adapter.calls()[1..],
        [
            AdapterCall::StopScan,
            AdapterCall::Connect(DeviceAddress::new(PEER)),
            AdapterCall::DiscoverServices(handle),
            AdapterCall::ReadCharacteristic {
                service: uuid_from_u16(0x180F),
                characteristic: uuid_from_u16(0x2A19),
            },
            AdapterCall::Disconnect(handle),
        ]
    );

    let events = drain(&mut events);
    assert!(events.contains(&ControllerEvent::ScanEnded {
        handle: scan.handle(),
        reason: ScanEndReason::FirstMatch,
    }));
    assert_eq!(
        connection_events(events),
        vec![
            state(ConnectionState::Connecting),
            state(ConnectionState::Connected),
            state(ConnectionState::ServiceDiscovery),
            state(ConnectionState::CharacteristicRead),
            ConnectionEvent::CharacteristicRead {
                address: DeviceAddress::new(PEER),
                service: uuid_from_u16(0x180F),
                characteristic: uuid_from_u16(0x2A19),
                value: vec![87],
            },
            state(ConnectionState::Disconnected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_with_specific_target() {
    let config = ControllerConfig::new().with_read_target(ReadTarget::Characteristic {
        service: uuid_from_u16(0x1800),
        characteristic: uuid_from_u16(0x2A00),
    });
    let (controller, adapter) = controller_with(battery_peripheral(), config);
    let mut events = controller.subscribe();

    controller.connect(PEER).await.unwrap();
    settle().await;

    let read = connection_events(drain(&mut events))
        .into_iter()
        .find_map(|e| match e {
            ConnectionEvent::CharacteristicRead { value, .. } => Some(value),
            _ => None,
        });
    assert_eq!(read, Some(b"Sensor".to_vec()));
    assert_eq!(
        adapter.calls().last(),
        Some(&AdapterCall::Disconnect(ConnectionHandle(1)))
    );

    // The slot is free again once the read completes
    controller.connect(PEER).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_continuous_policy_does_not_connect() {
    let (controller, adapter) = controller_with(battery_peripheral(), ControllerConfig::new());
    let _scan = controller
        .start_scan(vec![], Duration::from_secs(10))
        .await
        .unwrap();
    adapter.emit_device(named_device(PEER, "Sensor", -48));
    settle().await;

    assert_eq!(controller.role(), Role::Scanning);
    assert!(!adapter
        .calls()
        .iter()
        .any(|c| matches!(c, AdapterCall::Connect(_))));
}

// ----------------------------------------------------------------------------
// Failures
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_second_connect_rejected_while_in_progress() {
    let (controller, _adapter) = controller(ControllerConfig::new());

    controller.connect(PEER).await.unwrap();
    let result = controller.connect("C0:FF:EE:00:00:02").await;
    assert_eq!(result, Err(ControllerError::ConnectionInProgress));
}

#[tokio::test(start_paused = true)]
async fn test_connection_times_out() {
    let config = ControllerConfig::new().with_connection_timeout(Duration::from_secs(5));
    let (controller, adapter) = controller(config);
    let mut events = controller.subscribe();

    controller.connect(PEER).await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    settle().await;
    assert_eq!(
        connection_events(drain(&mut events)),
        vec![state(ConnectionState::Connecting)]
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(
        connection_events(drain(&mut events)),
        vec![
            ConnectionEvent::Failed {
                address: DeviceAddress::new(PEER),
                error: AdapterError::Timeout,
            },
            state(ConnectionState::Disconnected),
        ]
    );
    assert_eq!(
        adapter.calls().last(),
        Some(&AdapterCall::Disconnect(ConnectionHandle(1)))
    );

    controller.connect(PEER).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_link_event_queued_at_deadline_does_not_revive_attempt() {
    let config = ControllerConfig::new().with_connection_timeout(Duration::from_secs(5));
    let (controller, adapter) = controller(config);
    let mut events = controller.subscribe();

    controller.connect(PEER).await.unwrap();
    let start = tokio::time::Instant::now();
    let sink = adapter.connection_sink().unwrap();

    tokio::time::sleep_until(start + Duration::from_secs(5)).await;
    sink.emit(AdapterEvent::LinkStateChanged(LinkState::Connected));
    settle().await;

    assert!(!adapter
        .calls()
        .iter()
        .any(|c| matches!(c, AdapterCall::DiscoverServices(_))));
    assert_eq!(
        connection_events(drain(&mut events)),
        vec![
            state(ConnectionState::Connecting),
            ConnectionEvent::Failed {
                address: DeviceAddress::new(PEER),
                error: AdapterError::Timeout,
            },
            state(ConnectionState::Disconnected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_reported() {
    let (controller, adapter) = controller(ControllerConfig::new());
    let mut events = controller.subscribe();
    adapter.fail_next_connect(AdapterError::Platform("peer not found".into()));

    let result = controller.connect(PEER).await;
    assert_eq!(
        result,
        Err(ControllerError::Adapter(AdapterError::Platform(
            "peer not found".into()
        )))
    );
    assert_eq!(
        connection_events(drain(&mut events)),
        vec![
            state(ConnectionState::Connecting),
            ConnectionEvent::Failed {
                address: DeviceAddress::new(PEER),
                error: AdapterError::Platform("peer not found".into()),
            },
            state(ConnectionState::Disconnected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_fails_attempt_and_ignores_late_gatt_results() {
    let (controller, adapter) = controller(ControllerConfig::new());
    let mut events = controller.subscribe();

    controller.connect(PEER).await.unwrap();
    let sink = adapter.connection_sink().unwrap();
    sink.emit(AdapterEvent::LinkStateChanged(LinkState::Connected));
    settle().await;
    assert!(adapter
        .calls()
        .contains(&AdapterCall::DiscoverServices(ConnectionHandle(1))));

    sink.emit(AdapterEvent::LinkStateChanged(LinkState::Disconnected));
    sink.emit(AdapterEvent::ServicesDiscovered(vec![service(
        0x180F,
        &[(0x2A19, true)],
    )]));
    settle().await;

    assert!(!adapter
        .calls()
        .iter()
        .any(|c| matches!(c, AdapterCall::ReadCharacteristic { .. })));
    let events = connection_events(drain(&mut events));
    assert!(matches!(
        events.as_slice(),
        [
            ConnectionEvent::StateChanged { state: ConnectionState::Connecting, .. },
            ConnectionEvent::StateChanged { state: ConnectionState::Connected, .. },
            ConnectionEvent::StateChanged { state: ConnectionState::ServiceDiscovery, .. },
            ConnectionEvent::Failed { .. },
            ConnectionEvent::StateChanged { state: ConnectionState::Disconnected, .. },
        ]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_no_readable_characteristic_fails_attempt() {
    let adapter = MockAdapter::new().with_peripheral(
        vec![service(0x180D, &[(0x2A37, false)])],
        std::iter::empty(),
    );
    let (controller, adapter) = controller_with(adapter, ControllerConfig::new());
    let mut events = controller.subscribe();

    controller.connect(PEER).await.unwrap();
    settle().await;

    let failed = connection_events(drain(&mut events))
        .into_iter()
        .any(|e| matches!(e, ConnectionEvent::Failed { .. }));
    assert!(failed);
    assert_eq!(
        adapter.calls().last(),
        Some(&AdapterCall::Disconnect(ConnectionHandle(1)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_connection_and_its_timer() {
    let (controller, adapter) = controller(ControllerConfig::new());
    let mut events = controller.subscribe();

    controller.connect(PEER).await.unwrap();
    controller.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;

    assert_eq!(
        connection_events(drain(&mut events)),
        vec![
            state(ConnectionState::Connecting),
            state(ConnectionState::Disconnected),
        ]
    );
    assert_eq!(
        adapter.calls(),
        vec![
            AdapterCall::Connect(DeviceAddress::new(PEER)),
            AdapterCall::Disconnect(ConnectionHandle(1)),
            AdapterCall::Release,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_task_exits_when_handles_dropped() {
    let (controller, adapter) = controller(ControllerConfig::new());
    let watcher = controller.watch_role();
    drop(controller);
    settle().await;

    assert!(watcher.has_changed().is_err());
    assert_eq!(adapter.calls(), vec![AdapterCall::Release]);
}
