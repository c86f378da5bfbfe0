//! Shared helpers for controller integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use beaconkit::advertisement::uuid_from_u16;
use beaconkit::beacon::APPLE_COMPANY_ID;
use beaconkit::{
    AdvertisementBuilder, ControllerConfig, ControllerEvent, DiscoveredDevice, IBeacon,
    MockAdapter, RoleController,
};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const REGION: &str = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn region() -> Uuid {
    Uuid::parse_str(REGION).unwrap()
}

/// Controller over a fresh mock adapter
pub fn controller(config: ControllerConfig) -> (RoleController, Arc<MockAdapter>) {
    controller_with(MockAdapter::new(), config)
}

pub fn controller_with(
    adapter: MockAdapter,
    config: ControllerConfig,
) -> (RoleController, Arc<MockAdapter>) {
    init_tracing();
    let adapter = Arc::new(adapter);
    let controller = RoleController::spawn(adapter.clone(), config);
    (controller, adapter)
}

/// Let the controller task drain everything queued so far
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn named_device(address: &str, name: &str, rssi: i16) -> DiscoveredDevice {
    let bytes = AdvertisementBuilder::new()
        .local_name(name)
        .unwrap()
        .into_bytes();
    DiscoveredDevice::new(address, rssi, bytes).with_name(name)
}

pub fn service_device(address: &str, service: u16, rssi: i16) -> DiscoveredDevice {
    let bytes = AdvertisementBuilder::new()
        .service_uuid(&uuid_from_u16(service))
        .unwrap()
        .into_bytes();
    DiscoveredDevice::new(address, rssi, bytes)
}

pub fn beacon_device(address: &str, major: u16, minor: u16, rssi: i16) -> DiscoveredDevice {
    let beacon = IBeacon::new(region(), major, minor, -59);
    let bytes = AdvertisementBuilder::new()
        .manufacturer_data(APPLE_COMPANY_ID, &beacon.manufacturer_payload())
        .unwrap()
        .into_bytes();
    DiscoveredDevice::new(address, rssi, bytes)
}

/// Every event currently buffered on `events`
pub fn drain(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
