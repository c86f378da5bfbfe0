//! In-memory platform adapter
//!
//! [`MockAdapter`] records every call the controller makes and lets a test
//! play the radio: inject discoveries, confirm or fail advertisements, and
//! answer the GATT sub-protocol from a scripted peripheral. Sinks handed to
//! the mock are kept after the session ends so tests can deliver late events.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::adapter::{
    AdapterCapabilities, AdapterEvent, ConnectionHandle, EventSink, GattService, LinkState,
    PlatformAdapter,
};
use crate::advertisement::AdvertisementData;
use crate::error::AdapterError;
use crate::filter::ScanFilter;
use crate::types::{AdvertiseSettings, DeviceAddress, DiscoveredDevice, ScanMode};

// ----------------------------------------------------------------------------
// Recorded Calls
// ----------------------------------------------------------------------------

/// One call made on the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    StartScan {
        filters: Vec<ScanFilter>,
        mode: ScanMode,
    },
    StopScan,
    StartAdvertise {
        data: AdvertisementData,
        settings: AdvertiseSettings,
    },
    StopAdvertise,
    Connect(DeviceAddress),
    DiscoverServices(ConnectionHandle),
    ReadCharacteristic {
        service: Uuid,
        characteristic: Uuid,
    },
    Disconnect(ConnectionHandle),
    Release,
}

/// Remote device answering the connection sub-protocol
#[derive(Debug, Clone, Default)]
struct Peripheral {
    services: Vec<GattService>,
    values: HashMap<Uuid, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<AdapterCall>,
    scan_sink: Option<EventSink>,
    advertise_sink: Option<EventSink>,
    connection_sink: Option<EventSink>,
    fail_scan: Option<AdapterError>,
    fail_advertise: Option<AdapterError>,
    fail_connect: Option<AdapterError>,
    peripheral: Option<Peripheral>,
    next_connection: u64,
}

// ----------------------------------------------------------------------------
// Mock Adapter
// ----------------------------------------------------------------------------

/// Deterministic adapter for tests and demos
#[derive(Debug, Default)]
pub struct MockAdapter {
    capabilities: AdapterCapabilities,
    device_name: Option<String>,
    state: Mutex<MockState>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(mut self, capabilities: AdapterCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Name reported to the controller for advertisements that include it
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Answer connects with `services` and reads with the matching entry of
    /// `values` (keyed by characteristic UUID)
    pub fn with_peripheral(
        self,
        services: Vec<GattService>,
        values: impl IntoIterator<Item = (Uuid, Vec<u8>)>,
    ) -> Self {
        self.lock().peripheral = Some(Peripheral {
            services,
            values: values.into_iter().collect(),
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn fail_next_scan(&self, error: AdapterError) {
        self.lock().fail_scan = Some(error);
    }

    pub fn fail_next_advertise(&self, error: AdapterError) {
        self.lock().fail_advertise = Some(error);
    }

    pub fn fail_next_connect(&self, error: AdapterError) {
        self.lock().fail_connect = Some(error);
    }

    // ------------------------------------------------------------------------
    // Radio Simulation
    // ------------------------------------------------------------------------

    /// Deliver a discovery through the most recent scan sink
    pub fn emit_device(&self, device: DiscoveredDevice) -> bool {
        self.emit_scan(AdapterEvent::DeviceFound(device))
    }

    pub fn emit_scan_failed(&self, error: AdapterError) -> bool {
        self.emit_scan(AdapterEvent::ScanFailed(error))
    }

    pub fn emit_advertise_started(&self) -> bool {
        self.emit_advertise(AdapterEvent::AdvertiseStarted)
    }

    pub fn emit_advertise_failed(&self, error: AdapterError) -> bool {
        self.emit_advertise(AdapterEvent::AdvertiseFailed(error))
    }

    /// Sink of the most recent scan session
    pub fn scan_sink(&self) -> Option<EventSink> {
        self.lock().scan_sink.clone()
    }

    /// Sink of the most recent connection attempt
    pub fn connection_sink(&self) -> Option<EventSink> {
        self.lock().connection_sink.clone()
    }

    fn emit_scan(&self, event: AdapterEvent) -> bool {
        let sink = self.lock().scan_sink.clone();
        sink.is_some_and(|sink| sink.emit(event))
    }

    fn emit_advertise(&self, event: AdapterEvent) -> bool {
        let sink = self.lock().advertise_sink.clone();
        sink.is_some_and(|sink| sink.emit(event))
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    fn device_name(&self) -> Option<String> {
        self.device_name.clone()
    }

    async fn start_scan(
        &self,
        filters: &[ScanFilter],
        mode: ScanMode,
        sink: EventSink,
    ) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.calls.push(AdapterCall::StartScan {
            filters: filters.to_vec(),
            mode,
        });
        if let Some(error) = state.fail_scan.take() {
            return Err(error);
        }
        state.scan_sink = Some(sink);
        Ok(())
    }

    async fn stop_scan(&self) {
        self.lock().calls.push(AdapterCall::StopScan);
    }

    async fn start_advertise(
        &self,
        data: &AdvertisementData,
        settings: &AdvertiseSettings,
        sink: EventSink,
    ) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.calls.push(AdapterCall::StartAdvertise {
            data: data.clone(),
            settings: *settings,
        });
        if !self.capabilities.can_advertise {
            return Err(AdapterError::AdvertiseUnsupported);
        }
        if let Some(error) = state.fail_advertise.take() {
            return Err(error);
        }
        state.advertise_sink = Some(sink);
        Ok(())
    }

    async fn stop_advertise(&self) {
        self.lock().calls.push(AdapterCall::StopAdvertise);
    }

    async fn connect(
        &self,
        address: &DeviceAddress,
        sink: EventSink,
    ) -> Result<ConnectionHandle, AdapterError> {
        let mut state = self.lock();
        state.calls.push(AdapterCall::Connect(address.clone()));
        if let Some(error) = state.fail_connect.take() {
            return Err(error);
        }

        state.next_connection += 1;
        let handle = ConnectionHandle(state.next_connection);
        if state.peripheral.is_some() {
            sink.emit(AdapterEvent::LinkStateChanged(LinkState::Connected));
        }
        state.connection_sink = Some(sink);
        Ok(handle)
    }

    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.calls.push(AdapterCall::DiscoverServices(connection));
        if let (Some(peripheral), Some(sink)) = (&state.peripheral, &state.connection_sink) {
            sink.emit(AdapterEvent::ServicesDiscovered(peripheral.services.clone()));
        }
        Ok(())
    }

    async fn read_characteristic(
        &self,
        _connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), AdapterError> {
        let mut state = self.lock();
        state.calls.push(AdapterCall::ReadCharacteristic {
            service,
            characteristic,
        });
        let value = state
            .peripheral
            .as_ref()
            .and_then(|p| p.values.get(&characteristic).cloned());
        match (value, &state.connection_sink) {
            (Some(value), Some(sink)) => {
                sink.emit(AdapterEvent::CharacteristicRead {
                    service,
                    characteristic,
                    value,
                });
                Ok(())
            }
            (None, _) if state.peripheral.is_some() => Err(AdapterError::Platform(format!(
                "characteristic {} not readable",
                characteristic
            ))),
            _ => Ok(()),
        }
    }

    async fn disconnect(&self, connection: ConnectionHandle) {
        self.lock().calls.push(AdapterCall::Disconnect(connection));
    }

    async fn release(&self) {
        self.lock().calls.push(AdapterCall::Release);
    }
}
