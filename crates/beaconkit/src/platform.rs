//! btleplug-backed platform adapter
//!
//! Central role only: scanning and the GATT connection sub-protocol run on
//! btleplug, while advertising reports [`AdapterError::AdvertiseUnsupported`].
//! btleplug hands out parsed advertisement fields rather than raw bytes, so
//! discoveries carry an advertisement re-framed from those fields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter as PlatformScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{
    AdapterCapabilities, AdapterEvent, ConnectionHandle, EventSink, GattCharacteristic,
    GattService, LinkState, PlatformAdapter,
};
use crate::advertisement::{AdvertisementBuilder, AdvertisementData};
use crate::error::{AdapterError, CodecError};
use crate::filter::ScanFilter;
use crate::types::{AdvertiseSettings, DeviceAddress, DiscoveredDevice, ScanMode};

fn map_error(error: btleplug::Error) -> AdapterError {
    match error {
        btleplug::Error::PermissionDenied => AdapterError::PermissionDenied,
        btleplug::Error::TimedOut(_) => AdapterError::Timeout,
        other => AdapterError::Platform(other.to_string()),
    }
}

/// Adapter driving the first local Bluetooth controller through btleplug
pub struct BtleplugAdapter {
    adapter: Adapter,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    connections: Mutex<HashMap<u64, (Peripheral, EventSink)>>,
    next_connection: AtomicU64,
}

impl BtleplugAdapter {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_task: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Use the first adapter the platform reports
    pub async fn first_available() -> Result<Self, AdapterError> {
        let manager = Manager::new().await.map_err(map_error)?;
        let adapters = manager.adapters().await.map_err(map_error)?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(AdapterError::RadioUnavailable)?;
        info!("Using BLE adapter {:?}", adapter.adapter_info().await.ok());
        Ok(Self::new(adapter))
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Peripheral, AdapterError> {
        let peripherals = self.adapter.peripherals().await.map_err(map_error)?;
        peripherals
            .into_iter()
            .find(|p| DeviceAddress::new(p.address().to_string()).matches(address))
            .ok_or_else(|| AdapterError::Platform(format!("unknown peripheral {}", address)))
    }

    async fn connection(
        &self,
        handle: ConnectionHandle,
    ) -> Result<(Peripheral, EventSink), AdapterError> {
        self.connections
            .lock()
            .await
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| AdapterError::Platform(format!("unknown connection {}", handle.0)))
    }
}

/// Re-frame parsed advertisement fields as AD structures
fn advertisement_bytes(properties: &PeripheralProperties) -> Result<Vec<u8>, CodecError> {
    let mut builder = AdvertisementBuilder::new();
    if let Some(name) = &properties.local_name {
        builder = builder.local_name(name)?;
    }
    for uuid in &properties.services {
        builder = builder.service_uuid(uuid)?;
    }
    for (uuid, data) in &properties.service_data {
        builder = builder.service_data(uuid, data)?;
    }
    for (company_id, data) in &properties.manufacturer_data {
        builder = builder.manufacturer_data(*company_id, data)?;
    }
    if let Some(power) = properties.tx_power_level {
        builder = builder.tx_power_level(power.clamp(i8::MIN as i16, i8::MAX as i16) as i8)?;
    }
    Ok(builder.into_bytes())
}

fn discovered_device(properties: &PeripheralProperties) -> DiscoveredDevice {
    let advertisement = advertisement_bytes(properties).unwrap_or_else(|e| {
        debug!("Dropping oversized advertisement fields: {}", e);
        Vec::new()
    });
    let device = DiscoveredDevice::new(
        properties.address.to_string(),
        properties.rssi.unwrap_or(0),
        advertisement,
    );
    match &properties.local_name {
        Some(name) => device.with_name(name.clone()),
        None => device,
    }
}

#[async_trait]
impl PlatformAdapter for BtleplugAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            can_advertise: false,
            concurrent_scan_and_advertise: false,
        }
    }

    async fn start_scan(
        &self,
        filters: &[ScanFilter],
        mode: ScanMode,
        sink: EventSink,
    ) -> Result<(), AdapterError> {
        // Only service filters can be pushed down; the controller applies the rest
        let services = filters
            .iter()
            .filter_map(|f| match f {
                ScanFilter::ServiceUuid(uuid) => Some(*uuid),
                _ => None,
            })
            .collect::<Vec<_>>();
        let pushed_down = if services.len() == filters.len() {
            services
        } else {
            Vec::new()
        };

        let mut events = self.adapter.events().await.map_err(map_error)?;
        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                if let Ok(Some(properties)) = peripheral.properties().await {
                    if !sink.emit(AdapterEvent::DeviceFound(discovered_device(&properties))) {
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        debug!("Starting btleplug scan ({:?})", mode);
        self.adapter
            .start_scan(PlatformScanFilter {
                services: pushed_down,
            })
            .await
            .map_err(map_error)
    }

    async fn stop_scan(&self) {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Stopping btleplug scan failed: {}", e);
        }
    }

    async fn start_advertise(
        &self,
        _data: &AdvertisementData,
        _settings: &AdvertiseSettings,
        _sink: EventSink,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::AdvertiseUnsupported)
    }

    async fn stop_advertise(&self) {}

    async fn connect(
        &self,
        address: &DeviceAddress,
        sink: EventSink,
    ) -> Result<ConnectionHandle, AdapterError> {
        let peripheral = self.find_peripheral(address).await?;
        let handle = ConnectionHandle(self.next_connection.fetch_add(1, Ordering::Relaxed));
        self.connections
            .lock()
            .await
            .insert(handle.0, (peripheral.clone(), sink.clone()));

        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => sink.emit(AdapterEvent::LinkStateChanged(LinkState::Connected)),
                Err(e) => sink.emit(AdapterEvent::GattFailed(map_error(e))),
            };
        });
        Ok(handle)
    }

    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), AdapterError> {
        let (peripheral, sink) = self.connection(connection).await?;
        tokio::spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                sink.emit(AdapterEvent::GattFailed(map_error(e)));
                return;
            }
            let services = peripheral
                .services()
                .into_iter()
                .map(|service| GattService {
                    uuid: service.uuid,
                    characteristics: service
                        .characteristics
                        .iter()
                        .map(|c| GattCharacteristic {
                            uuid: c.uuid,
                            readable: c.properties.contains(CharPropFlags::READ),
                        })
                        .collect(),
                })
                .collect();
            sink.emit(AdapterEvent::ServicesDiscovered(services));
        });
        Ok(())
    }

    async fn read_characteristic(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), AdapterError> {
        let (peripheral, sink) = self.connection(connection).await?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| {
                AdapterError::Platform(format!("characteristic {} not found", characteristic))
            })?;

        tokio::spawn(async move {
            match peripheral.read(&target).await {
                Ok(value) => sink.emit(AdapterEvent::CharacteristicRead {
                    service,
                    characteristic,
                    value,
                }),
                Err(e) => sink.emit(AdapterEvent::GattFailed(map_error(e))),
            };
        });
        Ok(())
    }

    async fn disconnect(&self, connection: ConnectionHandle) {
        let Some((peripheral, _)) = self.connections.lock().await.remove(&connection.0) else {
            return;
        };
        if let Err(e) = peripheral.disconnect().await {
            warn!("Failed to disconnect {}: {}", peripheral.address(), e);
        }
    }

    async fn release(&self) {
        self.stop_scan().await;
        let connections: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, (peripheral, _)) in connections {
            let _ = peripheral.disconnect().await;
        }
    }
}
