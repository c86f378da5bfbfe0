//! Peripheral platform adapter boundary
//!
//! The adapter is the OS or radio driver that actually starts and stops scans
//! and advertisements. Everything it reports after a call has returned goes
//! through an [`EventSink`], which tags the event with the session that
//! created the sink. The controller uses that tag to drop events that arrive
//! after their session has ended, so adapters never need to track sessions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::advertisement::AdvertisementData;
use crate::error::AdapterError;
use crate::filter::ScanFilter;
use crate::types::{AdvertiseSettings, DeviceAddress, DiscoveredDevice, ScanMode};

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// Hardware properties of the radio behind an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    /// Peripheral-role advertising is available
    pub can_advertise: bool,
    /// Scanning and advertising may run at the same time
    pub concurrent_scan_and_advertise: bool,
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self {
            can_advertise: true,
            concurrent_scan_and_advertise: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Adapter Events
// ----------------------------------------------------------------------------

/// Session an [`EventSink`] was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionTag {
    Scan(u64),
    Advertise(u64),
    Connection(u64),
}

/// Physical link state reported for a GATT connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// A characteristic exposed by a remote GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub readable: bool,
}

/// A remote GATT service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Platform connection identifier returned by [`PlatformAdapter::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Asynchronous callback delivered by an adapter
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    DeviceFound(DiscoveredDevice),
    ScanFailed(AdapterError),
    AdvertiseStarted,
    AdvertiseFailed(AdapterError),
    LinkStateChanged(LinkState),
    ServicesDiscovered(Vec<GattService>),
    CharacteristicRead {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    GattFailed(AdapterError),
}

/// Callback channel handed to the adapter for one session
///
/// Cloneable and usable from any thread; events are serialized through the
/// controller's single task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tag: SessionTag,
    tx: mpsc::UnboundedSender<(SessionTag, AdapterEvent)>,
}

impl EventSink {
    pub(crate) fn new(
        tag: SessionTag,
        tx: mpsc::UnboundedSender<(SessionTag, AdapterEvent)>,
    ) -> Self {
        Self { tag, tx }
    }

    pub fn tag(&self) -> SessionTag {
        self.tag
    }

    /// Deliver an event; returns false once the controller has gone away
    pub fn emit(&self, event: AdapterEvent) -> bool {
        self.tx.send((self.tag, event)).is_ok()
    }
}

// ----------------------------------------------------------------------------
// Adapter Trait
// ----------------------------------------------------------------------------

/// The OS or radio driver the controller drives
///
/// Stop and disconnect operations must be idempotent and safe to call when
/// nothing is active.
#[async_trait]
pub trait PlatformAdapter: Send + Sync + 'static {
    fn capabilities(&self) -> AdapterCapabilities;

    /// Name broadcast when an advertisement includes the device name
    fn device_name(&self) -> Option<String> {
        None
    }

    /// Begin radio scanning, reporting results through `sink`
    async fn start_scan(
        &self,
        filters: &[ScanFilter],
        mode: ScanMode,
        sink: EventSink,
    ) -> Result<(), AdapterError>;

    async fn stop_scan(&self);

    /// Begin transmitting; the adapter frames `data` into advertisement bytes
    async fn start_advertise(
        &self,
        data: &AdvertisementData,
        settings: &AdvertiseSettings,
        sink: EventSink,
    ) -> Result<(), AdapterError>;

    async fn stop_advertise(&self);

    /// Open a GATT connection; link state changes are reported through `sink`
    async fn connect(
        &self,
        address: &DeviceAddress,
        sink: EventSink,
    ) -> Result<ConnectionHandle, AdapterError>;

    /// Request service discovery; results arrive as `ServicesDiscovered`
    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), AdapterError>;

    /// Request a characteristic read; the value arrives as `CharacteristicRead`
    async fn read_characteristic(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), AdapterError>;

    async fn disconnect(&self, connection: ConnectionHandle);

    /// Release radio resources held by the adapter
    async fn release(&self) {}
}
