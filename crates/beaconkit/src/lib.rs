//! BLE role controller with iBeacon support
//!
//! This crate arbitrates a single Bluetooth Low Energy radio between the
//! central role (scanning) and the peripheral role (advertising), on top of a
//! platform adapter supplied by the application.
//!
//! ## Architecture
//!
//! - [`controller`] - The role controller task and its cloneable handle
//! - [`adapter`] - The platform adapter trait and its event sink
//! - [`advertisement`] - AD structure parsing, building and payload validation
//! - [`beacon`] - iBeacon framing and proximity estimation
//! - [`filter`] - Scan filters
//! - [`connection`] - Single-shot GATT connection sub-protocol
//! - [`events`] - Controller events and per-scan discovery streams
//! - [`config`] - Controller configuration
//! - [`mock`] - In-memory adapter for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use beaconkit::{
//!     AdvertisePayload, ControllerConfig, MockAdapter, PowerLevel, RoleController, ScanFilter,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = Arc::new(MockAdapter::new());
//! let controller = RoleController::spawn(adapter, ControllerConfig::new());
//!
//! // Scan for ten seconds; the scan stops by itself
//! let mut scan = controller.start_scan(Vec::<ScanFilter>::new(), Duration::from_secs(10)).await?;
//! while let Some(device) = scan.devices().next_device().await {
//!     println!("{} rssi={} {:?}", device.address, device.rssi, device.proximity());
//! }
//!
//! // Then become an iBeacon
//! let beacon = AdvertisePayload::ibeacon("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0", 1, 2, -60);
//! let handle = controller.start_advertise(beacon, PowerLevel::High, false).await?;
//! controller.stop_advertise(handle).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! With the `btleplug` feature, [`BtleplugAdapter`] drives the local
//! controller in the central role. btleplug has no peripheral mode, so that
//! adapter reports advertising as unsupported.

pub mod adapter;
pub mod advertisement;
pub mod beacon;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod events;
pub mod filter;
pub mod mock;
mod role;
mod types;

#[cfg(feature = "btleplug")]
mod platform;

// Public API exports
pub use adapter::{
    AdapterCapabilities, AdapterEvent, ConnectionHandle, EventSink, GattCharacteristic,
    GattService, LinkState, PlatformAdapter, SessionTag,
};
pub use advertisement::{AdvertisePayload, AdvertisementBuilder, AdvertisementData};
pub use beacon::{IBeacon, Proximity, IBEACON_LAYOUT};
pub use config::{ControllerConfig, DiscoveryPolicy};
pub use connection::{ConnectionState, ReadTarget};
pub use controller::RoleController;
pub use error::{AdapterError, CodecError, ControllerError, Result};
pub use events::{
    ActiveScan, AdvertiseState, ConnectionEvent, ControllerEvent, DiscoveryStream, ScanEndReason,
};
pub use filter::{FilterSet, ScanFilter};
pub use mock::{AdapterCall, MockAdapter};
pub use role::Role;
pub use types::{
    AdvertiseHandle, AdvertiseMode, AdvertiseSettings, DeviceAddress, DiscoveredDevice,
    PowerLevel, ScanHandle, ScanMode,
};

#[cfg(feature = "btleplug")]
pub use platform::BtleplugAdapter;
