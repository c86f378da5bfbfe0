//! Value types shared by the controller and platform adapters

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::advertisement;
use crate::beacon::{IBeacon, Proximity};

// ----------------------------------------------------------------------------
// Devices
// ----------------------------------------------------------------------------

/// Platform address of a remote device (MAC on Linux/Android, UUID on Apple)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Addresses compare case-insensitively since platforms disagree on hex case
    pub fn matches(&self, other: &DeviceAddress) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// One advertisement observed during a scan session
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    /// Address of the advertiser
    pub address: DeviceAddress,
    /// Name reported by the platform, if any
    pub name: Option<String>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Raw advertisement bytes (sequence of AD structures)
    pub advertisement: Vec<u8>,
    /// When the advertisement was observed
    pub seen_at: Instant,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<DeviceAddress>, rssi: i16, advertisement: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            name: None,
            rssi,
            advertisement,
            seen_at: Instant::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Platform name, falling back to the local name carried in the advertisement
    pub fn local_name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| advertisement::local_name(&self.advertisement))
    }

    /// Service UUIDs listed or carrying service data in the advertisement
    pub fn service_uuids(&self) -> Vec<Uuid> {
        let mut uuids = advertisement::service_uuids(&self.advertisement);
        for (uuid, _) in advertisement::service_data(&self.advertisement) {
            if !uuids.contains(&uuid) {
                uuids.push(uuid);
            }
        }
        uuids
    }

    /// The iBeacon record carried by this advertisement, if any
    pub fn ibeacon(&self) -> Option<IBeacon> {
        IBeacon::from_advertisement(&self.advertisement)
    }

    /// Ranging estimate; `Unknown` for non-beacon advertisements
    pub fn proximity(&self) -> Proximity {
        self.ibeacon()
            .map(|beacon| beacon.proximity(Some(self.rssi)))
            .unwrap_or(Proximity::Unknown)
    }
}

// ----------------------------------------------------------------------------
// Session Handles
// ----------------------------------------------------------------------------

/// Identifies one scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanHandle(u64);

impl ScanHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan#{}", self.0)
    }
}

/// Identifies one advertise session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvertiseHandle(u64);

impl AdvertiseHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AdvertiseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "advertise#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Radio Settings
// ----------------------------------------------------------------------------

/// Transmission power level for advertising
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

impl PowerLevel {
    /// Nominal transmit power in dBm
    pub fn dbm(self) -> i8 {
        match self {
            PowerLevel::UltraLow => -21,
            PowerLevel::Low => -15,
            PowerLevel::Medium => -7,
            PowerLevel::High => 1,
        }
    }
}

/// Duty cycle requested from the radio while scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Advertising interval class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

impl AdvertiseMode {
    /// Approximate advertising interval in milliseconds
    pub fn interval_ms(self) -> u32 {
        match self {
            AdvertiseMode::LowPower => 1000,
            AdvertiseMode::Balanced => 250,
            AdvertiseMode::LowLatency => 100,
        }
    }
}

/// Settings an adapter applies when it starts transmitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseSettings {
    pub power: PowerLevel,
    pub mode: AdvertiseMode,
    pub connectable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::AdvertisementBuilder;
    use crate::beacon::IBeacon;

    #[test]
    fn test_device_address_matches_ignoring_case() {
        let a = DeviceAddress::new("AA:BB:CC:DD:EE:FF");
        let b = DeviceAddress::from("aa:bb:cc:dd:ee:ff");
        assert!(a.matches(&b));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_discovered_device_decodes_beacon_and_name() {
        let region = Uuid::parse_str("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0").unwrap();
        let beacon = IBeacon::new(region, 1, 2, -60);
        let bytes = AdvertisementBuilder::new()
            .flags(0x06)
            .manufacturer_data(0x004C, &beacon.manufacturer_payload())
            .unwrap()
            .into_bytes();

        let device = DiscoveredDevice::new("11:22:33:44:55:66", -50, bytes);
        assert_eq!(device.ibeacon(), Some(beacon));
        assert_eq!(device.proximity(), Proximity::Immediate);
        assert_eq!(device.local_name(), None);

        let named = device.with_name("Tag");
        assert_eq!(named.local_name().as_deref(), Some("Tag"));
    }

    #[test]
    fn test_power_levels_are_ordered() {
        assert!(PowerLevel::UltraLow.dbm() < PowerLevel::Low.dbm());
        assert!(PowerLevel::Low.dbm() < PowerLevel::Medium.dbm());
        assert!(PowerLevel::Medium.dbm() < PowerLevel::High.dbm());
    }
}
