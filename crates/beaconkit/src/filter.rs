//! Scan filters

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::types::{DeviceAddress, DiscoveredDevice};

/// Filters attached to one scan session; empty matches every advertisement
pub type FilterSet = SmallVec<[ScanFilter; 2]>;

/// Criterion a discovered device must meet to be reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanFilter {
    /// Advertises the service UUID, in a UUID list or as service data
    ServiceUuid(Uuid),
    Address(DeviceAddress),
    /// Local name starts with the prefix
    NamePrefix(String),
    /// iBeacon in the region, optionally narrowed to a major/minor
    IBeacon {
        region: Uuid,
        major: Option<u16>,
        minor: Option<u16>,
    },
}

impl ScanFilter {
    /// Any beacon in `region`
    pub fn ibeacon_region(region: Uuid) -> Self {
        ScanFilter::IBeacon {
            region,
            major: None,
            minor: None,
        }
    }

    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        match self {
            ScanFilter::ServiceUuid(uuid) => device.service_uuids().contains(uuid),
            ScanFilter::Address(address) => device.address.matches(address),
            ScanFilter::NamePrefix(prefix) => device
                .local_name()
                .is_some_and(|name| name.starts_with(prefix.as_str())),
            ScanFilter::IBeacon {
                region,
                major,
                minor,
            } => device.ibeacon().is_some_and(|beacon| {
                beacon.region == *region
                    && major.map_or(true, |m| m == beacon.major)
                    && minor.map_or(true, |m| m == beacon.minor)
            }),
        }
    }
}

/// True when `filters` is empty or any filter matches
pub fn matches_any(filters: &[ScanFilter], device: &DiscoveredDevice) -> bool {
    filters.is_empty() || filters.iter().any(|filter| filter.matches(device))
}
