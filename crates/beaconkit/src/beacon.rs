//! iBeacon record codec and ranging
//!
//! An iBeacon is Apple manufacturer-specific data with the layout
//! `m:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24`, counted from the start of the
//! manufacturer data (company identifier included):
//!
//! | bytes | content                         |
//! |-------|---------------------------------|
//! | 0-1   | company id `0x004C`, little end |
//! | 2-3   | `0x02 0x15` beacon type, length |
//! | 4-19  | proximity (region) UUID         |
//! | 20-21 | major, big endian               |
//! | 22-23 | minor, big endian               |
//! | 24    | measured power at 1 m, signed   |

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advertisement;
use crate::error::CodecError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Apple, Inc. Bluetooth SIG company identifier
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Beacon type byte
pub const IBEACON_TYPE: u8 = 0x02;

/// Remaining length after the type and length bytes
pub const IBEACON_DATA_LEN: u8 = 0x15;

/// Manufacturer payload length, excluding the company identifier
pub const IBEACON_PAYLOAD_LEN: usize = 23;

/// Beacon layout string understood by common beacon libraries
pub const IBEACON_LAYOUT: &str = "m:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24";

/// Path-loss exponent used for distance estimates (free space)
const PATH_LOSS_EXPONENT: f64 = 2.0;

// ----------------------------------------------------------------------------
// iBeacon
// ----------------------------------------------------------------------------

/// An iBeacon advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IBeacon {
    /// Proximity UUID identifying the beacon region
    pub region: Uuid,
    pub major: u16,
    pub minor: u16,
    /// Calibrated RSSI at one metre, in dBm
    pub measured_power: i8,
}

impl IBeacon {
    pub fn new(region: Uuid, major: u16, minor: u16, measured_power: i8) -> Self {
        Self {
            region,
            major,
            minor,
            measured_power,
        }
    }

    /// Manufacturer payload following the company identifier
    pub fn manufacturer_payload(&self) -> [u8; IBEACON_PAYLOAD_LEN] {
        let mut out = [0u8; IBEACON_PAYLOAD_LEN];
        out[0] = IBEACON_TYPE;
        out[1] = IBEACON_DATA_LEN;
        out[2..18].copy_from_slice(self.region.as_bytes());
        out[18..20].copy_from_slice(&self.major.to_be_bytes());
        out[20..22].copy_from_slice(&self.minor.to_be_bytes());
        out[22] = self.measured_power as u8;
        out
    }

    /// Full manufacturer data, company identifier included
    pub fn manufacturer_data(&self) -> Vec<u8> {
        let mut out = APPLE_COMPANY_ID.to_le_bytes().to_vec();
        out.extend_from_slice(&self.manufacturer_payload());
        out
    }

    /// Decode from a manufacturer data entry
    pub fn from_manufacturer_data(company_id: u16, payload: &[u8]) -> Result<Self, CodecError> {
        if company_id != APPLE_COMPANY_ID {
            return Err(CodecError::UnexpectedCompany(company_id));
        }
        if payload.len() < 2 || payload[0] != IBEACON_TYPE || payload[1] != IBEACON_DATA_LEN {
            return Err(CodecError::NotIBeacon);
        }
        if payload.len() < IBEACON_PAYLOAD_LEN {
            return Err(CodecError::Truncated {
                expected: IBEACON_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let mut region = [0u8; 16];
        region.copy_from_slice(&payload[2..18]);
        Ok(Self {
            region: Uuid::from_bytes(region),
            major: u16::from_be_bytes([payload[18], payload[19]]),
            minor: u16::from_be_bytes([payload[20], payload[21]]),
            measured_power: payload[22] as i8,
        })
    }

    /// First iBeacon record found in raw advertisement bytes
    pub fn from_advertisement(bytes: &[u8]) -> Option<Self> {
        advertisement::manufacturer_data(bytes)
            .find_map(|(company, data)| Self::from_manufacturer_data(company, data).ok())
    }

    pub fn proximity(&self, rssi: Option<i16>) -> Proximity {
        Proximity::estimate(rssi, self.measured_power)
    }
}

// ----------------------------------------------------------------------------
// Ranging
// ----------------------------------------------------------------------------

/// Coarse distance class of a ranged beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Proximity {
    /// Under half a metre
    Immediate,
    /// Under four metres
    Near,
    Far,
    /// No usable signal reading
    Unknown,
}

impl Proximity {
    pub fn estimate(rssi: Option<i16>, measured_power: i8) -> Self {
        match rssi.and_then(|rssi| estimate_distance(rssi, measured_power)) {
            None => Proximity::Unknown,
            Some(d) if d < 0.5 => Proximity::Immediate,
            Some(d) if d < 4.0 => Proximity::Near,
            Some(_) => Proximity::Far,
        }
    }
}

/// Log-distance path-loss estimate in metres
///
/// Returns `None` for an RSSI of zero, which platforms report when the reading
/// is unavailable.
pub fn estimate_distance(rssi: i16, measured_power: i8) -> Option<f64> {
    if rssi == 0 {
        return None;
    }
    let exponent = (measured_power as f64 - rssi as f64) / (10.0 * PATH_LOSS_EXPONENT);
    Some(10f64.powf(exponent))
}
