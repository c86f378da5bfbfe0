//! Advertising record structures
//!
//! A legacy advertisement is at most 31 bytes made of AD structures, each laid
//! out as `[length, type, data..]` where `length` counts the type byte plus the
//! data. This module parses received advertisements, builds outgoing ones and
//! validates caller-supplied advertise payloads before they reach an adapter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::beacon::{IBeacon, APPLE_COMPANY_ID};
use crate::error::{CodecError, ControllerError};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum size of a legacy advertising payload
pub const LEGACY_ADVERTISEMENT_LEN: usize = 31;

/// LE General Discoverable, BR/EDR not supported
pub const DEFAULT_FLAGS: u8 = 0x06;

/// AD type identifiers from the Bluetooth assigned numbers
pub mod ad_type {
    pub const FLAGS: u8 = 0x01;
    pub const INCOMPLETE_SERVICE_UUIDS_16: u8 = 0x02;
    pub const COMPLETE_SERVICE_UUIDS_16: u8 = 0x03;
    pub const INCOMPLETE_SERVICE_UUIDS_128: u8 = 0x06;
    pub const COMPLETE_SERVICE_UUIDS_128: u8 = 0x07;
    pub const SHORTENED_LOCAL_NAME: u8 = 0x08;
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    pub const TX_POWER_LEVEL: u8 = 0x0A;
    pub const SERVICE_DATA_16: u8 = 0x16;
    pub const SERVICE_DATA_128: u8 = 0x21;
    pub const MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;
}

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MAX_STRUCTURE_DATA: usize = 254;

/// Expand a 16-bit assigned number into a full UUID
pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// The 16-bit form of `uuid` if it lies on the Bluetooth base UUID
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !(0xFFFF_u128 << 96) == BLUETOOTH_BASE_UUID {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

fn uuid_from_le_slice(bytes: &[u8]) -> Option<Uuid> {
    let mut raw: [u8; 16] = bytes.try_into().ok()?;
    raw.reverse();
    Some(Uuid::from_bytes(raw))
}

// ----------------------------------------------------------------------------
// Parsing
// ----------------------------------------------------------------------------

/// A single AD structure borrowed from an advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over the AD structures of a raw advertisement
///
/// Iteration stops at the first zero-length structure (padding) or at a
/// structure whose declared length runs past the end of the buffer.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    bytes: &'a [u8],
}

impl<'a> AdStructures<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, rest) = self.bytes.split_first()?;
        let len = len as usize;
        if len == 0 || rest.len() < len {
            self.bytes = &[];
            return None;
        }
        let (structure, remaining) = rest.split_at(len);
        self.bytes = remaining;
        Some(AdStructure {
            ad_type: structure[0],
            data: &structure[1..],
        })
    }
}

/// Complete local name, falling back to the shortened one
pub fn local_name(bytes: &[u8]) -> Option<String> {
    let mut shortened = None;
    for ad in AdStructures::new(bytes) {
        match ad.ad_type {
            ad_type::COMPLETE_LOCAL_NAME => {
                return Some(String::from_utf8_lossy(ad.data).into_owned())
            }
            ad_type::SHORTENED_LOCAL_NAME => {
                shortened = Some(String::from_utf8_lossy(ad.data).into_owned())
            }
            _ => {}
        }
    }
    shortened
}

/// Manufacturer-specific data entries as `(company_id, payload)`
pub fn manufacturer_data<'a>(bytes: &'a [u8]) -> impl Iterator<Item = (u16, &'a [u8])> + 'a {
    AdStructures::new(bytes)
        .filter(|ad| ad.ad_type == ad_type::MANUFACTURER_SPECIFIC_DATA && ad.data.len() >= 2)
        .map(|ad| {
            let company = u16::from_le_bytes([ad.data[0], ad.data[1]]);
            (company, &ad.data[2..])
        })
}

/// Service UUIDs listed in 16- and 128-bit service UUID structures
pub fn service_uuids(bytes: &[u8]) -> Vec<Uuid> {
    let mut uuids = Vec::new();
    for ad in AdStructures::new(bytes) {
        match ad.ad_type {
            ad_type::INCOMPLETE_SERVICE_UUIDS_16 | ad_type::COMPLETE_SERVICE_UUIDS_16 => {
                uuids.extend(
                    ad.data
                        .chunks_exact(2)
                        .map(|c| uuid_from_u16(u16::from_le_bytes([c[0], c[1]]))),
                );
            }
            ad_type::INCOMPLETE_SERVICE_UUIDS_128 | ad_type::COMPLETE_SERVICE_UUIDS_128 => {
                uuids.extend(ad.data.chunks_exact(16).filter_map(uuid_from_le_slice));
            }
            _ => {}
        }
    }
    uuids
}

/// Service data entries as `(service_uuid, payload)`
pub fn service_data(bytes: &[u8]) -> Vec<(Uuid, &[u8])> {
    AdStructures::new(bytes)
        .filter_map(|ad| match ad.ad_type {
            ad_type::SERVICE_DATA_16 if ad.data.len() >= 2 => {
                let uuid = uuid_from_u16(u16::from_le_bytes([ad.data[0], ad.data[1]]));
                Some((uuid, &ad.data[2..]))
            }
            ad_type::SERVICE_DATA_128 if ad.data.len() >= 16 => {
                uuid_from_le_slice(&ad.data[..16]).map(|uuid| (uuid, &ad.data[16..]))
            }
            _ => None,
        })
        .collect()
}

/// Advertised transmit power level in dBm
pub fn tx_power_level(bytes: &[u8]) -> Option<i8> {
    AdStructures::new(bytes)
        .find(|ad| ad.ad_type == ad_type::TX_POWER_LEVEL && ad.data.len() == 1)
        .map(|ad| ad.data[0] as i8)
}

// ----------------------------------------------------------------------------
// Building
// ----------------------------------------------------------------------------

/// Incrementally assembles AD structures
#[derive(Debug, Clone, Default)]
pub struct AdvertisementBuilder {
    bytes: Vec<u8>,
}

impl AdvertisementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.bytes.extend_from_slice(&[2, ad_type::FLAGS, flags]);
        self
    }

    /// Append an arbitrary AD structure
    pub fn structure(mut self, ad_type: u8, data: &[u8]) -> Result<Self, CodecError> {
        if data.len() > MAX_STRUCTURE_DATA {
            return Err(CodecError::StructureTooLong(data.len()));
        }
        self.bytes.push(data.len() as u8 + 1);
        self.bytes.push(ad_type);
        self.bytes.extend_from_slice(data);
        Ok(self)
    }

    /// Complete list containing a single service UUID, 16-bit when possible
    pub fn service_uuid(self, uuid: &Uuid) -> Result<Self, CodecError> {
        match short_uuid(uuid) {
            Some(short) => self.structure(ad_type::COMPLETE_SERVICE_UUIDS_16, &short.to_le_bytes()),
            None => {
                let mut le = *uuid.as_bytes();
                le.reverse();
                self.structure(ad_type::COMPLETE_SERVICE_UUIDS_128, &le)
            }
        }
    }

    pub fn service_data(self, uuid: &Uuid, data: &[u8]) -> Result<Self, CodecError> {
        match short_uuid(uuid) {
            Some(short) => {
                let mut value = short.to_le_bytes().to_vec();
                value.extend_from_slice(data);
                self.structure(ad_type::SERVICE_DATA_16, &value)
            }
            None => {
                let mut value = uuid.as_bytes().to_vec();
                value.reverse();
                value.extend_from_slice(data);
                self.structure(ad_type::SERVICE_DATA_128, &value)
            }
        }
    }

    pub fn manufacturer_data(self, company_id: u16, data: &[u8]) -> Result<Self, CodecError> {
        let mut value = company_id.to_le_bytes().to_vec();
        value.extend_from_slice(data);
        self.structure(ad_type::MANUFACTURER_SPECIFIC_DATA, &value)
    }

    pub fn local_name(self, name: &str) -> Result<Self, CodecError> {
        self.structure(ad_type::COMPLETE_LOCAL_NAME, name.as_bytes())
    }

    pub fn tx_power_level(self, dbm: i8) -> Result<Self, CodecError> {
        self.structure(ad_type::TX_POWER_LEVEL, &[dbm as u8])
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes without a length check
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Raw bytes, rejecting anything over the legacy 31-byte limit
    pub fn finish_legacy(self) -> Result<Vec<u8>, CodecError> {
        if self.bytes.len() > LEGACY_ADVERTISEMENT_LEN {
            return Err(CodecError::AdvertisementTooLong {
                len: self.bytes.len(),
                max: LEGACY_ADVERTISEMENT_LEN,
            });
        }
        Ok(self.bytes)
    }
}

// ----------------------------------------------------------------------------
// Advertise Payloads
// ----------------------------------------------------------------------------

/// Advertise payload as supplied by the caller, not yet validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisePayload {
    /// Generic advertisement with an optional service UUID and service data
    Raw {
        service_uuid: Option<String>,
        service_data: Vec<u8>,
        include_device_name: bool,
    },
    /// iBeacon record
    IBeacon {
        region_id: String,
        major: u16,
        minor: u16,
        measured_power: i8,
    },
}

impl AdvertisePayload {
    pub fn ibeacon(
        region_id: impl Into<String>,
        major: u16,
        minor: u16,
        measured_power: i8,
    ) -> Self {
        AdvertisePayload::IBeacon {
            region_id: region_id.into(),
            major,
            minor,
            measured_power,
        }
    }

    /// Advertisement carrying only the device name
    pub fn device_name() -> Self {
        AdvertisePayload::Raw {
            service_uuid: None,
            service_data: Vec::new(),
            include_device_name: true,
        }
    }

    /// Parse identifiers and check the record fits a legacy advertisement
    ///
    /// `device_name` is the name the adapter will broadcast, counted against
    /// the size limit when the payload asks for it.
    pub fn validate(
        &self,
        device_name: Option<&str>,
    ) -> Result<AdvertisementData, ControllerError> {
        let data = match self {
            AdvertisePayload::Raw {
                service_uuid,
                service_data,
                include_device_name,
            } => {
                let service_uuid = service_uuid.as_deref().map(parse_uuid).transpose()?;
                if service_uuid.is_none() && !service_data.is_empty() {
                    return Err(ControllerError::InvalidPayload(
                        "service data requires a service UUID".to_string(),
                    ));
                }
                AdvertisementData::Service {
                    service_uuid,
                    service_data: service_data.clone(),
                    include_device_name: *include_device_name,
                }
            }
            AdvertisePayload::IBeacon {
                region_id,
                major,
                minor,
                measured_power,
            } => AdvertisementData::IBeacon(IBeacon::new(
                parse_uuid(region_id)?,
                *major,
                *minor,
                *measured_power,
            )),
        };

        data.encode(device_name)
            .map_err(|e| ControllerError::InvalidPayload(e.to_string()))?;
        Ok(data)
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, ControllerError> {
    Uuid::parse_str(value.trim())
        .map_err(|e| ControllerError::InvalidPayload(format!("invalid UUID {:?}: {}", value, e)))
}

/// Validated advertisement content handed to the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisementData {
    Service {
        service_uuid: Option<Uuid>,
        service_data: Vec<u8>,
        include_device_name: bool,
    },
    IBeacon(IBeacon),
}

impl AdvertisementData {
    /// Frame the advertisement as legacy AD bytes
    ///
    /// `device_name` is only used when the payload asks for the name.
    pub fn encode(&self, device_name: Option<&str>) -> Result<Vec<u8>, CodecError> {
        let mut builder = AdvertisementBuilder::new().flags(DEFAULT_FLAGS);
        match self {
            AdvertisementData::IBeacon(beacon) => {
                builder =
                    builder.manufacturer_data(APPLE_COMPANY_ID, &beacon.manufacturer_payload())?;
            }
            AdvertisementData::Service {
                service_uuid,
                service_data,
                include_device_name,
            } => {
                if let Some(uuid) = service_uuid {
                    builder = builder.service_uuid(uuid)?;
                    if !service_data.is_empty() {
                        builder = builder.service_data(uuid, service_data)?;
                    }
                }
                if let (true, Some(name)) = (*include_device_name, device_name) {
                    builder = builder.local_name(name)?;
                }
            }
        }
        builder.finish_legacy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: &str = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";

    #[test]
    fn test_short_uuid_round_trip() {
        let battery = uuid_from_u16(0x180F);
        assert_eq!(battery.to_string(), "0000180f-0000-1000-8000-00805f9b34fb");
        assert_eq!(short_uuid(&battery), Some(0x180F));
        assert_eq!(short_uuid(&Uuid::parse_str(REGION).unwrap()), None);
    }

    #[test]
    fn test_parser_stops_at_padding_and_truncation() {
        let bytes = [2, 0x01, 0x06, 0, 0, 0];
        let ads: Vec<_> = AdStructures::new(&bytes).collect();
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].ad_type, ad_type::FLAGS);

        let truncated = [2, 0x01, 0x06, 9, 0x09, b'a'];
        assert_eq!(AdStructures::new(&truncated).count(), 1);
    }

    #[test]
    fn test_lookup_helpers() {
        let custom = Uuid::parse_str(REGION).unwrap();
        let bytes = AdvertisementBuilder::new()
            .flags(DEFAULT_FLAGS)
            .service_uuid(&uuid_from_u16(0x180D))
            .unwrap()
            .service_data(&custom, b"hi")
            .unwrap()
            .local_name("HRM")
            .unwrap()
            .tx_power_level(-4)
            .unwrap()
            .into_bytes();

        assert_eq!(local_name(&bytes).as_deref(), Some("HRM"));
        assert_eq!(service_uuids(&bytes), vec![uuid_from_u16(0x180D)]);
        assert_eq!(service_data(&bytes), vec![(custom, &b"hi"[..])]);
        assert_eq!(tx_power_level(&bytes), Some(-4));
    }

    #[test]
    fn test_shortened_name_used_when_complete_missing() {
        let bytes = AdvertisementBuilder::new()
            .structure(ad_type::SHORTENED_LOCAL_NAME, b"Bea")
            .unwrap()
            .into_bytes();
        assert_eq!(local_name(&bytes).as_deref(), Some("Bea"));
    }

    #[test]
    fn test_ibeacon_encoding_matches_layout() {
        let data = AdvertisePayload::ibeacon(REGION, 1, 2, -60).validate(None).unwrap();
        let bytes = data.encode(None).unwrap();

        assert_eq!(bytes.len(), 30);
        assert_eq!(&bytes[..3], &[0x02, 0x01, 0x06]);
        assert_eq!(&bytes[3..9], &[0x1A, 0xFF, 0x4C, 0x00, 0x02, 0x15]);
        assert_eq!(&bytes[9..25], Uuid::parse_str(REGION).unwrap().as_bytes());
        assert_eq!(&bytes[25..], &[0x00, 0x01, 0x00, 0x02, 0xC4]);
    }

    #[test]
    fn test_malformed_region_rejected() {
        let err = AdvertisePayload::ibeacon("not-a-uuid", 1, 2, -60)
            .validate(None)
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidPayload(_)));
    }

    #[test]
    fn test_service_data_without_uuid_rejected() {
        let payload = AdvertisePayload::Raw {
            service_uuid: None,
            service_data: b"Data".to_vec(),
            include_device_name: false,
        };
        assert!(matches!(
            payload.validate(None),
            Err(ControllerError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_oversized_service_data_rejected() {
        let payload = AdvertisePayload::Raw {
            service_uuid: Some(REGION.to_string()),
            service_data: vec![0u8; 12],
            include_device_name: false,
        };
        let err = payload.validate(None).unwrap_err();
        assert!(err.to_string().contains("Advertisement too long"));
    }

    #[test]
    fn test_device_name_only_added_on_request() {
        let data = AdvertisePayload::device_name().validate(None).unwrap();
        let with_name = data.encode(Some("Pixel")).unwrap();
        assert_eq!(local_name(&with_name).as_deref(), Some("Pixel"));

        let without = AdvertisementData::Service {
            service_uuid: None,
            service_data: Vec::new(),
            include_device_name: false,
        };
        assert_eq!(local_name(&without.encode(Some("Pixel")).unwrap()), None);
    }

    #[test]
    fn test_device_name_counted_toward_size_limit() {
        let payload = AdvertisePayload::Raw {
            service_uuid: Some(REGION.to_string()),
            service_data: Vec::new(),
            include_device_name: true,
        };
        assert!(payload.validate(None).is_ok());
        assert!(payload.validate(Some("Pixel")).is_ok());

        let err = payload.validate(Some("Living Room Sensor")).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidPayload(_)));
    }
}
