//! Error types for the role controller and its platform adapters

use thiserror::Error;

use crate::role::Role;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors reported by a [`PlatformAdapter`](crate::PlatformAdapter)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Bluetooth radio is off or absent")]
    RadioUnavailable,

    #[error("Bluetooth permission denied")]
    PermissionDenied,

    #[error("Advertising is not supported by this adapter")]
    AdvertiseUnsupported,

    #[error("Operation timed out")]
    Timeout,

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Errors returned by [`RoleController`](crate::RoleController) operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Bluetooth radio is off or absent")]
    RadioUnavailable,

    #[error("Bluetooth permission denied")]
    PermissionDenied,

    #[error("Cannot start {requested} while {current}")]
    InvalidState { current: Role, requested: Role },

    #[error("Invalid advertise payload: {0}")]
    InvalidPayload(String),

    #[error("Advertising is not supported by this adapter")]
    AdvertiseUnsupported,

    #[error("Scan duration must be positive")]
    InvalidDuration,

    #[error("Connection already in progress")]
    ConnectionInProgress,

    #[error("Adapter error: {0}")]
    Adapter(AdapterError),

    #[error("Role controller is no longer running")]
    Closed,
}

impl From<AdapterError> for ControllerError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::RadioUnavailable => ControllerError::RadioUnavailable,
            AdapterError::PermissionDenied => ControllerError::PermissionDenied,
            AdapterError::AdvertiseUnsupported => ControllerError::AdvertiseUnsupported,
            other => ControllerError::Adapter(other),
        }
    }
}

/// Errors from encoding or decoding advertisement records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("AD structure payload too long: {0} bytes (max: 254)")]
    StructureTooLong(usize),

    #[error("Advertisement too long: {len} bytes (max: {max})")]
    AdvertisementTooLong { len: usize, max: usize },

    #[error("Unexpected company identifier: {0:#06x}")]
    UnexpectedCompany(u16),

    #[error("Truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Manufacturer data is not an iBeacon record")]
    NotIBeacon,
}

/// Result alias used throughout the crate
pub type Result<T, E = ControllerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_errors_map_to_controller_taxonomy() {
        assert_eq!(
            ControllerError::from(AdapterError::RadioUnavailable),
            ControllerError::RadioUnavailable
        );
        assert_eq!(
            ControllerError::from(AdapterError::PermissionDenied),
            ControllerError::PermissionDenied
        );
        assert_eq!(
            ControllerError::from(AdapterError::AdvertiseUnsupported),
            ControllerError::AdvertiseUnsupported
        );
        assert_eq!(
            ControllerError::from(AdapterError::Platform("status 133".into())),
            ControllerError::Adapter(AdapterError::Platform("status 133".into()))
        );
    }

    #[test]
    fn test_invalid_state_message_names_both_roles() {
        let err = ControllerError::InvalidState {
            current: Role::Advertising,
            requested: Role::Scanning,
        };
        assert_eq!(err.to_string(), "Cannot start scanning while advertising");
    }
}
