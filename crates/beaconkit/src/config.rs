//! Role controller configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ReadTarget;
use crate::error::{ControllerError, Result};
use crate::types::{AdvertiseMode, ScanMode};

/// Scan period used when the caller does not pick one
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// What the controller does with discovered devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryPolicy {
    /// Keep scanning until stopped or timed out
    #[default]
    Continuous,
    /// Stop the scan on the first match and connect to that device
    ConnectFirst,
}

/// Configuration for the role controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Scan duration used by `scan`
    pub default_scan_duration: Duration,
    /// Longer requested durations are clamped to this
    pub max_scan_duration: Duration,
    pub scan_mode: ScanMode,
    pub advertise_mode: AdvertiseMode,
    pub discovery_policy: DiscoveryPolicy,
    /// Characteristic read by the connection sub-protocol
    pub read_target: ReadTarget,
    /// Maximum time from connect request to characteristic read
    pub connection_timeout: Duration,
    /// Capacity of the broadcast event channel
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_scan_duration: DEFAULT_SCAN_DURATION,
            max_scan_duration: Duration::from_secs(300),
            scan_mode: ScanMode::LowLatency,
            advertise_mode: AdvertiseMode::LowLatency,
            discovery_policy: DiscoveryPolicy::Continuous,
            read_target: ReadTarget::FirstReadable,
            connection_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_scan_duration(mut self, duration: Duration) -> Self {
        self.default_scan_duration = duration;
        self
    }

    pub fn with_max_scan_duration(mut self, duration: Duration) -> Self {
        self.max_scan_duration = duration;
        self
    }

    pub fn with_scan_mode(mut self, mode: ScanMode) -> Self {
        self.scan_mode = mode;
        self
    }

    pub fn with_advertise_mode(mut self, mode: AdvertiseMode) -> Self {
        self.advertise_mode = mode;
        self
    }

    pub fn with_discovery_policy(mut self, policy: DiscoveryPolicy) -> Self {
        self.discovery_policy = policy;
        self
    }

    pub fn with_read_target(mut self, target: ReadTarget) -> Self {
        self.read_target = target;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Reject zero durations and clamp long ones to `max_scan_duration`
    pub fn clamp_scan_duration(&self, requested: Duration) -> Result<Duration> {
        if requested.is_zero() {
            return Err(ControllerError::InvalidDuration);
        }
        Ok(requested.min(self.max_scan_duration))
    }
}
