//! Radio role state
//!
//! The controller's whole mutable state is a single [`RoleState`]. Scanning and
//! advertising at once is only representable through `Both`, which the
//! controller enters only when the adapter reports concurrent support.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::advertisement::AdvertisementData;
use crate::filter::FilterSet;
use crate::types::{AdvertiseHandle, AdvertiseSettings, DiscoveredDevice, ScanHandle};

// ----------------------------------------------------------------------------
// Public Role
// ----------------------------------------------------------------------------

/// Snapshot of what the radio is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Idle,
    Scanning,
    Advertising,
    /// Only reachable on adapters that support concurrent roles
    ScanningAndAdvertising,
}

impl Role {
    pub fn is_scanning(self) -> bool {
        matches!(self, Role::Scanning | Role::ScanningAndAdvertising)
    }

    pub fn is_advertising(self) -> bool {
        matches!(self, Role::Advertising | Role::ScanningAndAdvertising)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Idle => "idle",
            Role::Scanning => "scanning",
            Role::Advertising => "advertising",
            Role::ScanningAndAdvertising => "scanning and advertising",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

/// One active scan operation
#[derive(Debug)]
pub(crate) struct ScanSession {
    pub handle: ScanHandle,
    pub started_at: Instant,
    pub duration: Duration,
    pub filters: FilterSet,
    /// Dropping the session ends the caller's discovery stream
    pub discoveries: mpsc::UnboundedSender<DiscoveredDevice>,
    pub devices_seen: usize,
}

impl ScanSession {
    pub fn new(
        handle: ScanHandle,
        duration: Duration,
        filters: FilterSet,
        discoveries: mpsc::UnboundedSender<DiscoveredDevice>,
    ) -> Self {
        Self {
            handle,
            started_at: Instant::now(),
            duration,
            filters,
            discoveries,
            devices_seen: 0,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.started_at + self.duration
    }
}

/// One active advertise operation
#[derive(Debug)]
pub(crate) struct AdvertiseSession {
    pub handle: AdvertiseHandle,
    pub data: AdvertisementData,
    pub settings: AdvertiseSettings,
    pub started_at: Instant,
    /// Set once the adapter confirms transmission
    pub confirmed: bool,
}

impl AdvertiseSession {
    pub fn new(
        handle: AdvertiseHandle,
        data: AdvertisementData,
        settings: AdvertiseSettings,
    ) -> Self {
        Self {
            handle,
            data,
            settings,
            started_at: Instant::now(),
            confirmed: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Role State Machine
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) enum RoleState {
    #[default]
    Idle,
    Scanning(ScanSession),
    Advertising(AdvertiseSession),
    Both {
        scan: ScanSession,
        advertise: AdvertiseSession,
    },
}

impl RoleState {
    pub fn role(&self) -> Role {
        match self {
            RoleState::Idle => Role::Idle,
            RoleState::Scanning(_) => Role::Scanning,
            RoleState::Advertising(_) => Role::Advertising,
            RoleState::Both { .. } => Role::ScanningAndAdvertising,
        }
    }

    pub fn scan(&self) -> Option<&ScanSession> {
        match self {
            RoleState::Scanning(scan) | RoleState::Both { scan, .. } => Some(scan),
            _ => None,
        }
    }

    pub fn scan_mut(&mut self) -> Option<&mut ScanSession> {
        match self {
            RoleState::Scanning(scan) | RoleState::Both { scan, .. } => Some(scan),
            _ => None,
        }
    }

    pub fn advertise(&self) -> Option<&AdvertiseSession> {
        match self {
            RoleState::Advertising(advertise) | RoleState::Both { advertise, .. } => {
                Some(advertise)
            }
            _ => None,
        }
    }

    pub fn advertise_mut(&mut self) -> Option<&mut AdvertiseSession> {
        match self {
            RoleState::Advertising(advertise) | RoleState::Both { advertise, .. } => {
                Some(advertise)
            }
            _ => None,
        }
    }

    /// Whether a scan may start; `Err` carries the conflicting role
    pub fn admits_scan(&self, concurrent: bool) -> Result<(), Role> {
        match self {
            RoleState::Idle => Ok(()),
            RoleState::Advertising(_) if concurrent => Ok(()),
            other => Err(other.role()),
        }
    }

    /// Whether an advertisement may start; `Err` carries the conflicting role
    pub fn admits_advertise(&self, concurrent: bool) -> Result<(), Role> {
        match self {
            RoleState::Idle => Ok(()),
            RoleState::Scanning(_) if concurrent => Ok(()),
            other => Err(other.role()),
        }
    }

    pub fn begin_scan(&mut self, session: ScanSession, concurrent: bool) -> Result<(), Role> {
        self.admits_scan(concurrent)?;
        *self = match std::mem::take(self) {
            RoleState::Advertising(advertise) => RoleState::Both {
                scan: session,
                advertise,
            },
            _ => RoleState::Scanning(session),
        };
        Ok(())
    }

    pub fn begin_advertise(
        &mut self,
        session: AdvertiseSession,
        concurrent: bool,
    ) -> Result<(), Role> {
        self.admits_advertise(concurrent)?;
        *self = match std::mem::take(self) {
            RoleState::Scanning(scan) => RoleState::Both {
                scan,
                advertise: session,
            },
            _ => RoleState::Advertising(session),
        };
        Ok(())
    }

    pub fn end_scan(&mut self) -> Option<ScanSession> {
        let (next, ended) = match std::mem::take(self) {
            RoleState::Scanning(scan) => (RoleState::Idle, Some(scan)),
            RoleState::Both { scan, advertise } => (RoleState::Advertising(advertise), Some(scan)),
            other => (other, None),
        };
        *self = next;
        ended
    }

    pub fn end_advertise(&mut self) -> Option<AdvertiseSession> {
        let (next, ended) = match std::mem::take(self) {
            RoleState::Advertising(advertise) => (RoleState::Idle, Some(advertise)),
            RoleState::Both { scan, advertise } => (RoleState::Scanning(scan), Some(advertise)),
            other => (other, None),
        };
        *self = next;
        ended
    }
}
