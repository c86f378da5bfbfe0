//! Single-shot GATT connection sub-protocol
//!
//! A connection walks `Disconnected → Connecting → Connected →
//! ServiceDiscovery → CharacteristicRead → Disconnected`: once the selected
//! characteristic has been read the link is torn down. Any state may drop
//! straight back to `Disconnected` on failure.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::adapter::{ConnectionHandle, GattService};
use crate::advertisement::uuid_from_u16;
use crate::types::DeviceAddress;

const GENERIC_ACCESS_SERVICE: u16 = 0x1800;
const GENERIC_ATTRIBUTE_SERVICE: u16 = 0x1801;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Position in the connection sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ServiceDiscovery,
    CharacteristicRead,
}

impl ConnectionState {
    /// The state reached on success from this one
    pub fn next(self) -> ConnectionState {
        match self {
            ConnectionState::Disconnected => ConnectionState::Connecting,
            ConnectionState::Connecting => ConnectionState::Connected,
            ConnectionState::Connected => ConnectionState::ServiceDiscovery,
            ConnectionState::ServiceDiscovery => ConnectionState::CharacteristicRead,
            ConnectionState::CharacteristicRead => ConnectionState::Disconnected,
        }
    }
}

/// Which characteristic the sub-protocol reads after service discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadTarget {
    /// First readable characteristic, preferring services other than the
    /// Generic Access and Generic Attribute services
    #[default]
    FirstReadable,
    Characteristic { service: Uuid, characteristic: Uuid },
}

/// Choose the `(service, characteristic)` to read
pub fn select_characteristic(
    services: &[GattService],
    target: &ReadTarget,
) -> Option<(Uuid, Uuid)> {
    match target {
        ReadTarget::Characteristic {
            service,
            characteristic,
        } => services
            .iter()
            .filter(|s| s.uuid == *service)
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == *characteristic && c.readable)
            .map(|c| (*service, c.uuid)),
        ReadTarget::FirstReadable => {
            let first_readable = |s: &GattService| {
                s.characteristics
                    .iter()
                    .find(|c| c.readable)
                    .map(|c| (s.uuid, c.uuid))
            };
            let generic = [
                uuid_from_u16(GENERIC_ACCESS_SERVICE),
                uuid_from_u16(GENERIC_ATTRIBUTE_SERVICE),
            ];
            services
                .iter()
                .filter(|s| !generic.contains(&s.uuid))
                .find_map(first_readable)
                .or_else(|| services.iter().find_map(first_readable))
        }
    }
}

// ----------------------------------------------------------------------------
// Connection Attempt
// ----------------------------------------------------------------------------

/// One in-flight connection attempt
#[derive(Debug)]
pub(crate) struct GattConnection {
    id: u64,
    address: DeviceAddress,
    handle: ConnectionHandle,
    state: ConnectionState,
    target: ReadTarget,
    pending_read: Option<(Uuid, Uuid)>,
    deadline: Instant,
}

impl GattConnection {
    pub fn new(
        id: u64,
        address: DeviceAddress,
        handle: ConnectionHandle,
        target: ReadTarget,
        deadline: Instant,
    ) -> Self {
        Self {
            id,
            address,
            handle,
            state: ConnectionState::Connecting,
            target,
            pending_read: None,
            deadline,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Move to `to` if it is the next step or a teardown; false otherwise
    pub fn advance(&mut self, to: ConnectionState) -> bool {
        if self.state.next() == to || to == ConnectionState::Disconnected {
            self.state = to;
            true
        } else {
            false
        }
    }

    /// Pick the characteristic to read and enter `CharacteristicRead`
    pub fn select_read(&mut self, services: &[GattService]) -> Option<(Uuid, Uuid)> {
        if self.state != ConnectionState::ServiceDiscovery {
            return None;
        }
        let selected = select_characteristic(services, &self.target)?;
        self.state = ConnectionState::CharacteristicRead;
        self.pending_read = Some(selected);
        Some(selected)
    }

    /// Whether a read result belongs to the outstanding request
    pub fn is_pending_read(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.state == ConnectionState::CharacteristicRead
            && self.pending_read == Some((service, characteristic))
    }
}
