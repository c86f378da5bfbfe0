//! Events published by the role controller

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::error::AdapterError;
use crate::role::Role;
use crate::types::{AdvertiseHandle, DeviceAddress, DiscoveredDevice, ScanHandle};

// ----------------------------------------------------------------------------
// Controller Events
// ----------------------------------------------------------------------------

/// Why a scan session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEndReason {
    /// `stop_scan` was called
    Requested,
    /// The configured duration elapsed
    TimedOut,
    /// First match under the connect-first discovery policy
    FirstMatch,
    /// The adapter reported a failure after the scan started
    Failed(AdapterError),
    Shutdown,
}

/// Advertise session lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseState {
    /// Request issued, awaiting adapter confirmation
    Starting,
    Started,
    Failed(AdapterError),
    Stopped,
}

/// Progress of the connection sub-protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        address: DeviceAddress,
        state: ConnectionState,
    },
    CharacteristicRead {
        address: DeviceAddress,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    Failed {
        address: DeviceAddress,
        error: AdapterError,
    },
}

/// Everything a subscriber of the controller can observe
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    RoleChanged(Role),
    ScanStarted(ScanHandle),
    ScanEnded {
        handle: ScanHandle,
        reason: ScanEndReason,
    },
    DeviceDiscovered {
        handle: ScanHandle,
        device: DiscoveredDevice,
    },
    AdvertiseStateChanged {
        handle: AdvertiseHandle,
        state: AdvertiseState,
    },
    Connection(ConnectionEvent),
}

// ----------------------------------------------------------------------------
// Discovery Stream
// ----------------------------------------------------------------------------

/// Devices discovered by one scan session
///
/// Yields matching devices in adapter order and ends when the session ends.
/// A new scan session produces a new stream.
#[derive(Debug)]
pub struct DiscoveryStream {
    rx: mpsc::UnboundedReceiver<DiscoveredDevice>,
}

impl DiscoveryStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<DiscoveredDevice>) -> Self {
        Self { rx }
    }

    /// Next device, or `None` once the session has ended
    pub async fn next_device(&mut self) -> Option<DiscoveredDevice> {
        self.rx.recv().await
    }
}

impl Stream for DiscoveryStream {
    type Item = DiscoveredDevice;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A started scan: its handle plus the stream of its discoveries
#[derive(Debug)]
pub struct ActiveScan {
    handle: ScanHandle,
    devices: DiscoveryStream,
}

impl ActiveScan {
    pub(crate) fn new(handle: ScanHandle, devices: DiscoveryStream) -> Self {
        Self { handle, devices }
    }

    pub fn handle(&self) -> ScanHandle {
        self.handle
    }

    pub fn devices(&mut self) -> &mut DiscoveryStream {
        &mut self.devices
    }

    pub fn into_parts(self) -> (ScanHandle, DiscoveryStream) {
        (self.handle, self.devices)
    }
}
