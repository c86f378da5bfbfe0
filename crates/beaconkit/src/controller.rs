//! BLE role controller
//!
//! [`RoleController`] is a cheap, cloneable handle. All state lives in a single
//! [`ControllerTask`] spawned on the tokio runtime, which serializes caller
//! commands, adapter callbacks and deadline expiries through one
//! `tokio::select!` loop. Nothing outside that task ever touches the role or
//! session fields.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterEvent, EventSink, LinkState, PlatformAdapter, SessionTag};
use crate::advertisement::AdvertisePayload;
use crate::config::{ControllerConfig, DiscoveryPolicy};
use crate::connection::{ConnectionState, GattConnection};
use crate::error::{AdapterError, ControllerError, Result};
use crate::events::{
    ActiveScan, AdvertiseState, ConnectionEvent, ControllerEvent, DiscoveryStream, ScanEndReason,
};
use crate::filter::{self, FilterSet, ScanFilter};
use crate::role::{AdvertiseSession, Role, RoleState, ScanSession};
use crate::types::{
    AdvertiseHandle, AdvertiseSettings, DeviceAddress, DiscoveredDevice, PowerLevel, ScanHandle,
};

const COMMAND_BUFFER: usize = 32;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
enum Command {
    StartScan {
        filters: FilterSet,
        duration: Option<Duration>,
        reply: Reply<ActiveScan>,
    },
    StopScan {
        handle: ScanHandle,
        reply: Reply<()>,
    },
    StartAdvertise {
        payload: AdvertisePayload,
        power: PowerLevel,
        connectable: bool,
        reply: Reply<AdvertiseHandle>,
    },
    StopAdvertise {
        handle: AdvertiseHandle,
        reply: Reply<()>,
    },
    Connect {
        address: DeviceAddress,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

// ----------------------------------------------------------------------------
// Controller Handle
// ----------------------------------------------------------------------------

/// Handle to a running role controller
#[derive(Debug, Clone)]
pub struct RoleController {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ControllerEvent>,
    role: watch::Receiver<Role>,
}

impl RoleController {
    /// Spawn the controller task on the current tokio runtime
    ///
    /// The task runs until every handle has been dropped.
    pub fn spawn(adapter: Arc<dyn PlatformAdapter>, config: ControllerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (adapter_tx, adapter_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (role_tx, role_rx) = watch::channel(Role::Idle);

        let task = ControllerTask {
            adapter,
            config,
            adapter_tx,
            events: events.clone(),
            role_tx,
            state: RoleState::Idle,
            connection: None,
            next_id: 1,
        };
        tokio::spawn(task.run(command_rx, adapter_rx));

        Self {
            commands: command_tx,
            events,
            role: role_rx,
        }
    }

    /// Current role
    pub fn role(&self) -> Role {
        *self.role.borrow()
    }

    /// Receiver that observes every role change
    pub fn watch_role(&self) -> watch::Receiver<Role> {
        self.role.clone()
    }

    /// Subscribe to controller events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Start a scan that stops by itself after `duration`
    ///
    /// An empty filter set matches every advertisement. Durations above the
    /// configured maximum are clamped; a zero duration is rejected.
    pub async fn start_scan<I>(&self, filters: I, duration: Duration) -> Result<ActiveScan>
    where
        I: IntoIterator<Item = ScanFilter>,
    {
        let filters = filters.into_iter().collect();
        self.request(|reply| Command::StartScan {
            filters,
            duration: Some(duration),
            reply,
        })
        .await
    }

    /// Start a scan with the configured default duration
    pub async fn scan<I>(&self, filters: I) -> Result<ActiveScan>
    where
        I: IntoIterator<Item = ScanFilter>,
    {
        let filters = filters.into_iter().collect();
        self.request(|reply| Command::StartScan {
            filters,
            duration: None,
            reply,
        })
        .await
    }

    /// Stop a scan; stale or repeated handles are a successful no-op
    pub async fn stop_scan(&self, handle: ScanHandle) -> Result<()> {
        self.request(|reply| Command::StopScan { handle, reply }).await
    }

    /// Start advertising `payload`
    ///
    /// Rejected while scanning unless the adapter supports both roles at once.
    pub async fn start_advertise(
        &self,
        payload: AdvertisePayload,
        power: PowerLevel,
        connectable: bool,
    ) -> Result<AdvertiseHandle> {
        self.request(|reply| Command::StartAdvertise {
            payload,
            power,
            connectable,
            reply,
        })
        .await
    }

    /// Stop advertising; stale or repeated handles are a successful no-op
    pub async fn stop_advertise(&self, handle: AdvertiseHandle) -> Result<()> {
        self.request(|reply| Command::StopAdvertise { handle, reply })
            .await
    }

    /// Connect to `address`, read one characteristic, then disconnect
    ///
    /// Progress is reported as [`ConnectionEvent`]s.
    pub async fn connect(&self, address: impl Into<DeviceAddress>) -> Result<()> {
        let address = address.into();
        self.request(|reply| Command::Connect { address, reply })
            .await
    }

    /// Stop everything and release adapter resources; idempotent
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Err(ControllerError::Closed) => Ok(()),
            other => other,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)?
    }
}

// ----------------------------------------------------------------------------
// Controller Task
// ----------------------------------------------------------------------------

/// Single owner of the role state
struct ControllerTask {
    adapter: Arc<dyn PlatformAdapter>,
    config: ControllerConfig,
    /// Cloned into every sink handed to the adapter
    adapter_tx: mpsc::UnboundedSender<(SessionTag, AdapterEvent)>,
    events: broadcast::Sender<ControllerEvent>,
    role_tx: watch::Sender<Role>,
    state: RoleState,
    connection: Option<GattConnection>,
    next_id: u64,
}

impl ControllerTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut adapter_events: mpsc::UnboundedReceiver<(SessionTag, AdapterEvent)>,
    ) {
        info!("BLE role controller started");

        loop {
            let scan_deadline = self.state.scan().map(ScanSession::deadline);
            let connection_deadline = self.connection.as_ref().map(GattConnection::deadline);

            tokio::select! {
                biased;

                _ = wait_until(scan_deadline) => {
                    self.end_scan(ScanEndReason::TimedOut).await;
                }

                _ = wait_until(connection_deadline) => {
                    self.fail_connection(AdapterError::Timeout).await;
                }

                command = commands.recv() => match command {
                    Some(command) => {
                        self.expire_deadlines().await;
                        self.handle_command(command).await;
                    }
                    None => break,
                },

                Some((tag, event)) = adapter_events.recv() => {
                    self.expire_deadlines().await;
                    self.handle_adapter_event(tag, event).await;
                }
            }
        }

        self.shutdown().await;
        info!("BLE role controller stopped");
    }

    /// End sessions whose deadline has passed before handling queued work
    async fn expire_deadlines(&mut self) {
        let now = Instant::now();
        if self.state.scan().is_some_and(|s| s.deadline() <= now) {
            self.end_scan(ScanEndReason::TimedOut).await;
        }
        if self.connection.as_ref().is_some_and(|c| c.deadline() <= now) {
            self.fail_connection(AdapterError::Timeout).await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan {
                filters,
                duration,
                reply,
            } => {
                let duration = duration.unwrap_or(self.config.default_scan_duration);
                let _ = reply.send(self.start_scan(filters, duration).await);
            }
            Command::StopScan { handle, reply } => {
                if self.is_current_scan(handle.id()) {
                    self.end_scan(ScanEndReason::Requested).await;
                } else {
                    debug!("Ignoring stop for inactive {}", handle);
                }
                let _ = reply.send(Ok(()));
            }
            Command::StartAdvertise {
                payload,
                power,
                connectable,
                reply,
            } => {
                let _ = reply.send(self.start_advertise(payload, power, connectable).await);
            }
            Command::StopAdvertise { handle, reply } => {
                if self.is_current_advertise(handle.id()) {
                    self.end_advertise(AdvertiseState::Stopped).await;
                } else {
                    debug!("Ignoring stop for inactive {}", handle);
                }
                let _ = reply.send(Ok(()));
            }
            Command::Connect { address, reply } => {
                let _ = reply.send(self.connect(address).await);
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    async fn start_scan(&mut self, filters: FilterSet, duration: Duration) -> Result<ActiveScan> {
        let duration = self.config.clamp_scan_duration(duration)?;
        let concurrent = self.adapter.capabilities().concurrent_scan_and_advertise;
        self.state
            .admits_scan(concurrent)
            .map_err(|current| ControllerError::InvalidState {
                current,
                requested: Role::Scanning,
            })?;

        let handle = ScanHandle::new(self.next_session_id());
        let sink = self.sink(SessionTag::Scan(handle.id()));
        if let Err(e) = self
            .adapter
            .start_scan(&filters, self.config.scan_mode, sink)
            .await
        {
            warn!("Failed to start BLE scan: {}", e);
            return Err(e.into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = ScanSession::new(handle, duration, filters, tx);
        if let Err(current) = self.state.begin_scan(session, concurrent) {
            self.adapter.stop_scan().await;
            return Err(ControllerError::InvalidState {
                current,
                requested: Role::Scanning,
            });
        }

        info!("Started {} for {:?}", handle, duration);
        self.publish(ControllerEvent::ScanStarted(handle));
        self.publish_role();
        Ok(ActiveScan::new(handle, DiscoveryStream::new(rx)))
    }

    async fn end_scan(&mut self, reason: ScanEndReason) {
        let Some(session) = self.state.end_scan() else {
            return;
        };
        self.adapter.stop_scan().await;

        let handle = session.handle;
        info!(
            "Stopped {} after {:?} ({} devices, reason: {:?})",
            handle,
            session.started_at.elapsed(),
            session.devices_seen,
            reason
        );
        drop(session);

        self.publish(ControllerEvent::ScanEnded { handle, reason });
        self.publish_role();
    }

    async fn on_device_found(&mut self, id: u64, device: DiscoveredDevice) {
        let Some(session) = self.state.scan_mut().filter(|s| s.handle.id() == id) else {
            debug!("Dropping late discovery of {} for scan#{}", device.address, id);
            return;
        };
        if !filter::matches_any(&session.filters, &device) {
            debug!("Discovery of {} does not match scan filters", device.address);
            return;
        }

        session.devices_seen += 1;
        let handle = session.handle;
        let _ = session.discoveries.send(device.clone());
        debug!(
            "Discovered {} ({:?}, rssi {}) adv={}",
            device.address,
            device.name,
            device.rssi,
            hex::encode(&device.advertisement)
        );

        let address = device.address.clone();
        self.publish(ControllerEvent::DeviceDiscovered { handle, device });

        if self.config.discovery_policy == DiscoveryPolicy::ConnectFirst
            && self.connection.is_none()
        {
            self.end_scan(ScanEndReason::FirstMatch).await;
            if let Err(e) = self.connect(address.clone()).await {
                warn!("Connect-first attempt to {} failed: {}", address, e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Advertising
    // ------------------------------------------------------------------------

    async fn start_advertise(
        &mut self,
        payload: AdvertisePayload,
        power: PowerLevel,
        connectable: bool,
    ) -> Result<AdvertiseHandle> {
        let data = payload.validate(self.adapter.device_name().as_deref())?;
        let capabilities = self.adapter.capabilities();
        if !capabilities.can_advertise {
            return Err(ControllerError::AdvertiseUnsupported);
        }
        let concurrent = capabilities.concurrent_scan_and_advertise;
        self.state
            .admits_advertise(concurrent)
            .map_err(|current| ControllerError::InvalidState {
                current,
                requested: Role::Advertising,
            })?;

        let settings = AdvertiseSettings {
            power,
            mode: self.config.advertise_mode,
            connectable,
        };
        let handle = AdvertiseHandle::new(self.next_session_id());
        let sink = self.sink(SessionTag::Advertise(handle.id()));
        if let Err(e) = self.adapter.start_advertise(&data, &settings, sink).await {
            warn!("Failed to start BLE advertising: {}", e);
            return Err(e.into());
        }

        let session = AdvertiseSession::new(handle, data, settings);
        if let Err(current) = self.state.begin_advertise(session, concurrent) {
            self.adapter.stop_advertise().await;
            return Err(ControllerError::InvalidState {
                current,
                requested: Role::Advertising,
            });
        }

        info!("Started {} at {:?} power", handle, power);
        self.publish(ControllerEvent::AdvertiseStateChanged {
            handle,
            state: AdvertiseState::Starting,
        });
        self.publish_role();
        Ok(handle)
    }

    fn on_advertise_started(&mut self, id: u64) {
        let Some(session) = self.state.advertise_mut().filter(|s| s.handle.id() == id) else {
            return;
        };
        if session.confirmed {
            return;
        }
        session.confirmed = true;
        let handle = session.handle;
        debug!(
            "{} confirmed by adapter ({:?}): {:?}",
            handle, session.settings, session.data
        );
        self.publish(ControllerEvent::AdvertiseStateChanged {
            handle,
            state: AdvertiseState::Started,
        });
    }

    async fn end_advertise(&mut self, state: AdvertiseState) {
        let Some(session) = self.state.end_advertise() else {
            return;
        };
        self.adapter.stop_advertise().await;

        let handle = session.handle;
        info!(
            "Stopped {} after {:?} ({:?})",
            handle,
            session.started_at.elapsed(),
            state
        );
        self.publish(ControllerEvent::AdvertiseStateChanged { handle, state });
        self.publish_role();
    }

    // ------------------------------------------------------------------------
    // Connection Sub-protocol
    // ------------------------------------------------------------------------

    async fn connect(&mut self, address: DeviceAddress) -> Result<()> {
        if self.connection.is_some() {
            return Err(ControllerError::ConnectionInProgress);
        }

        let id = self.next_session_id();
        let sink = self.sink(SessionTag::Connection(id));
        self.publish_connection_state(&address, ConnectionState::Connecting);

        match self.adapter.connect(&address, sink).await {
            Ok(handle) => {
                info!("Connecting to {}", address);
                let deadline = Instant::now() + self.config.connection_timeout;
                self.connection = Some(GattConnection::new(
                    id,
                    address,
                    handle,
                    self.config.read_target.clone(),
                    deadline,
                ));
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", address, e);
                self.publish(ControllerEvent::Connection(ConnectionEvent::Failed {
                    address: address.clone(),
                    error: e.clone(),
                }));
                self.publish_connection_state(&address, ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    async fn on_gatt_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::LinkStateChanged(LinkState::Connected) => {
                let Some(conn) = self.connection.as_mut() else {
                    return;
                };
                if !conn.advance(ConnectionState::Connected) {
                    debug!("Ignoring duplicate connect for {}", conn.address());
                    return;
                }
                conn.advance(ConnectionState::ServiceDiscovery);
                let (address, handle) = (conn.address().clone(), conn.handle());

                info!("Connected to {}", address);
                self.publish_connection_state(&address, ConnectionState::Connected);
                self.publish_connection_state(&address, ConnectionState::ServiceDiscovery);
                if let Err(e) = self.adapter.discover_services(handle).await {
                    self.fail_connection(e).await;
                }
            }
            AdapterEvent::LinkStateChanged(LinkState::Disconnected) => {
                self.fail_connection(AdapterError::Platform(
                    "link dropped before characteristic read".to_string(),
                ))
                .await;
            }
            AdapterEvent::ServicesDiscovered(services) => {
                let Some(conn) = self.connection.as_mut() else {
                    return;
                };
                if conn.state() != ConnectionState::ServiceDiscovery {
                    return;
                }
                debug!("{} exposes {} services", conn.address(), services.len());
                match conn.select_read(&services) {
                    Some((service, characteristic)) => {
                        let (address, handle) = (conn.address().clone(), conn.handle());
                        self.publish_connection_state(
                            &address,
                            ConnectionState::CharacteristicRead,
                        );
                        if let Err(e) = self
                            .adapter
                            .read_characteristic(handle, service, characteristic)
                            .await
                        {
                            self.fail_connection(e).await;
                        }
                    }
                    None => {
                        self.fail_connection(AdapterError::Platform(
                            "no readable characteristic".to_string(),
                        ))
                        .await;
                    }
                }
            }
            AdapterEvent::CharacteristicRead {
                service,
                characteristic,
                value,
            } => {
                let pending = self
                    .connection
                    .as_ref()
                    .is_some_and(|conn| conn.is_pending_read(service, characteristic));
                if !pending {
                    return;
                }
                let Some(mut conn) = self.connection.take() else {
                    return;
                };

                let address = conn.address().clone();
                info!(
                    "Read {} bytes from {} characteristic {}",
                    value.len(),
                    address,
                    characteristic
                );
                self.publish(ControllerEvent::Connection(ConnectionEvent::CharacteristicRead {
                    address: address.clone(),
                    service,
                    characteristic,
                    value,
                }));
                self.adapter.disconnect(conn.handle()).await;
                conn.advance(ConnectionState::Disconnected);
                self.publish_connection_state(&address, ConnectionState::Disconnected);
            }
            AdapterEvent::GattFailed(e) => self.fail_connection(e).await,
            other => debug!("Ignoring non-GATT event on connection: {:?}", other),
        }
    }

    async fn fail_connection(&mut self, error: AdapterError) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        warn!("Connection to {} failed: {}", conn.address(), error);
        self.adapter.disconnect(conn.handle()).await;
        conn.advance(ConnectionState::Disconnected);

        let address = conn.address().clone();
        self.publish(ControllerEvent::Connection(ConnectionEvent::Failed {
            address: address.clone(),
            error,
        }));
        self.publish_connection_state(&address, ConnectionState::Disconnected);
    }

    // ------------------------------------------------------------------------
    // Adapter Events
    // ------------------------------------------------------------------------

    async fn handle_adapter_event(&mut self, tag: SessionTag, event: AdapterEvent) {
        match (tag, event) {
            (SessionTag::Scan(id), AdapterEvent::DeviceFound(device)) => {
                self.on_device_found(id, device).await;
            }
            (SessionTag::Scan(id), AdapterEvent::ScanFailed(e)) if self.is_current_scan(id) => {
                warn!("BLE scan failed: {}", e);
                self.end_scan(ScanEndReason::Failed(e)).await;
            }
            (SessionTag::Advertise(id), AdapterEvent::AdvertiseStarted) => {
                self.on_advertise_started(id);
            }
            (SessionTag::Advertise(id), AdapterEvent::AdvertiseFailed(e))
                if self.is_current_advertise(id) =>
            {
                warn!("BLE advertising failed: {}", e);
                self.end_advertise(AdvertiseState::Failed(e)).await;
            }
            (SessionTag::Connection(id), event) if self.is_current_connection(id) => {
                self.on_gatt_event(event).await;
            }
            (tag, event) => {
                debug!("Dropping adapter event for inactive {:?}: {:?}", tag, event);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    async fn shutdown(&mut self) {
        self.end_scan(ScanEndReason::Shutdown).await;
        self.end_advertise(AdvertiseState::Stopped).await;

        if let Some(mut conn) = self.connection.take() {
            info!("Cancelling connection to {}", conn.address());
            self.adapter.disconnect(conn.handle()).await;
            conn.advance(ConnectionState::Disconnected);
            let address = conn.address().clone();
            self.publish_connection_state(&address, ConnectionState::Disconnected);
        }

        self.adapter.release().await;
        self.publish_role();
        debug!("BLE role controller released adapter");
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn next_session_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn sink(&self, tag: SessionTag) -> EventSink {
        EventSink::new(tag, self.adapter_tx.clone())
    }

    fn is_current_scan(&self, id: u64) -> bool {
        self.state.scan().is_some_and(|s| s.handle.id() == id)
    }

    fn is_current_advertise(&self, id: u64) -> bool {
        self.state.advertise().is_some_and(|s| s.handle.id() == id)
    }

    fn is_current_connection(&self, id: u64) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id() == id)
    }

    fn publish(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_role(&self) {
        let role = self.state.role();
        let changed = self.role_tx.send_if_modified(|current| {
            if *current == role {
                false
            } else {
                *current = role;
                true
            }
        });
        if changed {
            debug!("Role changed to {}", role);
            self.publish(ControllerEvent::RoleChanged(role));
        }
    }

    fn publish_connection_state(&self, address: &DeviceAddress, state: ConnectionState) {
        self.publish(ControllerEvent::Connection(ConnectionEvent::StateChanged {
            address: address.clone(),
            state,
        }));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
