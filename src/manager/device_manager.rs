// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection manager for a fleet of tags.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};

use crate::error::{Error, Result, TransportError};
use crate::event::{ConnectionStatus, DeviceAddress, DeviceEvent, EventBus};
use crate::transport::{DeviceHandle, Transport};

use super::connection::DeviceConnection;
use super::device_config::{ConfigStore, DeviceConfig, ManagerSettings};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(super) type Connection<T> = DeviceConnection<<T as Transport>::Handle>;

/// Set membership of the fleet. Guarded by one lock that is never held
/// across an `.await`.
pub(super) struct Registry<H> {
    /// Live connections, at most one per address.
    pub connections: HashMap<DeviceAddress, Arc<DeviceConnection<H>>>,
    /// Addresses with a connection task in progress.
    pub connecting: HashSet<DeviceAddress>,
    /// Addresses with a scheduled-read poller.
    pub polling: HashSet<DeviceAddress>,
    /// Last status reported per address.
    pub statuses: HashMap<DeviceAddress, ConnectionStatus>,
    /// Addresses owed a read once their pending reconnect completes.
    pub pending_reads: HashSet<DeviceAddress>,
    next_generation: u64,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
            connecting: HashSet::new(),
            polling: HashSet::new(),
            statuses: HashMap::new(),
            pending_reads: HashSet::new(),
            next_generation: 0,
        }
    }
}

pub(super) struct Inner<T: Transport> {
    pub transport: T,
    pub store: RwLock<ConfigStore>,
    pub registry: Mutex<Registry<T::Handle>>,
    pub events: EventBus,
    pub settings: ManagerSettings,
    pub shutdown: watch::Sender<bool>,
}

/// Keeps exactly one live connection per configured tag.
///
/// The manager runs one task per device that connects with unbounded
/// retry, enables the configured capabilities and registers the connection.
/// Devices with a notifying capability additionally get a listener task.
/// Reads go through [`read_once`](Self::read_once), which serializes link
/// access per device and sheds load beyond the admission limit.
///
/// Cloning is cheap; all clones share the same fleet.
///
/// # Examples
///
/// ```no_run
/// use tagfleet::{ConfigStore, ConnectionManager};
/// use tagfleet::transport::mock::MockTransport;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = ConfigStore::from_json(r#"[{"address": "12:34:56:78:12:34"}]"#)?;
///     let manager = ConnectionManager::new(MockTransport::new(), store);
///
///     let mut events = manager.subscribe();
///     manager.start();
///
///     while let Ok(event) = events.recv().await {
///         println!("{}", serde_json::to_string(&event)?);
///     }
///     Ok(())
/// }
/// ```
pub struct ConnectionManager<T: Transport> {
    pub(super) inner: Arc<Inner<T>>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a manager with default settings.
    #[must_use]
    pub fn new(transport: T, store: ConfigStore) -> Self {
        Self::with_settings(transport, store, ManagerSettings::default())
    }

    /// Creates a manager with custom settings.
    #[must_use]
    pub fn with_settings(transport: T, store: ConfigStore, settings: ManagerSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                transport,
                store: RwLock::new(store),
                registry: Mutex::new(Registry::default()),
                events: EventBus::with_capacity(settings.event_capacity),
                settings,
                shutdown,
            }),
        }
    }

    // =========================================================================
    // Subscription and inspection
    // =========================================================================

    /// Subscribes to status, sensor and key press events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the settings the manager was created with.
    #[must_use]
    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Returns the configured addresses in configuration order.
    #[must_use]
    pub fn device_addresses(&self) -> Vec<DeviceAddress> {
        self.inner.store.read().addresses()
    }

    /// Returns the configuration of a device.
    #[must_use]
    pub fn device_config(&self, address: &DeviceAddress) -> Option<Arc<DeviceConfig>> {
        self.inner.store.read().get(address)
    }

    /// Adds or replaces a device configuration.
    ///
    /// Does not connect; call [`connect`](Self::connect) or
    /// [`connect_all`](Self::connect_all). A live connection keeps the
    /// configuration it was established with until it reconnects.
    pub fn add_device(&self, config: DeviceConfig) {
        tracing::debug!(address = %config.address, name = %config.name, "Device configured");
        self.inner.store.write().upsert(config);
    }

    /// Returns the last status reported for a device.
    #[must_use]
    pub fn status(&self, address: &DeviceAddress) -> Option<ConnectionStatus> {
        self.inner.registry.lock().statuses.get(address).copied()
    }

    /// Returns true if the device has a live connection.
    #[must_use]
    pub fn is_connected(&self, address: &DeviceAddress) -> bool {
        self.inner.registry.lock().connections.contains_key(address)
    }

    /// Returns the addresses with a live connection.
    #[must_use]
    pub fn connected_addresses(&self) -> Vec<DeviceAddress> {
        self.inner
            .registry
            .lock()
            .connections
            .keys()
            .cloned()
            .collect()
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.registry.lock().connections.len()
    }

    /// Returns the number of reads in flight on a live connection.
    #[must_use]
    pub fn in_flight_reads(&self, address: &DeviceAddress) -> Option<usize> {
        self.connection(address).map(|conn| conn.in_flight())
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub(super) fn connection(&self, address: &DeviceAddress) -> Option<Arc<Connection<T>>> {
        self.inner.registry.lock().connections.get(address).cloned()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connects every device and starts scheduled reads for devices with a
    /// read interval.
    ///
    /// Returns the number of connection tasks started. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) -> usize {
        let started = self.connect_all();

        let scheduled: Vec<(DeviceAddress, Duration)> = self
            .inner
            .store
            .read()
            .iter()
            .filter_map(|config| Some((config.address.clone(), config.read_interval?)))
            .collect();

        for (address, interval) in scheduled {
            self.spawn_poller(address, interval);
        }

        started
    }

    /// Starts a connection task for every configured device that has
    /// neither a live connection nor a task in progress.
    ///
    /// Returns immediately with the number of tasks started. Must be called
    /// from within a Tokio runtime.
    pub fn connect_all(&self) -> usize {
        let configs: Vec<Arc<DeviceConfig>> = self.inner.store.read().iter().cloned().collect();

        let started = configs
            .into_iter()
            .filter(|config| self.try_spawn_connection(Arc::clone(config)))
            .count();

        tracing::info!(started, "Connecting devices");
        started
    }

    /// Starts a connection task for one configured device.
    ///
    /// Returns `Ok(false)` if the device is already connected or connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the address is not configured.
    pub fn connect(&self, address: &DeviceAddress) -> Result<bool> {
        let config = self
            .device_config(address)
            .ok_or_else(|| Error::DeviceNotFound(address.clone()))?;
        Ok(self.try_spawn_connection(config))
    }

    /// Drops the live connection of a device and connects it again.
    ///
    /// Emits `Disconnected` followed by the usual connection statuses. With
    /// `read_on_connect` one read is performed right after `Connected`.
    /// Returns false if the device is not connected or a reconnect is
    /// already in progress; concurrent requests collapse into one cycle.
    pub fn reconnect(&self, address: &DeviceAddress, read_on_connect: bool) -> bool {
        self.schedule_reconnect(address, None, read_on_connect)
    }

    /// Reconnects after `conn` failed, unless it was already replaced.
    ///
    /// A read requested while a reconnect is already in progress is
    /// performed once that reconnect completes.
    pub(super) fn reconnect_failed(&self, conn: &Connection<T>, read_on_connect: bool) -> bool {
        self.schedule_reconnect(conn.address(), Some(conn.generation), read_on_connect)
    }

    /// Stops the fleet.
    ///
    /// Pending connection attempts, listeners and scheduled reads exit and
    /// every live handle is disconnected. No `Disconnected` status is
    /// emitted for devices that were connected.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);

        let retired: Vec<Arc<Connection<T>>> = {
            let mut registry = self.inner.registry.lock();
            let retired: Vec<_> = registry.connections.drain().map(|(_, conn)| conn).collect();
            for conn in &retired {
                registry
                    .statuses
                    .insert(conn.address().clone(), ConnectionStatus::Disconnected);
            }
            registry.polling.clear();
            registry.pending_reads.clear();
            retired
        };

        tracing::info!(connections = retired.len(), "Stopping connection manager");

        for conn in retired {
            conn.close().await;
        }
    }

    // =========================================================================
    // Connection tasks
    // =========================================================================

    fn try_spawn_connection(&self, config: Arc<DeviceConfig>) -> bool {
        if self.is_shut_down() {
            return false;
        }

        {
            let mut registry = self.inner.registry.lock();
            if registry.connections.contains_key(&config.address)
                || !registry.connecting.insert(config.address.clone())
            {
                tracing::debug!(address = %config.address, "Already connected or connecting");
                return false;
            }
        }

        self.spawn_connection(config, None, false);
        true
    }

    fn schedule_reconnect(
        &self,
        address: &DeviceAddress,
        generation: Option<u64>,
        read_on_connect: bool,
    ) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let previous = {
            let mut registry = self.inner.registry.lock();
            if registry.connecting.contains(address) {
                if read_on_connect {
                    registry.pending_reads.insert(address.clone());
                }
                tracing::debug!(%address, read_on_connect, "Reconnect already in progress");
                return false;
            }

            let Entry::Occupied(current) = registry.connections.entry(address.clone()) else {
                return false;
            };
            if generation.is_some_and(|g| g != current.get().generation) {
                tracing::debug!(%address, "Ignoring failure of a replaced connection");
                return false;
            }

            let previous = current.remove();
            registry.connecting.insert(address.clone());
            previous
        };
        previous.mark_closed();

        let config = self
            .device_config(address)
            .unwrap_or_else(|| Arc::clone(&previous.config));

        tracing::info!(%address, name = %config.name, read_on_connect, "Reconnecting");
        self.emit_status(&config, ConnectionStatus::Disconnected);
        self.spawn_connection(config, Some(previous), read_on_connect);
        true
    }

    fn spawn_connection(
        &self,
        config: Arc<DeviceConfig>,
        previous: Option<Arc<Connection<T>>>,
        read_on_connect: bool,
    ) {
        tokio::spawn(self.clone().connection_task(config, previous, read_on_connect));
    }

    fn connection_task(
        self,
        config: Arc<DeviceConfig>,
        previous: Option<Arc<Connection<T>>>,
        read_on_connect: bool,
    ) -> Task {
        Box::pin(async move {
            // The old handle is released before a new one is opened
            if let Some(previous) = previous {
                previous.close().await;
            }
            self.run_connection(config, read_on_connect).await;
        })
    }

    /// Connects with unbounded retry until the device is registered or the
    /// manager shuts down.
    async fn run_connection(&self, config: Arc<DeviceConfig>, read_on_connect: bool) {
        let address = config.address.clone();
        let mut shutdown = self.inner.shutdown.subscribe();

        while !self.is_shut_down() {
            self.emit_status(&config, ConnectionStatus::Connecting);

            let error = match self.establish(&config).await {
                Ok(handle) => match self.register(&config, handle) {
                    Ok(conn) => {
                        self.on_connected(conn, read_on_connect).await;
                        return;
                    }
                    Err(mut handle) => {
                        handle.disconnect().await;
                        break;
                    }
                },
                Err(error) => error,
            };

            tracing::warn!(%address, name = %config.name, %error, "Connection attempt failed");
            self.emit_status(&config, ConnectionStatus::Retrying);
            self.clear_stale(&address).await;

            let retry = tokio::select! {
                () = tokio::time::sleep(self.inner.settings.backoff) => true,
                _ = shutdown.changed() => false,
            };
            if !retry {
                break;
            }
        }

        tracing::debug!(%address, "Connection task stopped by shutdown");
        self.inner.registry.lock().connecting.remove(&address);
    }

    /// Opens the link and enables every configured capability.
    async fn establish(
        &self,
        config: &DeviceConfig,
    ) -> std::result::Result<T::Handle, TransportError> {
        let mut handle = self.inner.transport.connect(&config.address).await?;
        self.emit_status(config, ConnectionStatus::Enabling);

        for capability in config.capabilities.iter() {
            if let Err(error) = handle.enable(capability).await {
                handle.disconnect().await;
                return Err(error);
            }
            tracing::debug!(address = %config.address, %capability, "Capability enabled");
        }

        if config.capabilities.has_notifying() {
            handle.set_notification_handler(self.notification_handler(config));
        }

        Ok(handle)
    }

    /// Registers a fresh connection, or hands the handle back if the
    /// manager shut down in the meantime.
    fn register(
        &self,
        config: &Arc<DeviceConfig>,
        handle: T::Handle,
    ) -> std::result::Result<Arc<Connection<T>>, T::Handle> {
        let mut registry = self.inner.registry.lock();
        registry.connecting.remove(&config.address);
        if self.is_shut_down() {
            return Err(handle);
        }

        registry.next_generation += 1;
        let conn = Arc::new(DeviceConnection::new(
            Arc::clone(config),
            registry.next_generation,
            handle,
        ));
        registry
            .connections
            .insert(config.address.clone(), Arc::clone(&conn));
        Ok(conn)
    }

    async fn on_connected(&self, conn: Arc<Connection<T>>, read_on_connect: bool) {
        let config = Arc::clone(&conn.config);
        tracing::info!(address = %config.address, name = %config.name, "Connected");
        self.emit_status(&config, ConnectionStatus::Connected);

        if config.capabilities.has_notifying() {
            self.spawn_listener(conn);
        }

        let pending = self
            .inner
            .registry
            .lock()
            .pending_reads
            .remove(&config.address);

        if (read_on_connect || pending)
            && let Err(error) = self.read_once(&config.address).await
        {
            tracing::error!(address = %config.address, %error, "Read after reconnect failed");
        }
    }

    /// Drops a connection left registered for an address that is retrying.
    async fn clear_stale(&self, address: &DeviceAddress) {
        let stale = self.inner.registry.lock().connections.remove(address);
        if let Some(stale) = stale {
            tracing::debug!(%address, "Dropping stale connection");
            stale.close().await;
        }
    }

    pub(super) fn emit_status(&self, config: &DeviceConfig, status: ConnectionStatus) {
        self.inner
            .registry
            .lock()
            .statuses
            .insert(config.address.clone(), status);

        tracing::debug!(address = %config.address, %status, "Status changed");
        self.inner.events.publish(DeviceEvent::status_changed(
            status,
            config.name.clone(),
            config.address.clone(),
        ));
    }
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("ConnectionManager")
            .field("devices", &self.inner.store.read().len())
            .field("connected", &registry.connections.len())
            .field("connecting", &registry.connecting.len())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}
