//! [`BleTransport`] over the platform Bluetooth stack via btleplug.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::transport::{
    AdapterState, BleTransport, DiscoveredScale, DiscoveryStream, NotificationStream,
};
use crate::util::create_identifier;

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for enabling or disabling notifications.
const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for closing a connection.
const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications buffered between the adapter and the session.
const NOTIFICATION_BUFFER: usize = 32;

/// Timeouts applied to every btleplug call.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use heightscale_core::btle::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .discovery_timeout(Duration::from_secs(15));
/// assert_eq!(config.connection_timeout, Duration::from_secs(20));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for enabling or disabling notifications.
    pub subscribe_timeout: Duration,
    /// Timeout for closing a connection.
    pub disconnect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the subscribe/unsubscribe timeout.
    #[must_use]
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Set the disconnect timeout.
    #[must_use]
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Bluetooth transport backed by the first system adapter.
///
/// Peripherals become connectable once a scan has reported them; the
/// transport keeps them keyed by upper-cased identifier.
pub struct BtleplugTransport {
    adapter: Adapter,
    peripherals: Arc<RwLock<HashMap<String, Peripheral>>>,
    /// Notification forwarding tasks, aborted on unsubscribe/disconnect/shutdown.
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BtleplugTransport {
    /// Open the first adapter with default timeouts.
    pub async fn new() -> Result<Self> {
        Self::with_config(ConnectionConfig::default()).await
    }

    /// Open the first adapter with custom timeouts.
    pub async fn with_config(config: ConnectionConfig) -> Result<Self> {
        let adapter = get_adapter().await?;
        Ok(Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            forwarders: Mutex::new(HashMap::new()),
            config,
        })
    }

    async fn peripheral(&self, address: &str) -> Result<Peripheral> {
        self.peripherals
            .read()
            .await
            .get(&key(address))
            .cloned()
            .ok_or_else(|| Error::device_not_found(address))
    }

    async fn abort_forwarder(&self, address: &str) {
        if let Some(handle) = self.forwarders.lock().await.remove(&key(address)) {
            handle.abort();
        }
    }
}

fn key(address: &str) -> String {
    address.to_ascii_uppercase()
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), peripheral.services().len()))
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn adapter_state(&self) -> AdapterState {
        match self.adapter.adapter_state().await {
            Ok(CentralState::PoweredOn) => AdapterState::PoweredOn,
            Ok(CentralState::PoweredOff) => AdapterState::PoweredOff,
            Ok(_) => AdapterState::Unknown,
            Err(e) => {
                debug!(error = %e, "adapter state unavailable");
                AdapterState::Unknown
            }
        }
    }

    async fn request_permissions(&self) -> bool {
        // Desktop stacks grant access implicitly; a refused adapter query is the denial signal.
        match self.adapter.adapter_info().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Bluetooth adapter refused access");
                false
            }
        }
    }

    async fn start_scan(&self) -> Result<DiscoveryStream> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        debug!("scan started");

        let adapter = self.adapter.clone();
        let peripherals = Arc::clone(&self.peripherals);
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = Arc::clone(&peripherals);
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                let address = create_identifier(&peripheral.address().to_string(), &id);
                let (name, rssi) = peripheral
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .map(|p| (p.local_name, p.rssi))
                    .unwrap_or_default();
                peripherals.write().await.insert(key(&address), peripheral);
                Some(DiscoveredScale {
                    address,
                    name,
                    rssi,
                })
            }
        });

        Ok(Box::pin(stream))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        debug!("scan stopped");
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(connect_timeout = ?self.config.connection_timeout))]
    async fn connect(&self, address: &str) -> Result<()> {
        let peripheral = self.peripheral(address).await?;
        if peripheral.is_connected().await.unwrap_or(false) {
            debug!("already connected");
            return Ok(());
        }

        info!("Connecting to scale...");
        timeout(self.config.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to scale", self.config.connection_timeout))?
            .map_err(|e| {
                Error::connection_failed(
                    Some(address.to_string()),
                    ConnectionFailureReason::BleError(e.to_string()),
                )
            })?;
        info!("Connected!");
        Ok(())
    }

    async fn discover(&self, address: &str, service: Uuid, characteristic: Uuid) -> Result<()> {
        let peripheral = self.peripheral(address).await?;

        info!("Discovering services...");
        timeout(self.config.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))??;

        let services = peripheral.services();
        debug!("Found {} services", services.len());

        let Some(body_composition) = services.iter().find(|s| s.uuid == service) else {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::DiscoveryFailed(format!(
                    "service {} not advertised ({} services)",
                    service,
                    services.len()
                )),
            ));
        };

        if !body_composition
            .characteristics
            .iter()
            .any(|c| c.uuid == characteristic)
        {
            return Err(Error::characteristic_not_found(
                characteristic.to_string(),
                services.len(),
            ));
        }
        Ok(())
    }

    async fn subscribe(&self, address: &str, characteristic: Uuid) -> Result<NotificationStream> {
        let peripheral = self.peripheral(address).await?;
        let target = find_characteristic(&peripheral, characteristic)?;

        timeout(self.config.subscribe_timeout, peripheral.subscribe(&target))
            .await
            .map_err(|_| Error::timeout("subscribe", self.config.subscribe_timeout))??;

        let mut notifications = peripheral.notifications().await?;
        // Link loss surfaces as DeviceDisconnected sooner than the notification stream closes.
        let mut events = self.adapter.events().await?;
        let peripheral_id = peripheral.id();
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == characteristic => {
                            if tx.send(n.value).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!("notification stream closed");
                            break;
                        }
                    },
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            warn!("scale disconnected");
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        if let Some(previous) = self.forwarders.lock().await.insert(key(address), handle) {
            previous.abort();
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, address: &str, characteristic: Uuid) -> Result<()> {
        self.abort_forwarder(address).await;

        let peripheral = self.peripheral(address).await?;
        if !peripheral.is_connected().await.unwrap_or(false) {
            return Ok(());
        }
        let target = find_characteristic(&peripheral, characteristic)?;
        timeout(self.config.subscribe_timeout, peripheral.unsubscribe(&target))
            .await
            .map_err(|_| Error::timeout("unsubscribe", self.config.subscribe_timeout))??;
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        self.abort_forwarder(address).await;

        let Ok(peripheral) = self.peripheral(address).await else {
            return Ok(());
        };
        if peripheral.is_connected().await.unwrap_or(false) {
            info!(address, "Disconnecting from scale...");
            timeout(self.config.disconnect_timeout, peripheral.disconnect())
                .await
                .map_err(|_| Error::timeout("disconnect", self.config.disconnect_timeout))??;
        }
        Ok(())
    }

    async fn shutdown(&self) {
        for (_, handle) in self.forwarders.lock().await.drain() {
            handle.abort();
        }
        if let Err(e) = self.adapter.stop_scan().await {
            debug!(error = %e, "stop_scan during shutdown");
        }

        let peripherals: Vec<Peripheral> =
            self.peripherals.write().await.drain().map(|(_, p)| p).collect();
        for peripheral in peripherals {
            if peripheral.is_connected().await.unwrap_or(false) {
                let result = timeout(self.config.disconnect_timeout, peripheral.disconnect()).await;
                if !matches!(result, Ok(Ok(()))) {
                    warn!("peripheral did not disconnect cleanly during shutdown");
                }
            }
        }
        debug!("transport shut down");
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        // Best effort: we can't await here, so abort forwarders if the lock is free.
        if let Ok(mut forwarders) = self.forwarders.try_lock() {
            for (_, handle) in forwarders.drain() {
                handle.abort();
            }
        }
    }
}
