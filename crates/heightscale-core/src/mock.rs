//! In-memory [`BleTransport`] for tests.
//!
//! [`MockTransport`] scripts what the adapter reports and lets a test push
//! notification payloads into an active subscription, so the whole session
//! state machine can run without hardware.
//!
//! # Features
//!
//! - **Scripted discovery**: advertisements replayed on every scan
//! - **Failure injection**: make scan start, connect, discovery or subscribe fail
//! - **Link loss**: end the notification stream as a dropped connection would
//! - **Counters**: observe how often the session called into the transport

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::transport::{
    AdapterState, BleTransport, DiscoveredScale, DiscoveryStream, NotificationStream,
};

/// A scripted Bluetooth adapter.
///
/// # Example
///
/// ```
/// use heightscale_core::{BleTransport, MockTransport};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::builder()
///         .advertise("0C:95:41:CB:23:FF", Some("MIBFS"))
///         .build();
///
///     transport.connect("0C:95:41:CB:23:FF").await.unwrap();
///     assert_eq!(transport.connect_count(), 1);
/// }
/// ```
pub struct MockTransport {
    adapter_state: RwLock<AdapterState>,
    permissions: AtomicBool,
    advertisements: RwLock<Vec<DiscoveredScale>>,
    connected: RwLock<Option<String>>,
    notifier: RwLock<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    fail_scan: AtomicBool,
    fail_connect: AtomicBool,
    fail_discovery: AtomicBool,
    fail_subscribe: AtomicBool,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    connects: AtomicU32,
    disconnects: AtomicU32,
    scans_started: AtomicU32,
    scans_stopped: AtomicU32,
    subscriptions: AtomicU32,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("connects", &self.connects.load(Ordering::Relaxed))
            .field("disconnects", &self.disconnects.load(Ordering::Relaxed))
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransportBuilder::default().build()
    }
}

impl MockTransport {
    /// Start building a scripted transport.
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::default()
    }

    /// Change what the adapter reports as its power state.
    pub async fn set_adapter_state(&self, state: AdapterState) {
        *self.adapter_state.write().await = state;
    }

    /// Answer future permission requests with `granted`.
    pub fn set_permissions(&self, granted: bool) {
        self.permissions.store(granted, Ordering::SeqCst);
    }

    /// Add an advertiser seen by subsequent scans.
    pub async fn add_advertisement(&self, address: &str, name: Option<&str>) {
        self.advertisements.write().await.push(advertised(address, name));
    }

    /// Make `start_scan` fail.
    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Make `connect` fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `discover` fail as if the measurement service were missing.
    pub fn set_fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Make `subscribe` fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Delay every connect attempt.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Deliver a notification payload to the active subscription.
    ///
    /// Returns `false` if nothing is subscribed.
    pub async fn notify(&self, payload: &[u8]) -> bool {
        match self.notifier.read().await.as_ref() {
            Some(tx) => tx.send(payload.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Simulate link loss: the notification stream ends and the link is gone.
    pub async fn drop_link(&self) {
        self.notifier.write().await.take();
        self.connected.write().await.take();
    }

    /// Whether a subscription is currently active.
    pub async fn is_subscribed(&self) -> bool {
        self.notifier.read().await.is_some()
    }

    /// Address of the currently connected device.
    pub async fn connected_address(&self) -> Option<String> {
        self.connected.read().await.clone()
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of `disconnect` calls that closed a link.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::Relaxed)
    }

    /// Number of scans started.
    pub fn scans_started(&self) -> u32 {
        self.scans_started.load(Ordering::Relaxed)
    }

    /// Number of `stop_scan` calls.
    pub fn scans_stopped(&self) -> u32 {
        self.scans_stopped.load(Ordering::Relaxed)
    }

    /// Number of successful `subscribe` calls.
    pub fn subscription_count(&self) -> u32 {
        self.subscriptions.load(Ordering::Relaxed)
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn require_link(&self, address: &str) -> Result<()> {
        match self.connected.read().await.as_deref() {
            Some(current) if current.eq_ignore_ascii_case(address) => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }
}

fn advertised(address: &str, name: Option<&str>) -> DiscoveredScale {
    DiscoveredScale {
        address: address.to_string(),
        name: name.map(String::from),
        rssi: Some(-60),
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn adapter_state(&self) -> AdapterState {
        *self.adapter_state.read().await
    }

    async fn request_permissions(&self) -> bool {
        self.permissions.load(Ordering::SeqCst)
    }

    async fn start_scan(&self) -> Result<DiscoveryStream> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                None,
                ConnectionFailureReason::Other("mock scan failure".to_string()),
            ));
        }
        self.scans_started.fetch_add(1, Ordering::Relaxed);
        let seen = self.advertisements.read().await.clone();
        // A real scan never ends on its own; only stop_scan or a timeout does.
        Ok(Box::pin(stream::iter(seen).chain(stream::pending())))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scans_stopped.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::BleError("mock connect failure".to_string()),
            ));
        }
        *self.connected.write().await = Some(address.to_string());
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn discover(&self, address: &str, service: Uuid, _characteristic: Uuid) -> Result<()> {
        self.require_link(address).await?;
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::DiscoveryFailed(format!("service {} missing", service)),
            ));
        }
        Ok(())
    }

    async fn subscribe(&self, address: &str, _characteristic: Uuid) -> Result<NotificationStream> {
        self.require_link(address).await?;
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                Some(address.to_string()),
                ConnectionFailureReason::Other("mock subscribe failure".to_string()),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notifier.write().await = Some(tx);
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        })))
    }

    async fn unsubscribe(&self, _address: &str, _characteristic: Uuid) -> Result<()> {
        self.notifier.write().await.take();
        Ok(())
    }

    async fn disconnect(&self, _address: &str) -> Result<()> {
        self.notifier.write().await.take();
        if self.connected.write().await.take().is_some() {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.notifier.write().await.take();
        self.connected.write().await.take();
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Builder for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    adapter_state: AdapterState,
    permissions: bool,
    advertisements: Vec<DiscoveredScale>,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            adapter_state: AdapterState::PoweredOn,
            permissions: true,
            advertisements: Vec::new(),
        }
    }
}

impl MockTransportBuilder {
    /// Initial adapter power state (default: powered on).
    #[must_use]
    pub fn adapter_state(mut self, state: AdapterState) -> Self {
        self.adapter_state = state;
        self
    }

    /// Refuse Bluetooth permission.
    #[must_use]
    pub fn deny_permissions(mut self) -> Self {
        self.permissions = false;
        self
    }

    /// Add an advertiser every scan will report, in insertion order.
    #[must_use]
    pub fn advertise(mut self, address: &str, name: Option<&str>) -> Self {
        self.advertisements.push(advertised(address, name));
        self
    }

    /// Build the transport.
    pub fn build(self) -> MockTransport {
        MockTransport {
            adapter_state: RwLock::new(self.adapter_state),
            permissions: AtomicBool::new(self.permissions),
            advertisements: RwLock::new(self.advertisements),
            connected: RwLock::new(None),
            notifier: RwLock::new(None),
            fail_scan: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_discovery: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            connect_latency_ms: AtomicU64::new(0),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            scans_started: AtomicU32::new(0),
            scans_stopped: AtomicU32::new(0),
            subscriptions: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heightscale_types::uuids::{BODY_COMPOSITION_MEASUREMENT, BODY_COMPOSITION_SERVICE};

    const SCALE: &str = "0C:95:41:CB:23:FF";

    #[tokio::test]
    async fn test_scan_replays_advertisements() {
        let transport = MockTransport::builder()
            .advertise("AA:BB:CC:DD:EE:FF", None)
            .advertise(SCALE, Some("MIBFS"))
            .build();

        let seen: Vec<_> = transport.start_scan().await.unwrap().take(2).collect().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].address, SCALE);
        assert_eq!(transport.scans_started(), 1);
    }

    #[tokio::test]
    async fn test_discover_requires_link() {
        let transport = MockTransport::default();
        let result = transport
            .discover(SCALE, BODY_COMPOSITION_SERVICE, BODY_COMPOSITION_MEASUREMENT)
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_notify_reaches_subscription() {
        let transport = MockTransport::default();
        transport.connect(SCALE).await.unwrap();
        let mut stream = transport
            .subscribe(SCALE, BODY_COMPOSITION_MEASUREMENT)
            .await
            .unwrap();

        assert!(transport.notify(&[1, 2, 3]).await);
        assert_eq!(stream.next().await, Some(vec![1, 2, 3]));

        transport.drop_link().await;
        assert_eq!(stream.next().await, None);
        assert!(!transport.notify(&[4]).await);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let transport = MockTransport::default();
        transport.set_fail_connect(true);
        assert!(transport.connect(SCALE).await.is_err());
        assert_eq!(transport.connect_count(), 0);

        transport.set_fail_connect(false);
        transport.connect(SCALE).await.unwrap();
        transport.set_fail_discovery(true);
        let err = transport
            .discover(SCALE, BODY_COMPOSITION_SERVICE, BODY_COMPOSITION_MEASUREMENT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("service discovery failed"));
    }

    #[tokio::test]
    async fn test_disconnect_counts_only_open_links() {
        let transport = MockTransport::default();
        transport.disconnect(SCALE).await.unwrap();
        assert_eq!(transport.disconnect_count(), 0);

        transport.connect(SCALE).await.unwrap();
        transport.disconnect(SCALE).await.unwrap();
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(transport.connected_address().await, None);
    }
}
