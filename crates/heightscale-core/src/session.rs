//! The scale session: discovery, connection and measurement monitoring.
//!
//! One [`ScaleSession`] owns the Bluetooth transport for the whole process
//! and is shared as a [`SharedSession`]. Its lifecycle is published as a
//! [`SessionState`] on a watch channel:
//!
//! ```text
//! PoweredUnknown / PoweredOff ──adapter on──▶ Idle ──scan──▶ Scanning ──▶ Idle
//!                                              │
//!                                              └─connect─▶ Connecting ─▶ Connected ⇄ Monitoring
//!                                                               │            │           │
//!                                                               └── failure / disconnect / link loss ──▶ Idle
//! any state ──teardown──▶ Terminated
//! ```
//!
//! Every operation returns a [`Result`] instead of panicking, and the state
//! never claims a connection the transport does not hold.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use heightscale_types::uuids::{BODY_COMPOSITION_MEASUREMENT, BODY_COMPOSITION_SERVICE};
use heightscale_types::{Measurement, ScaleAddress, TargetBmi, decode};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::transport::{AdapterState, BleTransport, DiscoveredScale, NotificationStream};

/// Default time a scan waits for the target scale.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives every measurement the session accepts.
#[async_trait]
pub trait MeasurementSink: Send + Sync + 'static {
    /// Called once per accepted measurement, in notification order.
    async fn accept(&self, measurement: Measurement);
}

#[async_trait]
impl MeasurementSink for mpsc::Sender<Measurement> {
    async fn accept(&self, measurement: Measurement) {
        if self.send(measurement).await.is_err() {
            debug!("measurement receiver dropped");
        }
    }
}

/// Observable lifecycle of a [`ScaleSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Adapter state not known yet.
    PoweredUnknown,
    /// Bluetooth is off.
    PoweredOff,
    /// Adapter ready, no link.
    Idle,
    /// Looking for the configured scale.
    Scanning,
    /// Opening the link and discovering services.
    Connecting,
    /// Linked to the scale, not subscribed.
    Connected,
    /// Subscribed to measurement notifications.
    Monitoring,
    /// Torn down; the session cannot be used again.
    Terminated,
}

impl SessionState {
    /// Whether a link to the scale is held.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Monitoring)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PoweredUnknown => "powered-unknown",
            Self::PoweredOff => "powered-off",
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Monitoring => "monitoring",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What the session targets and how it decodes.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The one scale this session connects to.
    pub address: ScaleAddress,
    /// BMI used to derive height from weight.
    pub target_bmi: TargetBmi,
    /// How long `connect` scans before giving up.
    pub scan_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: ScaleAddress::default(),
            target_bmi: TargetBmi::default(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Set the target address.
    #[must_use]
    pub fn address(mut self, address: ScaleAddress) -> Self {
        self.address = address;
        self
    }

    /// Set the target BMI.
    #[must_use]
    pub fn target_bmi(mut self, target_bmi: TargetBmi) -> Self {
        self.target_bmi = target_bmi;
        self
    }

    /// Set the connect scan timeout.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }
}

/// A session shared by every component of the process.
pub type SharedSession<T> = Arc<ScaleSession<T>>;

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Link {
    device: Option<String>,
    monitor: Option<Monitor>,
}

struct Inner<T> {
    transport: T,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    scanning: AtomicBool,
    connecting: AtomicBool,
    scan_cancel: Mutex<Option<CancellationToken>>,
    link: Mutex<Link>,
    shutdown: CancellationToken,
}

/// Clears a single-flight flag when the operation that set it ends.
struct FlagGuard<'a>(&'a AtomicBool);

impl FlagGuard<'_> {
    fn acquire(flag: &AtomicBool, busy: Error) -> Result<FlagGuard<'_>> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| busy)?;
        Ok(FlagGuard(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the Bluetooth transport and drives the scale lifecycle.
///
/// Only one scan runs at a time: a `scan`, `survey` or `connect` issued
/// while another scan is in flight fails with [`Error::ScanInProgress`]
/// and leaves the running scan untouched. Likewise only one `connect`
/// runs at a time; an overlapping call fails with
/// [`Error::ConnectInProgress`].
pub struct ScaleSession<T: BleTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: BleTransport> fmt::Debug for ScaleSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaleSession")
            .field("address", &self.inner.config.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: BleTransport> ScaleSession<T> {
    /// Create a session over `transport`. No Bluetooth calls are made yet.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::PoweredUnknown);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                scanning: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                scan_cancel: Mutex::new(None),
                link: Mutex::new(Link::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Create a session already wrapped for sharing.
    pub fn shared(transport: T, config: SessionConfig) -> SharedSession<T> {
        Arc::new(Self::new(transport, config))
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether a link to the scale is held.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Query the adapter and fold its power state into the session state.
    pub async fn adapter_state(&self) -> AdapterState {
        if self.inner.shutdown.is_cancelled() {
            return AdapterState::Unknown;
        }
        self.inner.observe_adapter().await
    }

    /// True iff the adapter reports powered on.
    pub async fn is_adapter_ready(&self) -> bool {
        self.adapter_state().await == AdapterState::PoweredOn
    }

    /// Ask the platform for Bluetooth access.
    pub async fn request_permissions(&self) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }
        self.inner.transport.request_permissions().await
    }

    /// Scan until the configured scale is seen or `timeout` elapses.
    ///
    /// Addresses are compared case-insensitively. Returns `Ok(None)` on timeout.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.inner.config.address))]
    pub async fn scan(&self, timeout: Duration) -> Result<Option<DiscoveredScale>> {
        let target = &self.inner.config.address;
        let found = self
            .inner
            .scan_with(timeout, |seen| target.matches(&seen.address).then_some(seen))
            .await?;
        match &found {
            Some(device) => info!(rssi = ?device.rssi, "found scale"),
            None => debug!("scale not seen before timeout"),
        }
        Ok(found)
    }

    /// Collect every distinct advertiser seen within `duration`.
    pub async fn survey(&self, duration: Duration) -> Result<Vec<DiscoveredScale>> {
        let mut found: Vec<DiscoveredScale> = Vec::new();
        self.inner
            .scan_with(duration, |seen| {
                match found
                    .iter_mut()
                    .find(|known| known.address.eq_ignore_ascii_case(&seen.address))
                {
                    Some(known) => {
                        if seen.name.is_some() {
                            known.name = seen.name;
                        }
                        if seen.rssi.is_some() {
                            known.rssi = seen.rssi;
                        }
                    }
                    None => found.push(seen),
                }
                None::<()>
            })
            .await?;
        debug!(count = found.len(), "survey finished");
        Ok(found)
    }

    /// Find the scale, connect, and confirm the measurement characteristic.
    ///
    /// Succeeds immediately if already connected. On any failure the
    /// session is back in [`SessionState::Idle`] with no link held.
    #[tracing::instrument(level = "info", skip_all, fields(address = %self.inner.config.address))]
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let _guard = FlagGuard::acquire(&inner.connecting, Error::ConnectInProgress)?;
        if inner.link.lock().await.device.is_some() {
            debug!("already connected");
            return Ok(());
        }

        let limit = inner.config.scan_timeout;
        let Some(device) = self.scan(limit).await? else {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: limit,
            }));
        };

        inner.transition(&[SessionState::Idle], SessionState::Connecting);
        if let Err(e) = inner.open_link(&device.address).await {
            warn!(error = %e, "connection failed");
            inner.transition(&[SessionState::Connecting], SessionState::Idle);
            return Err(e);
        }

        let mut link = inner.link.lock().await;
        if self.state() != SessionState::Connecting {
            // Disconnected or torn down while the link was opening.
            let owned = link.device.as_deref() == Some(device.address.as_str());
            drop(link);
            if !owned {
                inner.close_quietly(&device.address).await;
            }
            return Err(if inner.shutdown.is_cancelled() {
                Error::SessionClosed
            } else {
                Error::Cancelled
            });
        }
        link.device = Some(device.address.clone());
        inner.transition(&[SessionState::Connecting], SessionState::Connected);
        info!("Connected to scale");
        Ok(())
    }

    /// Subscribe to measurements and forward accepted ones to `sink`.
    ///
    /// Only one subscription may be active; a second call fails with
    /// [`Error::AlreadyMonitoring`].
    pub async fn start_monitoring<S: MeasurementSink>(&self, sink: S) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let mut link = inner.link.lock().await;
        let Some(address) = link.device.clone() else {
            return Err(Error::NotConnected);
        };
        if link.monitor.is_some() {
            return Err(Error::AlreadyMonitoring);
        }

        let notifications = inner
            .transport
            .subscribe(&address, BODY_COMPOSITION_MEASUREMENT)
            .await?;
        let cancel = inner.shutdown.child_token();
        let handle = tokio::spawn(run_monitor(
            Arc::clone(inner),
            notifications,
            sink,
            cancel.clone(),
        ));
        link.monitor = Some(Monitor { cancel, handle });
        inner.transition(&[SessionState::Connected], SessionState::Monitoring);
        info!("Monitoring measurements");
        Ok(())
    }

    /// Cancel the subscription. Does nothing when not monitoring.
    pub async fn stop_monitoring(&self) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let (monitor, address) = {
            let mut link = inner.link.lock().await;
            let Some(monitor) = link.monitor.take() else {
                return Ok(());
            };
            monitor.cancel.cancel();
            (monitor, link.device.clone())
        };
        join_monitor(monitor.handle).await;

        if let Some(address) = address {
            inner.transition(&[SessionState::Monitoring], SessionState::Connected);
            inner
                .transport
                .unsubscribe(&address, BODY_COMPOSITION_MEASUREMENT)
                .await?;
        }
        debug!("monitoring stopped");
        Ok(())
    }

    /// Release the link and return to [`SessionState::Idle`].
    ///
    /// Cancels an in-flight scan and any subscription. Safe in every state.
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        if let Some(scan) = inner.scan_cancel.lock().await.take() {
            scan.cancel();
        }

        let (device, monitor) = {
            let mut link = inner.link.lock().await;
            let monitor = link.monitor.take();
            if let Some(monitor) = &monitor {
                monitor.cancel.cancel();
            }
            let device = link.device.take();
            inner.settle(SessionState::Idle);
            (device, monitor)
        };

        if let Some(monitor) = monitor {
            join_monitor(monitor.handle).await;
        }
        if let Some(address) = device {
            inner.transport.disconnect(&address).await?;
            info!(address, "Disconnected from scale");
        }
        Ok(())
    }

    /// Release every adapter resource. The session is unusable afterwards.
    pub async fn teardown(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }
        inner.shutdown.cancel();
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "disconnect during teardown failed");
        }
        inner.transport.shutdown().await;
        inner.state.send_replace(SessionState::Terminated);
        info!("Session torn down");
    }
}

impl<T: BleTransport> Drop for ScaleSession<T> {
    fn drop(&mut self) {
        // Stops scans and monitor tasks; the link itself needs teardown().
        self.inner.shutdown.cancel();
    }
}

impl<T: BleTransport> Inner<T> {
    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current != to && from.contains(current) {
                *current = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(state = %to, "session state changed");
        }
        changed
    }

    /// Move to `to` from any state except `Terminated`.
    fn settle(&self, to: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == to || *current == SessionState::Terminated {
                false
            } else {
                *current = to;
                true
            }
        });
    }

    async fn observe_adapter(&self) -> AdapterState {
        let adapter = self.transport.adapter_state().await;
        let next = match adapter {
            AdapterState::PoweredOn => SessionState::Idle,
            AdapterState::PoweredOff => SessionState::PoweredOff,
            AdapterState::Unknown => SessionState::PoweredUnknown,
        };
        self.transition(
            &[
                SessionState::PoweredUnknown,
                SessionState::PoweredOff,
                SessionState::Idle,
            ],
            next,
        );
        adapter
    }

    async fn ensure_ready(&self) -> Result<()> {
        let adapter = self.observe_adapter().await;
        if adapter != AdapterState::PoweredOn {
            return Err(Error::AdapterNotReady(adapter));
        }
        if !self.transport.request_permissions().await {
            return Err(Error::PermissionDenied);
        }
        Ok(())
    }

    fn begin_scan(&self) -> Result<FlagGuard<'_>> {
        FlagGuard::acquire(&self.scanning, Error::ScanInProgress)
    }

    /// Run one scan, handing each advertisement to `visit` until it yields
    /// a value or `limit` elapses.
    async fn scan_with<R, F>(&self, limit: Duration, mut visit: F) -> Result<Option<R>>
    where
        F: FnMut(DiscoveredScale) -> Option<R> + Send,
        R: Send,
    {
        self.ensure_open()?;
        let _guard = self.begin_scan()?;
        self.ensure_ready().await?;

        let cancel = self.shutdown.child_token();
        *self.scan_cancel.lock().await = Some(cancel.clone());
        let mut seen = match self.transport.start_scan().await {
            Ok(stream) => stream,
            Err(e) => {
                self.scan_cancel.lock().await.take();
                return Err(e);
            }
        };
        self.transition(&[SessionState::Idle], SessionState::Scanning);

        let search = async {
            while let Some(device) = seen.next().await {
                if let Some(hit) = visit(device) {
                    return Some(hit);
                }
            }
            None
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(limit, search) => Ok(result.ok().flatten()),
        };

        if let Err(e) = self.transport.stop_scan().await {
            warn!(error = %e, "failed to stop scan");
        }
        self.scan_cancel.lock().await.take();
        self.transition(&[SessionState::Scanning], SessionState::Idle);
        outcome
    }

    async fn open_link(&self, address: &str) -> Result<()> {
        self.transport.connect(address).await?;
        if let Err(e) = self
            .transport
            .discover(address, BODY_COMPOSITION_SERVICE, BODY_COMPOSITION_MEASUREMENT)
            .await
        {
            self.close_quietly(address).await;
            return Err(e);
        }
        Ok(())
    }

    async fn close_quietly(&self, address: &str) {
        if let Err(e) = self.transport.disconnect(address).await {
            debug!(error = %e, "best-effort disconnect failed");
        }
    }

    /// Called by the monitor task when the notification stream ends on its own.
    async fn link_lost(&self, cancel: &CancellationToken) {
        let device = {
            let mut link = self.link.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            link.monitor.take();
            let device = link.device.take();
            self.settle(SessionState::Idle);
            device
        };
        if let Some(address) = device {
            self.close_quietly(&address).await;
        }
    }
}

async fn run_monitor<T: BleTransport, S: MeasurementSink>(
    inner: Arc<Inner<T>>,
    mut notifications: NotificationStream,
    sink: S,
    cancel: CancellationToken,
) {
    let target_bmi = inner.config.target_bmi;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = notifications.next() => {
                let Some(payload) = next else { break };
                match decode(&payload, target_bmi) {
                    Ok(measurement) => {
                        debug!(
                            weight = measurement.weight(),
                            impedance = measurement.impedance(),
                            "measurement accepted"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            _ = sink.accept(measurement) => {}
                        }
                    }
                    Err(reason) => debug!(%reason, "notification dropped"),
                }
            }
        }
    }
    warn!("Measurement stream ended, link lost");
    inner.link_lost(&cancel).await;
}

async fn join_monitor(handle: JoinHandle<()>) {
    if let Err(e) = handle.await
        && e.is_panic()
    {
        warn!("monitor task panicked");
    }
}
