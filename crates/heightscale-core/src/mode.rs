//! Choosing where measurements come from: the scale, the collector, or nowhere.
//!
//! The mode is re-derived from scratch on every poll. There is no
//! hysteresis, so inputs that flap produce a mode that flaps with them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::SharedSession;
use crate::sync::Collector;
use crate::transport::BleTransport;

/// Default poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The active data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Live measurements from the scale.
    Ble,
    /// Measurements fetched from the collector.
    Remote,
    /// Neither is available; only local history.
    #[default]
    Offline,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ble => write!(f, "ble"),
            Self::Remote => write!(f, "remote"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A snapshot of everything the mode depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeInputs {
    /// BLE allowed by configuration.
    pub ble_enabled: bool,
    /// Adapter reports powered on.
    pub adapter_ready: bool,
    /// The session holds a link to the scale.
    pub session_active: bool,
    /// The collector answered its probe.
    pub remote_reachable: bool,
}

/// Pick the mode for one set of inputs.
pub fn derive_mode(inputs: ModeInputs) -> ConnectionMode {
    if inputs.ble_enabled && inputs.adapter_ready && inputs.session_active {
        ConnectionMode::Ble
    } else if inputs.remote_reachable {
        ConnectionMode::Remote
    } else {
        ConnectionMode::Offline
    }
}

/// Live inputs for the controller.
#[async_trait]
pub trait ModeSources: Send + Sync + 'static {
    async fn adapter_ready(&self) -> bool;
    async fn session_active(&self) -> bool;
    async fn remote_reachable(&self) -> bool;
}

/// [`ModeSources`] backed by the shared session and a collector.
pub struct SessionSources<T: BleTransport, C> {
    session: SharedSession<T>,
    collector: Arc<C>,
}

impl<T: BleTransport, C: Collector + 'static> SessionSources<T, C> {
    pub fn new(session: SharedSession<T>, collector: Arc<C>) -> Self {
        Self { session, collector }
    }
}

#[async_trait]
impl<T: BleTransport, C: Collector + 'static> ModeSources for SessionSources<T, C> {
    async fn adapter_ready(&self) -> bool {
        self.session.is_adapter_ready().await
    }

    async fn session_active(&self) -> bool {
        self.session.is_connected()
    }

    async fn remote_reachable(&self) -> bool {
        self.collector.is_reachable().await
    }
}

/// Polls its sources on a fixed cadence and publishes the derived mode.
pub struct ModeController<S> {
    sources: S,
    ble_enabled: bool,
    poll_interval: Duration,
    mode: watch::Sender<ConnectionMode>,
}

impl<S> fmt::Debug for ModeController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeController")
            .field("ble_enabled", &self.ble_enabled)
            .field("poll_interval", &self.poll_interval)
            .field("mode", &*self.mode.borrow())
            .finish_non_exhaustive()
    }
}

impl<S: ModeSources> ModeController<S> {
    /// Create a controller. The mode starts as [`ConnectionMode::Offline`].
    pub fn new(sources: S, ble_enabled: bool, poll_interval: Duration) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(Error::invalid_config("poll interval must be > 0"));
        }
        let (mode, _) = watch::channel(ConnectionMode::Offline);
        Ok(Self {
            sources,
            ble_enabled,
            poll_interval,
            mode,
        })
    }

    /// The mode published by the last tick.
    pub fn mode(&self) -> ConnectionMode {
        *self.mode.borrow()
    }

    /// Subscribe to mode changes.
    pub fn watch_mode(&self) -> watch::Receiver<ConnectionMode> {
        self.mode.subscribe()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Sample the sources once and publish the result.
    ///
    /// The collector is only probed when the scale is not already selected.
    pub async fn tick(&self) -> ConnectionMode {
        let mut inputs = ModeInputs {
            ble_enabled: self.ble_enabled,
            ..Default::default()
        };
        if self.ble_enabled {
            inputs.adapter_ready = self.sources.adapter_ready().await;
            inputs.session_active = inputs.adapter_ready && self.sources.session_active().await;
        }
        if derive_mode(inputs) != ConnectionMode::Ble {
            inputs.remote_reachable = self.sources.remote_reachable().await;
        }

        let mode = derive_mode(inputs);
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            info!(%mode, %previous, "connection mode changed");
        } else {
            debug!(%mode, ?inputs, "mode unchanged");
        }
        mode
    }

    /// Tick every `poll_interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            debug!("mode controller stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use heightscale_types::Measurement;

    use crate::mock::MockTransport;
    use crate::session::{ScaleSession, SessionConfig};
    use crate::sync::SyncError;

    #[derive(Default)]
    struct Flags {
        adapter: AtomicBool,
        session: AtomicBool,
        remote: AtomicBool,
        probes: AtomicU32,
    }

    #[async_trait]
    impl ModeSources for Arc<Flags> {
        async fn adapter_ready(&self) -> bool {
            self.adapter.load(Ordering::SeqCst)
        }

        async fn session_active(&self) -> bool {
            self.session.load(Ordering::SeqCst)
        }

        async fn remote_reachable(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.remote.load(Ordering::SeqCst)
        }
    }

    struct Reachable(bool);

    #[async_trait]
    impl Collector for Reachable {
        async fn is_reachable(&self) -> bool {
            self.0
        }

        async fn push(&self, _measurement: &Measurement) -> std::result::Result<(), SyncError> {
            Ok(())
        }
    }

    #[test]
    fn test_derive_mode() {
        let ble = ModeInputs {
            ble_enabled: true,
            adapter_ready: true,
            session_active: true,
            remote_reachable: true,
        };
        assert_eq!(derive_mode(ble), ConnectionMode::Ble);

        let disabled = ModeInputs {
            ble_enabled: false,
            ..ble
        };
        assert_eq!(derive_mode(disabled), ConnectionMode::Remote);

        let adapter_off = ModeInputs {
            adapter_ready: false,
            ..ble
        };
        assert_eq!(derive_mode(adapter_off), ConnectionMode::Remote);

        let nothing = ModeInputs {
            session_active: false,
            remote_reachable: false,
            ..ble
        };
        assert_eq!(derive_mode(nothing), ConnectionMode::Offline);
        assert_eq!(derive_mode(ModeInputs::default()), ConnectionMode::Offline);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = ModeController::new(Arc::new(Flags::default()), true, Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_tick_skips_remote_probe_when_ble_selected() {
        let flags = Arc::new(Flags::default());
        flags.adapter.store(true, Ordering::SeqCst);
        flags.session.store(true, Ordering::SeqCst);
        let controller =
            ModeController::new(Arc::clone(&flags), true, DEFAULT_POLL_INTERVAL).unwrap();

        assert_eq!(controller.tick().await, ConnectionMode::Ble);
        assert_eq!(flags.probes.load(Ordering::SeqCst), 0);

        flags.session.store(false, Ordering::SeqCst);
        flags.remote.store(true, Ordering::SeqCst);
        assert_eq!(controller.tick().await, ConnectionMode::Remote);
        assert_eq!(flags.probes.load(Ordering::SeqCst), 1);
        assert_eq!(controller.mode(), ConnectionMode::Remote);
    }

    #[tokio::test]
    async fn test_ble_disabled_ignores_session() {
        let flags = Arc::new(Flags::default());
        flags.adapter.store(true, Ordering::SeqCst);
        flags.session.store(true, Ordering::SeqCst);
        let controller =
            ModeController::new(Arc::clone(&flags), false, DEFAULT_POLL_INTERVAL).unwrap();

        assert_eq!(controller.tick().await, ConnectionMode::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_controller_polls_until_cancelled() {
        let flags = Arc::new(Flags::default());
        let controller = Arc::new(
            ModeController::new(Arc::clone(&flags), true, Duration::from_secs(5)).unwrap(),
        );
        let mut modes = controller.watch_mode();
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&controller).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(flags.probes.load(Ordering::SeqCst), 1);

        flags.remote.store(true, Ordering::SeqCst);
        modes
            .wait_for(|m| *m == ConnectionMode::Remote)
            .await
            .unwrap();
        assert_eq!(flags.probes.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
        let probes = flags.probes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(flags.probes.load(Ordering::SeqCst), probes);
    }

    #[tokio::test]
    async fn test_session_sources_follow_the_session() {
        let session = ScaleSession::shared(
            MockTransport::builder()
                .advertise("0C:95:41:CB:23:FF", Some("MIBFS"))
                .build(),
            SessionConfig::default(),
        );
        let sources = SessionSources::new(Arc::clone(&session), Arc::new(Reachable(true)));
        let controller = ModeController::new(sources, true, DEFAULT_POLL_INTERVAL).unwrap();

        assert_eq!(controller.tick().await, ConnectionMode::Remote);

        session.connect().await.unwrap();
        assert_eq!(controller.tick().await, ConnectionMode::Ble);

        session.disconnect().await.unwrap();
        assert_eq!(controller.tick().await, ConnectionMode::Remote);
    }
}
