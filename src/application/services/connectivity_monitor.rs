use crate::application::ports::ReachabilityProbe;
use crate::domain::entities::{
    ConnectionQuality, ConnectivityEvent, ConnectivityState, PlatformSignal,
};
use crate::shared::clock::Clock;
use crate::shared::config::ConnectivityConfig;
use crate::shared::error::AppError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 32;

struct TransitionGuard<'a>(&'a AtomicBool);

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Online/offline state machine. Platform "offline" is trusted as-is;
/// platform "online" must be confirmed by an active probe. "Became online"
/// edges are debounced.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    clock: Arc<dyn Clock>,
    probe_timeout: Duration,
    debounce_ms: i64,
    state: watch::Sender<ConnectivityState>,
    events: broadcast::Sender<ConnectivityEvent>,
    transitioning: AtomicBool,
    /// Bumped on every offline transition; a probe started under an older
    /// value is not applied.
    generation: AtomicU64,
    last_edge_at: Mutex<Option<i64>>,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        clock: Arc<dyn Clock>,
        config: &ConnectivityConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectivityState::offline());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            probe,
            clock,
            probe_timeout: config.probe_timeout(),
            debounce_ms: i64::try_from(config.debounce().as_millis()).unwrap_or(i64::MAX),
            state,
            events,
            transitioning: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            last_edge_at: Mutex::new(None),
        }
    }

    /// Adopts the platform's current signal, then re-probes if it claims online.
    pub async fn initialize(&self, platform_online: bool) -> ConnectivityState {
        let now = self.clock.now_ms();
        self.state.send_modify(|state| {
            state.is_online = platform_online;
            state.last_online_transition = Some(now);
        });
        info!(target: "offline::connectivity", platform_online, "connectivity initialized");

        if platform_online {
            let _ = self.check_reachability().await;
        }
        self.current()
    }

    pub async fn on_platform_signal(&self, signal: PlatformSignal) -> ConnectivityState {
        match signal {
            PlatformSignal::Offline => {
                self.go_offline("platform");
            }
            PlatformSignal::Online => {
                if self
                    .transitioning
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!(target: "offline::connectivity", "probe already in flight, ignoring online signal");
                    return self.current();
                }
                let _guard = TransitionGuard(&self.transitioning);
                let _ = self.check_reachability().await;
            }
        }
        self.current()
    }

    /// Probes reachability with a hard timeout and applies the result.
    pub async fn check_reachability(&self) -> bool {
        let generation = self.generation.load(Ordering::Acquire);
        let result = self.run_probe().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(target: "offline::connectivity", "went offline while probing, probe result dropped");
            return false;
        }
        match result {
            Ok(()) => {
                self.go_online();
                true
            }
            Err(err) => {
                let now = self.clock.now_ms();
                warn!(target: "offline::connectivity", error = %err, "reachability probe failed");
                let _ = self.events.send(ConnectivityEvent::ProbeFailed { at: now });
                self.go_offline("probe");
                false
            }
        }
    }

    async fn run_probe(&self) -> Result<(), AppError> {
        tokio::time::timeout(self.probe_timeout, self.probe.probe()).await?
    }

    fn go_online(&self) {
        let now = self.clock.now_ms();
        let was_online = self.current().is_online;
        if was_online {
            return;
        }
        self.state.send_modify(|state| {
            state.is_online = true;
            state.last_online_transition = Some(now);
        });

        let emit = match self.last_edge_at.lock() {
            Ok(mut last) => {
                let due = last.map_or(true, |at| now.saturating_sub(at) >= self.debounce_ms);
                if due {
                    *last = Some(now);
                }
                due
            }
            Err(_) => true,
        };

        if emit {
            info!(target: "offline::connectivity", "connection confirmed, became online");
            let _ = self.events.send(ConnectivityEvent::BecameOnline { at: now });
        } else {
            debug!(
                target: "offline::connectivity",
                debounce_ms = self.debounce_ms,
                "online again inside debounce window, edge suppressed"
            );
        }
    }

    fn go_offline(&self, source: &'static str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let now = self.clock.now_ms();
        if !self.current().is_online {
            return;
        }
        self.state.send_modify(|state| {
            state.is_online = false;
            state.last_online_transition = Some(now);
        });
        info!(target: "offline::connectivity", source, "went offline");
        let _ = self.events.send(ConnectivityEvent::WentOffline { at: now });
    }

    pub fn set_quality_hint(&self, quality: Option<ConnectionQuality>) {
        self.state.send_modify(|state| state.quality_hint = quality);
    }

    pub fn current(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct ScriptedProbe {
        reachable: AtomicBool,
        delay: Duration,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(reachable: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                delay,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ReachabilityProbe for ScriptedProbe {
        async fn probe(&self) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AppError::Network("unreachable".into()))
            }
        }
    }

    fn config(timeout_ms: u64) -> ConnectivityConfig {
        ConnectivityConfig {
            probe_url: "http://localhost/favicon.ico".into(),
            probe_timeout_ms: timeout_ms,
            debounce_ms: 10_000,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ConnectivityEvent>) -> Vec<ConnectivityEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn flapping_within_debounce_emits_one_edge() {
        let clock = Arc::new(ManualClock::new(0));
        let probe = ScriptedProbe::new(true, Duration::ZERO);
        let monitor = ConnectivityMonitor::new(probe, clock.clone(), &config(3_000));
        let mut rx = monitor.subscribe();

        monitor.on_platform_signal(PlatformSignal::Online).await;
        clock.set(2_000);
        monitor.on_platform_signal(PlatformSignal::Offline).await;
        clock.set(4_500);
        let state = monitor.on_platform_signal(PlatformSignal::Online).await;

        assert!(state.is_online);
        let edges = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ConnectivityEvent::BecameOnline { .. }))
            .count();
        assert_eq!(edges, 1);

        // Outside the window a new transition produces a new edge.
        clock.set(20_000);
        monitor.on_platform_signal(PlatformSignal::Offline).await;
        monitor.on_platform_signal(PlatformSignal::Online).await;
        assert!(drain(&mut rx)
            .iter()
            .any(|e| *e == ConnectivityEvent::BecameOnline { at: 20_000 }));
    }

    #[tokio::test]
    async fn failed_probe_keeps_state_offline() {
        let clock = Arc::new(ManualClock::new(0));
        let probe = ScriptedProbe::new(false, Duration::ZERO);
        let monitor = ConnectivityMonitor::new(probe, clock, &config(3_000));
        let mut rx = monitor.subscribe();

        let state = monitor.on_platform_signal(PlatformSignal::Online).await;

        assert!(!state.is_online);
        assert_eq!(drain(&mut rx), vec![ConnectivityEvent::ProbeFailed { at: 0 }]);
    }

    #[tokio::test]
    async fn hanging_probe_is_cut_off_by_timeout() {
        let clock = Arc::new(ManualClock::new(0));
        let probe = ScriptedProbe::new(true, Duration::from_secs(30));
        let monitor = ConnectivityMonitor::new(probe, clock, &config(50));

        let started = std::time::Instant::now();
        let state = monitor.on_platform_signal(PlatformSignal::Online).await;

        assert!(!state.is_online);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn concurrent_online_signal_is_ignored_while_probing() {
        let clock = Arc::new(ManualClock::new(0));
        let probe = ScriptedProbe::new(true, Duration::from_millis(100));
        let monitor = ConnectivityMonitor::new(probe.clone(), clock, &config(3_000));

        tokio::join!(
            monitor.on_platform_signal(PlatformSignal::Online),
            monitor.on_platform_signal(PlatformSignal::Online),
        );

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn offline_signal_mid_check_stays_offline() {
        let clock = Arc::new(ManualClock::new(0));
        let probe = ScriptedProbe::new(true, Duration::from_millis(200));
        let monitor = ConnectivityMonitor::new(probe, clock, &config(3_000));
        let mut rx = monitor.subscribe();

        let (online, offline) = tokio::join!(
            monitor.on_platform_signal(PlatformSignal::Online),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                monitor.on_platform_signal(PlatformSignal::Offline).await
            },
        );

        assert!(!offline.is_online);
        assert!(!online.is_online);
        assert!(!monitor.is_online());
        assert!(drain(&mut rx).is_empty());

        // A check started after the offline signal still counts.
        assert!(monitor.check_reachability().await);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn restart_trusts_platform_then_reprobes() {
        let clock = Arc::new(ManualClock::new(0));
        let probe = ScriptedProbe::new(false, Duration::ZERO);
        let monitor = ConnectivityMonitor::new(probe, clock, &config(3_000));
        let watch = monitor.watch();

        let state = monitor.initialize(true).await;
        assert!(!state.is_online);
        assert!(!watch.borrow().is_online);

        let offline = monitor.initialize(false).await;
        assert!(!offline.is_online);
    }
}
