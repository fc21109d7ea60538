//! Self-healing supervisor: bounded, backed-off restart scheduling.

use crate::healing::breaker::{CircuitBreaker, CircuitState};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Restart callback provided by the registry. Returns whether the plugin
/// reached its desired state.
pub type RestartFn = Arc<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>;

/// Operator alert callback, invoked when retries are exhausted.
pub type AlertFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Supervisor tunables.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum automatic restart attempts before giving up.
    pub max_retries: u32,
    /// Backoff before the first attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the exponential backoff.
    pub max_backoff: Duration,
    /// Consecutive failures before a plugin's circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit blocks before probing recovery.
    pub circuit_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            failure_threshold: 3,
            circuit_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct RecoveryRecord {
    failures: AtomicU32,
    last_failure_ms: AtomicI64,
}

impl RecoveryRecord {
    fn mark_failure(&self) -> u32 {
        self.last_failure_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }
}

/// Transforms registry failures into bounded, exponentially backed-off
/// recovery attempts.
///
/// Each registered plugin gets a failure counter and a circuit breaker. A
/// recorded failure schedules an attempt after
/// `min(initial_backoff × 2^(count−1), max_backoff)` as long as the counter
/// has not passed `max_retries`; past the bound the alert callback fires and
/// retrying stops until a manual recovery resets the counter. A scheduled
/// attempt consults the breaker first; a denial skips the attempt without
/// consuming a retry.
pub struct Supervisor {
    config: SupervisorConfig,
    records: DashMap<String, RecoveryRecord>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    restart: RwLock<Option<RestartFn>>,
    alert: RwLock<Option<AlertFn>>,
    attempts: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Create a supervisor with the given tunables.
    pub fn new(config: SupervisorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        info!(
            max_retries = config.max_retries,
            initial_backoff_ms = config.initial_backoff.as_millis() as u64,
            max_backoff_ms = config.max_backoff.as_millis() as u64,
            "self-healing supervisor initialized"
        );
        Self {
            config,
            records: DashMap::new(),
            breakers: DashMap::new(),
            restart: RwLock::new(None),
            alert: RwLock::new(None),
            attempts: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Provide the restart callback. Set by the registry at wiring time.
    pub fn set_restart_callback(&self, callback: RestartFn) {
        *self.restart.write() = Some(callback);
    }

    /// Provide the operator alert callback.
    pub fn set_alert_callback(&self, callback: AlertFn) {
        *self.alert.write() = Some(callback);
    }

    /// Register a plugin for supervision.
    pub fn register(&self, name: &str) {
        self.records.insert(name.to_string(), RecoveryRecord::default());
        self.breakers.insert(
            name.to_string(),
            Arc::new(CircuitBreaker::new(
                name,
                self.config.failure_threshold,
                self.config.circuit_timeout,
            )),
        );
        info!(plugin = name, "registered plugin for self-healing");
    }

    /// Remove a plugin from supervision.
    pub fn unregister(&self, name: &str) {
        self.records.remove(name);
        self.breakers.remove(name);
        debug!(plugin = name, "unregistered plugin from self-healing");
    }

    /// Record a lifecycle failure and schedule recovery if retries remain.
    pub fn record_failure(&self, name: &str, reason: &str) {
        let Some(record) = self.records.get(name) else {
            warn!(plugin = name, "plugin not registered for self-healing");
            return;
        };

        if let Some(breaker) = self.breakers.get(name) {
            breaker.record_failure();
        }

        let count = record.mark_failure();
        info!(plugin = name, failures = count, reason, "plugin failure recorded");
        drop(record);

        if count <= self.config.max_retries {
            self.schedule_attempt(name, count);
        } else {
            error!(
                plugin = name,
                max_retries = self.config.max_retries,
                "max retries exceeded, plugin requires manual intervention"
            );
            let alert = self.alert.read().clone();
            if let Some(alert) = alert {
                alert(name);
            }
        }
    }

    /// Record a successful operation, resetting counter and breaker.
    pub fn record_success(&self, name: &str) {
        if let Some(record) = self.records.get(name) {
            record.reset();
        }
        if let Some(breaker) = self.breakers.get(name) {
            breaker.record_success();
        }
    }

    /// Current failure count for a registered plugin.
    pub fn failure_count(&self, name: &str) -> Option<u32> {
        self.records.get(name).map(|r| r.failures.load(Ordering::SeqCst))
    }

    /// Current circuit state for a registered plugin.
    pub fn breaker_state(&self, name: &str) -> Option<CircuitState> {
        self.breakers.get(name).map(|b| b.state())
    }

    /// The circuit breaker guarding a registered plugin.
    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Backoff before the attempt for the given failure count:
    /// `min(initial × 2^(count−1), max)`.
    pub fn backoff_for(&self, failure_count: u32) -> Duration {
        let shift = failure_count.saturating_sub(1).min(20);
        let backoff = self.config.initial_backoff.saturating_mul(1u32 << shift);
        backoff.min(self.config.max_backoff)
    }

    fn schedule_attempt(&self, name: &str, failure_count: u32) {
        let backoff = self.backoff_for(failure_count);
        info!(
            plugin = name,
            backoff_ms = backoff.as_millis() as u64,
            attempt = failure_count,
            max_retries = self.config.max_retries,
            "scheduling recovery attempt"
        );

        let name = name.to_string();
        let breaker = self.breakers.get(&name).map(|b| Arc::clone(b.value()));
        let restart = self.restart.read().clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(backoff) => {},
                _ = shutdown_rx.changed() => return,
            }

            if let Some(breaker) = &breaker {
                if !breaker.allow_request() {
                    info!(plugin = %name, "circuit breaker open, skipping recovery attempt");
                    return;
                }
            }

            let Some(restart) = restart else {
                warn!(plugin = %name, "restart callback not set, cannot recover");
                return;
            };

            info!(plugin = %name, "attempting recovery");
            if restart(name.clone()).await {
                info!(plugin = %name, "recovery attempt succeeded");
            } else {
                debug!(plugin = %name, "recovery attempt did not reach desired state");
            }
        });

        let mut attempts = self.attempts.lock();
        attempts.retain(|h| !h.is_finished());
        attempts.push(handle);
    }

    /// Stop the supervisor, draining pending attempts for up to 5 seconds
    /// before aborting them.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.attempts.lock().drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
            warn!("recovery attempts did not drain in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("self-healing supervisor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            max_retries: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            failure_threshold: 10,
            circuit_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let supervisor = Supervisor::new(SupervisorConfig::default());
        assert_eq!(supervisor.backoff_for(1), Duration::from_secs(5));
        assert_eq!(supervisor.backoff_for(2), Duration::from_secs(10));
        assert_eq!(supervisor.backoff_for(3), Duration::from_secs(20));
        assert_eq!(supervisor.backoff_for(4), Duration::from_secs(40));
        assert_eq!(supervisor.backoff_for(5), Duration::from_secs(60));
        assert_eq!(supervisor.backoff_for(12), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_schedules_restart_after_backoff() {
        let supervisor = Supervisor::new(fast_config());
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        supervisor.set_restart_callback(Arc::new(move |name| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                assert_eq!(name, "p1");
                seen.fetch_add(1, Ordering::SeqCst);
                true
            })
        }));

        supervisor.register("p1");
        supervisor.record_failure("p1", "start raised");
        assert_eq!(supervisor.failure_count("p1"), Some(1));

        tokio::time::sleep(Duration::from_secs(6)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_alert_once_and_stop() {
        let mut config = fast_config();
        config.max_retries = 2;
        let supervisor = Supervisor::new(config);

        let alerts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&alerts);
        supervisor.set_alert_callback(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        // Restart that always reports failure back in.
        supervisor.set_restart_callback(Arc::new(|_| Box::pin(async { false })));

        supervisor.register("p1");
        supervisor.record_failure("p1", "boom");
        supervisor.record_failure("p1", "boom");
        assert_eq!(alerts.load(Ordering::SeqCst), 0);

        supervisor.record_failure("p1", "boom");
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.failure_count("p1"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_skips_attempt() {
        let mut config = fast_config();
        config.failure_threshold = 1;
        let supervisor = Supervisor::new(config);

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        supervisor.set_restart_callback(Arc::new(move |_| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                true
            })
        }));

        supervisor.register("p1");
        // Opens the breaker immediately; the scheduled attempt must be
        // denied because the 30s circuit timeout has not elapsed.
        supervisor.record_failure("p1", "boom");
        assert_eq!(supervisor.breaker_state("p1"), Some(CircuitState::Open));

        tokio::time::sleep(Duration::from_secs(10)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counter_and_breaker() {
        let supervisor = Supervisor::new(fast_config());
        supervisor.register("p1");
        supervisor.record_failure("p1", "boom");
        supervisor.record_failure("p1", "boom");
        assert_eq!(supervisor.failure_count("p1"), Some(2));

        supervisor.record_success("p1");
        assert_eq!(supervisor.failure_count("p1"), Some(0));
        assert_eq!(supervisor.breaker_state("p1"), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn unknown_plugin_failure_is_ignored() {
        let supervisor = Supervisor::new(fast_config());
        supervisor.record_failure("ghost", "boom");
        assert_eq!(supervisor.failure_count("ghost"), None);
    }
}
