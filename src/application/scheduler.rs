//! Sampler Scheduler
//!
//! Owns the background market cap monitors. Each monitored address gets one
//! session task driving a [`SamplerSession`]: baseline sampling at the
//! configured delays, then periodic re-sampling until the session revives,
//! expires, or is cancelled.
//!
//! Every sleep and every market data call is raced against the session's
//! cancellation token, and the whole session runs under `max_duration`.
//! An address gets at most one session for as long as the scheduler keeps
//! its record. `stop` forgets the record, and finished records are purged
//! once `finished_retention` has passed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::domain::{Address, Phase, SamplerConfig, SamplerSession, SessionOutcome};
use crate::ports::{AlertSink, MarketDataProvider};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Address {0} already has a sampler session")]
    AlreadyStarted(Address),

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("No async runtime available to spawn the session")]
    NoRuntime,
}

/// Externally visible state of one session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Running {
        phase: Phase,
        baseline: Option<Decimal>,
        last_value: Option<Decimal>,
        started_at: DateTime<Utc>,
    },
    Finished(SessionOutcome),
}

impl SessionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running { .. })
    }
}

#[derive(Debug, Clone)]
struct SessionView {
    phase: Phase,
    baseline: Option<Decimal>,
    last_value: Option<Decimal>,
    started_at: DateTime<Utc>,
}

#[derive(Debug)]
enum RecordState {
    Running {
        token: CancellationToken,
        view: Arc<Mutex<SessionView>>,
    },
    Finished {
        outcome: SessionOutcome,
        at: Instant,
    },
}

#[derive(Debug)]
struct SessionRecord {
    id: u64,
    state: RecordState,
}

/// Raised internally when a session's token fires mid-step
#[derive(Debug)]
struct Cancelled;

struct SchedulerInner {
    config: SamplerConfig,
    market_data: Arc<dyn MarketDataProvider>,
    sink: Arc<dyn AlertSink>,
    sessions: DashMap<Address, SessionRecord>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

/// Spawns and tracks per-address sampler sessions
#[derive(Clone)]
pub struct SamplerScheduler {
    inner: Arc<SchedulerInner>,
}

impl SamplerScheduler {
    pub fn new(
        config: SamplerConfig,
        market_data: Arc<dyn MarketDataProvider>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                market_data,
                sink,
                sessions: DashMap::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.inner.config
    }

    /// Start monitoring an address; `false` if it already has a session
    pub fn start(&self, address: &Address) -> bool {
        match self.try_start(address) {
            Ok(()) => true,
            Err(SchedulerError::AlreadyStarted(_)) => false,
            Err(e) => {
                warn!("Sampler not started for {}: {}", address, e);
                false
            }
        }
    }

    pub fn try_start(&self, address: &Address) -> Result<(), SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        self.purge_finished();

        let vacant = match self.inner.sessions.entry(address.clone()) {
            Entry::Occupied(_) => return Err(SchedulerError::AlreadyStarted(address.clone())),
            Entry::Vacant(vacant) => vacant,
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        let session = SamplerSession::new(address.clone(), &self.inner.config);
        let view = Arc::new(Mutex::new(SessionView {
            phase: session.phase(),
            baseline: None,
            last_value: None,
            started_at: session.started_at(),
        }));

        vacant.insert(SessionRecord {
            id,
            state: RecordState::Running {
                token: token.clone(),
                view: Arc::clone(&view),
            },
        });

        let inner = Arc::clone(&self.inner);
        let address = address.clone();
        info!("Sampler started for {}", address);

        // The worker runs in its own task so a panic surfaces as a JoinError
        // here instead of leaving the record stuck in Running
        self.inner.tracker.spawn_on(
            async move {
                let worker = tokio::spawn(run_session(Arc::clone(&inner), session, token, view));
                let outcome = match worker.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => {
                        warn!("Sampler for {} panicked", address);
                        SessionOutcome::Failed
                    }
                    Err(_) => SessionOutcome::Cancelled,
                };
                inner.finish(&address, id, outcome);
            },
            &runtime,
        );

        Ok(())
    }

    /// Cancel a session and forget the address; `true` if one was running
    pub fn stop(&self, address: &Address) -> bool {
        match self.inner.sessions.remove(address) {
            Some((_, SessionRecord { state: RecordState::Running { token, .. }, .. })) => {
                token.cancel();
                info!("Sampler stopped for {}", address);
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, address: &Address) -> Option<SessionStatus> {
        self.inner.sessions.get(address).map(|record| match &record.state {
            RecordState::Running { view, .. } => {
                let view = view.lock();
                SessionStatus::Running {
                    phase: view.phase,
                    baseline: view.baseline,
                    last_value: view.last_value,
                    started_at: view.started_at,
                }
            }
            RecordState::Finished { outcome, .. } => SessionStatus::Finished(*outcome),
        })
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|r| matches!(r.state, RecordState::Running { .. }))
            .count()
    }

    /// Drop finished records older than `finished_retention`; returns how many
    pub fn purge_finished(&self) -> usize {
        let retention = self.inner.config.finished_retention;
        let before = self.inner.sessions.len();
        self.inner.sessions.retain(|_, record| match record.state {
            RecordState::Finished { at, .. } => at.elapsed() < retention,
            RecordState::Running { .. } => true,
        });
        let purged = before.saturating_sub(self.inner.sessions.len());
        if purged > 0 {
            debug!("Purged {} finished sampler records", purged);
        }
        purged
    }

    /// Cancel every session and wait for their tasks to exit
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Sampler scheduler stopped");
    }
}

impl SchedulerInner {
    fn finish(&self, address: &Address, id: u64, outcome: SessionOutcome) {
        // A stopped session's record is gone, or replaced by a newer one
        if let Some(mut record) = self.sessions.get_mut(address) {
            if record.id == id {
                record.state = RecordState::Finished {
                    outcome,
                    at: Instant::now(),
                };
            }
        }
        info!("Sampler for {} finished: {}", address, outcome);
    }

    async fn sleep(&self, token: &CancellationToken, duration: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// One market cap reading with retries; `None` when every attempt failed
    async fn read_market_cap(
        &self,
        address: &Address,
        token: &CancellationToken,
    ) -> Result<Option<Decimal>, Cancelled> {
        let attempts = self.config.retry_attempts.max(1);
        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Cancelled),
                result = self.market_data.snapshot(address) => result,
            };

            match result {
                Ok(snapshot) if snapshot.is_valid() => return Ok(Some(snapshot.market_cap)),
                Ok(_) => debug!("Zero market cap for {} (attempt {}/{})", address, attempt, attempts),
                Err(e) => warn!("Market data read failed for {} (attempt {}/{}): {}", address, attempt, attempts, e),
            }

            if attempt < attempts {
                self.sleep(token, self.config.retry_backoff).await?;
            }
        }
        Ok(None)
    }

    fn publish(&self, token: &CancellationToken, session: &mut SamplerSession, value: Decimal) {
        let alerts = session.observe(value);
        if token.is_cancelled() {
            return;
        }
        for alert in alerts {
            info!("{}", alert.summary());
            self.sink.publish(alert);
        }
    }

    async fn drive(
        &self,
        session: &mut SamplerSession,
        token: &CancellationToken,
        view: &Mutex<SessionView>,
    ) -> Result<SessionOutcome, Cancelled> {
        let address = session.address().clone();
        let max_failures = self.config.max_consecutive_failures.max(1);
        let mut failures = 0u32;

        for delay in &self.config.baseline_delays {
            self.sleep(token, *delay).await?;
            match self.read_market_cap(&address, token).await? {
                Some(value) => {
                    failures = 0;
                    session.record_baseline_sample(value);
                    debug!("Baseline sample for {}: {}", address, value);
                }
                None => {
                    failures += 1;
                    if failures >= max_failures {
                        session.expire();
                        return Ok(SessionOutcome::Expired);
                    }
                }
            }
        }

        let Some(baseline) = session.finish_baseline() else {
            warn!("No valid baseline samples for {}", address);
            return Ok(SessionOutcome::NoBaseline);
        };
        info!("Baseline market cap for {}: {}", address, baseline.round_dp(2));
        {
            let mut view = view.lock();
            view.phase = session.phase();
            view.baseline = Some(baseline);
        }

        loop {
            self.sleep(token, self.config.poll_interval).await?;

            let Some(value) = self.read_market_cap(&address, token).await? else {
                failures += 1;
                if failures >= max_failures {
                    warn!("Giving up on {} after {} failed reads", address, failures);
                    session.expire();
                    return Ok(SessionOutcome::Expired);
                }
                continue;
            };
            failures = 0;

            self.publish(token, session, value);
            {
                let mut view = view.lock();
                view.phase = session.phase();
                view.last_value = Some(value);
            }

            if session.phase() == Phase::Revived {
                return Ok(SessionOutcome::Revived);
            }
        }
    }
}

async fn run_session(
    inner: Arc<SchedulerInner>,
    mut session: SamplerSession,
    token: CancellationToken,
    view: Arc<Mutex<SessionView>>,
) -> SessionOutcome {
    let max_duration = inner.config.max_duration;
    let driven = tokio::time::timeout(max_duration, inner.drive(&mut session, &token, &view)).await;

    match driven {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(Cancelled)) => SessionOutcome::Cancelled,
        Err(_) => {
            session.expire();
            debug!("Sampler for {} reached its deadline", session.address());
            SessionOutcome::Expired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AlertKind;
    use crate::ports::mocks::{RecordingAlertSink, ScriptedMarketData};
    use crate::ports::{MarketDataError, MarketSnapshot, MockMarketDataProvider};
    use rust_decimal_macros::dec;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn fast_config() -> SamplerConfig {
        SamplerConfig {
            baseline_delays: vec![Duration::from_secs(1)],
            poll_interval: Duration::from_secs(10),
            max_duration: Duration::from_secs(600),
            retry_attempts: 2,
            retry_backoff: Duration::from_secs(1),
            max_consecutive_failures: 3,
            ..SamplerConfig::default()
        }
    }

    async fn wait_finished(scheduler: &SamplerScheduler, address: &Address) -> SessionOutcome {
        loop {
            if let Some(SessionStatus::Finished(outcome)) = scheduler.status(address) {
                return outcome;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dip_and_revival_session() {
        let a = addr("token1");
        let data = ScriptedMarketData::new()
            .with_script(&a, [Some(dec!(100000)), Some(dec!(88000)), Some(dec!(112000))])
            .with_fallback(&a, dec!(113000));
        let sink = RecordingAlertSink::new();
        let scheduler = SamplerScheduler::new(fast_config(), Arc::new(data), Arc::new(sink.clone()));

        assert!(scheduler.start(&a));
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::Revived);
        assert_eq!(sink.kinds(), vec![AlertKind::SamplerDip, AlertKind::SamplerRevival]);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_once_per_address() {
        let a = addr("token1");
        let data = ScriptedMarketData::new().with_fallback(&a, dec!(1000));
        let scheduler = SamplerScheduler::new(
            fast_config(),
            Arc::new(data),
            Arc::new(RecordingAlertSink::new()),
        );

        assert!(scheduler.start(&a));
        assert!(!scheduler.start(&a));
        assert_eq!(
            scheduler.try_start(&a),
            Err(SchedulerError::AlreadyStarted(a.clone()))
        );
        assert_eq!(scheduler.active_count(), 1);

        // Finished sessions still block a restart
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::Expired);
        assert!(!scheduler.start(&a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_records_are_purged_after_retention() {
        let a = addr("token1");
        let b = addr("token2");
        let data = ScriptedMarketData::new();
        let config = SamplerConfig {
            finished_retention: Duration::from_secs(300),
            ..fast_config()
        };
        let scheduler = SamplerScheduler::new(config, Arc::new(data), Arc::new(RecordingAlertSink::new()));

        assert!(scheduler.start(&a));
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::NoBaseline);
        assert_eq!(scheduler.purge_finished(), 0);
        assert!(!scheduler.start(&a));

        // Many short-lived sessions do not pile up past the retention window
        for i in 0..50 {
            let other = addr(&format!("burst{}", i));
            assert!(scheduler.start(&other));
        }
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(scheduler.active_count(), 0);

        assert!(scheduler.start(&b));
        assert!(scheduler.status(&a).is_none());
        assert!(scheduler.status(&addr("burst0")).is_none());
        assert!(scheduler.start(&a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_baseline_when_every_read_fails() {
        let a = addr("token1");
        let data = ScriptedMarketData::new();
        let config = SamplerConfig {
            baseline_delays: vec![Duration::from_secs(1), Duration::from_secs(2)],
            max_consecutive_failures: 5,
            ..fast_config()
        };
        let scheduler = SamplerScheduler::new(config, Arc::new(data.clone()), Arc::new(RecordingAlertSink::new()));

        scheduler.start(&a);
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::NoBaseline);
        // Two samples, two attempts each
        assert_eq!(data.call_count(&a), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_expire_session() {
        let a = addr("token1");
        let data = ScriptedMarketData::new().with_script(&a, [Some(dec!(1000))]);
        let sink = RecordingAlertSink::new();
        let scheduler = SamplerScheduler::new(fast_config(), Arc::new(data), Arc::new(sink.clone()));

        scheduler.start(&a);
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::Expired);
        assert!(sink.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_is_retried() {
        let a = addr("token1");
        let data = ScriptedMarketData::new()
            .with_script(&a, [None, Some(dec!(1000)), None, Some(dec!(850))])
            .with_fallback(&a, dec!(1200));
        let sink = RecordingAlertSink::new();
        let scheduler = SamplerScheduler::new(fast_config(), Arc::new(data), Arc::new(sink.clone()));

        scheduler.start(&a);
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::Revived);
        assert_eq!(sink.kinds(), vec![AlertKind::SamplerDip, AlertKind::SamplerRevival]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_at_deadline() {
        let a = addr("token1");
        let data = ScriptedMarketData::new().with_fallback(&a, dec!(1000));
        let config = SamplerConfig {
            max_duration: Duration::from_secs(60),
            ..fast_config()
        };
        let scheduler = SamplerScheduler::new(config, Arc::new(data), Arc::new(RecordingAlertSink::new()));

        let started = tokio::time::Instant::now();
        scheduler.start(&a);
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::Expired);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_and_forgets() {
        let a = addr("token1");
        let data = ScriptedMarketData::new().with_fallback(&a, dec!(1000));
        let sink = RecordingAlertSink::new();
        let scheduler = SamplerScheduler::new(fast_config(), Arc::new(data.clone()), Arc::new(sink.clone()));

        scheduler.start(&a);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(matches!(
            scheduler.status(&a),
            Some(SessionStatus::Running { phase: Phase::Armed, .. })
        ));

        assert!(scheduler.stop(&a));
        assert!(scheduler.status(&a).is_none());
        assert!(!scheduler.stop(&a));

        let calls = data.call_count(&a);
        data.set_market_cap(&a, dec!(500));
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(data.call_count(&a), calls);
        assert!(sink.alerts().is_empty());

        // Forgotten addresses may be monitored again
        assert!(scheduler.start(&a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let data = ScriptedMarketData::new();
        let addresses: Vec<Address> = (0..5).map(|i| addr(&format!("token{}", i))).collect();
        for a in &addresses {
            data.set_market_cap(a, dec!(1000));
        }
        let scheduler = SamplerScheduler::new(fast_config(), Arc::new(data), Arc::new(RecordingAlertSink::new()));

        for a in &addresses {
            assert!(scheduler.start(a));
        }
        assert_eq!(scheduler.active_count(), 5);

        scheduler.shutdown().await;
        assert_eq!(scheduler.active_count(), 0);
        for a in &addresses {
            assert_eq!(scheduler.status(a), Some(SessionStatus::Finished(SessionOutcome::Cancelled)));
        }
        assert_eq!(scheduler.try_start(&addr("late")), Err(SchedulerError::ShuttingDown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_market_cap_counts_as_failed_read() {
        let a = addr("token1");
        let mut mock = MockMarketDataProvider::new();
        mock.expect_snapshot()
            .times(2)
            .returning(|_| Ok(MarketSnapshot::with_market_cap(Decimal::ZERO)));
        let config = SamplerConfig {
            retry_attempts: 2,
            ..fast_config()
        };
        let scheduler = SamplerScheduler::new(config, Arc::new(mock), Arc::new(RecordingAlertSink::new()));

        scheduler.start(&a);
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::NoBaseline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_errors_do_not_stop_scheduler() {
        let a = addr("token1");
        let mut mock = MockMarketDataProvider::new();
        mock.expect_snapshot()
            .returning(|_| Err(MarketDataError::Timeout));
        let scheduler = SamplerScheduler::new(fast_config(), Arc::new(mock), Arc::new(RecordingAlertSink::new()));

        scheduler.start(&a);
        assert_eq!(wait_finished(&scheduler, &a).await, SessionOutcome::NoBaseline);
        assert!(scheduler.start(&addr("token2")));
    }
}
