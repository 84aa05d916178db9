//! Refresh scheduling with a single-flight guarantee: at most one aggregation pass runs
//! against the registry at any time, whether it was started by the timer or on demand.

use crate::libs::aggregator::Aggregator;
use crate::models::refresh::RefreshReport;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What an on-demand request does while a pass is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// wait for the running pass and share its result
    #[default]
    Coalesce,
    /// fail right away with [`RefreshError::Busy`]
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Refreshing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh already in progress")]
    Busy,
    #[error("refresh failed: {0}")]
    Failed(String),
}

type PassResult = Result<Arc<RefreshReport>, RefreshError>;

struct InFlight {
    /// `None` means the pass covers every record
    targets: Option<HashSet<String>>,
    result: watch::Receiver<Option<PassResult>>,
}

impl InFlight {
    fn covers(&self, requested: Option<&HashSet<String>>) -> bool {
        match (&self.targets, requested) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(running), Some(requested)) => requested.is_subset(running),
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    aggregator: Aggregator,
    policy: BusyPolicy,
    interval: Duration,
    in_flight: Mutex<Option<InFlight>>,
    shutdown: watch::Sender<bool>,
}

impl SchedulerInner {
    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the scheduler to `Idle` even when the pass task panics or is aborted.
struct ClearOnDrop(Arc<SchedulerInner>);

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        *self.0.slot() = None;
    }
}

impl Scheduler {
    pub fn new(aggregator: Aggregator, policy: BusyPolicy, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                aggregator,
                policy,
                interval,
                in_flight: Mutex::new(None),
                shutdown: watch::Sender::new(false),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.inner.slot().is_some() {
            SchedulerState::Refreshing
        } else {
            SchedulerState::Idle
        }
    }

    /// Stops the timer, cancels the running pass and makes every waiting or later
    /// request fail instead of holding its connection open.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// On-demand refresh of `ids` (everything when `None`), subject to the busy policy.
    pub async fn trigger(&self, ids: Option<HashSet<String>>) -> PassResult {
        self.run(ids, self.inner.policy).await
    }

    async fn run(&self, ids: Option<HashSet<String>>, policy: BusyPolicy) -> PassResult {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            let (mut result, covered) = {
                let mut slot = self.inner.slot();
                match slot.as_ref() {
                    Some(_) if policy == BusyPolicy::Reject => return Err(RefreshError::Busy),
                    Some(running) => (running.result.clone(), running.covers(ids.as_ref())),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Some(InFlight {
                            targets: ids.clone(),
                            result: rx.clone(),
                        });
                        self.spawn_pass(ids.clone(), tx);
                        (rx, true)
                    }
                }
            };

            let finished = tokio::select! {
                finished = async { result.wait_for(Option::is_some).await.map(|r| r.clone()) } => {
                    finished.map_err(|_| RefreshError::Failed("refresh task stopped".into()))?
                }
                _ = shutdown.wait_for(|down| *down) => return Err(shutting_down()),
            };

            if !covered {
                log::debug!("running pass does not cover the request, starting another");
                continue;
            }
            let report = finished.unwrap_or(Err(RefreshError::Failed("no result".into())))?;
            return Ok(match &ids {
                Some(ids) => Arc::new(report.restricted_to(ids)),
                None => report,
            });
        }
    }

    fn spawn_pass(&self, ids: Option<HashSet<String>>, tx: watch::Sender<Option<PassResult>>) {
        let guard = ClearOnDrop(self.inner.clone());
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = guard.0.aggregator.refresh(ids.as_ref()) => result
                    .map(Arc::new)
                    .map_err(|e| {
                        log::error!("refresh failed: {e:#}");
                        RefreshError::Failed(e.to_string())
                    }),
                // dropping the pass aborts its probes, records not yet written stay as they are
                _ = shutdown.wait_for(|down| *down) => {
                    log::info!("refresh cancelled by shutdown");
                    Err(shutting_down())
                }
            };
            // back to Idle before waiters wake, so a retry never sees the finished pass
            drop(guard);
            tx.send_replace(Some(result));
        });
    }

    /// Periodic refresh. The next tick is scheduled only after the previous pass has
    /// finished, and the loop ends on [`Scheduler::shutdown`].
    pub fn spawn_timer(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let interval = self.inner.interval;
        tokio::spawn(async move {
            log::info!("status refresh every {}s", interval.as_secs());
            loop {
                tokio::select! {
                    result = scheduler.run(None, BusyPolicy::Coalesce) => {
                        if let Err(e) = result {
                            log::error!("scheduled refresh: {e}");
                        }
                    }
                    _ = shutdown.wait_for(|down| *down) => break,
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.wait_for(|down| *down) => break,
                }
            }
            log::info!("refresh timer stopped");
        })
    }
}

fn shutting_down() -> RefreshError {
    RefreshError::Failed("shutting down".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::aggregator::RefreshSettings;
    use crate::libs::db_driver::tests::seed;
    use crate::libs::db_driver::DbDriver;
    use crate::libs::prober::tests::FakeProber;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        db: DbDriver,
        calls: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    fn scheduler(policy: BusyPolicy, delay: Duration, interval: Duration) -> (Scheduler, Fixture) {
        let db = DbDriver::in_memory();
        seed(&db, "a", "10.0.0.1");
        seed(&db, "b", "10.0.0.2");
        seed(&db, "c", "10.0.0.3");
        let prober = FakeProber::new(&[("10.0.0.1", true), ("10.0.0.3", true)], delay);
        let fixture = Fixture {
            db: db.clone(),
            calls: prober.calls.clone(),
            max_in_flight: prober.max_in_flight.clone(),
        };
        let settings = RefreshSettings {
            probe_timeout: Duration::from_secs(1),
            fan_out: 16,
            deadline: None,
        };
        let aggregator = Aggregator::new(db, Arc::new(prober), settings);
        (Scheduler::new(aggregator, policy, interval), fixture)
    }

    #[tokio::test]
    async fn overlapping_triggers_share_one_pass() {
        let (s, fx) = scheduler(BusyPolicy::Coalesce, Duration::from_millis(150), Duration::from_secs(30));

        let (first, second) = tokio::join!(s.trigger(None), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            s.trigger(None).await
        });
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(fx.calls.load(Ordering::SeqCst), 3);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn reject_policy_reports_busy() {
        let (s, fx) = scheduler(BusyPolicy::Reject, Duration::from_millis(150), Duration::from_secs(30));

        let (first, second) = tokio::join!(s.trigger(None), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(s.state(), SchedulerState::Refreshing);
            s.trigger(None).await
        });

        assert_eq!(first.unwrap().outcomes.len(), 3);
        assert_eq!(second.unwrap_err(), RefreshError::Busy);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn subset_request_rides_on_full_pass() {
        let (s, fx) = scheduler(BusyPolicy::Coalesce, Duration::from_millis(100), Duration::from_secs(30));

        let (full, only_a) = tokio::join!(s.trigger(None), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            s.trigger(Some(HashSet::from(["a".to_owned()]))).await
        });

        assert_eq!(full.unwrap().outcomes.len(), 3);
        let only_a = only_a.unwrap();
        assert_eq!(only_a.outcomes.len(), 1);
        assert_eq!(only_a.outcomes[0].id, "a");
        assert_eq!(fx.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn uncovered_request_waits_for_running_pass() {
        let (s, fx) = scheduler(BusyPolicy::Coalesce, Duration::from_millis(100), Duration::from_secs(30));

        let (subset, full) = tokio::join!(s.trigger(Some(HashSet::from(["a".to_owned()]))), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            s.trigger(None).await
        });

        assert_eq!(subset.unwrap().outcomes.len(), 1);
        assert_eq!(full.unwrap().outcomes.len(), 3);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 4);
        // the two passes never overlapped
        assert_eq!(fx.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pass_completes_when_caller_goes_away() {
        let (s, fx) = scheduler(BusyPolicy::Coalesce, Duration::from_millis(100), Duration::from_secs(30));

        let gave_up = tokio::time::timeout(Duration::from_millis(10), s.trigger(None)).await;
        assert!(gave_up.is_err());
        assert_eq!(s.state(), SchedulerState::Refreshing);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(fx.db.all_servers().unwrap().iter().all(|s| s.last_checked.is_some()));
    }

    #[tokio::test]
    async fn timer_refreshes_until_shutdown() {
        let (s, fx) = scheduler(BusyPolicy::Coalesce, Duration::from_millis(5), Duration::from_millis(50));
        let timer = s.spawn_timer();
        tokio::time::sleep(Duration::from_millis(180)).await;
        s.shutdown();
        timer.await.unwrap();

        let calls = fx.calls.load(Ordering::SeqCst);
        assert!(calls >= 6, "expected at least two passes, got {calls} probes");
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_requests() {
        let (s, fx) = scheduler(BusyPolicy::Coalesce, Duration::from_secs(5), Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        let (waiting, _) = tokio::join!(s.trigger(None), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            s.shutdown();
        });

        assert_eq!(waiting.unwrap_err(), RefreshError::Failed("shutting down".into()));
        assert!(started.elapsed() < Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(fx.db.all_servers().unwrap().iter().all(|s| s.last_checked.is_none()));
        assert!(s.trigger(None).await.is_err());
    }
}
