//! One refresh pass: probe every target concurrently (at most `fan_out` at a time) and
//! write each result back as soon as its probe finishes.

use crate::libs::db_driver::{DbDriver, RegistryError};
use crate::libs::prober::{ProbeFailure, ProbeResult, Prober};
use crate::models::refresh::{RefreshOutcome, RefreshReport};
use crate::models::server::{Server, ServerStatus};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Slack on top of the probe timeout before a probe is considered hung.
const PROBE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub probe_timeout: Duration,
    pub fan_out: usize,
    /// upper bound for a whole pass, derived from the target count when unset
    pub deadline: Option<Duration>,
}

impl RefreshSettings {
    pub fn pass_deadline(&self, targets: usize) -> Duration {
        self.deadline.unwrap_or_else(|| {
            let waves = targets.div_ceil(self.fan_out.max(1)) as u32;
            (self.probe_timeout + PROBE_GRACE) * waves + Duration::from_secs(1)
        })
    }
}

enum Recorded {
    Updated(RefreshOutcome),
    Removed,
    WriteFailed(RegistryError),
}

#[derive(Clone)]
pub struct Aggregator {
    db: DbDriver,
    prober: Arc<dyn Prober>,
    settings: RefreshSettings,
}

impl Aggregator {
    pub fn new(db: DbDriver, prober: Arc<dyn Prober>, settings: RefreshSettings) -> Self {
        Self {
            db,
            prober,
            settings,
        }
    }

    /// Refreshes the records in `ids`, or every record when `ids` is `None`. Unknown ids
    /// are ignored. Only a failure to read the registry snapshot fails the whole pass.
    pub async fn refresh(&self, ids: Option<&HashSet<String>>) -> eyre::Result<RefreshReport> {
        let started = Instant::now();
        let targets: Vec<Server> = self
            .db
            .all_servers()?
            .into_iter()
            .filter(|s| ids.is_none_or(|ids| ids.contains(&s.id)))
            .collect();

        if targets.is_empty() {
            log::debug!("refresh skipped, nothing to probe");
            return Ok(RefreshReport {
                elapsed: started.elapsed(),
                ..Default::default()
            });
        }

        let deadline = started + self.settings.pass_deadline(targets.len());
        let permits = Arc::new(Semaphore::new(self.settings.fan_out));
        let mut pending: HashSet<String> = targets.iter().map(|s| s.id.clone()).collect();
        let mut tasks = JoinSet::new();

        for server in targets {
            let permits = permits.clone();
            let prober = self.prober.clone();
            let db = self.db.clone();
            let timeout = self.settings.probe_timeout;
            tasks.spawn(async move {
                // the semaphore is never closed, holding the result holds the permit
                let _permit = permits.acquire_owned().await;
                let id = server.id.clone();
                (id, probe_and_record(&db, prober.as_ref(), server, timeout).await)
            });
        }

        let mut report = RefreshReport::default();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((id, recorded)))) => report.record(&mut pending, id, recorded),
                Ok(Some(Err(e))) => log::error!("probe task failed: {e}"),
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    // tasks that finished right at the deadline have already written
                    while let Some(joined) = tasks.try_join_next() {
                        if let Ok((id, recorded)) = joined {
                            report.record(&mut pending, id, recorded);
                        }
                    }
                    log::warn!(
                        "refresh deadline reached, abandoning {} probe(s)",
                        pending.len()
                    );
                    break;
                }
            }
        }

        report.abandoned = pending.into_iter().collect();
        report.elapsed = started.elapsed();
        log::info!(
            "refreshed {} server(s) in {}ms: {} online, {} offline, {} write failure(s), {} abandoned",
            report.outcomes.len(),
            report.elapsed.as_millis(),
            report.online_count(),
            report.outcomes.len() - report.online_count(),
            report.write_failures.len(),
            report.abandoned.len()
        );
        Ok(report)
    }
}

impl RefreshReport {
    fn record(&mut self, pending: &mut HashSet<String>, id: String, recorded: Recorded) {
        pending.remove(&id);
        match recorded {
            Recorded::Updated(outcome) => self.outcomes.push(outcome),
            Recorded::Removed => log::debug!("server {id} was removed during refresh"),
            Recorded::WriteFailed(e) => {
                log::error!("could not store status of {id}: {e}");
                self.write_failures.push(id);
            }
        }
    }
}

async fn probe_and_record(
    db: &DbDriver,
    prober: &dyn Prober,
    server: Server,
    timeout: Duration,
) -> Recorded {
    let result = tokio::time::timeout(
        timeout + PROBE_GRACE,
        prober.probe(&server.ip_address, timeout),
    )
    .await
    .unwrap_or(ProbeResult::Unreachable(ProbeFailure::Timeout));

    match &result {
        ProbeResult::Reachable { rtt } => {
            log::debug!("{} ({}) answered in {rtt:?}", server.name, server.ip_address)
        }
        ProbeResult::Unreachable(reason) => {
            log::debug!("{} ({}) unreachable: {reason}", server.name, server.ip_address)
        }
    }

    let new_status = ServerStatus::from_reachable(result.is_reachable());
    let checked_at = Utc::now();
    match db.update_status(&server.id, new_status, checked_at) {
        Ok(_) => {}
        Err(RegistryError::NotFound(_)) => return Recorded::Removed,
        Err(e) => return Recorded::WriteFailed(e),
    }

    if new_status != server.status {
        log::info!(
            "{} ({}) went {} -> {}",
            server.name,
            server.ip_address,
            server.status,
            new_status
        );
    }

    Recorded::Updated(RefreshOutcome {
        changed: new_status != server.status,
        previous_status: server.status,
        new_status,
        checked_at,
        id: server.id,
        name: server.name,
        ip_address: server.ip_address,
    })
}
