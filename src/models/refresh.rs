use crate::models::server::{Server, ServerStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

/// Result of one record in one refresh pass.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub previous_status: ServerStatus,
    pub new_status: ServerStatus,
    pub changed: bool,
    pub checked_at: DateTime<Utc>,
}

/// Everything a single aggregation pass produced. Outcomes form a set keyed by id,
/// their order carries no meaning.
#[derive(Serialize, Debug, Clone, Default)]
pub struct RefreshReport {
    pub outcomes: Vec<RefreshOutcome>,
    /// ids whose status could not be persisted
    pub write_failures: Vec<String>,
    /// ids still being probed when the pass deadline hit
    pub abandoned: Vec<String>,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl RefreshReport {
    pub fn online_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.new_status.is_online()).count()
    }

    pub fn changes(&self) -> impl Iterator<Item = &RefreshOutcome> {
        self.outcomes.iter().filter(|o| o.changed)
    }

    /// Keep only the records named in `ids`.
    pub fn restricted_to(&self, ids: &HashSet<String>) -> Self {
        Self {
            outcomes: self
                .outcomes
                .iter()
                .filter(|o| ids.contains(&o.id))
                .cloned()
                .collect(),
            write_failures: self
                .write_failures
                .iter()
                .filter(|id| ids.contains(*id))
                .cloned()
                .collect(),
            abandoned: self
                .abandoned
                .iter()
                .filter(|id| ids.contains(*id))
                .cloned()
                .collect(),
            elapsed: self.elapsed,
        }
    }
}

/// Row of `GET /status/quick`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct QuickStatus {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub is_online: bool,
    pub checked_at: DateTime<Utc>,
}

impl From<&RefreshOutcome> for QuickStatus {
    fn from(o: &RefreshOutcome) -> Self {
        Self {
            id: o.id.clone(),
            name: o.name.clone(),
            ip_address: o.ip_address.clone(),
            is_online: o.new_status.is_online(),
            checked_at: o.checked_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub unchecked: usize,
}

impl StatusSummary {
    pub fn of(servers: &[Server]) -> Self {
        servers.iter().fold(Self::default(), |mut s, server| {
            s.total += 1;
            match server.status {
                ServerStatus::Online => s.online += 1,
                ServerStatus::Offline => s.offline += 1,
            }
            if server.last_checked.is_none() {
                s.unchecked += 1;
            }
            s
        })
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}
