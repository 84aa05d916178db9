use crate::api::components::servers::models::AddServerRequest;
use crate::libs::rmp_serializer::RmpSerde;
use chrono::{DateTime, Utc};
use native_db::ToKey;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[native_model(id = 1, version = 1, with = RmpSerde)]
#[native_db::native_db]
pub struct Server {
    #[primary_key]
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub description: Option<String>,
    pub status: ServerStatus,
    /// `None` until the first probe of this record completes
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    #[default]
    Offline,
}

impl ServerStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

impl Server {
    /// `req` must already be validated, see [`AddServerRequest::validate`].
    pub fn from_req(id: String, req: AddServerRequest) -> Self {
        Self {
            id,
            name: req.name.trim().to_owned(),
            ip_address: req.ip_address.trim().to_owned(),
            description: req.description.filter(|d| !d.trim().is_empty()),
            status: ServerStatus::default(),
            last_checked: None,
            created_at: Utc::now(),
        }
    }
}
