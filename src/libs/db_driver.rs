use crate::api::components::servers::models::UpdateServerRequest;
use crate::models;
use crate::models::server::{Server, ServerStatus};
use crate::prelude::Res;
use chrono::{DateTime, Utc};
use native_db::{Database, Models};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

static MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut models = Models::new();
    models
        .define::<models::server::Server>()
        .expect("server model must be definable");
    models
});

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("server {0} not found")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

fn storage(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Storage(e.to_string())
}

/// Server registry. Reads run on snapshot transactions, every write is a single
/// committed read-write transaction so readers never see a half-written record.
#[derive(Clone)]
pub struct DbDriver {
    pub db: Arc<Database<'static>>,
}

impl DbDriver {
    pub(crate) fn new(db_path: &str) -> eyre::Result<Self> {
        let db_path = PathBuf::from_str(db_path)?;
        log::info!("loading db: {db_path:?}");
        let builder = native_db::Builder::new();
        let db: Database = if db_path.exists() {
            builder.open(&MODELS, db_path.as_path())?
        } else {
            if let Some(dir) = db_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            builder.create(&MODELS, db_path.as_path())?
        };

        Ok(Self { db: Arc::new(db) })
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        let db = native_db::Builder::new()
            .create_in_memory(&MODELS)
            .expect("in-memory db");
        Self { db: Arc::new(db) }
    }

    pub fn all_servers(&self) -> eyre::Result<Vec<Server>> {
        let t = self.db.r_transaction()?;
        let servers = t
            .scan()
            .primary::<Server>()?
            .all()?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(servers)
    }

    pub fn is_empty(&self) -> eyre::Result<bool> {
        Ok(self.all_servers()?.is_empty())
    }

    pub fn add_server(&self, server: Server) -> Res {
        let t = self.db.rw_transaction()?;
        t.insert(server)?;
        t.commit()?;
        Ok(())
    }

    pub fn get_server_by_id(&self, id: String) -> eyre::Result<Option<Server>> {
        let r = self.db.r_transaction()?;
        Ok(r.get().primary::<Server>(id)?)
    }

    /// Applies the present fields of `req`. Moving a server to another address drops the
    /// probe result of the old one.
    pub fn update_server(
        &self,
        id: String,
        req: UpdateServerRequest,
    ) -> Result<Server, RegistryError> {
        let rw = self.db.rw_transaction().map_err(storage)?;
        let current = rw
            .get()
            .primary::<Server>(id.clone())
            .map_err(storage)?
            .ok_or(RegistryError::NotFound(id))?;

        let mut updated = current.clone();
        if let Some(name) = req.name {
            updated.name = name.trim().to_owned();
        }
        if let Some(description) = req.description {
            updated.description = description.filter(|d| !d.trim().is_empty());
        }
        if let Some(ip) = req.ip_address {
            let ip = ip.trim().to_owned();
            if ip != updated.ip_address {
                updated.ip_address = ip;
                updated.status = ServerStatus::default();
                updated.last_checked = None;
            }
        }

        rw.update(current, updated.clone()).map_err(storage)?;
        rw.commit().map_err(storage)?;
        Ok(updated)
    }

    /// Writes one probe result. `status` and `last_checked` change together in one
    /// transaction, other fields are taken from the row as it is at write time.
    pub fn update_status(
        &self,
        id: &str,
        status: ServerStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<Server, RegistryError> {
        let rw = self.db.rw_transaction().map_err(storage)?;
        let current = rw
            .get()
            .primary::<Server>(id.to_owned())
            .map_err(storage)?
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;

        let updated = Server {
            status,
            last_checked: Some(checked_at),
            ..current.clone()
        };
        rw.update(current, updated.clone()).map_err(storage)?;
        rw.commit().map_err(storage)?;
        Ok(updated)
    }

    pub fn delete_server(&self, id: String) -> Result<(), RegistryError> {
        let rw = self.db.rw_transaction().map_err(storage)?;
        let item = rw
            .get()
            .primary::<Server>(id.clone())
            .map_err(storage)?
            .ok_or(RegistryError::NotFound(id))?;
        rw.remove(item).map_err(storage)?;
        rw.commit().map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::components::servers::models::AddServerRequest;

    pub(crate) fn seed(db: &DbDriver, id: &str, ip: &str) -> Server {
        let server = Server::from_req(
            id.to_owned(),
            AddServerRequest {
                name: format!("server-{id}"),
                ip_address: ip.to_owned(),
                description: None,
            },
        );
        db.add_server(server.clone()).unwrap();
        server
    }

    #[test]
    fn update_status_touches_only_status_fields() {
        let db = DbDriver::in_memory();
        let original = seed(&db, "a", "10.0.0.1");
        let now = Utc::now();

        let updated = db.update_status("a", ServerStatus::Online, now).unwrap();
        assert_eq!(updated.status, ServerStatus::Online);
        assert_eq!(updated.last_checked, Some(now));
        assert_eq!(updated.name, original.name);

        let stored = db.get_server_by_id("a".into()).unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[test]
    fn update_status_on_missing_record_is_not_found() {
        let db = DbDriver::in_memory();
        let err = db
            .update_status("gone", ServerStatus::Online, Utc::now())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "gone"));
    }

    #[test]
    fn changing_ip_resets_probe_result() {
        let db = DbDriver::in_memory();
        seed(&db, "a", "10.0.0.1");
        db.update_status("a", ServerStatus::Online, Utc::now()).unwrap();

        let renamed = db
            .update_server(
                "a".into(),
                UpdateServerRequest {
                    name: Some("router".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.status, ServerStatus::Online);

        let moved = db
            .update_server(
                "a".into(),
                UpdateServerRequest {
                    ip_address: Some("10.0.0.9".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.name, "router");
        assert_eq!(moved.status, ServerStatus::Offline);
        assert!(moved.last_checked.is_none());
    }

    #[test]
    fn delete_then_list() {
        let db = DbDriver::in_memory();
        seed(&db, "a", "10.0.0.1");
        seed(&db, "b", "10.0.0.2");
        db.delete_server("a".into()).unwrap();
        assert!(matches!(
            db.delete_server("a".into()),
            Err(RegistryError::NotFound(_))
        ));
        let ids: Vec<_> = db.all_servers().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b".to_owned()]);
        assert!(!db.is_empty().unwrap());
    }
}
