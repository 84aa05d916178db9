use crate::api::components::servers::models::AddServerRequest;
use crate::libs::db_driver::DbDriver;
use crate::models::server::Server;
use itertools::Itertools;

/// Inserts the servers listed in the json file at `path`, but only into an empty registry.
/// Returns how many records were inserted.
pub async fn seed_if_empty(db: &DbDriver, path: &str) -> eyre::Result<usize> {
    if !db.is_empty()? {
        log::info!("registry already populated, ignoring seed file {path}");
        return Ok(0);
    }
    let raw = tokio::fs::read_to_string(path).await?;
    let entries: Vec<AddServerRequest> = serde_json::from_str(&raw)?;

    let (valid, invalid): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition_map(|req| match req.validate() {
            Ok(()) => itertools::Either::Left(req),
            Err(reason) => itertools::Either::Right((req.name, reason)),
        });
    for (name, reason) in &invalid {
        log::warn!("skipping seed entry {name:?}: {reason}");
    }

    let inserted = valid.len();
    for req in valid {
        db.add_server(Server::from_req(cuid2::create_id(), req))?;
    }
    log::info!("seeded {inserted} server(s) from {path}");
    Ok(inserted)
}
