use crate::libs::app_config::{AppConfig, AppConfigRef};
use crate::libs::shared_state::SharedState;
use clap::Parser;
use prelude::Res;

mod api;
mod libs;
mod models;
mod prelude;

#[tokio::main]
async fn main() -> Res {
    dotenv::dotenv().ok();
    prelude::init_logger()?;

    let mut config = AppConfig::parse();
    config.load().await?;
    config.validate()?;

    let config = AppConfigRef::from(config);

    let state = SharedState::new(config.clone())?;

    if let Some(seed) = &config.seed {
        libs::seeder::seed_if_empty(&state.db_driver, seed).await?;
    }

    let timer = state.scheduler.spawn_timer();

    let scheduler = state.scheduler.clone();
    api::run(state.clone(), async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("could not listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        log::info!("shutting down");
        scheduler.shutdown();
    })
    .await?;

    timer.await?;
    Ok(())
}
