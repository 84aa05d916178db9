use crate::libs::aggregator::Aggregator;
use crate::libs::app_config::{AppConfigRef, ProbeMethod};
use crate::libs::db_driver::DbDriver;
use crate::libs::prober::{IcmpProber, Prober, TcpProber};
use crate::libs::scheduler::Scheduler;
use std::sync::Arc;

#[derive(Clone)]
pub struct SharedState {
    //impls deref, can be private
    inner: Arc<SharedStateInner>,
}

pub struct SharedStateInner {
    pub app_config: AppConfigRef,
    pub db_driver: DbDriver,
    pub scheduler: Scheduler,
}

impl SharedState {
    pub fn new(config: AppConfigRef) -> eyre::Result<Self> {
        let db_driver = DbDriver::new(&config.db_path)?;
        let prober: Arc<dyn Prober> = match config.probe_method {
            ProbeMethod::Icmp => Arc::new(IcmpProber::new()),
            ProbeMethod::Tcp => Arc::new(TcpProber::new(config.tcp_ports.clone())),
        };
        log::info!(
            "probing with {:?}, timeout {}ms, fan-out {}",
            config.probe_method,
            config.probe_timeout_ms,
            config.fan_out
        );
        Ok(Self::with_parts(config, db_driver, prober))
    }

    pub fn with_parts(config: AppConfigRef, db_driver: DbDriver, prober: Arc<dyn Prober>) -> Self {
        let aggregator = Aggregator::new(db_driver.clone(), prober, config.refresh_settings());
        let scheduler = Scheduler::new(aggregator, config.busy_policy, config.refresh_interval());
        Self {
            inner: Arc::new(SharedStateInner {
                db_driver,
                scheduler,
                app_config: config,
            }),
        }
    }
}

impl std::ops::Deref for SharedState {
    type Target = SharedStateInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
