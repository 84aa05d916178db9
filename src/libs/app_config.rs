use crate::libs::aggregator::RefreshSettings;
use crate::libs::scheduler::BusyPolicy;
use crate::prelude::{Res, DATA_DIR_PATH};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static CONFIG_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::config_dir()
        .unwrap_or_else(|| DATA_DIR_PATH.clone())
        .join("homelab_status.json")
});
const DB_NAME: &str = "status.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    /// ICMP echo request
    #[default]
    Icmp,
    /// TCP connect to `--tcp-ports`
    Tcp,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("probe timeout must be between 1 and 60000 ms, got {0}")]
    ProbeTimeout(u64),
    #[error("fan-out must be between 1 and 1024, got {0}")]
    FanOut(usize),
    #[error("refresh interval ({interval}s) must be at least 1s and longer than the probe timeout")]
    Interval { interval: u64 },
    #[error("refresh deadline ({0}s) must not be shorter than the probe timeout")]
    Deadline(u64),
    #[error("tcp probing needs at least one port")]
    NoTcpPorts,
}

#[derive(Parser, Debug, Serialize, Deserialize, Clone)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct AppConfig {
    #[arg(long, default_value_t = 8080, help = "specify the api port")]
    pub port: u16,

    #[arg(short,long,default_value_t=default_db_path(), help="storage path for the server registry")]
    pub db_path: String,

    #[arg(long, default_value_t = 1000, help = "timeout of a single probe in milliseconds")]
    pub probe_timeout_ms: u64,

    #[arg(long, default_value_t = 16, help = "maximum number of probes running at once")]
    pub fan_out: usize,

    #[arg(long, default_value_t = 30, help = "seconds between two scheduled refreshes")]
    pub refresh_interval_secs: u64,

    #[arg(
        long,
        help = "upper bound for a whole refresh pass in seconds, derived from the server count if omitted"
    )]
    pub refresh_deadline_secs: Option<u64>,

    #[arg(long, value_enum, default_value_t = ProbeMethod::Icmp)]
    pub probe_method: ProbeMethod,

    #[arg(long, value_delimiter = ',', default_values_t = [22u16, 80, 443], help = "ports tried by the tcp probe")]
    pub tcp_ports: Vec<u16>,

    #[arg(long, value_enum, default_value_t = BusyPolicy::Coalesce, help = "what an on-demand refresh does while another one runs")]
    pub busy_policy: BusyPolicy,

    #[arg(long, help = "json file with servers to insert into an empty registry")]
    pub seed: Option<String>,

    #[arg(short,long, action=ArgAction::SetTrue,help="persist the given options as the new configuration")]
    #[serde(skip)]
    pub init: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: default_db_path(),
            probe_timeout_ms: 1000,
            fan_out: 16,
            refresh_interval_secs: 30,
            refresh_deadline_secs: None,
            probe_method: ProbeMethod::default(),
            tcp_ports: vec![22, 80, 443],
            busy_policy: BusyPolicy::default(),
            seed: None,
            init: false,
        }
    }
}

#[derive(Clone)]
pub struct AppConfigRef {
    inner: Arc<AppConfig>,
}

impl AppConfig {
    /// Resolves the effective configuration: `--init` persists the command line, otherwise a
    /// persisted file wins over the command line when one exists.
    pub async fn load(&mut self) -> Res {
        if self.init {
            self.init_config().await?;
            return Ok(());
        }
        if !tokio::fs::try_exists(CONFIG_PATH.deref()).await? {
            log::info!("no saved configuration, using command line options");
            return Ok(());
        }
        log::info!("loading {}", CONFIG_PATH.display());
        let str = tokio::fs::read_to_string(CONFIG_PATH.deref()).await?;
        *self = serde_json::from_str(&str)?;
        Ok(())
    }

    async fn init_config(&mut self) -> Res {
        log::info!("saving configuration to {}", CONFIG_PATH.display());
        if let Some(dir) = CONFIG_PATH.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let slf = serde_json::to_vec_pretty(&self)?;
        tokio::fs::write(CONFIG_PATH.deref(), &slf).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=60_000).contains(&self.probe_timeout_ms) {
            return Err(ConfigError::ProbeTimeout(self.probe_timeout_ms));
        }
        if !(1..=1024).contains(&self.fan_out) {
            return Err(ConfigError::FanOut(self.fan_out));
        }
        if self.refresh_interval_secs == 0 || self.refresh_interval() <= self.probe_timeout() {
            return Err(ConfigError::Interval {
                interval: self.refresh_interval_secs,
            });
        }
        if let Some(deadline) = self.refresh_deadline_secs {
            if Duration::from_secs(deadline) < self.probe_timeout() {
                return Err(ConfigError::Deadline(deadline));
            }
        }
        if self.probe_method == ProbeMethod::Tcp && self.tcp_ports.is_empty() {
            return Err(ConfigError::NoTcpPorts);
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            probe_timeout: self.probe_timeout(),
            fan_out: self.fan_out,
            deadline: self.refresh_deadline_secs.map(Duration::from_secs),
        }
    }
}

fn default_db_path() -> String {
    DATA_DIR_PATH.join(DB_NAME).display().to_string()
}

impl From<AppConfig> for AppConfigRef {
    fn from(value: AppConfig) -> Self {
        AppConfigRef {
            inner: Arc::new(value),
        }
    }
}

impl std::ops::Deref for AppConfigRef {
    type Target = AppConfig;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
