use crate::snmp::SessionOptions;
use crate::storage::anomaly::{
    DEFAULT_BURST_TOLERANCE, DEFAULT_CAPACITY_MBPS, DEFAULT_GLOBAL_CAP_MBPS,
};
use crate::storage::influx::DEFAULT_MEASUREMENT;
use crate::storage::state::DEFAULT_MAX_VALID_RATE_MBPS;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_WORKER_COUNT: usize = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to load config from environment: {0}")]
    Environment(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Where the device list comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InventorySource {
    Http { url: String, token: Option<String> },
    File { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub inventory: InventorySource,
    pub inventory_timeout_secs: u64,

    pub influx_url: String,
    pub influx_token: String,
    pub influx_org: String,
    pub influx_bucket: String,
    pub influx_measurement: String,
    pub influx_write_timeout_secs: u64,

    pub worker_count: usize,
    pub cycle_interval_secs: u64,

    pub snmp_timeout_ms: u64,
    pub snmp_retries: u32,
    pub snmp_max_repetitions: u32,

    pub default_capacity_mbps: f64,
    pub burst_tolerance: f64,
    pub global_cap_mbps: f64,
    pub max_valid_rate_mbps: f64,

    /// 0 keeps baselines forever.
    pub state_retention_secs: u64,
    pub log_dir: String,

    /// Problems that were recovered from with a default. Logged once logging is up.
    pub warnings: Vec<String>,
}

// WORKER_COUNT arrives as text from the environment and as a number from TOML.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum RawWorkerCount {
    Number(i64),
    Text(String),
}

impl fmt::Display for RawWorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawWorkerCount::Number(n) => write!(f, "{n}"),
            RawWorkerCount::Text(text) => write!(f, "{text:?}"),
        }
    }
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
pub struct PartialPollerConfig {
    inventory_url: Option<String>,
    inventory_token: Option<String>,
    inventory_path: Option<String>,
    inventory_timeout_secs: Option<u64>,
    influx_url: Option<String>,
    influx_token: Option<String>,
    influx_org: Option<String>,
    influx_bucket: Option<String>,
    influx_measurement: Option<String>,
    influx_write_timeout_secs: Option<u64>,
    worker_count: Option<RawWorkerCount>,
    cycle_interval_secs: Option<u64>,
    snmp_timeout_ms: Option<u64>,
    snmp_retries: Option<u32>,
    snmp_max_repetitions: Option<u32>,
    default_capacity_mbps: Option<f64>,
    burst_tolerance: Option<f64>,
    global_cap_mbps: Option<f64>,
    max_valid_rate_mbps: Option<f64>,
    state_retention_secs: Option<u64>,
    log_dir: Option<String>,
}

impl PollerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) if Path::new(path_str).exists() => read_file_layer(Path::new(path_str))?,
            _ => PartialPollerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialPollerConfig = envy::from_env()?;

        // 3. Merge: environment overrides file
        Self::from_layers(file_config, env_config)
    }

    pub fn from_layers(
        file: PartialPollerConfig,
        env: PartialPollerConfig,
    ) -> Result<Self, ConfigError> {
        let mut warnings = Vec::new();

        let inventory_url = non_empty(env.inventory_url.or(file.inventory_url));
        let inventory_path = non_empty(env.inventory_path.or(file.inventory_path));
        let inventory = match (inventory_url, inventory_path) {
            (Some(url), path) => {
                if path.is_some() {
                    warnings.push(
                        "both INVENTORY_URL and INVENTORY_PATH are set, using INVENTORY_URL"
                            .to_string(),
                    );
                }
                InventorySource::Http {
                    url,
                    token: non_empty(env.inventory_token.or(file.inventory_token)),
                }
            }
            (None, Some(path)) => InventorySource::File { path: PathBuf::from(path) },
            (None, None) => return Err(ConfigError::Missing("INVENTORY_URL or INVENTORY_PATH")),
        };

        let worker_count = match env.worker_count.or(file.worker_count) {
            None => DEFAULT_WORKER_COUNT,
            Some(raw) => parse_worker_count(&raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "invalid WORKER_COUNT {raw}, using default of {DEFAULT_WORKER_COUNT}"
                ));
                DEFAULT_WORKER_COUNT
            }),
        };

        let config = PollerConfig {
            inventory,
            inventory_timeout_secs: env
                .inventory_timeout_secs
                .or(file.inventory_timeout_secs)
                .unwrap_or(10),
            influx_url: non_empty(env.influx_url.or(file.influx_url))
                .ok_or(ConfigError::Missing("INFLUX_URL"))?,
            influx_token: non_empty(env.influx_token.or(file.influx_token))
                .ok_or(ConfigError::Missing("INFLUX_TOKEN"))?,
            influx_org: non_empty(env.influx_org.or(file.influx_org))
                .ok_or(ConfigError::Missing("INFLUX_ORG"))?,
            influx_bucket: non_empty(env.influx_bucket.or(file.influx_bucket))
                .ok_or(ConfigError::Missing("INFLUX_BUCKET"))?,
            influx_measurement: non_empty(env.influx_measurement.or(file.influx_measurement))
                .unwrap_or_else(|| DEFAULT_MEASUREMENT.to_string()),
            influx_write_timeout_secs: env
                .influx_write_timeout_secs
                .or(file.influx_write_timeout_secs)
                .unwrap_or(10),
            worker_count,
            cycle_interval_secs: env
                .cycle_interval_secs
                .or(file.cycle_interval_secs)
                .unwrap_or(180),
            snmp_timeout_ms: env.snmp_timeout_ms.or(file.snmp_timeout_ms).unwrap_or(1500),
            snmp_retries: env.snmp_retries.or(file.snmp_retries).unwrap_or(0),
            snmp_max_repetitions: env
                .snmp_max_repetitions
                .or(file.snmp_max_repetitions)
                .unwrap_or(50),
            default_capacity_mbps: env
                .default_capacity_mbps
                .or(file.default_capacity_mbps)
                .unwrap_or(DEFAULT_CAPACITY_MBPS),
            burst_tolerance: env
                .burst_tolerance
                .or(file.burst_tolerance)
                .unwrap_or(DEFAULT_BURST_TOLERANCE),
            global_cap_mbps: env
                .global_cap_mbps
                .or(file.global_cap_mbps)
                .unwrap_or(DEFAULT_GLOBAL_CAP_MBPS),
            max_valid_rate_mbps: env
                .max_valid_rate_mbps
                .or(file.max_valid_rate_mbps)
                .unwrap_or(DEFAULT_MAX_VALID_RATE_MBPS),
            state_retention_secs: env
                .state_retention_secs
                .or(file.state_retention_secs)
                .unwrap_or(0),
            log_dir: non_empty(env.log_dir.or(file.log_dir)).unwrap_or_else(|| "logs".to_string()),
            warnings,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("CYCLE_INTERVAL_SECS", self.cycle_interval_secs)?;
        positive("SNMP_TIMEOUT_MS", self.snmp_timeout_ms)?;
        positive("SNMP_MAX_REPETITIONS", u64::from(self.snmp_max_repetitions))?;
        positive("INVENTORY_TIMEOUT_SECS", self.inventory_timeout_secs)?;
        positive("INFLUX_WRITE_TIMEOUT_SECS", self.influx_write_timeout_secs)?;

        for (field, value) in [
            ("DEFAULT_CAPACITY_MBPS", self.default_capacity_mbps),
            ("BURST_TOLERANCE", self.burst_tolerance),
            ("GLOBAL_CAP_MBPS", self.global_cap_mbps),
            ("MAX_VALID_RATE_MBPS", self.max_valid_rate_mbps),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is not a positive number"),
                });
            }
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_secs(self.inventory_timeout_secs)
    }

    pub fn influx_write_timeout(&self) -> Duration {
        Duration::from_secs(self.influx_write_timeout_secs)
    }

    pub fn state_retention(&self) -> Option<Duration> {
        (self.state_retention_secs > 0).then(|| Duration::from_secs(self.state_retention_secs))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timeout: Duration::from_millis(self.snmp_timeout_ms),
            retries: self.snmp_retries,
            max_repetitions: self.snmp_max_repetitions,
        }
    }
}

fn read_file_layer(path: &Path) -> Result<PartialPollerConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_worker_count(raw: &RawWorkerCount) -> Option<usize> {
    let count = match raw {
        RawWorkerCount::Number(n) => usize::try_from(*n).ok()?,
        RawWorkerCount::Text(text) => text.trim().parse::<usize>().ok()?,
    };
    (count > 0).then_some(count)
}
