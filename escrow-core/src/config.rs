//! Configuration for the escrow

use serde::{Deserialize, Serialize};

/// Escrow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Stream policy
    pub policy: PolicyConfig,

    /// Node simulation settings
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "escrow-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            policy: PolicyConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Which operations the ledger accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Allow sender/recipient cancellation
    pub cancellation_enabled: bool,

    /// Allow withdrawals of an explicit amount below the withdrawable balance
    pub partial_withdrawals_enabled: bool,

    /// Longest accepted stream (seconds), `None` for unbounded
    pub max_stream_duration_secs: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cancellation_enabled: true,
            partial_withdrawals_enabled: true,
            max_stream_duration_secs: None,
        }
    }
}

/// Scenario replayed by `escrow-node`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Deposit in base units
    ///
    /// Written as a string in TOML, since TOML integers stop at `i64::MAX`.
    #[serde(with = "amount_str")]
    pub deposit: u128,

    /// Delay between creation and start time (seconds)
    pub start_delay_secs: i64,

    /// Stream duration (seconds)
    pub duration_secs: i64,

    /// Clock advance before the withdrawal (seconds)
    pub advance_secs: i64,

    /// Keep running after the scenario until Ctrl-C
    pub keep_running: bool,

    /// Interval between status reports while running (milliseconds)
    pub report_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deposit: 36 * 10u128.pow(18), // 36 ether in wei
            start_delay_secs: 3600,
            duration_secs: 3600,
            advance_secs: 3599 + 1800,
            keep_running: false,
            report_interval_ms: 5_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(value) = std::env::var("ESCROW_DEPOSIT") {
            config.simulation.deposit = parse_env("ESCROW_DEPOSIT", &value)?;
        }

        if let Ok(value) = std::env::var("ESCROW_CANCELLATION_ENABLED") {
            config.policy.cancellation_enabled = parse_env("ESCROW_CANCELLATION_ENABLED", &value)?;
        }

        if let Ok(value) = std::env::var("ESCROW_PARTIAL_WITHDRAWALS_ENABLED") {
            config.policy.partial_withdrawals_enabled =
                parse_env("ESCROW_PARTIAL_WITHDRAWALS_ENABLED", &value)?;
        }

        if let Ok(value) = std::env::var("ESCROW_MAX_STREAM_DURATION_SECS") {
            config.policy.max_stream_duration_secs =
                Some(parse_env("ESCROW_MAX_STREAM_DURATION_SECS", &value)?);
        }

        if let Ok(value) = std::env::var("ESCROW_KEEP_RUNNING") {
            config.simulation.keep_running = parse_env("ESCROW_KEEP_RUNNING", &value)?;
        }

        Ok(config)
    }

    /// Reject settings the node cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let sim = &self.simulation;
        if sim.report_interval_ms == 0 {
            return Err(crate::Error::Config(
                "simulation.report_interval_ms must be positive".to_string(),
            ));
        }
        if sim.start_delay_secs < 0 || sim.duration_secs <= 0 || sim.advance_secs < 0 {
            return Err(crate::Error::Config(format!(
                "simulation times must be non-negative with a positive duration \
                 (start_delay_secs={}, duration_secs={}, advance_secs={})",
                sim.start_delay_secs, sim.duration_secs, sim.advance_secs
            )));
        }
        Ok(())
    }
}

/// `u128` amounts as decimal strings, also accepting small TOML integers
mod amount_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(u64),
    }

    pub fn serialize<S: Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text
                .trim()
                .replace('_', "")
                .parse()
                .map_err(|e| de::Error::custom(format!("invalid amount {:?}: {}", text, e))),
            Raw::Integer(value) => Ok(u128::from(value)),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}
