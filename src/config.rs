use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{AccessControl, AccountId, Role};

pub const MINUTE_MILLIS: u64 = 60 * 1000;
pub const HOUR_MILLIS: u64 = 60 * MINUTE_MILLIS;

/// Ratio applied by the ForceDefaultMint manual strategy (160%)
pub const FORCE_DEFAULT_RATIO_BPS: u32 = 16_000;
/// Ratio used when the engine response cannot be parsed (150%)
pub const FALLBACK_RATIO_BPS: u32 = 15_000;
pub const MIN_RATIO_BPS: u32 = 12_500;
pub const MAX_RATIO_BPS: u32 = 20_000;
pub const MIN_CONFIDENCE: u8 = 30;
pub const MAX_CONFIDENCE: u8 = 95;
/// Candidates examined per monitor scan
pub const MAX_SCAN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(Box<str>),
}

/// Escalation ladder delays, measured from request submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderConfig {
    #[serde(default = "default_manual_delay_secs")]
    pub manual_delay_secs: u64,
    #[serde(default = "default_owner_rescue_delay_secs")]
    pub owner_rescue_delay_secs: u64,
    #[serde(default = "default_automation_delay_secs")]
    pub automation_delay_secs: u64,
}

impl LadderConfig {
    pub fn manual_delay_millis(&self) -> u64 {
        self.manual_delay_secs * 1000
    }

    pub fn owner_rescue_delay_millis(&self) -> u64 {
        self.owner_rescue_delay_secs * 1000
    }

    pub fn automation_delay_millis(&self) -> u64 {
        self.automation_delay_secs * 1000
    }
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            manual_delay_secs: default_manual_delay_secs(),
            owner_rescue_delay_secs: default_owner_rescue_delay_secs(),
            automation_delay_secs: default_automation_delay_secs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_window_secs")]
    pub window_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_threshold(),
            window_secs: default_breaker_window_secs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Fallback USD prices keyed by asset symbol
    #[serde(default)]
    pub static_prices: BTreeMap<String, Decimal>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: default_staleness_threshold_secs(),
            static_prices: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_max_scan")]
    pub max_scan: usize,
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_scan: default_max_scan(),
            enabled: default_monitor_enabled(),
        }
    }
}

/// Accounts granted roles at startup
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub manual_processors: Vec<String>,
    #[serde(default)]
    pub automation_callers: Vec<String>,
    #[serde(default)]
    pub oracle_callers: Vec<String>,
}

impl AccessConfig {
    pub fn build(&self) -> AccessControl {
        let mut access = AccessControl::new();
        let lists = [
            (Role::Operator, &self.operators),
            (Role::ManualProcessor, &self.manual_processors),
            (Role::AutomationCaller, &self.automation_callers),
            (Role::OracleCaller, &self.oracle_callers),
        ];
        for (role, accounts) in lists {
            for account in accounts {
                access.grant(role, AccountId::new(account.as_str()));
            }
        }
        access
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Tags the service task's lifecycle logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Default tracing directive for the harness subscriber when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default = "default_max_dispatch_retries")]
    pub max_dispatch_retries: u32,
    /// Must be set explicitly for TestFailureInjection deposits to be accepted
    #[serde(default)]
    pub allow_test_failure_injection: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            ladder: LadderConfig::default(),
            breaker: BreakerConfig::default(),
            oracle: OracleConfig::default(),
            monitor: MonitorConfig::default(),
            access: AccessConfig::default(),
            max_dispatch_retries: default_max_dispatch_retries(),
            allow_test_failure_injection: false,
        }
    }
}

impl VaultConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ladder = &self.ladder;
        if !(ladder.manual_delay_secs < ladder.owner_rescue_delay_secs
            && ladder.owner_rescue_delay_secs < ladder.automation_delay_secs)
        {
            return Err(ConfigError::Invalid(
                "ladder delays must increase: manual < owner rescue < automation".into(),
            ));
        }
        if self.service_name.trim().is_empty() || self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("service_name and log_level must be set".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid("breaker.failure_threshold must be > 0".into()));
        }
        if self.monitor.max_scan == 0 {
            return Err(ConfigError::Invalid("monitor.max_scan must be > 0".into()));
        }
        if let Some((symbol, _)) = self
            .oracle
            .static_prices
            .iter()
            .find(|(_, price)| **price <= Decimal::ZERO)
        {
            return Err(ConfigError::Invalid(
                format!("static price for {} must be positive", symbol).into(),
            ));
        }
        Ok(())
    }

    pub fn staleness_threshold_millis(&self) -> u64 {
        self.oracle.staleness_threshold_secs * 1000
    }

    pub fn breaker_window_millis(&self) -> u64 {
        self.breaker.window_secs * 1000
    }
}

fn default_service_name() -> String { "risk-basket-vault".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_manual_delay_secs() -> u64 { 30 * 60 }
fn default_owner_rescue_delay_secs() -> u64 { 2 * 60 * 60 }
fn default_automation_delay_secs() -> u64 { 4 * 60 * 60 }
fn default_breaker_threshold() -> u32 { 5 }
fn default_breaker_window_secs() -> u64 { 60 * 60 }
fn default_staleness_threshold_secs() -> u64 { 60 * 60 }
fn default_max_scan() -> usize { MAX_SCAN }
fn default_monitor_enabled() -> bool { true }
fn default_max_dispatch_retries() -> u32 { 3 }

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults_match_ladder() {
        let config = VaultConfig::default();
        assert_eq!(config.ladder.manual_delay_millis(), 30 * MINUTE_MILLIS);
        assert_eq!(config.ladder.owner_rescue_delay_millis(), 2 * HOUR_MILLIS);
        assert_eq!(config.ladder.automation_delay_millis(), 4 * HOUR_MILLIS);
        assert_eq!(config.staleness_threshold_millis(), HOUR_MILLIS);
        assert_eq!(config.monitor.max_scan, 10);
        assert!(!config.allow_test_failure_injection);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(VaultConfig::from_toml_str("").unwrap(), VaultConfig::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
service_name = "vault-staging"
allow_test_failure_injection = true

[oracle]
staleness_threshold_secs = 600
static_prices = {{ DAI = "1.00", WETH = "2000" }}

[access]
operators = ["ops"]
oracle_callers = ["router"]

[breaker]
failure_threshold = 3
"#
        )
        .unwrap();

        let config = VaultConfig::from_file(file.path()).unwrap();
        assert_eq!(config.service_name, "vault-staging");
        assert!(config.allow_test_failure_injection);
        assert_eq!(config.oracle.static_prices.get("WETH"), Some(&dec!(2000)));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.window_secs, 3600);
        assert_eq!(config.ladder, LadderConfig::default());

        let access = config.access.build();
        assert!(access.has(Role::Operator, &AccountId::from("ops")));
        assert!(access.has(Role::OracleCaller, &AccountId::from("router")));
        assert!(!access.has(Role::Operator, &AccountId::from("router")));
    }

    #[test]
    fn test_rejects_non_increasing_ladder() {
        let err = VaultConfig::from_toml_str(
            "[ladder]\nmanual_delay_secs = 7200\nowner_rescue_delay_secs = 7200\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_non_positive_static_price() {
        let err = VaultConfig::from_toml_str("[oracle]\nstatic_prices = { DAI = \"0\" }\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_log_level_is_read_and_must_be_set() {
        let config =
            VaultConfig::from_toml_str("log_level = \"risk_basket_vault=debug\"\n").unwrap();
        assert_eq!(config.log_level, "risk_basket_vault=debug");

        let err = VaultConfig::from_toml_str("log_level = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
