//! Saga configuration
//!
//! Two sections:
//! - `plan`: values stamped into every emitted saga definition (recovery
//!   policy, retry counts, retry delay)
//! - `coordinator`: bookkeeping limits of the event coordinator
//!
//! Loaded from a versioned YAML file:
//!
//! ```yaml
//! version: 1
//! plan:
//!   recovery_policy: ForwardRecovery
//!   compensation_max_retries: 5
//! coordinator:
//!   retired_transaction_capacity: 1024
//! ```
//!
//! Omitted fields take their defaults; unknown fields are rejected.

pub mod error;

pub use error::{ConfigError, ConfigResult};

use crate::plan::RecoveryPolicy;
use serde::{Deserialize, Serialize};

const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Settings copied into each emitted plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanSettings {
    pub recovery_policy: RecoveryPolicy,
    pub transaction_max_retries: u32,
    pub compensation_max_retries: u32,
    pub transaction_retry_delay_ms: u64,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            recovery_policy: RecoveryPolicy::BackwardRecovery,
            transaction_max_retries: 0,
            compensation_max_retries: 3,
            transaction_retry_delay_ms: 5_000,
        }
    }
}

impl PlanSettings {
    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery_policy = policy;
        self
    }

    pub fn transaction_max_retries(mut self, retries: u32) -> Self {
        self.transaction_max_retries = retries;
        self
    }

    pub fn compensation_max_retries(mut self, retries: u32) -> Self {
        self.compensation_max_retries = retries;
        self
    }

    pub fn transaction_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.transaction_retry_delay_ms = delay_ms;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.transaction_max_retries > 100 {
            return Err(ConfigError::range_with_hint(
                "transaction_max_retries",
                self.transaction_max_retries,
                0,
                100,
                "Forward retries beyond 100 hold the saga open for too long.",
            ));
        }
        if self.compensation_max_retries > 100 {
            return Err(ConfigError::range_with_hint(
                "compensation_max_retries",
                self.compensation_max_retries,
                0,
                100,
                "Compensation retries are bounded by the execution engine.",
            ));
        }
        if self.transaction_retry_delay_ms > 3_600_000 {
            return Err(ConfigError::range_with_hint(
                "transaction_retry_delay_ms",
                self.transaction_retry_delay_ms,
                0,
                3_600_000,
                "Use at most one hour between retries.",
            ));
        }
        Ok(())
    }
}

/// Coordinator bookkeeping limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorSettings {
    /// How many terminated transaction ids are remembered to tell
    /// post-terminal events apart from never-started ones.
    pub retired_transaction_capacity: usize,
    /// Active builder count above which a leak warning is logged.
    pub active_transactions_warn_threshold: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            retired_transaction_capacity: 4_096,
            active_transactions_warn_threshold: 10_000,
        }
    }
}

impl CoordinatorSettings {
    pub fn retired_transaction_capacity(mut self, capacity: usize) -> Self {
        self.retired_transaction_capacity = capacity;
        self
    }

    pub fn active_transactions_warn_threshold(mut self, threshold: usize) -> Self {
        self.active_transactions_warn_threshold = threshold;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.retired_transaction_capacity == 0 || self.retired_transaction_capacity > 10_000_000
        {
            return Err(ConfigError::range_with_hint(
                "retired_transaction_capacity",
                self.retired_transaction_capacity,
                1,
                10_000_000,
                "Keep at least one retired id so duplicate terminal events are reported as such.",
            ));
        }
        if self.active_transactions_warn_threshold == 0 {
            return Err(ConfigError::range_with_hint(
                "active_transactions_warn_threshold",
                self.active_transactions_warn_threshold,
                1,
                usize::MAX,
                "A zero threshold would warn on every BEGIN.",
            ));
        }
        Ok(())
    }
}

/// Complete saga configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaConfig {
    pub plan: PlanSettings,
    pub coordinator: CoordinatorSettings,
}

/// YAML schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plan: Option<PlanSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    coordinator: Option<CoordinatorSettings>,
}

impl SagaConfig {
    pub fn plan(mut self, f: impl FnOnce(PlanSettings) -> PlanSettings) -> Self {
        self.plan = f(self.plan);
        self
    }

    pub fn coordinator(mut self, f: impl FnOnce(CoordinatorSettings) -> CoordinatorSettings) -> Self {
        self.coordinator = f(self.coordinator);
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.plan.validate()?;
        self.coordinator.validate()
    }

    /// Load and validate a YAML configuration file
    pub fn from_yaml(path: impl AsRef<std::path::Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        if !SUPPORTED_VERSIONS.contains(&file.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: file.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let config = Self {
            plan: file.plan.unwrap_or_default(),
            coordinator: file.coordinator.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: 1,
            plan: Some(self.plan.clone()),
            coordinator: Some(self.coordinator.clone()),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_validate() {
        let config = SagaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.plan.recovery_policy, RecoveryPolicy::BackwardRecovery);
        assert_eq!(config.plan.compensation_max_retries, 3);
    }

    #[test]
    fn test_yaml_partial_sections() {
        let yaml = r#"
version: 1
plan:
  recovery_policy: ForwardRecovery
  compensation_max_retries: 5
"#;
        let config = SagaConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.plan.recovery_policy, RecoveryPolicy::ForwardRecovery);
        assert_eq!(config.plan.compensation_max_retries, 5);
        assert_eq!(config.plan.transaction_retry_delay_ms, 5_000);
        assert_eq!(config.coordinator, CoordinatorSettings::default());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = SagaConfig::default()
            .plan(|p| p.transaction_max_retries(2).transaction_retry_delay_ms(250))
            .coordinator(|c| c.retired_transaction_capacity(16));

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("transaction_retry_delay_ms: 250"));

        let recovered = SagaConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(recovered, config);
    }

    #[test]
    fn test_yaml_file_loading() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"version: 1\ncoordinator:\n  active_transactions_warn_threshold: 8\n")
            .unwrap();

        let config = SagaConfig::from_yaml(file.path()).unwrap();
        assert_eq!(config.coordinator.active_transactions_warn_threshold, 8);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "version: 1\nplan:\n  max_retries: 3\n";
        assert!(matches!(
            SagaConfig::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let result = SagaConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_range_validation() {
        let config = SagaConfig::default().plan(|p| p.compensation_max_retries(1_000));
        assert!(matches!(config.validate(), Err(ConfigError::Range { .. })));

        let config = SagaConfig::default().coordinator(|c| c.retired_transaction_capacity(0));
        assert!(matches!(config.validate(), Err(ConfigError::Range { .. })));
    }
}
