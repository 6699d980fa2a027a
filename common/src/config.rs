// Configuration management with layered sources (file, env) and named
// deployment profiles. Parsed once at startup, validated, then immutable.

use crate::models::CheckCriteria;
use crate::retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
use crate::role::{Capability, ExecutionRole};
use crate::scheduler::ScheduleRule;
use crate::store::BucketConfig;
use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub profile: DeploymentProfile,
    pub schedule: ScheduleConfig,
    pub function: FunctionConfig,
    pub check: CheckConfig,
    pub role: RoleConfig,
    pub notify: NotifyConfig,
    pub store: Option<StoreConfig>,
    pub observability: ObservabilityConfig,
}

/// Named deployment profiles. A profile is a complete parameter set for the
/// one orchestration graph; the graph itself is never duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentProfile {
    /// 6-hour cadence, bucket store, full capability grant
    Standard,
    /// 5-minute cadence, no store, logging and publish only
    Minimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cadence_seconds: u64,
    pub max_event_age_seconds: u64,
    pub retry_attempts: u32,
    /// Delay between attempts within one tick
    pub retry_delay_seconds: u64,
    /// How the delay grows across retries
    #[serde(default)]
    pub backoff: BackoffKind,
}

/// Retry pacing selection. Fixed spacing suits the default budget of one
/// retry; exponential is for deployments with larger budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

impl ScheduleConfig {
    pub fn rule(&self) -> ScheduleRule {
        ScheduleRule::new(
            Duration::from_secs(self.cadence_seconds),
            Duration::from_secs(self.max_event_age_seconds),
            self.retry_attempts,
        )
    }

    pub fn backoff_strategy(&self) -> Box<dyn RetryStrategy> {
        let delay = Duration::from_secs(self.retry_delay_seconds);
        match self.backoff {
            BackoffKind::Fixed => Box::new(FixedDelay::new(delay)),
            BackoffKind::Exponential => {
                Box::new(ExponentialBackoff::new(delay, Duration::from_secs(60), 0.1))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub timeout_seconds: u64,
    /// Sizing hint forwarded to the runtime environment
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub property: String,
    pub source_url: String,
    pub min_bedrooms: u32,
    pub min_bathrooms: f64,
    pub min_square_feet: u32,
    /// ISO date (YYYY-MM-DD)
    pub target_move_in: String,
}

impl CheckConfig {
    pub fn criteria(&self) -> Result<CheckCriteria, String> {
        if self.min_bathrooms < 0.0 {
            return Err("check.min_bathrooms cannot be negative".to_string());
        }
        let target_move_in = NaiveDate::parse_from_str(&self.target_move_in, "%Y-%m-%d")
            .map_err(|e| format!("check.target_move_in is not a valid date: {}", e))?;
        Ok(CheckCriteria {
            min_bedrooms: self.min_bedrooms,
            min_bathrooms: self.min_bathrooms,
            min_square_feet: self.min_square_feet,
            target_move_in,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub capabilities: Vec<Capability>,
}

impl RoleConfig {
    pub fn execution_role(&self) -> ExecutionRole {
        ExecutionRole::new(&self.name, self.capabilities.iter().copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub topic: String,
    pub subscribers: Vec<SubscriberConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubscriberConfig {
    Log { endpoint: String },
    Webhook { url: String, secret: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub state_key: String,
}

impl StoreConfig {
    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig {
            endpoint: self.endpoint.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            bucket: self.bucket.clone(),
            region: self.region.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults -> file -> env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APT")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Baseline parameter set for a named profile
    pub fn for_profile(profile: DeploymentProfile) -> Self {
        match profile {
            DeploymentProfile::Standard => Self {
                profile,
                schedule: ScheduleConfig {
                    cadence_seconds: 6 * 3600,
                    max_event_age_seconds: 180,
                    retry_attempts: 1,
                    retry_delay_seconds: 5,
                    backoff: BackoffKind::Fixed,
                },
                function: FunctionConfig {
                    timeout_seconds: 300,
                    memory_mb: 512,
                },
                check: default_check(),
                role: RoleConfig {
                    name: "apartment_watch_role".to_string(),
                    capabilities: vec![
                        Capability::Logging,
                        Capability::NotifyPublish,
                        Capability::StorageReadWrite,
                    ],
                },
                notify: default_notify(),
                store: Some(StoreConfig {
                    endpoint: "http://localhost:9000".to_string(),
                    access_key: "minioadmin".to_string(),
                    secret_key: "minioadmin".to_string(),
                    bucket: "apartment-watch-tracking".to_string(),
                    region: "us-east-1".to_string(),
                    state_key: "last_checked_units".to_string(),
                }),
                observability: default_observability(),
            },
            DeploymentProfile::Minimal => Self {
                profile,
                schedule: ScheduleConfig {
                    cadence_seconds: 300,
                    max_event_age_seconds: 180,
                    retry_attempts: 1,
                    retry_delay_seconds: 5,
                    backoff: BackoffKind::Fixed,
                },
                function: FunctionConfig {
                    timeout_seconds: 60,
                    memory_mb: 512,
                },
                check: default_check(),
                role: RoleConfig {
                    name: "apartment_watch_role_minimal".to_string(),
                    capabilities: vec![Capability::Logging, Capability::NotifyPublish],
                },
                notify: default_notify(),
                store: None,
                observability: default_observability(),
            },
        }
    }

    /// Validate configuration settings, failing fast before any component
    /// is constructed.
    pub fn validate(&self) -> Result<(), String> {
        if self.schedule.cadence_seconds == 0 {
            return Err("schedule.cadence_seconds must be greater than 0".to_string());
        }
        if self.function.timeout_seconds == 0 {
            return Err("function.timeout_seconds must be greater than 0".to_string());
        }
        if self.function.memory_mb == 0 {
            return Err("function.memory_mb must be greater than 0".to_string());
        }

        if self.check.property.is_empty() {
            return Err("check.property cannot be empty".to_string());
        }
        if self.check.source_url.is_empty() {
            return Err("check.source_url cannot be empty".to_string());
        }
        self.check.criteria()?;

        if self.role.name.is_empty() {
            return Err("role.name cannot be empty".to_string());
        }

        if self.notify.topic.is_empty() {
            return Err("notify.topic cannot be empty".to_string());
        }
        for subscriber in &self.notify.subscribers {
            match subscriber {
                SubscriberConfig::Log { endpoint } if endpoint.is_empty() => {
                    return Err("notify subscriber endpoint cannot be empty".to_string());
                }
                SubscriberConfig::Webhook { url, .. } if url.is_empty() => {
                    return Err("notify webhook URL cannot be empty".to_string());
                }
                _ => {}
            }
        }

        if let Some(store) = &self.store {
            if store.bucket.is_empty() {
                return Err("store.bucket cannot be empty".to_string());
            }
            if store.state_key.is_empty() {
                return Err("store.state_key cannot be empty".to_string());
            }
            // A configured store the role can never touch is a provisioning
            // defect; surface it at startup instead of on the first tick.
            let role = self.role.execution_role();
            if role.authorize(Capability::StorageReadWrite).is_err() {
                return Err(format!(
                    "store is configured but role '{}' lacks the storage_read_write capability",
                    self.role.name
                ));
            }
        }

        self.schedule.rule().validate()?;
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_profile(DeploymentProfile::Standard)
    }
}

fn default_check() -> CheckConfig {
    CheckConfig {
        property: "elle_west_ave".to_string(),
        source_url: "http://localhost:8081/listings.json".to_string(),
        min_bedrooms: 2,
        min_bathrooms: 1.5,
        min_square_feet: 0,
        target_move_in: "2024-08-10".to_string(),
    }
}

fn default_notify() -> NotifyConfig {
    NotifyConfig {
        topic: "apartment_watch_notifications".to_string(),
        subscribers: vec![SubscriberConfig::Log {
            endpoint: "ops-log".to_string(),
        }],
    }
}

fn default_observability() -> ObservabilityConfig {
    ObservabilityConfig {
        log_level: "info".to_string(),
        metrics_port: 9090,
        tracing_endpoint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_profile_is_valid() {
        let settings = Settings::for_profile(DeploymentProfile::Standard);
        assert!(settings.validate().is_ok());
        assert!(settings.store.is_some());
        assert_eq!(settings.schedule.cadence_seconds, 21600);
        assert_eq!(settings.function.timeout_seconds, 300);
    }

    #[test]
    fn test_minimal_profile_is_valid_and_storeless() {
        let settings = Settings::for_profile(DeploymentProfile::Minimal);
        assert!(settings.validate().is_ok());
        assert!(settings.store.is_none());
        assert_eq!(settings.schedule.cadence_seconds, 300);
        assert_eq!(settings.function.timeout_seconds, 60);
        let role = settings.role.execution_role();
        assert!(role.authorize(Capability::StorageReadWrite).is_err());
    }

    #[test]
    fn test_validation_catches_zero_cadence() {
        let mut settings = Settings::default();
        settings.schedule.cadence_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_bad_target_date() {
        let mut settings = Settings::default();
        settings.check.target_move_in = "08/10/2024".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_negative_bathrooms() {
        let mut settings = Settings::default();
        settings.check.min_bathrooms = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_store_without_capability() {
        let mut settings = Settings::default();
        settings.role.capabilities = vec![Capability::Logging, Capability::NotifyPublish];
        let err = settings.validate().unwrap_err();
        assert!(err.contains("storage_read_write"));
    }

    #[test]
    fn test_validation_catches_empty_webhook_url() {
        let mut settings = Settings::default();
        settings.notify.subscribers = vec![SubscriberConfig::Webhook {
            url: String::new(),
            secret: None,
        }];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_backoff_strategy_selection() {
        let mut settings = Settings::default();
        assert_eq!(settings.schedule.backoff, BackoffKind::Fixed);
        assert_eq!(
            settings.schedule.backoff_strategy().delay_before(1),
            Duration::from_secs(5)
        );
        assert_eq!(
            settings.schedule.backoff_strategy().delay_before(3),
            Duration::from_secs(5)
        );

        settings.schedule.backoff = BackoffKind::Exponential;
        let strategy = settings.schedule.backoff_strategy();
        assert!(strategy.delay_before(1) >= Duration::from_secs(5));
        // Doubled twice by the third retry, plus jitter
        assert!(strategy.delay_before(3) >= Duration::from_secs(20));
    }

    #[test]
    fn test_criteria_parses_target_date() {
        let criteria = default_check().criteria().unwrap();
        assert_eq!(
            criteria.target_move_in,
            NaiveDate::from_ymd_opt(2024, 8, 10).unwrap()
        );
    }
}
