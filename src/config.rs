use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::McdaError;
use crate::reasoning::{McdaPreset, McdaWeights};
use crate::store::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mcda: McdaConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub hospital: HospitalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MCDA criterion weights. Must sum to 1.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct McdaConfig {
    /// Named weight set; replaces the explicit weights when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<McdaPreset>,
    pub safety: f64,
    pub urgency: f64,
    pub capacity: f64,
    pub impact: f64,
}

impl Default for McdaConfig {
    fn default() -> Self {
        Self {
            preset: None,
            safety: 0.35,
            urgency: 0.30,
            capacity: 0.20,
            impact: 0.15,
        }
    }
}

impl McdaConfig {
    pub fn weights(&self) -> Result<McdaWeights, McdaError> {
        match self.preset {
            Some(preset) => Ok(preset.weights()),
            None => McdaWeights::new(self.safety, self.urgency, self.capacity, self.impact),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Below this safe-to-wait probability the final action is forced to escalate
    pub safe_to_wait_threshold: f64,
    /// Risk score at or above which a trajectory is treated as critical
    pub critical_risk_threshold: f64,
    /// Decisions with lower confidence are flagged for clinician review
    pub review_confidence_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            safe_to_wait_threshold: 0.25,
            critical_risk_threshold: 85.0,
            review_confidence_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Bounded wait for each join barrier, in milliseconds
    pub join_timeout_ms: u64,
    /// Terminal pipeline records kept for status queries
    pub max_tracked_pipelines: usize,
    /// Poll interval used by `wait_idle`
    pub drain_poll_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 5000,
            max_tracked_pipelines: 4096,
            drain_poll_ms: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Attempts after the first conflicting write
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Superseded versions retained per key
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 10,
            backoff_max_ms: 500,
            history_limit: 50,
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub handler_timeout_ms: u64,
    pub history_limit: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 1000,
            history_limit: 1000,
        }
    }
}

/// A hospital unit that patients can be placed in
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UnitConfig {
    pub id: String,
    pub total_beds: u32,
    /// Beds already occupied when the census is seeded
    #[serde(default)]
    pub occupied_beds: u32,
    #[serde(default)]
    pub staff_on_duty: u32,
    /// Acuity the unit is staffed for, 0 = low, 1 = intensive
    pub care_level: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HospitalConfig {
    pub units: Vec<UnitConfig>,
    /// Patients per staff member considered adequate
    pub target_patients_per_staff: f64,
    /// Census older than this lowers capacity confidence
    pub census_stale_after_secs: i64,
}

impl Default for HospitalConfig {
    fn default() -> Self {
        Self {
            units: vec![
                UnitConfig {
                    id: "ED".to_string(),
                    total_beds: 30,
                    occupied_beds: 18,
                    staff_on_duty: 8,
                    care_level: 0.5,
                },
                UnitConfig {
                    id: "ICU".to_string(),
                    total_beds: 12,
                    occupied_beds: 9,
                    staff_on_duty: 6,
                    care_level: 1.0,
                },
                UnitConfig {
                    id: "Ward".to_string(),
                    total_beds: 40,
                    occupied_beds: 31,
                    staff_on_duty: 10,
                    care_level: 0.3,
                },
            ],
            target_patients_per_staff: 4.0,
            census_stale_after_secs: 900,
        }
    }
}

impl HospitalConfig {
    pub fn unit(&self, id: &str) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_index(&self, id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.id == id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for daily-rolling log files; console only when unset
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/staging.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("CAREFLOW_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // CAREFLOW_MCDA__SAFETY, CAREFLOW_ORCHESTRATOR__JOIN_TIMEOUT_MS, ...
            .add_source(
                Environment::with_prefix("CAREFLOW")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.mcda.weights() {
            errors.push(format!("mcda: {e}"));
        }

        let unit_interval = |v: f64| (0.0..=1.0).contains(&v);
        if !unit_interval(self.decision.safe_to_wait_threshold) {
            errors.push("decision.safe_to_wait_threshold must be in [0,1]".to_string());
        }
        if !(0.0..=100.0).contains(&self.decision.critical_risk_threshold) {
            errors.push("decision.critical_risk_threshold must be in [0,100]".to_string());
        }
        if !unit_interval(self.decision.review_confidence_threshold) {
            errors.push("decision.review_confidence_threshold must be in [0,1]".to_string());
        }

        if self.orchestrator.join_timeout_ms == 0 {
            errors.push("orchestrator.join_timeout_ms must be positive".to_string());
        }
        if self.orchestrator.drain_poll_ms == 0 {
            errors.push("orchestrator.drain_poll_ms must be positive".to_string());
        }

        if self.store.backoff_base_ms > self.store.backoff_max_ms {
            errors.push("store.backoff_base_ms must not exceed store.backoff_max_ms".to_string());
        }
        let backoff = self.store.retry_policy().max_total_wait();
        if self.orchestrator.join_timeout_ms > 0 && backoff >= self.orchestrator.join_timeout() {
            errors.push(format!(
                "store retry backoff (up to {}ms) must fit within orchestrator.join_timeout_ms",
                backoff.as_millis()
            ));
        }
        if self.bus.handler_timeout_ms == 0 {
            errors.push("bus.handler_timeout_ms must be positive".to_string());
        }

        if self.hospital.units.is_empty() {
            errors.push("hospital.units must list at least one unit".to_string());
        }
        for (i, unit) in self.hospital.units.iter().enumerate() {
            if unit.total_beds == 0 {
                errors.push(format!("hospital unit {} has no beds", unit.id));
            }
            if unit.occupied_beds > unit.total_beds {
                errors.push(format!("hospital unit {} has more occupied than total beds", unit.id));
            }
            if !unit_interval(unit.care_level) {
                errors.push(format!("hospital unit {} care_level must be in [0,1]", unit.id));
            }
            if self.hospital.units[..i].iter().any(|u| u.id == unit.id) {
                errors.push(format!("hospital unit {} is listed twice", unit.id));
            }
        }
        if self.hospital.target_patients_per_staff <= 0.0 {
            errors.push("hospital.target_patients_per_staff must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
