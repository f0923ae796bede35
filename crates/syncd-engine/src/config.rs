//! Engine configuration (ambient stack: every tunable the orchestrator needs
//! lives in one `serde`-deserializable struct, the same way the teacher
//! pack centralizes its run config rather than scattering constants).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use syncd_backoff::BackoffMode;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub base_url: String,
    pub app_version: String,
    pub device_id: String,
    pub instance_id: String,

    #[serde(default)]
    pub backoff_mode: BackoffMode,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_lease_name")]
    pub lease_name: String,

    #[serde(with = "duration_millis", default = "default_circuit_window")]
    pub circuit_window: Duration,
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: usize,
    #[serde(with = "duration_millis", default = "default_circuit_cooldown")]
    pub circuit_cooldown: Duration,

    #[serde(with = "duration_millis", default = "default_wake_debounce")]
    pub wake_debounce: Duration,
    #[serde(with = "duration_millis", default = "default_idle_poll_interval")]
    pub idle_poll_interval: Duration,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_lease_name() -> String {
    "pending-store-drain".to_string()
}
fn default_circuit_window() -> Duration {
    Duration::from_secs(60)
}
fn default_circuit_failure_threshold() -> usize {
    10
}
fn default_circuit_cooldown() -> Duration {
    Duration::from_secs(60)
}
fn default_wake_debounce() -> Duration {
    Duration::from_millis(100)
}
fn default_idle_poll_interval() -> Duration {
    Duration::from_secs(5)
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            app_version: String::new(),
            device_id: String::new(),
            instance_id: String::new(),
            backoff_mode: BackoffMode::default(),
            max_attempts: default_max_attempts(),
            lease_name: default_lease_name(),
            circuit_window: default_circuit_window(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown: default_circuit_cooldown(),
            wake_debounce: default_wake_debounce(),
            idle_poll_interval: default_idle_poll_interval(),
        }
    }
}
