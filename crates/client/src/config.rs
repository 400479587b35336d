//! Client configuration.

use wareflow_analytics::{AnomalyConfig, DemandConfig};

/// Tunables for the state store and its sync behavior.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Recorded as the actor on queued actions (operator or device name).
    pub actor: String,
    pub demand: DemandConfig,
    pub anomaly: AnomalyConfig,
    /// Retry budget for transient replay failures before an action is
    /// surfaced as lost.
    pub max_replay_attempts: u32,
}

impl StoreConfig {
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            actor: "wareflow-client".to_string(),
            demand: DemandConfig::new(),
            anomaly: AnomalyConfig::new(),
            max_replay_attempts: 5,
        }
    }
}
