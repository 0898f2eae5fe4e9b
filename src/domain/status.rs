use chrono::{DateTime, Utc};

/// Snapshot of the engine's state, for dashboards and diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineStatus {
    pub is_tracking: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub cache_size: usize,
    pub accuracy: Option<f64>,
    pub provider: Option<String>,
}
