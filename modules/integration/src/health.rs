use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    #[must_use]
    pub fn healthy(name: &'static str) -> Self {
        Self {
            name,
            status: HealthStatus::Healthy,
            latency_ms: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: HealthStatus, message: impl Into<String>) -> Self {
        self.status = status;
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Worst status among the components.
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl HealthReport {
    #[must_use]
    pub fn new(components: Vec<ComponentHealth>, uptime_secs: u64) -> Self {
        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            components,
            checked_at: Utc::now(),
            uptime_secs,
        }
    }

    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn overall_status_is_worst_component() {
        let report = HealthReport::new(
            vec![
                ComponentHealth::healthy("backend"),
                ComponentHealth::healthy("realtime").with_status(HealthStatus::Degraded, "1 reconnecting"),
            ],
            0,
        );
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(HealthReport::new(Vec::new(), 0).status, HealthStatus::Healthy);
    }

    #[test]
    fn serializes_snake_case_and_skips_empty_fields() {
        let json = serde_json::to_value(ComponentHealth::healthy("backend")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "backend", "status": "healthy"}));
    }
}
