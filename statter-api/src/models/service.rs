use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statter_engine::ServiceSummary;

// Service health as served by /services/
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
   pub name: String,
   pub label: String,
   pub description: String,
   pub status_code: Option<u16>,
   pub total_requests: u64,
   pub total_failed_requests: u64,
   pub last_failed_request_date: Option<DateTime<Utc>>,
   pub uptime_percentage: Option<f64>,
}

impl From<ServiceSummary> for ServiceView {
    fn from(summary: ServiceSummary) -> Self {
        Self {
            name: summary.name,
            label: summary.label,
            description: summary.description,
            status_code: summary.status_code,
            total_requests: summary.total,
            total_failed_requests: summary.total_failed,
            last_failed_request_date: summary.last_failed_at,
            uptime_percentage: summary.uptime_percentage,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ServiceQuery {
   pub name: Option<String>,
}
