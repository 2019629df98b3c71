use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statter_engine::ResponseRecord;

// One stored probe result as served by /responses/
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseView {
   pub id: u64,
   pub name: String,
   pub url: String,
   pub status_code: u16,
   /// Empty unless the request itself failed
   pub error: String,
   pub created: DateTime<Utc>,
}

impl From<ResponseRecord> for ResponseView {
    fn from(record: ResponseRecord) -> Self {
        Self {
            status_code: record.outcome.status_code(),
            error: record.outcome.error().unwrap_or_default().to_string(),
            id: record.id,
            name: record.name,
            url: record.url,
            created: record.created,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ResponseQuery {
   pub name: Option<String>,
   pub limit: Option<usize>,
}
