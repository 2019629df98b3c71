//! Read-side queries over configured services and stored responses

use crate::config::ServiceDefinition;
use crate::errors::Result;
use crate::records::{DEFAULT_LIMIT, RecordFilter, ResponseRecord, ServiceSummary};
use crate::store::ResultStore;
use std::sync::Arc;
use tracing::debug;

/// Answers queries about service health and response history
#[derive(Clone)]
pub struct QueryService {
    services: Arc<Vec<ServiceDefinition>>,
    store: Arc<dyn ResultStore>,
}

impl QueryService {
    pub fn new(services: Vec<ServiceDefinition>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            services: Arc::new(services),
            store,
        }
    }

    /// Summaries of configured services in configuration order.
    ///
    /// An empty filter behaves like no filter. A name that is not configured
    /// yields an empty list.
    pub async fn list_services(&self, name_filter: Option<&str>) -> Result<Vec<ServiceSummary>> {
        let name_filter = non_empty(name_filter);
        let mut summaries = Vec::new();

        for definition in self
            .services
            .iter()
            .filter(|s| name_filter.is_none_or(|name| s.name == name))
        {
            let stats = self.store.summarize(&definition.name).await?;
            summaries.push(ServiceSummary::new(definition, &stats));
        }

        debug!("Summarized {} service(s)", summaries.len());
        Ok(summaries)
    }

    /// Stored responses, most recent first, at most `limit` of them (100 by default)
    pub async fn list_responses(
        &self,
        name_filter: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ResponseRecord>> {
        let filter = RecordFilter {
            service: non_empty(name_filter).map(str::to_string),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
        };

        self.store.list_records(&filter).await
    }

    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }
}

fn non_empty(name: Option<&str>) -> Option<&str> {
    name.filter(|n| !n.is_empty())
}
