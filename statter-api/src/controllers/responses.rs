use actix_web::{HttpResponse, Responder, web};
use log::{error, info};
use serde_json::json;

use crate::models::response::{ResponseQuery, ResponseView};
use crate::state::AppState;

/// Largest page a single request may ask for
pub const MAX_LIMIT: usize = 1000;

// List stored probe responses, newest first
pub async fn list_responses(
    data: web::Data<AppState>,
    query: web::Query<ResponseQuery>,
) -> impl Responder {
    let limit = query.limit.map(|limit| limit.min(MAX_LIMIT));
    info!("Request to list responses (name: {:?}, limit: {:?})", query.name, limit);

    match data.query.list_responses(query.name.as_deref(), limit).await {
        Ok(records) => {
            let responses: Vec<ResponseView> =
                records.into_iter().map(ResponseView::from).collect();
            info!("Returning {} responses", responses.len());
            HttpResponse::Ok().json(responses)
        }
        Err(e) => {
            error!("Failed to list responses: {}", e);
            HttpResponse::InternalServerError().json(json!({ "error": e.to_string() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use statter_engine::records::{NewRecord, RecordFilter, RecordId, ServiceStats};
    use statter_engine::{
        MemoryStore, MonitorError, Outcome, QueryService, ResponseRecord, ResultStore,
        ServiceDefinition,
    };
    use std::sync::Arc;

    fn services() -> Vec<ServiceDefinition> {
        vec![
            ServiceDefinition::new("ping", "http://ping.test/"),
            ServiceDefinition::new("broken", "http://broken.test/"),
        ]
    }

    async fn state(probes: usize) -> web::Data<AppState> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..probes {
            let record = if i % 2 == 0 {
                NewRecord::new("ping", "http://ping.test/", Outcome::response(200))
            } else {
                NewRecord::new(
                    "broken",
                    "http://broken.test/",
                    Outcome::transport_failure("request timed out after 5000ms"),
                )
            };
            store.append(record).await.unwrap();
        }
        web::Data::new(AppState::new(QueryService::new(services(), store)))
    }

    #[actix_web::test]
    async fn test_list_responses_newest_first() {
        let app =
            test::init_service(App::new().app_data(state(4).await).configure(crate::routes)).await;

        let req = test::TestRequest::get().uri("/responses/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0]["id"], 4);
        assert_eq!(records[0]["name"], "broken");
        assert_eq!(records[0]["statusCode"], 0);
        assert_eq!(records[0]["error"], "request timed out after 5000ms");
        assert_eq!(records[1]["statusCode"], 200);
        assert_eq!(records[1]["error"], "");
        assert!(records[1]["created"].is_string());
    }

    #[actix_web::test]
    async fn test_list_responses_filter_and_limits() {
        let app =
            test::init_service(App::new().app_data(state(300).await).configure(crate::routes))
                .await;

        let req = test::TestRequest::get().uri("/responses/?name=ping").to_request();
        let records: Vec<ResponseView> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(records.len(), 100);
        assert!(records.iter().all(|r| r.name == "ping"));

        let req = test::TestRequest::get().uri("/responses/?name=broken&limit=3").to_request();
        let records: Vec<ResponseView> = test::call_and_read_body_json(&app, req).await;
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![300, 298, 296]);

        let req = test::TestRequest::get().uri("/responses/?limit=5000").to_request();
        let records: Vec<ResponseView> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(records.len(), 300);
    }

    struct UnavailableStore;

    #[async_trait::async_trait]
    impl ResultStore for UnavailableStore {
        async fn append(&self, _record: NewRecord) -> statter_engine::Result<RecordId> {
            Err(MonitorError::Storage("unavailable".to_string()))
        }

        async fn list_records(
            &self,
            _filter: &RecordFilter,
        ) -> statter_engine::Result<Vec<ResponseRecord>> {
            Err(MonitorError::Storage("unavailable".to_string()))
        }

        async fn summarize(&self, _service: &str) -> statter_engine::Result<ServiceStats> {
            Err(MonitorError::Storage("unavailable".to_string()))
        }
    }

    #[actix_web::test]
    async fn test_store_failure_is_a_server_error() {
        let data = web::Data::new(AppState::new(QueryService::new(
            services(),
            Arc::new(UnavailableStore),
        )));
        let app = test::init_service(App::new().app_data(data).configure(crate::routes)).await;

        let req = test::TestRequest::get().uri("/responses/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Storage error: unavailable");

        let req = test::TestRequest::get().uri("/services/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
