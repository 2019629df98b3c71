use actix_web::{HttpResponse, Responder, web};
use log::{error, info};
use serde_json::json;

use crate::models::service::{ServiceQuery, ServiceView};
use crate::state::AppState;

// List configured services with their current health
pub async fn list_services(
    data: web::Data<AppState>,
    query: web::Query<ServiceQuery>,
) -> impl Responder {
    info!("Request to list services (name: {:?})", query.name);

    match data.query.list_services(query.name.as_deref()).await {
        Ok(summaries) => {
            let services: Vec<ServiceView> = summaries.into_iter().map(ServiceView::from).collect();
            info!("Returning {} services", services.len());
            HttpResponse::Ok().json(services)
        }
        Err(e) => {
            error!("Failed to summarize services: {}", e);
            HttpResponse::InternalServerError().json(json!({ "error": e.to_string() }))
        }
    }
}
