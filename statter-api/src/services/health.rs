use actix_web::{HttpResponse, Responder, web};
use log::debug;

use crate::state::AppState;

// Health check endpoint
pub async fn health_check(data: web::Data<AppState>) -> impl Responder {
    debug!("Health check, {} services configured", data.query.services().len());
    HttpResponse::Ok().json("OK")
}
