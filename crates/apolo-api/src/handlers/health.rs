//! Health check handler

use actix_web::{web, HttpResponse};
use apolo_services::Engine;
use serde_json::json;

/// GET /api/v1/health
pub async fn health_check(engine: web::Data<Engine>) -> HttpResponse {
    let (scheduler, plans, pending) = engine.scheduler.status().await;
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "apolo-charger",
        "version": env!("CARGO_PKG_VERSION"),
        "scheduler": {
            "status": scheduler,
            "plans": plans,
            "pending": pending,
        },
        "locked_keys": engine.guardian.active_keys(),
    }))
}
