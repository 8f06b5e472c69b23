//! HTTP handlers
//!
//! Every handler builds one [`Command`] and hands it to the engine; no
//! business rules live here.

pub mod accounts;
pub mod charging;
pub mod dispatch;
pub mod health;
pub mod scheduler;
pub mod tariffs;

use crate::dto::ApiResponse;
use actix_web::{web, HttpResponse};
use apolo_core::AppError;
use apolo_services::{Command, Engine, Reply};
use tracing::warn;

/// Request bodies that fail to deserialize answer with the `AppError` body
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(1024 * 1024)
        .error_handler(|err, _req| {
            warn!("Rejected request body: {}", err);
            AppError::InvalidInput(err.to_string()).into()
        })
}

/// Run a command and wrap its reply
pub(crate) async fn run(engine: &Engine, command: Command) -> Result<HttpResponse, AppError> {
    let reply: Reply = engine.dispatch(command).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(reply)))
}

/// Configure all API routes under `/api/v1`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .app_data(json_config())
            .route("/health", web::get().to(health::health_check))
            .configure(charging::configure)
            .configure(accounts::configure)
            .configure(tariffs::configure)
            .configure(scheduler::configure)
            .configure(dispatch::configure),
    );
}
