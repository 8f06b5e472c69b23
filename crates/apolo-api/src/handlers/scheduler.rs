//! Scheduler handlers

use super::run;
use actix_web::{web, HttpResponse};
use apolo_core::AppError;
use apolo_services::commands::ScheduledActionsFilter;
use apolo_services::{Command, Engine};
use tracing::instrument;

/// Re-read action plans and swap the pending queue
///
/// POST /api/v1/SchedulerReload
#[instrument(skip(engine))]
pub async fn reload(engine: web::Data<Engine>) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SchedulerReload).await
}

/// POST /api/v1/SchedulerStatus
pub async fn status(engine: web::Data<Engine>) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SchedulerStatus).await
}

/// Pending fires, optionally filtered by tenant, account, plan and time
///
/// POST /api/v1/GetScheduledActions
#[instrument(skip(engine, req))]
pub async fn get_scheduled_actions(
    engine: web::Data<Engine>,
    req: Option<web::Json<ScheduledActionsFilter>>,
) -> Result<HttpResponse, AppError> {
    let filter = req.map(web::Json::into_inner).unwrap_or_default();
    run(&engine, Command::GetScheduledActions(filter)).await
}

/// Configure scheduler routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/SchedulerReload", web::post().to(reload))
        .route("/SchedulerStatus", web::post().to(status))
        .route("/GetScheduledActions", web::post().to(get_scheduled_actions));
}
