//! Charging handlers
//!
//! Quotes, debits and affordability checks for a call descriptor, and
//! refunds of a debited call cost.

use super::run;
use crate::dto::{ApiResponse, MaxSessionTime};
use actix_web::{web, HttpResponse};
use apolo_core::{
    models::{CallCost, CallDescriptor},
    AppError,
};
use apolo_services::{Command, Engine, Reply};
use tracing::{debug, error, instrument};

/// Price a call without touching the account
///
/// POST /api/v1/GetCost
#[instrument(skip(engine, req), fields(account = %req.account, destination = %req.destination))]
pub async fn get_cost(
    engine: web::Data<Engine>,
    req: web::Json<CallDescriptor>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::GetCost(req.into_inner())).await
}

/// Price a call and charge it to the account
///
/// POST /api/v1/Debit
#[instrument(skip(engine, req), fields(account = %req.account, destination = %req.destination))]
pub async fn debit(
    engine: web::Data<Engine>,
    req: web::Json<CallDescriptor>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::Debit(req.into_inner())).await
}

/// Longest affordable usage for the descriptor, without committing
///
/// POST /api/v1/MaxDebit
#[instrument(skip(engine, req), fields(account = %req.account, destination = %req.destination))]
pub async fn max_debit(
    engine: web::Data<Engine>,
    req: web::Json<CallDescriptor>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::MaxDebit(req.into_inner())).await
}

/// Credit the charges of a debited call back to their balances
///
/// POST /api/v1/RefundIncrements
#[instrument(skip(engine, req), fields(account = %req.account, charges = req.charges.len()))]
pub async fn refund_increments(
    engine: web::Data<Engine>,
    req: web::Json<CallCost>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::RefundIncrements(req.into_inner())).await
}

/// Session admission check answering in seconds only
///
/// POST /api/v1/GetMaxSessionTime
#[instrument(skip(engine, req), fields(account = %req.account, destination = %req.destination))]
pub async fn get_max_session_time(
    engine: web::Data<Engine>,
    req: web::Json<CallDescriptor>,
) -> Result<HttpResponse, AppError> {
    match engine.dispatch(Command::MaxDebit(req.into_inner())).await? {
        Reply::MaxDebit(reply) => {
            debug!(max_usage_secs = reply.max_usage_secs, "Max session time");
            Ok(HttpResponse::Ok().json(ApiResponse::success(MaxSessionTime {
                max_session_time: reply.max_usage_secs,
            })))
        }
        other => {
            error!("MaxDebit answered with {:?}", other);
            Err(AppError::Server("unexpected MaxDebit reply".to_string()))
        }
    }
}

/// Configure charging routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/GetCost", web::post().to(get_cost))
        .route("/Debit", web::post().to(debit))
        .route("/MaxDebit", web::post().to(max_debit))
        .route("/RefundIncrements", web::post().to(refund_increments))
        .route("/GetMaxSessionTime", web::post().to(get_max_session_time));
}
