//! Account handlers
//!
//! HTTP handlers for account and balance management.

use super::run;
use crate::dto::ApiResponse;
use actix_web::{web, HttpResponse};
use apolo_core::AppError;
use apolo_services::commands::{AccountRef, AddBalanceArgs, ExecuteActionArgs, SetAccountArgs};
use apolo_services::{Command, Engine};
use tracing::{info, instrument};

/// Create or update an account
///
/// POST /api/v1/SetAccount
#[instrument(skip(engine, req), fields(account = %req.account))]
pub async fn set_account(
    engine: web::Data<Engine>,
    req: web::Json<SetAccountArgs>,
) -> Result<HttpResponse, AppError> {
    let reply = engine.dispatch(Command::SetAccount(req.into_inner())).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(reply, "Account saved")))
}

/// POST /api/v1/GetAccount
#[instrument(skip(engine, req), fields(account = %req.account))]
pub async fn get_account(
    engine: web::Data<Engine>,
    req: web::Json<AccountRef>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::GetAccount(req.into_inner())).await
}

/// Remove an account and unbind it from its action plans
///
/// POST /api/v1/RemoveAccount
#[instrument(skip(engine, req), fields(account = %req.account))]
pub async fn remove_account(
    engine: web::Data<Engine>,
    req: web::Json<AccountRef>,
) -> Result<HttpResponse, AppError> {
    let account = req.account.clone();
    let reply = engine.dispatch(Command::RemoveAccount(req.into_inner())).await?;
    info!(account = %account, "Account removal handled");
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(reply, "Account removed")))
}

/// Add to, or with `overwrite` replace, a balance
///
/// POST /api/v1/AddBalance
#[instrument(skip(engine, req), fields(account = %req.account, value = %req.value))]
pub async fn add_balance(
    engine: web::Data<Engine>,
    req: web::Json<AddBalanceArgs>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::AddBalance(req.into_inner())).await
}

/// Apply a stored actions group to an account
///
/// POST /api/v1/ExecuteAction
#[instrument(skip(engine, req), fields(account = %req.account, actions_id = %req.actions_id))]
pub async fn execute_action(
    engine: web::Data<Engine>,
    req: web::Json<ExecuteActionArgs>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::ExecuteAction(req.into_inner())).await
}

/// Configure account routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/SetAccount", web::post().to(set_account))
        .route("/GetAccount", web::post().to(get_account))
        .route("/RemoveAccount", web::post().to(remove_account))
        .route("/AddBalance", web::post().to(add_balance))
        .route("/ExecuteAction", web::post().to(execute_action));
}
