//! Tariff plan handlers
//!
//! Writes of destinations, rating plans and profiles, actions, action
//! triggers and action plans.

use super::run;
use actix_web::{web, HttpResponse};
use apolo_core::{
    models::{Destination, RatingPlan},
    AppError,
};
use apolo_services::commands::{
    RemoveActionPlanArgs, SetActionPlanArgs, SetActionTriggersArgs, SetActionsArgs,
    SetRatingProfileArgs,
};
use apolo_services::{Command, Engine};
use tracing::instrument;

/// POST /api/v1/SetDestination
#[instrument(skip(engine, req), fields(id = %req.id))]
pub async fn set_destination(
    engine: web::Data<Engine>,
    req: web::Json<Destination>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SetDestination(req.into_inner())).await
}

/// POST /api/v1/SetRatingPlan
#[instrument(skip(engine, req), fields(id = %req.id))]
pub async fn set_rating_plan(
    engine: web::Data<Engine>,
    req: web::Json<RatingPlan>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SetRatingPlan(req.into_inner())).await
}

/// Store a rating profile; an existing one needs `overwrite`
///
/// POST /api/v1/SetRatingProfile
#[instrument(skip(engine, req), fields(id = %req.profile.id))]
pub async fn set_rating_profile(
    engine: web::Data<Engine>,
    req: web::Json<SetRatingProfileArgs>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SetRatingProfile(req.into_inner())).await
}

/// POST /api/v1/SetActions
#[instrument(skip(engine, req), fields(id = %req.id))]
pub async fn set_actions(
    engine: web::Data<Engine>,
    req: web::Json<SetActionsArgs>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SetActions(req.into_inner())).await
}

/// POST /api/v1/SetActionTriggers
#[instrument(skip(engine, req), fields(id = %req.id))]
pub async fn set_action_triggers(
    engine: web::Data<Engine>,
    req: web::Json<SetActionTriggersArgs>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SetActionTriggers(req.into_inner())).await
}

/// Store an action plan; an existing one needs `overwrite`
///
/// POST /api/v1/SetActionPlan
#[instrument(skip(engine, req), fields(id = %req.plan.id))]
pub async fn set_action_plan(
    engine: web::Data<Engine>,
    req: web::Json<SetActionPlanArgs>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::SetActionPlan(req.into_inner())).await
}

/// POST /api/v1/RemoveActionPlan
#[instrument(skip(engine, req), fields(id = %req.id))]
pub async fn remove_action_plan(
    engine: web::Data<Engine>,
    req: web::Json<RemoveActionPlanArgs>,
) -> Result<HttpResponse, AppError> {
    run(&engine, Command::RemoveActionPlan(req.into_inner())).await
}

/// Configure tariff plan routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/SetDestination", web::post().to(set_destination))
        .route("/SetRatingPlan", web::post().to(set_rating_plan))
        .route("/SetRatingProfile", web::post().to(set_rating_profile))
        .route("/SetActions", web::post().to(set_actions))
        .route("/SetActionTriggers", web::post().to(set_action_triggers))
        .route("/SetActionPlan", web::post().to(set_action_plan))
        .route("/RemoveActionPlan", web::post().to(remove_action_plan));
}
