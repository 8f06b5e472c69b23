//! Generic command endpoint
//!
//! Accepts the `{"method": ..., "params": ...}` envelope so clients can
//! reach every operation through one route.

use super::run;
use actix_web::{web, HttpResponse};
use apolo_core::AppError;
use apolo_services::{Command, Engine};
use tracing::{debug, instrument};

/// POST /api/v1/dispatch
#[instrument(skip(engine, req), fields(method = req.name()))]
pub async fn dispatch(
    engine: web::Data<Engine>,
    req: web::Json<Command>,
) -> Result<HttpResponse, AppError> {
    debug!("Generic dispatch");
    run(&engine, req.into_inner()).await
}

/// Configure the generic dispatch route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/dispatch", web::post().to(dispatch));
}
