//! API layer for the Apolo charging engine
//!
//! Thin HTTP handlers translating requests into engine commands. One
//! `POST /api/v1/<Operation>` route exists per command, next to a generic
//! `POST /api/v1/dispatch` taking `{"method": ..., "params": ...}`.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

pub use dto::{ApiResponse, MaxSessionTime};
pub use handlers::configure;
