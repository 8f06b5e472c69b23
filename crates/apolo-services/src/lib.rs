//! Apolo Charging Services
//!
//! Rating, charging, account management and scheduling for the Apolo
//! charging engine:
//!
//! - Guardian named locks serializing account mutation
//! - Rating profile resolution and rate computation
//! - Call cost quotes, debits and affordability checks
//! - Account, balance and action management with action triggers
//! - Action plan scheduling
//! - Typed command dispatch over all of the above

pub mod accounts;
pub mod actions;
pub mod admin;
pub mod calculator;
pub mod commands;
pub mod engine;
pub mod guardian;
pub mod outbound;
pub mod rate_engine;
pub mod resolver;
pub mod scheduler;
pub mod triggers;
pub mod writer;

pub use accounts::{AccountManager, AccountUpdate};
pub use actions::{ActionContext, ActionExecutor, ActionHandler, ActionRegistry};
pub use admin::RatingAdmin;
pub use calculator::{CallCostCalculator, MaxDebitReply, RefundReply};
pub use commands::{Command, Reply};
pub use engine::{Collaborators, Engine};
pub use guardian::Guardian;
pub use outbound::{HttpPoster, Notification, OutboundNotifier, RecordingNotifier};
pub use rate_engine::RateEngine;
pub use resolver::RatingResolver;
pub use scheduler::{ScheduledAction, Scheduler, SchedulerStatus};
pub use triggers::{TriggerEvaluator, TriggerReport};
pub use writer::AccountWriter;

/// Engine-wide constants
pub mod constants {
    /// `max_debit` reply for accounts that can pay for any usage
    pub const UNLIMITED_USAGE: i64 = -1;

    /// Action context source of API-initiated mutations
    pub const API_SOURCE: &str = "api";

    /// Action context source of call debits
    pub const DEBIT_SOURCE: &str = "debit";

    /// Action context source of refunds
    pub const REFUND_SOURCE: &str = "refund";

    /// Actions group ID carried by `AddBalance` top-ups
    pub const ADD_BALANCE_ACTIONS_ID: &str = "*add_balance";
}
