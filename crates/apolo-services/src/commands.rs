//! Typed operations
//!
//! Each upward-facing operation has one argument type and one [`Command`]
//! variant. The API layer deserializes into these; the dispatcher maps each
//! variant to exactly one engine call.

use crate::calculator::{MaxDebitReply, RefundReply};
use crate::scheduler::{ScheduledAction, SchedulerStatus};
use apolo_core::models::{
    Account, Action, ActionPlan, ActionTrigger, BalanceFilter, CallCost, CallDescriptor,
    Destination, RatingPlan, RatingProfile,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Identifies one account; tenant falls back to the configured default
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccountRef {
    #[serde(default)]
    pub tenant: String,
    #[validate(length(min = 1))]
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct SetAccountArgs {
    #[serde(default)]
    pub tenant: String,
    #[validate(length(min = 1))]
    pub account: String,
    #[serde(default)]
    pub allow_negative: Option<bool>,
    #[serde(default)]
    pub disabled: Option<bool>,
    /// Trigger groups attached to the account
    #[serde(default)]
    pub action_triggers_ids: Vec<String>,
    /// Action plans the account is bound to
    #[serde(default)]
    pub action_plan_ids: Vec<String>,
    #[serde(default)]
    pub reload_scheduler: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AddBalanceArgs {
    #[serde(default)]
    pub tenant: String,
    #[validate(length(min = 1))]
    pub account: String,
    /// Defaults to `*monetary`
    #[serde(default)]
    pub balance_type: String,
    /// Balance ID or UUID to target; the `*default` balance otherwise
    #[serde(default)]
    pub balance: BalanceFilter,
    pub value: Decimal,
    /// Replace the balance value instead of adding to it
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExecuteActionArgs {
    #[serde(default)]
    pub tenant: String,
    #[validate(length(min = 1))]
    pub account: String,
    #[validate(length(min = 1))]
    pub actions_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetRatingProfileArgs {
    pub profile: RatingProfile,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetActionsArgs {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetActionTriggersArgs {
    #[validate(length(min = 1))]
    pub id: String,
    pub triggers: Vec<ActionTrigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetActionPlanArgs {
    pub plan: ActionPlan,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub reload_scheduler: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RemoveActionPlanArgs {
    #[validate(length(min = 1))]
    pub id: String,
    #[serde(default)]
    pub reload_scheduler: bool,
}

/// Filter of `GetScheduledActions`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduledActionsFilter {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub time_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// Every operation the engine exposes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Command {
    GetCost(CallDescriptor),
    Debit(CallDescriptor),
    MaxDebit(CallDescriptor),
    /// Give back the charges of a `Debit` reply
    RefundIncrements(CallCost),
    SetAccount(SetAccountArgs),
    GetAccount(AccountRef),
    RemoveAccount(AccountRef),
    AddBalance(AddBalanceArgs),
    ExecuteAction(ExecuteActionArgs),
    SetDestination(Destination),
    SetRatingPlan(RatingPlan),
    SetRatingProfile(SetRatingProfileArgs),
    SetActions(SetActionsArgs),
    SetActionTriggers(SetActionTriggersArgs),
    SetActionPlan(SetActionPlanArgs),
    RemoveActionPlan(RemoveActionPlanArgs),
    SchedulerReload,
    SchedulerStatus,
    GetScheduledActions(ScheduledActionsFilter),
}

impl Command {
    /// Operation name, as used in logs and routes
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetCost(_) => "GetCost",
            Command::Debit(_) => "Debit",
            Command::MaxDebit(_) => "MaxDebit",
            Command::RefundIncrements(_) => "RefundIncrements",
            Command::SetAccount(_) => "SetAccount",
            Command::GetAccount(_) => "GetAccount",
            Command::RemoveAccount(_) => "RemoveAccount",
            Command::AddBalance(_) => "AddBalance",
            Command::ExecuteAction(_) => "ExecuteAction",
            Command::SetDestination(_) => "SetDestination",
            Command::SetRatingPlan(_) => "SetRatingPlan",
            Command::SetRatingProfile(_) => "SetRatingProfile",
            Command::SetActions(_) => "SetActions",
            Command::SetActionTriggers(_) => "SetActionTriggers",
            Command::SetActionPlan(_) => "SetActionPlan",
            Command::RemoveActionPlan(_) => "RemoveActionPlan",
            Command::SchedulerReload => "SchedulerReload",
            Command::SchedulerStatus => "SchedulerStatus",
            Command::GetScheduledActions(_) => "GetScheduledActions",
        }
    }
}

/// Reply of a dispatched command
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    CallCost(Box<CallCost>),
    MaxDebit(MaxDebitReply),
    Refund(RefundReply),
    Account(Box<Account>),
    Removed { removed: bool },
    Scheduled(Vec<ScheduledAction>),
    Status { status: SchedulerStatus, plans: usize, pending: usize },
    Ok { result: &'static str },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok { result: "OK" }
    }
}
