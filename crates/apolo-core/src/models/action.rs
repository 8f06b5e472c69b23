//! Action model
//!
//! Actions are grouped under an actions ID and run against one account,
//! either from a scheduled action plan, from a fired trigger, or directly.

use super::balance::BalanceFilter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Registered action identifiers
pub mod action_ids {
    pub const LOG: &str = "*log";
    pub const TOPUP: &str = "*topup";
    pub const TOPUP_RESET: &str = "*topup_reset";
    pub const DEBIT: &str = "*debit";
    pub const DEBIT_RESET: &str = "*debit_reset";
    pub const RESET_ACCOUNT: &str = "*reset_account";
    pub const RESET_TRIGGERS: &str = "*reset_triggers";
    pub const SET_RECURRENT: &str = "*set_recurrent";
    pub const UNSET_RECURRENT: &str = "*unset_recurrent";
    pub const ALLOW_NEGATIVE: &str = "*allow_negative";
    pub const DENY_NEGATIVE: &str = "*deny_negative";
    pub const ENABLE_ACCOUNT: &str = "*enable_account";
    pub const DISABLE_ACCOUNT: &str = "*disable_account";
    pub const RESET_COUNTERS: &str = "*reset_counters";
    pub const ENABLE_BALANCE: &str = "*enable_balance";
    pub const DISABLE_BALANCE: &str = "*disable_balance";
    pub const HTTP_POST: &str = "*http_post";
}

/// Action entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Actions group ID
    pub id: String,

    /// Registry key, e.g. `*topup_reset`
    pub identifier: String,

    #[serde(default)]
    pub balance_type: String,

    /// Selects (or describes) the balance the action works on
    #[serde(default)]
    pub balance: BalanceFilter,

    #[serde(default)]
    pub units: Decimal,

    #[serde(default)]
    pub weight: f64,

    /// Free-form parameters, e.g. the URL of `*http_post`
    #[serde(default)]
    pub extra_parameters: String,
}

impl Action {
    pub fn new(id: &str, identifier: &str) -> Self {
        Self {
            id: id.to_string(),
            identifier: identifier.to_string(),
            balance_type: String::new(),
            balance: BalanceFilter::default(),
            units: Decimal::ZERO,
            weight: 0.0,
            extra_parameters: String::new(),
        }
    }

    /// Balance-touching variant of [`Action::new`]
    pub fn on_balance(id: &str, identifier: &str, balance_type: &str, units: Decimal) -> Self {
        Self {
            balance_type: balance_type.to_string(),
            units,
            ..Self::new(id, identifier)
        }
    }
}

/// Sort an actions group for execution: higher weight first
pub fn sort_actions(actions: &mut [Action]) {
    actions.sort_by(|a, b| b.weight.total_cmp(&a.weight));
}
