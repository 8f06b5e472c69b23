//! Call cost model
//!
//! The computed output of rating: ordered charging intervals and the total.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Compressed run of equal increments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Increment {
    /// Usage covered by one increment
    pub duration: u64,
    /// Cost of one increment
    pub cost: Decimal,
    /// Number of identical increments this entry stands for
    pub compress_factor: u64,
}

/// One charging interval, priced by a single rate slot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSpan {
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    /// Usage offset of `time_end` within the call
    pub duration_index: u64,
    pub rating_plan_id: String,
    pub rate_id: String,
    pub matched_destination_id: String,
    pub group_interval_start: u64,
    pub increment: Increment,
    pub cost: Decimal,
}

/// Amount taken from one balance by a debit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceCharge {
    /// `tenant:account` owning the balance; a shared group member may pay
    #[serde(default)]
    pub account: String,
    pub balance_uuid: String,
    pub balance_id: String,
    pub balance_type: String,
    pub amount: Decimal,
}

/// Call cost
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CallCost {
    pub tenant: String,
    pub category: String,
    pub subject: String,
    pub account: String,
    pub destination: String,
    pub tor: String,

    /// Profile key whose plan priced the call (differs from the subject after a fallback)
    pub rated_profile: String,
    pub rating_plan_id: String,

    pub connect_fee: Decimal,
    pub cost: Decimal,
    pub usage_secs: u64,

    /// Usage paid from unit balances, not priced
    #[serde(default)]
    pub unit_usage_secs: u64,

    pub timespans: Vec<TimeSpan>,

    /// Filled by Debit only
    #[serde(default)]
    pub charges: Vec<BalanceCharge>,
}
