//! Action trigger model
//!
//! A threshold on an account's balances or unit counters. Once the
//! condition holds after a mutation, the trigger runs its actions group.

use super::balance::BalanceFilter;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Threshold types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdType {
    #[serde(rename = "*min_balance")]
    MinBalance,
    #[serde(rename = "*max_balance")]
    MaxBalance,
    #[serde(rename = "*balance_expired")]
    BalanceExpired,
    #[serde(rename = "*min_event_counter")]
    MinEventCounter,
    #[serde(rename = "*max_event_counter")]
    MaxEventCounter,
    #[serde(rename = "*min_balance_counter")]
    MinBalanceCounter,
    #[serde(rename = "*max_balance_counter")]
    MaxBalanceCounter,
}

impl fmt::Display for ThresholdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThresholdType::MinBalance => "*min_balance",
            ThresholdType::MaxBalance => "*max_balance",
            ThresholdType::BalanceExpired => "*balance_expired",
            ThresholdType::MinEventCounter => "*min_event_counter",
            ThresholdType::MaxEventCounter => "*max_event_counter",
            ThresholdType::MinBalanceCounter => "*min_balance_counter",
            ThresholdType::MaxBalanceCounter => "*max_balance_counter",
        };
        write!(f, "{}", s)
    }
}

impl ThresholdType {
    /// Counter thresholds compare unit counters instead of balances
    pub fn counter_type(self) -> Option<CounterType> {
        match self {
            ThresholdType::MinEventCounter | ThresholdType::MaxEventCounter => {
                Some(CounterType::Event)
            }
            ThresholdType::MinBalanceCounter | ThresholdType::MaxBalanceCounter => {
                Some(CounterType::Balance)
            }
            _ => None,
        }
    }

    /// `value` crosses `threshold` for min/max types
    pub fn crossed(self, value: Decimal, threshold: Decimal) -> bool {
        match self {
            ThresholdType::MinBalance
            | ThresholdType::MinEventCounter
            | ThresholdType::MinBalanceCounter => value <= threshold,
            ThresholdType::MaxBalance
            | ThresholdType::MaxEventCounter
            | ThresholdType::MaxBalanceCounter => value >= threshold,
            ThresholdType::BalanceExpired => false,
        }
    }
}

/// Unit counter kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterType {
    /// Counts debit events
    #[serde(rename = "*event")]
    Event,
    /// Sums debited amounts
    #[serde(rename = "*balance")]
    Balance,
}

/// Action trigger entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTrigger {
    /// Trigger group ID
    pub id: String,

    /// Unique ID within the group
    pub unique_id: String,

    pub threshold_type: ThresholdType,

    pub threshold_value: Decimal,

    #[serde(default)]
    pub recurrent: bool,

    /// Minimum interval between two fires of a recurrent trigger, in seconds
    #[serde(default)]
    pub min_sleep_secs: u64,

    #[serde(default)]
    pub executed: bool,

    #[serde(default)]
    pub last_execution_time: Option<DateTime<Utc>>,

    pub balance_type: String,

    #[serde(default)]
    pub balance: BalanceFilter,

    #[serde(default)]
    pub weight: f64,

    #[serde(default)]
    pub activation_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,

    pub actions_id: String,
}

impl ActionTrigger {
    /// Inside its activation window
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.activation_date.map_or(true, |a| a <= now)
            && self.expiration_date.map_or(true, |e| e > now)
    }

    /// Eligible to fire now: not spent, and rested for `min_sleep_secs`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if self.executed && !self.recurrent {
            return false;
        }
        if self.recurrent && self.min_sleep_secs > 0 {
            if let Some(last) = self.last_execution_time {
                let min_sleep = Duration::seconds(self.min_sleep_secs as i64);
                if now - last < min_sleep {
                    return false;
                }
            }
        }
        self.is_active(now)
    }

    /// Record a fire
    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_execution_time = Some(now);
        if !self.recurrent {
            self.executed = true;
        }
    }
}
