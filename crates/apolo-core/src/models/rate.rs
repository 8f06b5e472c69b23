//! Rate model
//!
//! An [`RIRate`] is the priced body of a rating binding: a connect fee,
//! a rounding policy and an ordered list of [`RGRate`] slots forming a
//! tiered rate over the usage of a call.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rounding applied to increment counts and to the final cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RoundingMethod {
    #[serde(rename = "*up")]
    #[default]
    Up,
    #[serde(rename = "*down")]
    Down,
    #[serde(rename = "*middle")]
    Middle,
}

impl fmt::Display for RoundingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundingMethod::Up => write!(f, "*up"),
            RoundingMethod::Down => write!(f, "*down"),
            RoundingMethod::Middle => write!(f, "*middle"),
        }
    }
}

impl RoundingMethod {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMethod::Up => RoundingStrategy::AwayFromZero,
            RoundingMethod::Down => RoundingStrategy::ToZero,
            RoundingMethod::Middle => RoundingStrategy::MidpointAwayFromZero,
        }
    }

    /// Round `value` to `decimals` places
    pub fn round(self, value: Decimal, decimals: u32) -> Decimal {
        value.round_dp_with_strategy(decimals, self.strategy())
    }

    /// Round `value` to a whole number
    pub fn round_whole(self, value: Decimal) -> Decimal {
        self.round(value, 0)
    }
}

/// One tier of a rate
///
/// Usage quantities are in the unit of the call's type of record
/// (seconds for voice).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RGRate {
    /// Usage offset from the start of the call where this tier begins
    #[serde(default)]
    pub group_interval_start: u64,

    /// Price of one `rate_unit` of usage
    pub value: Decimal,

    /// Billing granularity
    pub rate_increment: u64,

    /// Usage quantity that `value` is priced for
    pub rate_unit: u64,
}

impl RGRate {
    pub fn new(group_interval_start: u64, value: Decimal, rate_increment: u64, rate_unit: u64) -> Self {
        Self {
            group_interval_start,
            value,
            rate_increment,
            rate_unit,
        }
    }

    /// Increment size, never zero
    pub fn increment(&self) -> u64 {
        self.rate_increment.max(1)
    }

    /// Cost of a single increment
    pub fn increment_cost(&self) -> Decimal {
        self.value * Decimal::from(self.increment()) / Decimal::from(self.rate_unit.max(1))
    }
}

/// Rate interval: connect fee, rounding and tiered slots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RIRate {
    pub id: String,

    #[serde(default)]
    pub connect_fee: Decimal,

    #[serde(default)]
    pub rounding_method: RoundingMethod,

    #[serde(default = "default_rounding_decimals")]
    pub rounding_decimals: u32,

    /// Maximum cost of a single call (0 = no cap)
    #[serde(default)]
    pub max_cost: Decimal,

    pub rates: Vec<RGRate>,
}

fn default_rounding_decimals() -> u32 {
    4
}

impl RIRate {
    /// Slots in ascending `group_interval_start` order
    pub fn sorted_rates(&self) -> Vec<&RGRate> {
        let mut rates: Vec<&RGRate> = self.rates.iter().collect();
        rates.sort_by_key(|r| r.group_interval_start);
        rates
    }
}
