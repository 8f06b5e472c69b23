//! Balance model
//!
//! Typed balances held by an account. Only active balances (not disabled,
//! not expired) whose destination and category filters match a charged
//! event are eligible for debit, consumed in descending weight order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Balance types
pub mod balance_types {
    pub const MONETARY: &str = "*monetary";
    pub const VOICE: &str = "*voice";
    pub const SMS: &str = "*sms";
    pub const DATA: &str = "*data";
    pub const GENERIC: &str = "*generic";
}

/// ID of the money balance created on demand for negative charges
pub const DEFAULT_BALANCE_ID: &str = "*default";

/// Balance entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub uuid: String,

    #[serde(default)]
    pub id: String,

    pub value: Decimal,

    #[serde(default)]
    pub weight: f64,

    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,

    /// Destination IDs this balance may pay for (empty = any)
    #[serde(default)]
    pub destination_ids: Vec<String>,

    /// Categories this balance may pay for (empty = any)
    #[serde(default)]
    pub categories: Vec<String>,

    /// Groups whose member accounts may also pay from this balance
    #[serde(default)]
    pub shared_groups: Vec<String>,

    #[serde(default)]
    pub disabled: bool,

    /// Stops debit from reaching lower-weight balances
    #[serde(default)]
    pub blocker: bool,

    /// Touched by the current mutation; trigger evaluation reads and clears it
    #[serde(skip)]
    pub dirty: bool,
}

impl Balance {
    pub fn new(id: impl Into<String>, value: Decimal) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            id: id.into(),
            value,
            weight: 0.0,
            expiration_date: None,
            destination_ids: Vec::new(),
            categories: Vec::new(),
            shared_groups: Vec::new(),
            disabled: false,
            blocker: false,
            dirty: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.is_some_and(|exp| exp <= now)
    }

    /// Not disabled and not expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && !self.is_expired(now)
    }

    /// Whether this balance may pay for an event to `destination_ids` in `category`
    pub fn matches_usage(&self, destination_ids: &[String], category: &str) -> bool {
        let dst_ok = self.destination_ids.is_empty()
            || self
                .destination_ids
                .iter()
                .any(|d| destination_ids.iter().any(|m| m == d));
        let cat_ok = self.categories.is_empty() || self.categories.iter().any(|c| c == category);
        dst_ok && cat_ok
    }

    pub fn add_value(&mut self, amount: Decimal) {
        self.value += amount;
        self.dirty = true;
    }

    pub fn set_value(&mut self, value: Decimal) {
        self.value = value;
        self.dirty = true;
    }

    /// Build a new balance from the fields set on a filter
    pub fn from_filter(filter: &BalanceFilter, value: Decimal) -> Self {
        let mut balance = Balance::new(filter.id.clone().unwrap_or_default(), value);
        if let Some(uuid) = &filter.uuid {
            balance.uuid = uuid.clone();
        }
        if let Some(weight) = filter.weight {
            balance.weight = weight;
        }
        balance.expiration_date = filter.expiration_date;
        if let Some(dst) = &filter.destination_ids {
            balance.destination_ids = dst.clone();
        }
        if let Some(cat) = &filter.categories {
            balance.categories = cat.clone();
        }
        if let Some(groups) = &filter.shared_groups {
            balance.shared_groups = groups.clone();
        }
        balance.disabled = filter.disabled.unwrap_or(false);
        balance.blocker = filter.blocker.unwrap_or(false);
        balance
    }

    /// Copy the attribute fields a filter sets, leaving the value alone
    pub fn apply_filter_attributes(&mut self, filter: &BalanceFilter) {
        if let Some(weight) = filter.weight {
            self.weight = weight;
        }
        if filter.expiration_date.is_some() {
            self.expiration_date = filter.expiration_date;
        }
        if let Some(dst) = &filter.destination_ids {
            self.destination_ids = dst.clone();
        }
        if let Some(cat) = &filter.categories {
            self.categories = cat.clone();
        }
        if let Some(groups) = &filter.shared_groups {
            self.shared_groups = groups.clone();
        }
        if let Some(blocker) = filter.blocker {
            self.blocker = blocker;
        }
    }
}

/// Debit order: higher weight first
pub fn by_weight_desc(a: &Balance, b: &Balance) -> Ordering {
    b.weight.total_cmp(&a.weight)
}

/// Partial balance description used by actions, triggers and AddBalance
///
/// When `uuid` or `id` is set, only that identity is compared; otherwise
/// every set attribute must be equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BalanceFilter {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub destination_ids: Option<Vec<String>>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub shared_groups: Option<Vec<String>>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub blocker: Option<bool>,
}

impl BalanceFilter {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    /// Identity filters name a single balance
    pub fn has_identity(&self) -> bool {
        self.uuid.is_some() || self.id.is_some()
    }

    pub fn matches(&self, balance: &Balance) -> bool {
        if let Some(uuid) = &self.uuid {
            return &balance.uuid == uuid;
        }
        if let Some(id) = &self.id {
            return &balance.id == id;
        }
        self.weight.map_or(true, |w| w == balance.weight)
            && self
                .expiration_date
                .map_or(true, |e| Some(e) == balance.expiration_date)
            && self
                .destination_ids
                .as_ref()
                .map_or(true, |d| d == &balance.destination_ids)
            && self
                .categories
                .as_ref()
                .map_or(true, |c| c == &balance.categories)
            && self
                .shared_groups
                .as_ref()
                .map_or(true, |g| g == &balance.shared_groups)
            && self.disabled.map_or(true, |d| d == balance.disabled)
            && self.blocker.map_or(true, |b| b == balance.blocker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_activity() {
        let now = Utc::now();
        let mut b = Balance::new("b1", dec!(10));
        assert!(b.is_active(now));
        b.expiration_date = Some(now - Duration::seconds(1));
        assert!(b.is_expired(now));
        assert!(!b.is_active(now));
        b.expiration_date = None;
        b.disabled = true;
        assert!(!b.is_active(now));
    }

    #[test]
    fn test_matches_usage() {
        let mut b = Balance::new("b1", dec!(10));
        assert!(b.matches_usage(&["DST_PE".into()], "call"));
        b.destination_ids = vec!["DST_US".into()];
        assert!(!b.matches_usage(&["DST_PE".into()], "call"));
        assert!(b.matches_usage(&["DST_US".into()], "call"));
        b.categories = vec!["sms".into()];
        assert!(!b.matches_usage(&["DST_US".into()], "call"));
    }

    #[test]
    fn test_filter_identity_and_attributes() {
        let mut b = Balance::new("bonus", dec!(5));
        b.weight = 20.0;
        assert!(BalanceFilter::by_id("bonus").matches(&b));
        assert!(!BalanceFilter::by_id("main").matches(&b));

        let attr = BalanceFilter {
            weight: Some(20.0),
            ..Default::default()
        };
        assert!(attr.matches(&b));
        let attr = BalanceFilter {
            weight: Some(10.0),
            ..Default::default()
        };
        assert!(!attr.matches(&b));
        assert!(BalanceFilter::default().matches(&b));

        b.shared_groups = vec!["FAMILY".into()];
        let grouped = BalanceFilter {
            shared_groups: Some(vec!["FAMILY".into()]),
            ..Default::default()
        };
        assert!(grouped.matches(&b));
        let other = BalanceFilter {
            shared_groups: Some(vec!["TEAM".into()]),
            ..Default::default()
        };
        assert!(!other.matches(&b));
    }

    #[test]
    fn test_from_filter() {
        let filter = BalanceFilter {
            id: Some("bonus".into()),
            weight: Some(15.0),
            blocker: Some(true),
            ..Default::default()
        };
        let b = Balance::from_filter(&filter, dec!(3));
        assert_eq!(b.id, "bonus");
        assert_eq!(b.weight, 15.0);
        assert!(b.blocker);
        assert_eq!(b.value, dec!(3));
        assert!(!b.uuid.is_empty());
    }
}
