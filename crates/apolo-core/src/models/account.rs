//! Account model
//!
//! An account owns typed balance chains, unit counters and action triggers.
//! The account store holds the record; the engine only mutates a working
//! copy while holding the account's guardian lock.

use super::action_trigger::{ActionTrigger, CounterType};
use super::balance::{balance_types, by_weight_desc, Balance, DEFAULT_BALANCE_ID};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Build the `tenant:account` key used by the stores and the guardian
pub fn account_key(tenant: &str, account: &str) -> String {
    format!("{}:{}", tenant, account)
}

/// Usage counter kept per balance type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitCounter {
    pub counter_type: CounterType,
    pub balance_type: String,
    pub value: Decimal,
}

/// Account entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub tenant: String,

    pub id: String,

    /// Balance chains keyed by balance type
    #[serde(default)]
    pub balance_map: BTreeMap<String, Vec<Balance>>,

    #[serde(default)]
    pub unit_counters: Vec<UnitCounter>,

    #[serde(default)]
    pub action_triggers: Vec<ActionTrigger>,

    /// Monetary shortfalls go to the `*default` balance instead of failing
    #[serde(default)]
    pub allow_negative: bool,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            balance_map: BTreeMap::new(),
            unit_counters: Vec::new(),
            action_triggers: Vec::new(),
            allow_negative: false,
            disabled: false,
            updated_at: None,
        }
    }

    /// `tenant:account`
    pub fn key(&self) -> String {
        account_key(&self.tenant, &self.id)
    }

    pub fn balances(&self, balance_type: &str) -> &[Balance] {
        self.balance_map
            .get(balance_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn balances_mut(&mut self, balance_type: &str) -> &mut Vec<Balance> {
        self.balance_map.entry(balance_type.to_string()).or_default()
    }

    /// Sum of active balances of a type
    pub fn total(&self, balance_type: &str, now: DateTime<Utc>) -> Decimal {
        self.balances(balance_type)
            .iter()
            .filter(|b| b.is_active(now))
            .map(|b| b.value)
            .sum()
    }

    /// Indices of the balances of a type that may pay for an event, in debit order
    pub fn eligible_balances(
        &self,
        balance_type: &str,
        destination_ids: &[String],
        category: &str,
        now: DateTime<Utc>,
    ) -> Vec<usize> {
        let chain = self.balances(balance_type);
        let mut idx: Vec<usize> = (0..chain.len())
            .filter(|&i| chain[i].is_active(now) && chain[i].matches_usage(destination_ids, category))
            .collect();
        idx.sort_by(|&a, &b| by_weight_desc(&chain[a], &chain[b]));
        idx
    }

    /// Shared groups named by any balance of a type, or of every type when `None`
    pub fn shared_groups(&self, balance_type: Option<&str>) -> BTreeSet<String> {
        let chains: Vec<&[Balance]> = match balance_type {
            Some(t) => vec![self.balances(t)],
            None => self.balance_map.values().map(Vec::as_slice).collect(),
        };
        chains
            .into_iter()
            .flatten()
            .flat_map(|b| b.shared_groups.iter().cloned())
            .collect()
    }

    /// The `*default` money balance, created on first use
    pub fn default_monetary_mut(&mut self) -> &mut Balance {
        let chain = self.balances_mut(balance_types::MONETARY);
        let pos = match chain.iter().position(|b| b.id == DEFAULT_BALANCE_ID) {
            Some(pos) => pos,
            None => {
                chain.push(Balance::new(DEFAULT_BALANCE_ID, Decimal::ZERO));
                chain.len() - 1
            }
        };
        &mut chain[pos]
    }

    /// Add to the event and balance counters of a balance type
    pub fn count_units(&mut self, balance_type: &str, amount: Decimal) {
        for (counter_type, delta) in [(CounterType::Event, Decimal::ONE), (CounterType::Balance, amount)] {
            match self
                .unit_counters
                .iter_mut()
                .find(|c| c.counter_type == counter_type && c.balance_type == balance_type)
            {
                Some(counter) => counter.value += delta,
                None => self.unit_counters.push(UnitCounter {
                    counter_type,
                    balance_type: balance_type.to_string(),
                    value: delta,
                }),
            }
        }
    }

    /// Take a refunded amount back off the balance counter of a type
    pub fn uncount_units(&mut self, balance_type: &str, amount: Decimal) {
        if let Some(counter) = self
            .unit_counters
            .iter_mut()
            .find(|c| c.counter_type == CounterType::Balance && c.balance_type == balance_type)
        {
            counter.value -= amount;
        }
    }

    pub fn counter(&self, counter_type: CounterType, balance_type: &str) -> Decimal {
        self.unit_counters
            .iter()
            .find(|c| c.counter_type == counter_type && c.balance_type == balance_type)
            .map(|c| c.value)
            .unwrap_or(Decimal::ZERO)
    }

    /// Drop expired balances from every chain
    pub fn clean_expired(&mut self, now: DateTime<Utc>) {
        for chain in self.balance_map.values_mut() {
            chain.retain(|b| !b.is_expired(now));
        }
    }

    /// Whether any balance was touched by the current mutation
    pub fn is_dirty(&self) -> bool {
        self.balance_map.values().flatten().any(|b| b.dirty)
    }

    pub fn clear_dirty(&mut self) {
        for chain in self.balance_map.values_mut() {
            for b in chain.iter_mut() {
                b.dirty = false;
            }
        }
    }

    /// Add triggers, replacing any with the same group and unique ID
    pub fn merge_triggers(&mut self, triggers: Vec<ActionTrigger>) {
        for trigger in triggers {
            self.action_triggers
                .retain(|t| !(t.id == trigger.id && t.unique_id == trigger.unique_id));
            self.action_triggers.push(trigger);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_key() {
        let acc = Account::new("cgrates.org", "1001");
        assert_eq!(acc.key(), "cgrates.org:1001");
    }

    #[test]
    fn test_eligible_balances_weight_order() {
        let now = Utc::now();
        let mut acc = Account::new("cgrates.org", "1001");
        let mut low = Balance::new("low", dec!(1));
        low.weight = 10.0;
        let mut high = Balance::new("high", dec!(1));
        high.weight = 20.0;
        let mut off = Balance::new("off", dec!(1));
        off.disabled = true;
        acc.balances_mut(balance_types::MONETARY).extend([low, high, off]);

        let idx = acc.eligible_balances(balance_types::MONETARY, &[], "call", now);
        let ids: Vec<&str> = idx
            .iter()
            .map(|&i| acc.balances(balance_types::MONETARY)[i].id.as_str())
            .collect();
        assert_eq!(ids, vec!["high", "low"]);
        assert_eq!(acc.total(balance_types::MONETARY, now), dec!(2));
    }

    #[test]
    fn test_default_balance_created_once() {
        let mut acc = Account::new("cgrates.org", "1001");
        acc.default_monetary_mut().add_value(dec!(-1));
        acc.default_monetary_mut().add_value(dec!(-1));
        assert_eq!(acc.balances(balance_types::MONETARY).len(), 1);
        assert_eq!(acc.balances(balance_types::MONETARY)[0].value, dec!(-2));
    }

    #[test]
    fn test_shared_groups_by_type() {
        let mut acc = Account::new("cgrates.org", "1001");
        let mut money = Balance::new("family", dec!(10));
        money.shared_groups = vec!["FAMILY".into()];
        let mut minutes = Balance::new("team", dec!(60));
        minutes.shared_groups = vec!["TEAM".into()];
        acc.balances_mut(balance_types::MONETARY).push(money);
        acc.balances_mut(balance_types::VOICE).push(minutes);

        let money_groups: Vec<String> = acc.shared_groups(Some(balance_types::MONETARY)).into_iter().collect();
        assert_eq!(money_groups, vec!["FAMILY".to_string()]);
        assert_eq!(acc.shared_groups(None).len(), 2);
        assert!(acc.shared_groups(Some(balance_types::SMS)).is_empty());
    }

    #[test]
    fn test_count_units() {
        let mut acc = Account::new("cgrates.org", "1001");
        acc.count_units(balance_types::MONETARY, dec!(1.5));
        acc.count_units(balance_types::MONETARY, dec!(0.5));
        assert_eq!(acc.counter(CounterType::Event, balance_types::MONETARY), dec!(2));
        assert_eq!(acc.counter(CounterType::Balance, balance_types::MONETARY), dec!(2.0));
    }
}
