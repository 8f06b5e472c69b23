//! Call cost calculator
//!
//! Quote, debit and affordability checks for a call descriptor.
//!
//! - `get_cost` only reads tariff data and depends on nothing but the
//!   descriptor and the stored profiles and plans.
//! - `debit` rates outside the lock, then consumes balances of the billed
//!   account inside a guarded transaction: unit balances of the call's type
//!   of record first, then money for the uncovered tail. Balances other
//!   accounts share with it through a shared group are part of the pool.
//! - `max_debit` answers how much of the requested usage the account can
//!   currently pay for, without touching it.
//! - `refund` gives the charges of an earlier debit back.

use crate::constants::{DEBIT_SOURCE, REFUND_SOURCE, UNLIMITED_USAGE};
use crate::rate_engine::{price_window, RateEngine, RatedWindow};
use crate::resolver::{RatingResolver, ResolvedRating};
use crate::writer::AccountWriter;
use apolo_core::{
    config::GeneralConfig,
    models::{account_key, balance_types, Account, Balance, BalanceCharge, CallCost, CallDescriptor},
    traits::RatingStore,
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reply of `max_debit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxDebitReply {
    /// Affordable usage in seconds, `-1` when unlimited
    pub max_usage_secs: i64,
    /// Cost of the affordable usage
    pub cost: Decimal,
}

/// Reply of `refund`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RefundReply {
    pub refunded: Vec<BalanceCharge>,
    /// Charges whose account or balance no longer exists
    pub skipped: Vec<BalanceCharge>,
}

pub struct CallCostCalculator {
    resolver: Arc<RatingResolver>,
    engine: Arc<RateEngine>,
    rating: Arc<dyn RatingStore>,
    writer: Arc<AccountWriter>,
    general: GeneralConfig,
}

/// Usage taken from unit balances
struct UnitDebit {
    covered: u64,
    charges: Vec<BalanceCharge>,
}

fn build_cost(cd: &CallDescriptor, resolved: &ResolvedRating, window: RatedWindow, unit_usage: u64) -> CallCost {
    CallCost {
        tenant: cd.tenant.clone(),
        category: cd.category.clone(),
        subject: cd.subject.clone(),
        account: cd.account.clone(),
        destination: cd.destination.clone(),
        tor: cd.tor.clone(),
        rated_profile: resolved.rated_profile.clone(),
        rating_plan_id: resolved.binding.rating_plan_id.clone(),
        connect_fee: window.connect_fee,
        cost: window.cost,
        usage_secs: cd.usage_secs(),
        unit_usage_secs: unit_usage,
        timespans: window.timespans,
        charges: Vec::new(),
    }
}

/// A balance of the billed account (`owner` 0) or of a shared group member
#[derive(Debug, Clone, Copy)]
struct Slot {
    owner: usize,
    index: usize,
}

fn wallet<'a>(account: &'a Account, shared: &'a [Account], owner: usize) -> &'a Account {
    match owner {
        0 => account,
        n => &shared[n - 1],
    }
}

fn wallet_mut<'a>(account: &'a mut Account, shared: &'a mut [Account], owner: usize) -> &'a mut Account {
    match owner {
        0 => account,
        n => &mut shared[n - 1],
    }
}

/// Eligible balances of a type across the billed account and its shared group members
///
/// A member balance joins only when it is in a group that a balance of the
/// same type on the billed account names. Debit order is descending weight;
/// on equal weight the billed account's own balances come first.
fn balance_pool(
    account: &Account,
    shared: &[Account],
    balance_type: &str,
    dest_ids: &[String],
    category: &str,
    now: DateTime<Utc>,
) -> Vec<Slot> {
    let mut slots: Vec<Slot> = account
        .eligible_balances(balance_type, dest_ids, category, now)
        .into_iter()
        .map(|index| Slot { owner: 0, index })
        .collect();

    let groups = account.shared_groups(Some(balance_type));
    if !groups.is_empty() {
        for (n, member) in shared.iter().enumerate() {
            let chain = member.balances(balance_type);
            slots.extend(
                member
                    .eligible_balances(balance_type, dest_ids, category, now)
                    .into_iter()
                    .filter(|&i| chain[i].shared_groups.iter().any(|g| groups.contains(g)))
                    .map(|index| Slot { owner: n + 1, index }),
            );
        }
    }

    let weight = |slot: &Slot| wallet(account, shared, slot.owner).balances(balance_type)[slot.index].weight;
    slots.sort_by(|a, b| weight(b).total_cmp(&weight(a)));
    slots
}

fn charge(owner: String, balance: &Balance, balance_type: &str, amount: Decimal) -> BalanceCharge {
    BalanceCharge {
        account: owner,
        balance_uuid: balance.uuid.clone(),
        balance_id: balance.id.clone(),
        balance_type: balance_type.to_string(),
        amount,
    }
}

/// Whole units available on the eligible unit balances, respecting blockers
fn available_units(
    account: &Account,
    shared: &[Account],
    cd: &CallDescriptor,
    dest_ids: &[String],
    now: DateTime<Utc>,
) -> u64 {
    let mut total = 0u64;
    for slot in balance_pool(account, shared, &cd.tor, dest_ids, &cd.category, now) {
        let b = &wallet(account, shared, slot.owner).balances(&cd.tor)[slot.index];
        total += b.value.floor().to_u64().unwrap_or(0);
        if b.blocker {
            break;
        }
    }
    total
}

/// Money available on the eligible monetary balances, respecting blockers
fn available_money(
    account: &Account,
    shared: &[Account],
    dest_ids: &[String],
    category: &str,
    now: DateTime<Utc>,
) -> Decimal {
    let mut total = Decimal::ZERO;
    for slot in balance_pool(account, shared, balance_types::MONETARY, dest_ids, category, now) {
        let b = &wallet(account, shared, slot.owner).balances(balance_types::MONETARY)[slot.index];
        if b.value > Decimal::ZERO {
            total += b.value;
        }
        if b.blocker {
            break;
        }
    }
    total
}

fn consume_units(
    account: &mut Account,
    shared: &mut [Account],
    cd: &CallDescriptor,
    dest_ids: &[String],
    now: DateTime<Utc>,
) -> UnitDebit {
    let mut debit = UnitDebit {
        covered: 0,
        charges: Vec::new(),
    };
    if cd.tor == balance_types::MONETARY {
        return debit;
    }

    let usage = cd.usage_secs();
    let order = balance_pool(account, shared, &cd.tor, dest_ids, &cd.category, now);
    for slot in order {
        if debit.covered >= usage {
            break;
        }
        let owner = wallet_mut(account, shared, slot.owner);
        let owner_key = owner.key();
        let b = &mut owner.balances_mut(&cd.tor)[slot.index];
        let available = b.value.floor().to_u64().unwrap_or(0);
        let take = available.min(usage - debit.covered);
        if take > 0 {
            b.add_value(-Decimal::from(take));
            debit.covered += take;
            debit.charges.push(charge(owner_key, b, &cd.tor, Decimal::from(take)));
        }
        if b.blocker {
            break;
        }
    }
    debit
}

/// Take `amount` from the monetary balances; `Err(shortfall)` when not covered
fn consume_money(
    account: &mut Account,
    shared: &mut [Account],
    amount: Decimal,
    dest_ids: &[String],
    category: &str,
    now: DateTime<Utc>,
    charges: &mut Vec<BalanceCharge>,
) -> Result<(), Decimal> {
    let mut remaining = amount;
    let order = balance_pool(account, shared, balance_types::MONETARY, dest_ids, category, now);
    for slot in order {
        if remaining <= Decimal::ZERO {
            break;
        }
        let owner = wallet_mut(account, shared, slot.owner);
        let owner_key = owner.key();
        let b = &mut owner.balances_mut(balance_types::MONETARY)[slot.index];
        if b.value > Decimal::ZERO {
            let take = b.value.min(remaining);
            b.add_value(-take);
            remaining -= take;
            charges.push(charge(owner_key, b, balance_types::MONETARY, take));
        }
        if b.blocker {
            break;
        }
    }
    if remaining > Decimal::ZERO {
        Err(remaining)
    } else {
        Ok(())
    }
}

impl CallCostCalculator {
    pub fn new(
        resolver: Arc<RatingResolver>,
        engine: Arc<RateEngine>,
        rating: Arc<dyn RatingStore>,
        writer: Arc<AccountWriter>,
        general: GeneralConfig,
    ) -> Self {
        Self {
            resolver,
            engine,
            rating,
            writer,
            general,
        }
    }

    fn prepare(&self, cd: CallDescriptor) -> AppResult<CallDescriptor> {
        cd.prepare(&self.general.default_tenant, &self.general.default_category)
    }

    /// Destination IDs used to match balance filters against the dialed number
    async fn balance_destination_ids(
        &self,
        account: &Account,
        shared: &[Account],
        number: &str,
        resolved: &ResolvedRating,
    ) -> AppResult<Vec<String>> {
        let referenced: BTreeSet<&String> = std::iter::once(account)
            .chain(shared)
            .flat_map(|acc| acc.balance_map.values())
            .flatten()
            .flat_map(|b| b.destination_ids.iter())
            .collect();

        let mut matched = vec![resolved.binding.destination_id.clone()];
        for id in referenced {
            if matched.contains(id) {
                continue;
            }
            match self.rating.get_destination(id).await {
                Ok(dst) if dst.longest_match(number).is_some() => matched.push(id.clone()),
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!("Balance destination {} not stored", id),
                Err(e) => return Err(e),
            }
        }
        Ok(matched)
    }

    /// Quote a call without touching any account
    #[instrument(skip(self, cd), fields(account = %cd.account, destination = %cd.destination))]
    pub async fn get_cost(&self, cd: CallDescriptor) -> AppResult<CallCost> {
        let cd = self.prepare(cd)?;
        let resolved = self.resolver.resolve(&cd).await?;
        let window = self.engine.price(&cd, &resolved.binding);
        debug!("Quoted {} for {}s to {}", window.cost, cd.usage_secs(), cd.destination);
        Ok(build_cost(&cd, &resolved, window, 0))
    }

    /// Rate and charge a call against the billed account
    ///
    /// Balances the account shares through its groups are consumed with its
    /// own, every member holding one locked for the whole section.
    #[instrument(skip(self, cd), fields(account = %cd.account, destination = %cd.destination))]
    pub async fn debit(&self, cd: CallDescriptor) -> AppResult<CallCost> {
        let cd = self.prepare(cd)?;
        let resolved = self.resolver.resolve(&cd).await?;

        let mut txn = self
            .writer
            .begin_shared(&cd.tenant, &cd.account, DEBIT_SOURCE, Utc::now())
            .await?;
        let now = txn.ctx.now;
        if txn.account.disabled {
            return Err(AppError::AccountDisabled(cd.account_key()));
        }

        let dest_ids = self
            .balance_destination_ids(&txn.account, &txn.shared, &cd.destination, &resolved)
            .await?;

        let units = consume_units(&mut txn.account, &mut txn.shared, &cd, &dest_ids, now);
        let usage = cd.usage_secs();
        let mut window = if units.covered > 0 {
            self.engine.price(&cd.tail(usage - units.covered), &resolved.binding)
        } else {
            self.engine.price(&cd, &resolved.binding)
        };
        let (window_start, _) = cd.usage_window();
        if units.covered > 0 && window_start == 0 {
            // the tail starts mid-call, so the connect fee is added here
            window.charge_connect_fee(&resolved.binding.rate, self.general.rounding_decimals);
        }

        let mut charges = units.charges;
        let cost = window.cost;
        if let Err(shortfall) = consume_money(
            &mut txn.account,
            &mut txn.shared,
            cost,
            &dest_ids,
            &cd.category,
            now,
            &mut charges,
        ) {
            if !txn.account.allow_negative {
                let available = cost - shortfall;
                debug!("Insufficient funds on {}: {} of {}", cd.account_key(), available, cost);
                return Err(AppError::InsufficientFunds {
                    account: cd.account_key(),
                    required: cost.to_string(),
                    available: available.to_string(),
                });
            }
            let owner_key = txn.account.key();
            let negative = txn.account.default_monetary_mut();
            negative.add_value(-shortfall);
            charges.push(charge(owner_key, negative, balance_types::MONETARY, shortfall));
        }

        if units.covered > 0 {
            txn.account
                .count_units(&cd.tor, Decimal::from(units.covered));
        }
        if cost > Decimal::ZERO {
            txn.account.count_units(balance_types::MONETARY, cost);
        }

        let committed = self.writer.commit(txn).await?;
        info!(
            account = %cd.account_key(),
            cost = %cost,
            units = units.covered,
            "Debit committed"
        );
        if !committed.triggers.failures.is_empty() {
            debug!("{} triggers failed during debit", committed.triggers.failures.len());
        }

        let mut call_cost = build_cost(&cd, &resolved, window, units.covered);
        call_cost.charges = charges;
        Ok(call_cost)
    }

    /// Largest usage of the descriptor the account can pay for now
    #[instrument(skip(self, cd), fields(account = %cd.account, destination = %cd.destination))]
    pub async fn max_debit(&self, cd: CallDescriptor) -> AppResult<MaxDebitReply> {
        let cd = self.prepare(cd)?;
        let usage = cd.usage_secs();
        if usage == 0 {
            return Err(AppError::InvalidInput(
                "max debit needs a positive usage".to_string(),
            ));
        }
        let resolved = self.resolver.resolve(&cd).await?;
        let account = self.writer.accounts().get_account(&cd.account_key()).await?;
        if account.disabled {
            return Err(AppError::AccountDisabled(cd.account_key()));
        }

        let full = self.engine.price(&cd, &resolved.binding);
        if account.allow_negative || full.cost.is_zero() {
            return Ok(MaxDebitReply {
                max_usage_secs: UNLIMITED_USAGE,
                cost: full.cost,
            });
        }

        let now = Utc::now();
        let shared = self.writer.shared_members(&account).await?;
        let dest_ids = self
            .balance_destination_ids(&account, &shared, &cd.destination, &resolved)
            .await?;
        let units = if cd.tor == balance_types::MONETARY {
            0
        } else {
            available_units(&account, &shared, &cd, &dest_ids, now).min(usage)
        };
        let money = available_money(&account, &shared, &dest_ids, &cd.category, now);

        let (window_start, _) = cd.usage_window();
        let rate = &resolved.binding.rate;
        let decimals = self.general.rounding_decimals;
        let tail_cost = |d: u64| -> Decimal {
            let start = window_start + units;
            let mut window = price_window(rate, start, start + d, decimals, |_| cd.time_start);
            if start > 0 && window_start == 0 {
                window.charge_connect_fee(rate, decimals);
            }
            window.cost
        };

        if tail_cost(0) > money {
            debug!("Connect fee not affordable for {}", cd.account_key());
            return Ok(MaxDebitReply {
                max_usage_secs: 0,
                cost: Decimal::ZERO,
            });
        }

        // cost grows with usage, so bisect the affordable tail
        let (mut lo, mut hi) = (0u64, usage - units);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if tail_cost(mid) <= money {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let max_usage = units + lo;
        debug!(
            "Max usage for {}: {}s ({} from units)",
            cd.account_key(),
            max_usage,
            units
        );
        Ok(MaxDebitReply {
            max_usage_secs: max_usage as i64,
            cost: tail_cost(lo),
        })
    }

    /// Give the charges of a debited call back to the balances that paid them
    ///
    /// Every account named by a charge is locked for the section. Charges are
    /// matched by balance UUID within their type; a balance removed since the
    /// debit is reported as skipped. Counters are reduced by what was given back.
    #[instrument(skip(self, cc), fields(account = %cc.account))]
    pub async fn refund(&self, cc: CallCost) -> AppResult<RefundReply> {
        if cc.account.trim().is_empty() {
            return Err(AppError::missing("Account"));
        }
        let tenant = if cc.tenant.is_empty() {
            self.general.default_tenant.clone()
        } else {
            cc.tenant.clone()
        };
        let billed = account_key(&tenant, &cc.account);
        let owners: BTreeSet<String> = cc
            .charges
            .iter()
            .filter(|c| !c.account.is_empty())
            .map(|c| c.account.clone())
            .collect();

        let mut txn = self
            .writer
            .begin_with(&tenant, &cc.account, &owners, REFUND_SOURCE, Utc::now())
            .await?;

        let mut reply = RefundReply::default();
        for item in cc.charges {
            let owner = if item.account.is_empty() { billed.as_str() } else { item.account.as_str() };
            let target = if owner == billed {
                Some(&mut txn.account)
            } else {
                txn.shared.iter_mut().find(|acc| acc.key() == owner)
            };
            let Some(target) = target else {
                warn!("Refund of {} skipped: account {} is gone", item.balance_uuid, owner);
                reply.skipped.push(item);
                continue;
            };
            let Some(balance) = target
                .balance_map
                .get_mut(&item.balance_type)
                .and_then(|chain| chain.iter_mut().find(|b| b.uuid == item.balance_uuid))
            else {
                warn!("Refund of {} skipped: balance is gone from {}", item.balance_uuid, owner);
                reply.skipped.push(item);
                continue;
            };
            balance.add_value(item.amount);
            target.uncount_units(&item.balance_type, item.amount);
            reply.refunded.push(item);
        }

        if reply.refunded.is_empty() {
            debug!("Nothing to refund on {}", billed);
            return Ok(reply);
        }
        self.writer.commit(txn).await?;
        info!(
            account = %billed,
            refunded = reply.refunded.len(),
            skipped = reply.skipped.len(),
            "Refund committed"
        );
        Ok(reply)
    }
}
