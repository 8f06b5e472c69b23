//! Guarded account mutation
//!
//! The only path by which account state changes. [`AccountWriter::begin`]
//! takes the guardian lock on `tenant:account` and loads a working copy;
//! callers mutate that copy; [`AccountWriter::commit`] evaluates triggers,
//! stores the account, releases the lock, then notifies the cache and hands
//! queued notifications to the outbound notifier.
//!
//! [`AccountWriter::begin_shared`] also locks and loads the other members of
//! the account's shared groups, so a debit may consume their shared balances;
//! [`AccountWriter::begin_with`] does the same for an explicit set of keys.
//! Every touched member is stored by the same commit.
//!
//! Dropping an [`AccountTxn`] without committing releases the locks and
//! leaves the stored accounts as they were.

use crate::actions::ActionContext;
use crate::guardian::{Guardian, HeldLocks};
use crate::outbound::OutboundNotifier;
use crate::triggers::{TriggerEvaluator, TriggerReport};
use apolo_cache::keys;
use apolo_core::{
    models::{account_key, Account},
    traits::{AccountStore, CacheNotifier},
    AppResult,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Notify the cache collaborator, never failing the caller
pub(crate) async fn notify_cache(cache: &dyn CacheNotifier, prefix: &str, key: &str) {
    if let Err(e) = cache.invalidate_prefix(prefix).await {
        warn!("Cache invalidation of {} failed: {}", prefix, e);
    }
    if let Err(e) = cache.reload_key(key).await {
        warn!("Cache reload of {} failed: {}", key, e);
    }
}

/// Locked working copy of one account
pub struct AccountTxn<'g> {
    _locks: HeldLocks<'g>,
    pub account: Account,
    /// Other accounts locked with it, stored on commit when touched
    pub shared: Vec<Account>,
    pub ctx: ActionContext,
    /// True when the account did not exist before this transaction
    pub created: bool,
}

/// Result of a committed transaction
#[derive(Debug)]
pub struct Committed {
    pub account: Account,
    pub triggers: TriggerReport,
}

pub struct AccountWriter {
    accounts: Arc<dyn AccountStore>,
    guardian: Arc<Guardian>,
    triggers: Arc<TriggerEvaluator>,
    cache: Arc<dyn CacheNotifier>,
    outbound: Arc<dyn OutboundNotifier>,
    locking_timeout: Option<Duration>,
}

impl AccountWriter {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        guardian: Arc<Guardian>,
        triggers: Arc<TriggerEvaluator>,
        cache: Arc<dyn CacheNotifier>,
        outbound: Arc<dyn OutboundNotifier>,
        locking_timeout: Option<Duration>,
    ) -> Self {
        Self {
            accounts,
            guardian,
            triggers,
            cache,
            outbound,
            locking_timeout,
        }
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    /// Lock and load an account
    ///
    /// A missing account fails with `NotFound` unless `create_missing` is set,
    /// in which case an empty one is started.
    #[instrument(skip(self, now))]
    pub async fn begin(
        &self,
        tenant: &str,
        account: &str,
        source: &str,
        now: DateTime<Utc>,
        create_missing: bool,
    ) -> AppResult<AccountTxn<'_>> {
        let key = account_key(tenant, account);
        let locks = self
            .guardian
            .acquire(std::slice::from_ref(&key), self.locking_timeout)
            .await?;

        let (loaded, created) = match self.accounts.get_account(&key).await {
            Ok(acc) => (acc, false),
            Err(e) if e.is_not_found() && create_missing => {
                debug!("Starting new account {}", key);
                (Account::new(tenant, account), true)
            }
            Err(e) => return Err(e),
        };

        Ok(AccountTxn {
            _locks: locks,
            account: loaded,
            shared: Vec::new(),
            ctx: ActionContext::new(now, source),
            created,
        })
    }

    /// Keys of the accounts sharing a group with `account`, itself excluded
    async fn shared_member_keys(&self, account: &Account) -> AppResult<BTreeSet<String>> {
        let mut members = BTreeSet::new();
        for group in account.shared_groups(None) {
            members.extend(self.accounts.get_shared_group_members(&group).await?);
        }
        members.remove(&account.key());
        Ok(members)
    }

    async fn load_members(&self, keys: &BTreeSet<String>) -> AppResult<Vec<Account>> {
        let mut members = Vec::with_capacity(keys.len());
        for key in keys {
            match self.accounts.get_account(key).await {
                Ok(acc) => members.push(acc),
                Err(e) if e.is_not_found() => debug!("Member account {} is gone", key),
                Err(e) => return Err(e),
            }
        }
        Ok(members)
    }

    /// Shared group members of `account`, read without locking
    pub async fn shared_members(&self, account: &Account) -> AppResult<Vec<Account>> {
        let keys = self.shared_member_keys(account).await?;
        self.load_members(&keys).await
    }

    /// Lock and load an account together with its shared group members
    ///
    /// Membership is read before locking and again under the locks; when it
    /// grew in between, the locks are taken again over the larger set.
    #[instrument(skip(self, now))]
    pub async fn begin_shared(
        &self,
        tenant: &str,
        account: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AccountTxn<'_>> {
        let key = account_key(tenant, account);
        let mut members = {
            let unlocked = self.accounts.get_account(&key).await?;
            self.shared_member_keys(&unlocked).await?
        };

        loop {
            let mut lock_keys: Vec<String> = members.iter().cloned().collect();
            lock_keys.push(key.clone());
            let locks = self.guardian.acquire(&lock_keys, self.locking_timeout).await?;

            let loaded = self.accounts.get_account(&key).await?;
            let current = self.shared_member_keys(&loaded).await?;
            if !current.is_subset(&members) {
                debug!("Shared members of {} changed while locking", key);
                drop(locks);
                members.extend(current);
                continue;
            }

            let shared = self.load_members(&current).await?;
            return Ok(AccountTxn {
                _locks: locks,
                account: loaded,
                shared,
                ctx: ActionContext::new(now, source),
                created: false,
            });
        }
    }

    /// Lock and load an account together with the given other account keys
    ///
    /// Missing others are skipped; a missing main account is `NotFound`.
    #[instrument(skip(self, others, now))]
    pub async fn begin_with(
        &self,
        tenant: &str,
        account: &str,
        others: &BTreeSet<String>,
        source: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AccountTxn<'_>> {
        let key = account_key(tenant, account);
        let mut others = others.clone();
        others.remove(&key);
        let mut lock_keys: Vec<String> = others.iter().cloned().collect();
        lock_keys.push(key.clone());
        let locks = self.guardian.acquire(&lock_keys, self.locking_timeout).await?;

        let loaded = self.accounts.get_account(&key).await?;
        let shared = self.load_members(&others).await?;
        Ok(AccountTxn {
            _locks: locks,
            account: loaded,
            shared,
            ctx: ActionContext::new(now, source),
            created: false,
        })
    }

    /// Evaluate triggers, store, unlock, then notify
    #[instrument(skip(self, txn), fields(account = %txn.account.key()))]
    pub async fn commit(&self, txn: AccountTxn<'_>) -> AppResult<Committed> {
        let AccountTxn {
            _locks: locks,
            mut account,
            shared,
            mut ctx,
            ..
        } = txn;

        let mut report = self.triggers.evaluate(&mut ctx, &mut account).await;
        account.updated_at = Some(ctx.now);

        let mut touched = Vec::new();
        for mut member in shared.into_iter().filter(Account::is_dirty) {
            let member_report = self.triggers.evaluate(&mut ctx, &mut member).await;
            report.fired.extend(member_report.fired);
            report.failures.extend(member_report.failures);
            member.updated_at = Some(ctx.now);
            touched.push(member);
        }

        self.accounts.set_account(&account).await?;
        for member in &touched {
            self.accounts.set_account(member).await?;
        }
        drop(locks);

        let key = account.key();
        let mut stored_keys = vec![key.clone()];
        stored_keys.extend(touched.iter().map(Account::key));
        for stored in &stored_keys {
            let record = keys::account_key(stored);
            notify_cache(self.cache.as_ref(), &record, &record).await;
        }
        if !ctx.outbox.is_empty() {
            debug!("Dispatching {} notifications for {}", ctx.outbox.len(), key);
            self.outbound.dispatch(ctx.outbox).await;
        }

        Ok(Committed {
            account,
            triggers: report,
        })
    }

    /// Remove an account under its lock
    pub async fn remove(&self, tenant: &str, account: &str) -> AppResult<bool> {
        let key = account_key(tenant, account);
        let removed = self
            .guardian
            .guard(std::slice::from_ref(&key), self.locking_timeout, || {
                self.accounts.remove_account(&key)
            })
            .await?;
        if removed {
            notify_cache(self.cache.as_ref(), &keys::account_key(&key), &keys::account_key(&key)).await;
        }
        Ok(removed)
    }
}
