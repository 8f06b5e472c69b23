//! Account manager
//!
//! Account creation and removal, balance top-ups and on-demand actions.
//! Every mutation goes through the [`AccountWriter`], so it runs under the
//! account lock and ends with trigger evaluation.

use crate::actions::ActionExecutor;
use crate::commands::{AddBalanceArgs, ExecuteActionArgs, SetAccountArgs};
use crate::constants::{ADD_BALANCE_ACTIONS_ID, API_SOURCE};
use crate::guardian::Guardian;
use crate::writer::{notify_cache, AccountWriter, Committed};
use apolo_cache::keys;
use apolo_core::{
    config::GeneralConfig,
    models::{account_key, action_ids, balance_types, Account, Action, ActionPlan},
    traits::{CacheNotifier, RatingStore},
    AppError, AppResult,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Result of `set_account`
#[derive(Debug)]
pub struct AccountUpdate {
    pub account: Account,
    /// Plans that had no bound account before this one joined
    pub activated_plans: Vec<String>,
}

/// Effect of `update_plan` on a stored plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanChange {
    Unchanged,
    Stored { before: usize, after: usize },
}

impl PlanChange {
    /// The plan went from no accounts to some, so nothing has queued it yet
    fn activated(self) -> bool {
        matches!(self, PlanChange::Stored { before: 0, after } if after > 0)
    }
}

pub struct AccountManager {
    writer: Arc<AccountWriter>,
    executor: Arc<ActionExecutor>,
    rating: Arc<dyn RatingStore>,
    cache: Arc<dyn CacheNotifier>,
    guardian: Arc<Guardian>,
    general: GeneralConfig,
}

impl AccountManager {
    pub fn new(
        writer: Arc<AccountWriter>,
        executor: Arc<ActionExecutor>,
        rating: Arc<dyn RatingStore>,
        cache: Arc<dyn CacheNotifier>,
        guardian: Arc<Guardian>,
        general: GeneralConfig,
    ) -> Self {
        Self {
            writer,
            executor,
            rating,
            cache,
            guardian,
            general,
        }
    }

    fn tenant<'a>(&'a self, tenant: &'a str) -> &'a str {
        if tenant.is_empty() {
            &self.general.default_tenant
        } else {
            tenant
        }
    }

    fn lock_timeout(&self) -> Option<Duration> {
        self.general.locking_timeout()
    }

    /// Create or update an account
    ///
    /// Referenced trigger groups and action plans must exist; they are
    /// loaded before the account lock is taken. The account joins every
    /// listed plan once its own state is stored.
    #[instrument(skip(self, args), fields(account = %args.account))]
    pub async fn set_account(&self, args: SetAccountArgs) -> AppResult<AccountUpdate> {
        args.validate()?;
        let tenant = self.tenant(&args.tenant).to_string();

        let mut triggers = Vec::new();
        for id in &args.action_triggers_ids {
            triggers.extend(self.rating.get_action_triggers(id).await?);
        }
        let mut plan_ids = Vec::with_capacity(args.action_plan_ids.len());
        for id in &args.action_plan_ids {
            // existence check, the plan is re-read under its lock below
            self.rating.get_action_plan(id).await?;
            plan_ids.push(id.clone());
        }

        let mut txn = self
            .writer
            .begin(&tenant, &args.account, API_SOURCE, Utc::now(), true)
            .await?;
        if let Some(allow) = args.allow_negative {
            txn.account.allow_negative = allow;
        }
        if let Some(disabled) = args.disabled {
            txn.account.disabled = disabled;
        }
        txn.account.merge_triggers(triggers);
        let created = txn.created;
        let Committed { account, .. } = self.writer.commit(txn).await?;

        let key = account.key();
        let mut activated_plans = Vec::new();
        for plan_id in &plan_ids {
            let change = self
                .update_plan(plan_id, |plan| plan.account_ids.insert(key.clone()))
                .await?;
            if change.activated() {
                debug!("Plan {} gained its first account {}", plan_id, key);
                activated_plans.push(plan_id.clone());
            }
        }

        info!(
            "Account {} {} ({} trigger groups, {} plans)",
            key,
            if created { "created" } else { "updated" },
            args.action_triggers_ids.len(),
            plan_ids.len()
        );
        Ok(AccountUpdate {
            account,
            activated_plans,
        })
    }

    /// Apply `change` to a stored plan under the plan's lock; stores it only
    /// when `change` reports a modification
    async fn update_plan<F>(&self, plan_id: &str, change: F) -> AppResult<PlanChange>
    where
        F: FnOnce(&mut ActionPlan) -> bool,
    {
        let lock_key = keys::action_plan_key(plan_id);
        let outcome = self
            .guardian
            .guard(std::slice::from_ref(&lock_key), self.lock_timeout(), || async {
                let mut plan = self.rating.get_action_plan(plan_id).await?;
                let before = plan.account_ids.len();
                if !change(&mut plan) {
                    return Ok(PlanChange::Unchanged);
                }
                self.rating.set_action_plan(&plan).await?;
                Ok::<_, AppError>(PlanChange::Stored {
                    before,
                    after: plan.account_ids.len(),
                })
            })
            .await?;
        if outcome != PlanChange::Unchanged {
            notify_cache(self.cache.as_ref(), keys::ACTION_PLAN_PREFIX, &lock_key).await;
        }
        Ok(outcome)
    }

    pub async fn get_account(&self, tenant: &str, account: &str) -> AppResult<Account> {
        let key = account_key(self.tenant(tenant), account);
        self.writer.accounts().get_account(&key).await
    }

    /// Remove an account and unbind it from its action plans
    #[instrument(skip(self))]
    pub async fn remove_account(&self, tenant: &str, account: &str) -> AppResult<bool> {
        let tenant = self.tenant(tenant);
        let key = account_key(tenant, account);
        let plan_ids = self.rating.get_account_action_plans(&key).await?;

        let removed = self.writer.remove(tenant, account).await?;
        for plan_id in plan_ids {
            let result = self
                .update_plan(&plan_id, |plan| plan.account_ids.remove(&key))
                .await;
            match result {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!("Plan {} already gone", plan_id),
                Err(e) => warn!("Could not unbind {} from plan {}: {}", key, plan_id, e),
            }
        }
        if removed {
            info!("Account {} removed", key);
        }
        Ok(removed)
    }

    /// Add to (or overwrite) one balance
    ///
    /// Runs as a one-action `*topup` group (`*topup_reset` when
    /// overwriting), creating the account and the balance when missing.
    #[instrument(skip(self, args), fields(account = %args.account, value = %args.value))]
    pub async fn add_balance(&self, args: AddBalanceArgs) -> AppResult<Account> {
        args.validate()?;
        let identifier = if args.overwrite {
            action_ids::TOPUP_RESET
        } else {
            action_ids::TOPUP
        };
        let balance_type = if args.balance_type.is_empty() {
            balance_types::MONETARY
        } else {
            args.balance_type.as_str()
        };
        let mut action =
            Action::on_balance(ADD_BALANCE_ACTIONS_ID, identifier, balance_type, args.value);
        action.balance = args.balance.clone();

        let committed = self
            .apply_actions(&args.tenant, &args.account, &[action], API_SOURCE, true)
            .await?;
        Ok(committed.account)
    }

    /// Run a stored actions group against an account
    #[instrument(skip(self, args), fields(account = %args.account, actions_id = %args.actions_id))]
    pub async fn execute_action(&self, args: ExecuteActionArgs) -> AppResult<Account> {
        args.validate()?;
        let actions = self.executor.load(&args.actions_id).await?;
        let committed = self
            .apply_actions(&args.tenant, &args.account, &actions, API_SOURCE, true)
            .await?;
        Ok(committed.account)
    }

    /// Run an actions group on one account as a single guarded transaction
    ///
    /// Nothing is stored when any action fails.
    pub async fn apply_actions(
        &self,
        tenant: &str,
        account: &str,
        actions: &[Action],
        source: &str,
        create_missing: bool,
    ) -> AppResult<Committed> {
        let tenant = self.tenant(tenant);
        let mut txn = self
            .writer
            .begin(tenant, account, source, Utc::now(), create_missing)
            .await?;
        self.executor
            .run(&mut txn.ctx, &mut txn.account, actions)
            .await?;
        self.writer.commit(txn).await
    }
}
