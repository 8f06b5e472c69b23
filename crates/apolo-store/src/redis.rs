//! Redis store backends
//!
//! Records are stored as JSON under the `apolo_cache::keys` layout. The
//! account-to-plan index is a Redis set per account, and shared group
//! membership a Redis set per group.

use apolo_cache::{keys, RedisCache};
use apolo_core::{
    models::{
        Account, Action, ActionPlan, ActionTrigger, Destination, RatingPlan, RatingProfile,
        Timing,
    },
    traits::{AccountStore, RatingStore},
    AppError, AppResult,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

async fn get_required<T: DeserializeOwned>(
    cache: &RedisCache,
    key: &str,
    kind: &str,
    id: &str,
) -> AppResult<T> {
    cache
        .get_json::<T>(key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", kind, id)))
}

/// Redis implementation of AccountStore
#[derive(Clone)]
pub struct RedisAccountStore {
    cache: RedisCache,
}

impl RedisAccountStore {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl AccountStore for RedisAccountStore {
    #[instrument(skip(self))]
    async fn get_account(&self, key: &str) -> AppResult<Account> {
        get_required(&self.cache, &keys::account_key(key), "account", key).await
    }

    #[instrument(skip(self, account), fields(account = %account.key()))]
    async fn set_account(&self, account: &Account) -> AppResult<()> {
        let key = account.key();
        self.cache.set_json(&keys::account_key(&key), account).await?;
        for group in account.shared_groups(None) {
            self.cache.sadd(&keys::shared_group_key(&group), &key).await?;
        }
        Ok(())
    }

    async fn get_shared_group_members(&self, group: &str) -> AppResult<BTreeSet<String>> {
        let members = self.cache.smembers(&keys::shared_group_key(group)).await?;
        Ok(members.into_iter().collect())
    }

    async fn remove_account(&self, key: &str) -> AppResult<bool> {
        self.cache.delete(&keys::account_key(key)).await
    }
}

/// Redis implementation of RatingStore
#[derive(Clone)]
pub struct RedisRatingStore {
    cache: RedisCache,
}

impl RedisRatingStore {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }

    async fn unindex_plan(&self, plan: &ActionPlan) -> AppResult<()> {
        for account in &plan.account_ids {
            self.cache
                .srem(&keys::account_action_plans_key(account), &plan.id)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RatingStore for RedisRatingStore {
    async fn get_rating_profile(&self, key: &str) -> AppResult<RatingProfile> {
        get_required(
            &self.cache,
            &keys::rating_profile_key(key),
            "rating profile",
            key,
        )
        .await
    }

    async fn set_rating_profile(&self, profile: &RatingProfile) -> AppResult<()> {
        let mut profile = profile.clone();
        profile.sort_activations();
        self.cache
            .set_json(&keys::rating_profile_key(&profile.id), &profile)
            .await
    }

    async fn get_rating_plan(&self, id: &str) -> AppResult<RatingPlan> {
        get_required(&self.cache, &keys::rating_plan_key(id), "rating plan", id).await
    }

    async fn set_rating_plan(&self, plan: &RatingPlan) -> AppResult<()> {
        self.cache
            .set_json(&keys::rating_plan_key(&plan.id), plan)
            .await
    }

    async fn get_destination(&self, id: &str) -> AppResult<Destination> {
        get_required(&self.cache, &keys::destination_key(id), "destination", id).await
    }

    async fn set_destination(&self, destination: &Destination) -> AppResult<()> {
        self.cache
            .set_json(&keys::destination_key(&destination.id), destination)
            .await
    }

    async fn get_timing(&self, id: &str) -> AppResult<Timing> {
        get_required(&self.cache, &keys::timing_key(id), "timing", id).await
    }

    async fn set_timing(&self, timing: &Timing) -> AppResult<()> {
        self.cache
            .set_json(&keys::timing_key(&timing.id), timing)
            .await
    }

    async fn get_actions(&self, id: &str) -> AppResult<Vec<Action>> {
        get_required(&self.cache, &keys::actions_key(id), "actions", id).await
    }

    async fn set_actions(&self, id: &str, actions: &[Action]) -> AppResult<()> {
        self.cache.set_json(&keys::actions_key(id), &actions).await
    }

    async fn get_action_triggers(&self, id: &str) -> AppResult<Vec<ActionTrigger>> {
        get_required(
            &self.cache,
            &keys::action_triggers_key(id),
            "action triggers",
            id,
        )
        .await
    }

    async fn set_action_triggers(&self, id: &str, triggers: &[ActionTrigger]) -> AppResult<()> {
        self.cache
            .set_json(&keys::action_triggers_key(id), &triggers)
            .await
    }

    async fn get_action_plan(&self, id: &str) -> AppResult<ActionPlan> {
        get_required(&self.cache, &keys::action_plan_key(id), "action plan", id).await
    }

    #[instrument(skip(self))]
    async fn get_action_plans(&self) -> AppResult<Vec<ActionPlan>> {
        let plan_keys = self
            .cache
            .keys_with_prefix(keys::ACTION_PLAN_PREFIX)
            .await?;
        debug!("Loading {} action plans", plan_keys.len());

        let mut plans = Vec::with_capacity(plan_keys.len());
        for key in plan_keys {
            // a plan removed between SCAN and GET is simply skipped
            if let Some(plan) = self.cache.get_json::<ActionPlan>(&key).await? {
                plans.push(plan);
            }
        }
        Ok(plans)
    }

    #[instrument(skip(self, plan), fields(plan = %plan.id))]
    async fn set_action_plan(&self, plan: &ActionPlan) -> AppResult<()> {
        if let Some(previous) = self
            .cache
            .get_json::<ActionPlan>(&keys::action_plan_key(&plan.id))
            .await?
        {
            self.unindex_plan(&previous).await?;
        }
        self.cache
            .set_json(&keys::action_plan_key(&plan.id), plan)
            .await?;
        for account in &plan.account_ids {
            self.cache
                .sadd(&keys::account_action_plans_key(account), &plan.id)
                .await?;
        }
        Ok(())
    }

    async fn remove_action_plan(&self, id: &str) -> AppResult<bool> {
        match self
            .cache
            .get_json::<ActionPlan>(&keys::action_plan_key(id))
            .await?
        {
            Some(plan) => {
                self.unindex_plan(&plan).await?;
                self.cache.delete(&keys::action_plan_key(id)).await
            }
            None => Ok(false),
        }
    }

    async fn remove_action_timing(&self, plan_id: &str, uuid: &str) -> AppResult<()> {
        let mut plan: ActionPlan = get_required(
            &self.cache,
            &keys::action_plan_key(plan_id),
            "action plan",
            plan_id,
        )
        .await?;
        plan.bindings.retain(|b| b.uuid != uuid);
        self.cache
            .set_json(&keys::action_plan_key(plan_id), &plan)
            .await
    }

    async fn get_account_action_plans(&self, account_key: &str) -> AppResult<Vec<String>> {
        self.cache
            .smembers(&keys::account_action_plans_key(account_key))
            .await
    }
}
