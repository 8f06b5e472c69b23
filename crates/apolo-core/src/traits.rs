//! Collaborator traits for storage and cache
//!
//! The engine only talks to persistence through these contracts. Getters
//! fail with `AppError::NotFound` when the entity is absent.

use crate::error::AppError;
use crate::models::{
    Account, Action, ActionPlan, ActionTrigger, Destination, RatingPlan, RatingProfile, Timing,
};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Runtime account state, keyed by `tenant:account`
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, key: &str) -> Result<Account, AppError>;

    /// Stores the account and registers it in the shared groups its balances name
    async fn set_account(&self, account: &Account) -> Result<(), AppError>;

    /// Keys of the accounts registered in a shared group
    ///
    /// Membership is only added on store; a listed account may no longer
    /// hold a balance in the group or may have been removed.
    async fn get_shared_group_members(&self, group: &str) -> Result<BTreeSet<String>, AppError>;

    /// Returns false when the account did not exist
    async fn remove_account(&self, key: &str) -> Result<bool, AppError>;
}

/// Read-mostly tariff and action data
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Profile by `*out:tenant:category:subject`
    async fn get_rating_profile(&self, key: &str) -> Result<RatingProfile, AppError>;

    async fn set_rating_profile(&self, profile: &RatingProfile) -> Result<(), AppError>;

    async fn get_rating_plan(&self, id: &str) -> Result<RatingPlan, AppError>;

    async fn set_rating_plan(&self, plan: &RatingPlan) -> Result<(), AppError>;

    async fn get_destination(&self, id: &str) -> Result<Destination, AppError>;

    async fn set_destination(&self, destination: &Destination) -> Result<(), AppError>;

    async fn get_timing(&self, id: &str) -> Result<Timing, AppError>;

    async fn set_timing(&self, timing: &Timing) -> Result<(), AppError>;

    /// Actions group by ID
    async fn get_actions(&self, id: &str) -> Result<Vec<Action>, AppError>;

    async fn set_actions(&self, id: &str, actions: &[Action]) -> Result<(), AppError>;

    /// Trigger group by ID
    async fn get_action_triggers(&self, id: &str) -> Result<Vec<ActionTrigger>, AppError>;

    async fn set_action_triggers(&self, id: &str, triggers: &[ActionTrigger])
        -> Result<(), AppError>;

    async fn get_action_plan(&self, id: &str) -> Result<ActionPlan, AppError>;

    /// Every stored plan, for scheduler loads
    async fn get_action_plans(&self) -> Result<Vec<ActionPlan>, AppError>;

    /// Stores the plan and refreshes the account-to-plan index
    async fn set_action_plan(&self, plan: &ActionPlan) -> Result<(), AppError>;

    async fn remove_action_plan(&self, id: &str) -> Result<bool, AppError>;

    /// Drop one binding from a plan (used after one-shot fires)
    async fn remove_action_timing(&self, plan_id: &str, uuid: &str) -> Result<(), AppError>;

    /// Plan IDs bound to an account key
    async fn get_account_action_plans(&self, account_key: &str) -> Result<Vec<String>, AppError>;
}

/// Cache collaborator notified after store mutations
#[async_trait]
pub trait CacheNotifier: Send + Sync {
    /// Drop every cached entry whose key starts with `prefix`
    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), AppError>;

    /// Ask cache holders to reload a single key
    async fn reload_key(&self, key: &str) -> Result<(), AppError>;
}
