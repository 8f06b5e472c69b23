//! In-memory store backends
//!
//! Maps guarded by `parking_lot` locks. No lock is held across an await
//! point; every method clones in or out.

use apolo_core::{
    models::{
        Account, Action, ActionPlan, ActionTrigger, Destination, RatingPlan, RatingProfile,
        Timing,
    },
    traits::{AccountStore, RatingStore},
    AppError, AppResult,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

fn not_found(kind: &str, id: &str) -> AppError {
    AppError::NotFound(format!("{} {}", kind, id))
}

/// In-memory account store
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
    shared_groups: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_account(&self, key: &str) -> AppResult<Account> {
        self.accounts
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| not_found("account", key))
    }

    async fn set_account(&self, account: &Account) -> AppResult<()> {
        let key = account.key();
        debug!("Storing account {}", key);
        self.accounts.write().insert(key.clone(), account.clone());
        let groups = account.shared_groups(None);
        if !groups.is_empty() {
            let mut index = self.shared_groups.write();
            for group in groups {
                index.entry(group).or_default().insert(key.clone());
            }
        }
        Ok(())
    }

    async fn get_shared_group_members(&self, group: &str) -> AppResult<BTreeSet<String>> {
        Ok(self
            .shared_groups
            .read()
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_account(&self, key: &str) -> AppResult<bool> {
        Ok(self.accounts.write().remove(key).is_some())
    }
}

#[derive(Default)]
struct RatingData {
    profiles: HashMap<String, RatingProfile>,
    plans: HashMap<String, RatingPlan>,
    destinations: HashMap<String, Destination>,
    timings: HashMap<String, Timing>,
    actions: HashMap<String, Vec<Action>>,
    triggers: HashMap<String, Vec<ActionTrigger>>,
    action_plans: HashMap<String, ActionPlan>,
    account_plans: HashMap<String, BTreeSet<String>>,
}

impl RatingData {
    fn unindex_plan(&mut self, plan_id: &str) {
        for plans in self.account_plans.values_mut() {
            plans.remove(plan_id);
        }
        self.account_plans.retain(|_, plans| !plans.is_empty());
    }
}

/// In-memory rating store
#[derive(Default)]
pub struct InMemoryRatingStore {
    data: RwLock<RatingData>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn get_rating_profile(&self, key: &str) -> AppResult<RatingProfile> {
        self.data
            .read()
            .profiles
            .get(key)
            .cloned()
            .ok_or_else(|| not_found("rating profile", key))
    }

    async fn set_rating_profile(&self, profile: &RatingProfile) -> AppResult<()> {
        let mut profile = profile.clone();
        profile.sort_activations();
        self.data.write().profiles.insert(profile.id.clone(), profile);
        Ok(())
    }

    async fn get_rating_plan(&self, id: &str) -> AppResult<RatingPlan> {
        self.data
            .read()
            .plans
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("rating plan", id))
    }

    async fn set_rating_plan(&self, plan: &RatingPlan) -> AppResult<()> {
        self.data.write().plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn get_destination(&self, id: &str) -> AppResult<Destination> {
        self.data
            .read()
            .destinations
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("destination", id))
    }

    async fn set_destination(&self, destination: &Destination) -> AppResult<()> {
        self.data
            .write()
            .destinations
            .insert(destination.id.clone(), destination.clone());
        Ok(())
    }

    async fn get_timing(&self, id: &str) -> AppResult<Timing> {
        self.data
            .read()
            .timings
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("timing", id))
    }

    async fn set_timing(&self, timing: &Timing) -> AppResult<()> {
        self.data
            .write()
            .timings
            .insert(timing.id.clone(), timing.clone());
        Ok(())
    }

    async fn get_actions(&self, id: &str) -> AppResult<Vec<Action>> {
        self.data
            .read()
            .actions
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("actions", id))
    }

    async fn set_actions(&self, id: &str, actions: &[Action]) -> AppResult<()> {
        self.data
            .write()
            .actions
            .insert(id.to_string(), actions.to_vec());
        Ok(())
    }

    async fn get_action_triggers(&self, id: &str) -> AppResult<Vec<ActionTrigger>> {
        self.data
            .read()
            .triggers
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("action triggers", id))
    }

    async fn set_action_triggers(&self, id: &str, triggers: &[ActionTrigger]) -> AppResult<()> {
        self.data
            .write()
            .triggers
            .insert(id.to_string(), triggers.to_vec());
        Ok(())
    }

    async fn get_action_plan(&self, id: &str) -> AppResult<ActionPlan> {
        self.data
            .read()
            .action_plans
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("action plan", id))
    }

    async fn get_action_plans(&self) -> AppResult<Vec<ActionPlan>> {
        let mut plans: Vec<ActionPlan> = self.data.read().action_plans.values().cloned().collect();
        plans.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(plans)
    }

    async fn set_action_plan(&self, plan: &ActionPlan) -> AppResult<()> {
        let mut data = self.data.write();
        data.unindex_plan(&plan.id);
        for account in &plan.account_ids {
            data.account_plans
                .entry(account.clone())
                .or_default()
                .insert(plan.id.clone());
        }
        data.action_plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn remove_action_plan(&self, id: &str) -> AppResult<bool> {
        let mut data = self.data.write();
        data.unindex_plan(id);
        Ok(data.action_plans.remove(id).is_some())
    }

    async fn remove_action_timing(&self, plan_id: &str, uuid: &str) -> AppResult<()> {
        let mut data = self.data.write();
        let plan = data
            .action_plans
            .get_mut(plan_id)
            .ok_or_else(|| not_found("action plan", plan_id))?;
        plan.bindings.retain(|b| b.uuid != uuid);
        Ok(())
    }

    async fn get_account_action_plans(&self, account_key: &str) -> AppResult<Vec<String>> {
        Ok(self
            .data
            .read()
            .account_plans
            .get(account_key)
            .map(|plans| plans.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_core::models::{balance_types, ActionTiming, Balance, RatingPlanActivation, RatingProfileKey};
    use rust_decimal_macros::dec;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_account_roundtrip_and_not_found() {
        let store = InMemoryAccountStore::new();
        assert!(store.get_account("cgrates.org:1001").await.unwrap_err().is_not_found());

        store.set_account(&Account::new("cgrates.org", "1001")).await.unwrap();
        let acc = store.get_account("cgrates.org:1001").await.unwrap();
        assert_eq!(acc.id, "1001");
        assert!(store.remove_account("cgrates.org:1001").await.unwrap());
        assert!(!store.remove_account("cgrates.org:1001").await.unwrap());
    }

    #[tokio::test]
    async fn test_shared_group_membership() {
        let store = InMemoryAccountStore::new();
        assert!(store.get_shared_group_members("FAMILY").await.unwrap().is_empty());

        for id in ["1001", "1002"] {
            let mut acc = Account::new("cgrates.org", id);
            let mut shared = Balance::new("family", dec!(5));
            shared.shared_groups = vec!["FAMILY".into()];
            acc.balances_mut(balance_types::MONETARY).push(shared);
            store.set_account(&acc).await.unwrap();
        }
        store.set_account(&Account::new("cgrates.org", "1003")).await.unwrap();

        let members: Vec<String> = store
            .get_shared_group_members("FAMILY")
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(members, vec!["cgrates.org:1001".to_string(), "cgrates.org:1002".to_string()]);
    }

    #[tokio::test]
    async fn test_profile_activations_sorted_on_store() {
        let store = InMemoryRatingStore::new();
        let key = RatingProfileKey::new("cgrates.org", "call", "1001");
        let act = |d: u32, id: &str| RatingPlanActivation {
            activation_time: Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap(),
            rating_plan_id: id.to_string(),
            fallback_keys: vec![],
        };
        let profile = RatingProfile {
            id: key.to_string(),
            activations: vec![act(9, "B"), act(1, "A")],
        };
        store.set_rating_profile(&profile).await.unwrap();
        let stored = store.get_rating_profile(&key.to_string()).await.unwrap();
        assert_eq!(stored.activations[0].rating_plan_id, "A");
    }

    #[tokio::test]
    async fn test_action_plan_index() {
        let store = InMemoryRatingStore::new();
        let plan = ActionPlan {
            id: "PKG".into(),
            bindings: vec![ActionTiming {
                uuid: "u1".into(),
                actions_id: "TOPUP_10".into(),
                timing_id: "*asap".into(),
                timing: None,
                weight: 10.0,
            }],
            account_ids: ["cgrates.org:1001".to_string()].into_iter().collect(),
        };
        store.set_action_plan(&plan).await.unwrap();
        assert_eq!(
            store.get_account_action_plans("cgrates.org:1001").await.unwrap(),
            vec!["PKG".to_string()]
        );

        store.remove_action_timing("PKG", "u1").await.unwrap();
        assert!(store.get_action_plan("PKG").await.unwrap().bindings.is_empty());

        let rebound = ActionPlan {
            account_ids: ["cgrates.org:1002".to_string()].into_iter().collect(),
            ..plan
        };
        store.set_action_plan(&rebound).await.unwrap();
        assert!(store
            .get_account_action_plans("cgrates.org:1001")
            .await
            .unwrap()
            .is_empty());

        assert!(store.remove_action_plan("PKG").await.unwrap());
        assert!(store
            .get_account_action_plans("cgrates.org:1002")
            .await
            .unwrap()
            .is_empty());
    }
}
