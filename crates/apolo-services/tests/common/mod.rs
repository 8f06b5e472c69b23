// Shared fixtures for the service integration tests
#![allow(dead_code)]

use apolo_cache::NoopCacheNotifier;
use apolo_core::{
    config::AppConfig,
    models::{
        action_ids, balance_types, Action, ActionPlan, ActionTiming, ActionTrigger, BalanceFilter,
        CallDescriptor, Destination, RGRate, RIRate, RatingPlan, RatingPlanActivation,
        RatingProfile, RatingProfileKey, RoundingMethod, ThresholdType, Timing, ANY_SUBJECT,
    },
    traits::RatingStore,
};
use apolo_services::commands::{AddBalanceArgs, SetAccountArgs, SetActionsArgs, SetRatingProfileArgs};
use apolo_services::{ActionRegistry, Collaborators, Engine, RecordingNotifier};
use apolo_store::{InMemoryAccountStore, InMemoryRatingStore};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const TENANT: &str = "cgrates.org";

/// Plan rating numbers starting with 1002
pub const PLAN_1002: &str = "RP_1002";

pub struct TestContext {
    pub engine: Arc<Engine>,
    pub rating: Arc<InMemoryRatingStore>,
    pub accounts: Arc<InMemoryAccountStore>,
    pub outbound: Arc<RecordingNotifier>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let rating = Arc::new(InMemoryRatingStore::new());
        let accounts = Arc::new(InMemoryAccountStore::new());
        let outbound = Arc::new(RecordingNotifier::new());
        let engine = Engine::new(
            Collaborators {
                accounts: accounts.clone(),
                rating: rating.clone(),
                cache: Arc::new(NoopCacheNotifier),
                outbound: outbound.clone(),
            },
            ActionRegistry::with_defaults(),
            &config,
        );
        Self {
            engine: Arc::new(engine),
            rating,
            accounts,
            outbound,
        }
    }

    /// Connect fee 0.1, then 0.6 per started minute
    pub fn per_minute_rate() -> RIRate {
        RIRate {
            id: "RT_60".into(),
            connect_fee: dec!(0.1),
            rounding_method: RoundingMethod::Up,
            rounding_decimals: 4,
            max_cost: Decimal::ZERO,
            rates: vec![RGRate::new(0, dec!(0.6), 60, 60)],
        }
    }

    /// Destination, plan and a `*any` subject profile for the tenant
    pub async fn seed_tariff(&self) {
        let admin = &self.engine.admin;
        admin
            .set_destination(Destination::new("DST_1002", &["1002"]))
            .await
            .unwrap();
        admin
            .set_rating_plan(RatingPlan::new(PLAN_1002).with_binding(
                "DST_1002",
                Timing::any(),
                Self::per_minute_rate(),
                10.0,
            ))
            .await
            .unwrap();
        self.set_profile(ANY_SUBJECT, PLAN_1002, vec![]).await;
    }

    pub async fn set_profile(&self, subject: &str, plan_id: &str, fallback_keys: Vec<String>) {
        let profile = RatingProfile::new(
            &RatingProfileKey::new(TENANT, "call", subject),
            vec![RatingPlanActivation {
                activation_time: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                rating_plan_id: plan_id.into(),
                fallback_keys,
            }],
        );
        self.engine
            .admin
            .set_rating_profile(SetRatingProfileArgs { profile, overwrite: true })
            .await
            .unwrap();
    }

    pub async fn create_account(&self, account: &str, money: Decimal) {
        self.engine
            .accounts
            .set_account(SetAccountArgs {
                tenant: TENANT.into(),
                account: account.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        if !money.is_zero() {
            self.engine
                .accounts
                .add_balance(AddBalanceArgs {
                    tenant: TENANT.into(),
                    account: account.into(),
                    value: money,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
    }

    /// Add `value` to the balance `id` of `balance_type`, creating it in `groups`
    pub async fn grouped_balance(&self, account: &str, balance_type: &str, id: &str, groups: &[&str], value: Decimal) {
        self.engine
            .accounts
            .add_balance(AddBalanceArgs {
                tenant: TENANT.into(),
                account: account.into(),
                balance_type: balance_type.into(),
                balance: BalanceFilter {
                    id: Some(id.into()),
                    shared_groups: (!groups.is_empty())
                        .then(|| groups.iter().map(|g| g.to_string()).collect()),
                    ..Default::default()
                },
                value,
                overwrite: false,
            })
            .await
            .unwrap();
    }

    /// Value of one balance, looked up by ID
    pub async fn balance_value(&self, account: &str, balance_type: &str, id: &str) -> Decimal {
        self.engine
            .accounts
            .get_account(TENANT, account)
            .await
            .unwrap()
            .balances(balance_type)
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.value)
            .unwrap_or_default()
    }

    pub async fn monetary(&self, account: &str) -> Decimal {
        self.engine
            .accounts
            .get_account(TENANT, account)
            .await
            .unwrap()
            .total(balance_types::MONETARY, Utc::now())
    }

    pub async fn store_actions(&self, id: &str, actions: Vec<Action>) {
        self.engine
            .admin
            .set_actions(SetActionsArgs { id: id.into(), actions })
            .await
            .unwrap();
    }

    /// A plan binding one actions group to `timing` for `accounts`
    pub async fn store_plan(&self, plan_id: &str, actions_id: &str, timing: Timing, accounts: &[&str]) {
        let plan = ActionPlan {
            id: plan_id.into(),
            bindings: vec![ActionTiming {
                uuid: format!("{}-binding", plan_id),
                actions_id: actions_id.into(),
                timing_id: timing.id.clone(),
                timing: Some(timing),
                weight: 10.0,
            }],
            account_ids: accounts
                .iter()
                .map(|a| format!("{}:{}", TENANT, a))
                .collect(),
        };
        self.rating.set_action_plan(&plan).await.unwrap();
    }
}

pub fn call(account: &str, destination: &str, start: DateTime<Utc>, usage_secs: i64) -> CallDescriptor {
    CallDescriptor::new(TENANT, account, destination, start, usage_secs)
}

pub fn call_now(account: &str, usage_secs: i64) -> CallDescriptor {
    call(account, "1002", Utc::now() - Duration::seconds(usage_secs), usage_secs)
}

pub fn topup(units: Decimal) -> Action {
    Action::on_balance("", action_ids::TOPUP, balance_types::MONETARY, units)
}

pub fn min_balance_trigger(unique_id: &str, threshold: Decimal, actions_id: &str) -> ActionTrigger {
    ActionTrigger {
        id: String::new(),
        unique_id: unique_id.into(),
        threshold_type: ThresholdType::MinBalance,
        threshold_value: threshold,
        recurrent: false,
        min_sleep_secs: 0,
        executed: false,
        last_execution_time: None,
        balance_type: balance_types::MONETARY.into(),
        balance: BalanceFilter::default(),
        weight: 10.0,
        activation_date: None,
        expiration_date: None,
        actions_id: actions_id.into(),
    }
}
