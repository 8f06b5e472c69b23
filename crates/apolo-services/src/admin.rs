//! Tariff and action data management
//!
//! Write operations over the rating store. Each successful write is
//! followed by a cache notification for the touched key; cache failures are
//! logged and never fail the write.

use crate::commands::{SetActionPlanArgs, SetActionTriggersArgs, SetActionsArgs, SetRatingProfileArgs};
use crate::guardian::Guardian;
use crate::writer::notify_cache;
use apolo_cache::keys;
use apolo_core::{
    models::{Destination, RatingPlan, RatingProfileKey},
    traits::{CacheNotifier, RatingStore},
    AppError, AppResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use validator::Validate;

pub struct RatingAdmin {
    rating: Arc<dyn RatingStore>,
    cache: Arc<dyn CacheNotifier>,
    guardian: Arc<Guardian>,
    locking_timeout: Option<Duration>,
}

fn require(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        Err(AppError::missing(field))
    } else {
        Ok(())
    }
}

impl RatingAdmin {
    pub fn new(
        rating: Arc<dyn RatingStore>,
        cache: Arc<dyn CacheNotifier>,
        guardian: Arc<Guardian>,
        locking_timeout: Option<Duration>,
    ) -> Self {
        Self {
            rating,
            cache,
            guardian,
            locking_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn RatingStore> {
        &self.rating
    }

    #[instrument(skip(self, destination), fields(id = %destination.id))]
    pub async fn set_destination(&self, destination: Destination) -> AppResult<()> {
        require(&destination.id, "id")?;
        if destination.prefixes.is_empty() {
            return Err(AppError::missing("prefixes"));
        }
        self.rating.set_destination(&destination).await?;
        notify_cache(
            self.cache.as_ref(),
            keys::DESTINATION_PREFIX,
            &keys::destination_key(&destination.id),
        )
        .await;
        info!("Destination {} stored with {} prefixes", destination.id, destination.prefixes.len());
        Ok(())
    }

    /// Store a rating plan after checking that every binding resolves
    #[instrument(skip(self, plan), fields(id = %plan.id))]
    pub async fn set_rating_plan(&self, plan: RatingPlan) -> AppResult<()> {
        require(&plan.id, "id")?;
        for binding in &plan.bindings {
            if plan.rating(&binding.rating_id).is_none() {
                return Err(AppError::InvalidInput(format!(
                    "rating plan {} references unknown rate {}",
                    plan.id, binding.rating_id
                )));
            }
            if plan.timing(&binding.timing_id).is_none() {
                // stored timing
                self.rating.get_timing(&binding.timing_id).await?;
            }
        }
        self.rating.set_rating_plan(&plan).await?;
        notify_cache(
            self.cache.as_ref(),
            keys::RATING_PLAN_PREFIX,
            &keys::rating_plan_key(&plan.id),
        )
        .await;
        info!("Rating plan {} stored with {} bindings", plan.id, plan.bindings.len());
        Ok(())
    }

    /// Store a rating profile; an existing one is kept unless `overwrite`
    #[instrument(skip(self, args), fields(id = %args.profile.id, overwrite = args.overwrite))]
    pub async fn set_rating_profile(&self, args: SetRatingProfileArgs) -> AppResult<()> {
        let mut profile = args.profile;
        require(&profile.id, "id")?;
        // normalizes the key and rejects malformed ones
        let key: RatingProfileKey = profile.id.parse()?;
        profile.id = key.to_string();
        if profile.activations.is_empty() {
            return Err(AppError::missing("activations"));
        }
        for activation in &profile.activations {
            require(&activation.rating_plan_id, "rating_plan_id")?;
            self.rating.get_rating_plan(&activation.rating_plan_id).await?;
        }
        profile.sort_activations();

        let lock_key = keys::rating_profile_key(&profile.id);
        let rating = &self.rating;
        let overwrite = args.overwrite;
        let profile = self
            .guardian
            .guard(std::slice::from_ref(&lock_key), self.locking_timeout, || async move {
                if !overwrite {
                    match rating.get_rating_profile(&profile.id).await {
                        Ok(_) => return Err(AppError::AlreadyExists(profile.id)),
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
                rating.set_rating_profile(&profile).await?;
                Ok(profile)
            })
            .await?;

        notify_cache(self.cache.as_ref(), keys::RATING_PROFILE_PREFIX, &lock_key).await;
        info!("Rating profile {} stored", profile.id);
        Ok(())
    }

    #[instrument(skip(self, args), fields(id = %args.id))]
    pub async fn set_actions(&self, args: SetActionsArgs) -> AppResult<()> {
        args.validate()?;
        let mut actions = args.actions;
        for action in actions.iter_mut() {
            require(&action.identifier, "identifier")?;
            action.id = args.id.clone();
        }
        self.rating.set_actions(&args.id, &actions).await?;
        notify_cache(self.cache.as_ref(), keys::ACTIONS_PREFIX, &keys::actions_key(&args.id)).await;
        info!("Actions {} stored ({} actions)", args.id, actions.len());
        Ok(())
    }

    /// Store a trigger group; trigger group IDs are forced to the group's
    #[instrument(skip(self, args), fields(id = %args.id))]
    pub async fn set_action_triggers(&self, args: SetActionTriggersArgs) -> AppResult<()> {
        args.validate()?;
        let mut triggers = args.triggers;
        for trigger in triggers.iter_mut() {
            require(&trigger.unique_id, "unique_id")?;
            require(&trigger.actions_id, "actions_id")?;
            trigger.id = args.id.clone();
        }
        self.rating.set_action_triggers(&args.id, &triggers).await?;
        notify_cache(
            self.cache.as_ref(),
            keys::ACTION_TRIGGERS_PREFIX,
            &keys::action_triggers_key(&args.id),
        )
        .await;
        info!("Action triggers {} stored ({} triggers)", args.id, triggers.len());
        Ok(())
    }

    /// Store an action plan; an existing one is kept unless `overwrite`
    ///
    /// Referenced actions groups must exist. When overwriting, accounts
    /// bound to the stored plan stay bound.
    #[instrument(skip(self, args), fields(id = %args.plan.id, overwrite = args.overwrite))]
    pub async fn set_action_plan(&self, args: SetActionPlanArgs) -> AppResult<()> {
        let mut plan = args.plan;
        require(&plan.id, "id")?;
        for binding in plan.bindings.iter_mut() {
            require(&binding.actions_id, "actions_id")?;
            if binding.uuid.is_empty() {
                binding.uuid = uuid::Uuid::new_v4().to_string();
            }
            self.rating.get_actions(&binding.actions_id).await?;
            if let Some(timing) = &binding.timing {
                timing.start_spec()?;
                let now = chrono::Utc::now();
                timing.next_fire(now, now, 1)?;
            }
        }

        let lock_key = keys::action_plan_key(&plan.id);
        let rating = &self.rating;
        let overwrite = args.overwrite;
        let plan = self
            .guardian
            .guard(std::slice::from_ref(&lock_key), self.locking_timeout, || async move {
                match rating.get_action_plan(&plan.id).await {
                    Ok(_) if !overwrite => return Err(AppError::AlreadyExists(plan.id)),
                    Ok(existing) => plan.account_ids.extend(existing.account_ids),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                rating.set_action_plan(&plan).await?;
                Ok(plan)
            })
            .await?;

        notify_cache(self.cache.as_ref(), keys::ACTION_PLAN_PREFIX, &lock_key).await;
        info!(
            "Action plan {} stored ({} bindings, {} accounts)",
            plan.id,
            plan.bindings.len(),
            plan.account_ids.len()
        );
        Ok(())
    }

    pub async fn remove_action_plan(&self, id: &str) -> AppResult<()> {
        require(id, "id")?;
        let lock_key = keys::action_plan_key(id);
        let removed = self
            .guardian
            .guard(std::slice::from_ref(&lock_key), self.locking_timeout, || {
                self.rating.remove_action_plan(id)
            })
            .await?;
        if !removed {
            return Err(AppError::NotFound(format!("action plan {}", id)));
        }
        notify_cache(self.cache.as_ref(), keys::ACTION_PLAN_PREFIX, &lock_key).await;
        info!("Action plan {} removed", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_cache::NoopCacheNotifier;
    use apolo_core::models::{
        action_ids, Action, ActionPlan, ActionTiming, RGRate, RIRate, RatingPlanActivation,
        RatingProfile, RoundingMethod, Timing,
    };
    use apolo_store::InMemoryRatingStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn admin() -> RatingAdmin {
        RatingAdmin::new(
            Arc::new(InMemoryRatingStore::new()),
            Arc::new(NoopCacheNotifier),
            Arc::new(Guardian::new()),
            None,
        )
    }

    fn profile(plan_id: &str) -> RatingProfile {
        RatingProfile::new(
            &RatingProfileKey::new("cgrates.org", "call", "1001"),
            vec![RatingPlanActivation {
                activation_time: Utc::now(),
                rating_plan_id: plan_id.into(),
                fallback_keys: vec![],
            }],
        )
    }

    #[tokio::test]
    async fn test_rating_profile_overwrite_rules() {
        let admin = admin();
        let plan = RatingPlan::new("RP_1001").with_binding(
            "*any",
            Timing::any(),
            RIRate {
                id: "RT_1CNT".into(),
                connect_fee: dec!(0),
                rounding_method: RoundingMethod::Up,
                rounding_decimals: 4,
                max_cost: dec!(0),
                rates: vec![RGRate::new(0, dec!(0.01), 1, 1)],
            },
            10.0,
        );
        admin.set_rating_plan(plan).await.unwrap();

        let args = SetRatingProfileArgs { profile: profile("RP_1001"), overwrite: false };
        admin.set_rating_profile(args.clone()).await.unwrap();
        assert!(matches!(
            admin.set_rating_profile(args.clone()).await,
            Err(AppError::AlreadyExists(_))
        ));
        admin
            .set_rating_profile(SetRatingProfileArgs { overwrite: true, ..args })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rating_profile_requires_existing_plan() {
        let admin = admin();
        let args = SetRatingProfileArgs { profile: profile("MISSING"), overwrite: false };
        assert!(admin.set_rating_profile(args).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_action_plan_overwrite_keeps_accounts() {
        let admin = admin();
        admin
            .set_actions(SetActionsArgs {
                id: "TOPUP_10".into(),
                actions: vec![Action::new("", action_ids::TOPUP)],
            })
            .await
            .unwrap();

        let mut plan = ActionPlan {
            id: "PACKAGE_10".into(),
            bindings: vec![ActionTiming {
                uuid: String::new(),
                actions_id: "TOPUP_10".into(),
                timing_id: "*asap".into(),
                timing: None,
                weight: 10.0,
            }],
            account_ids: Default::default(),
        };
        plan.account_ids.insert("cgrates.org:1001".into());
        admin
            .set_action_plan(SetActionPlanArgs { plan: plan.clone(), overwrite: false, reload_scheduler: false })
            .await
            .unwrap();
        let err = admin
            .set_action_plan(SetActionPlanArgs { plan: plan.clone(), overwrite: false, reload_scheduler: false })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));

        plan.account_ids.clear();
        admin
            .set_action_plan(SetActionPlanArgs { plan, overwrite: true, reload_scheduler: false })
            .await
            .unwrap();
        let stored = admin.store().get_action_plan("PACKAGE_10").await.unwrap();
        assert!(stored.account_ids.contains("cgrates.org:1001"));
        assert!(!stored.bindings[0].uuid.is_empty());
        assert_eq!(
            admin.store().get_actions("TOPUP_10").await.unwrap()[0].id,
            "TOPUP_10"
        );
    }

    #[tokio::test]
    async fn test_action_plan_unknown_actions() {
        let admin = admin();
        let plan = ActionPlan {
            id: "BROKEN".into(),
            bindings: vec![ActionTiming {
                uuid: "u1".into(),
                actions_id: "NOPE".into(),
                timing_id: "*asap".into(),
                timing: None,
                weight: 0.0,
            }],
            account_ids: Default::default(),
        };
        let err = admin
            .set_action_plan(SetActionPlanArgs { plan, overwrite: false, reload_scheduler: false })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(admin.remove_action_plan("BROKEN").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_action_plan_rejects_out_of_range_timing() {
        let admin = admin();
        admin
            .set_actions(SetActionsArgs {
                id: "TOPUP_10".into(),
                actions: vec![Action::new("", action_ids::TOPUP)],
            })
            .await
            .unwrap();

        for start_time in ["+9999999999999999s", "+2000000000000h"] {
            let timing = Timing { start_time: start_time.into(), ..Timing::any() };
            let plan = ActionPlan {
                id: "FAR_FUTURE".into(),
                bindings: vec![ActionTiming {
                    uuid: String::new(),
                    actions_id: "TOPUP_10".into(),
                    timing_id: String::new(),
                    timing: Some(timing),
                    weight: 0.0,
                }],
                account_ids: Default::default(),
            };
            let err = admin
                .set_action_plan(SetActionPlanArgs { plan, overwrite: true, reload_scheduler: false })
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{start_time}: {err:?}");
        }
        assert!(admin.store().get_action_plan("FAR_FUTURE").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_destination_requires_prefixes() {
        let admin = admin();
        let err = admin.set_destination(Destination::new("DST_EMPTY", &[])).await.unwrap_err();
        assert_eq!(err, AppError::missing("prefixes"));
        admin.set_destination(Destination::new("DST_1002", &["1002"])).await.unwrap();
    }
}
