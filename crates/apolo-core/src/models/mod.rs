//! Domain models for the charging engine
//!
//! This module contains all the core domain models used throughout the engine.

pub mod account;
pub mod action;
pub mod action_plan;
pub mod action_trigger;
pub mod balance;
pub mod call_cost;
pub mod call_descriptor;
pub mod destination;
pub mod rate;
pub mod rating_plan;
pub mod rating_profile;
pub mod timing;

pub use account::{account_key, Account, UnitCounter};
pub use action::{action_ids, sort_actions, Action};
pub use action_plan::{ActionPlan, ActionTiming};
pub use action_trigger::{ActionTrigger, CounterType, ThresholdType};
pub use balance::{balance_types, Balance, BalanceFilter, DEFAULT_BALANCE_ID};
pub use call_cost::{BalanceCharge, CallCost, Increment, TimeSpan};
pub use call_descriptor::CallDescriptor;
pub use destination::{Destination, ANY_DESTINATION};
pub use rate::{RGRate, RIRate, RoundingMethod};
pub use rating_plan::{RatingBinding, RatingPlan};
pub use rating_profile::{
    RatingPlanActivation, RatingProfile, RatingProfileKey, ANY_SUBJECT, DIRECTION_OUT,
};
pub use timing::{timing_ids, StartSpec, Timing};
