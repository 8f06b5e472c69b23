//! Key constants and builders for persisted engine state
//!
//! Provides the key naming patterns shared by the Redis stores and the
//! cache notifications, so a store write and its invalidation always agree.
//!
//! # Key Patterns
//!
//! - `account:{tenant}:{account}` - Account records
//! - `rating_profile:*out:{tenant}:{category}:{subject}` - Rating profiles
//! - `rating_plan:{id}` - Rating plans
//! - `destination:{id}` - Destinations
//! - `timing:{id}` - Stored timings
//! - `actions:{id}` - Actions groups
//! - `action_triggers:{id}` - Action trigger groups
//! - `action_plan:{id}` - Action plans
//! - `account_action_plans:{tenant}:{account}` - Set of plan IDs bound to an account
//! - `shared_group:{id}` - Set of account keys holding a balance in the group
//!
//! # Example
//!
//! ```
//! use apolo_cache::keys;
//!
//! assert_eq!(keys::account_key("cgrates.org:1001"), "account:cgrates.org:1001");
//! assert_eq!(keys::action_plan_key("PKG"), "action_plan:PKG");
//! ```

/// Prefix for account records
pub const ACCOUNT_PREFIX: &str = "account:";

/// Prefix for rating profiles
pub const RATING_PROFILE_PREFIX: &str = "rating_profile:";

/// Prefix for rating plans
pub const RATING_PLAN_PREFIX: &str = "rating_plan:";

/// Prefix for destinations
pub const DESTINATION_PREFIX: &str = "destination:";

/// Prefix for timings
pub const TIMING_PREFIX: &str = "timing:";

/// Prefix for actions groups
pub const ACTIONS_PREFIX: &str = "actions:";

/// Prefix for action trigger groups
pub const ACTION_TRIGGERS_PREFIX: &str = "action_triggers:";

/// Prefix for action plans
pub const ACTION_PLAN_PREFIX: &str = "action_plan:";

/// Prefix for the account to action plan index
pub const ACCOUNT_ACTION_PLANS_PREFIX: &str = "account_action_plans:";

/// Prefix for the shared group membership sets
pub const SHARED_GROUP_PREFIX: &str = "shared_group:";

/// Build the key of an account record from its `tenant:account` key
pub fn account_key(tenant_account: &str) -> String {
    format!("{}{}", ACCOUNT_PREFIX, tenant_account)
}

/// Build the key of a rating profile from its `*out:...` ID
pub fn rating_profile_key(profile_id: &str) -> String {
    format!("{}{}", RATING_PROFILE_PREFIX, profile_id)
}

pub fn rating_plan_key(id: &str) -> String {
    format!("{}{}", RATING_PLAN_PREFIX, id)
}

pub fn destination_key(id: &str) -> String {
    format!("{}{}", DESTINATION_PREFIX, id)
}

pub fn timing_key(id: &str) -> String {
    format!("{}{}", TIMING_PREFIX, id)
}

pub fn actions_key(id: &str) -> String {
    format!("{}{}", ACTIONS_PREFIX, id)
}

pub fn action_triggers_key(id: &str) -> String {
    format!("{}{}", ACTION_TRIGGERS_PREFIX, id)
}

pub fn action_plan_key(id: &str) -> String {
    format!("{}{}", ACTION_PLAN_PREFIX, id)
}

/// Build the index key listing the plans bound to `tenant:account`
pub fn account_action_plans_key(tenant_account: &str) -> String {
    format!("{}{}", ACCOUNT_ACTION_PLANS_PREFIX, tenant_account)
}

pub fn shared_group_key(id: &str) -> String {
    format!("{}{}", SHARED_GROUP_PREFIX, id)
}

/// Strip a known prefix, returning the entity ID
pub fn id_from_key<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}
