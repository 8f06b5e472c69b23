//! Action plan model
//!
//! Binds actions groups to timings and to a set of accounts. The scheduler
//! fires each binding at its timing's wall-clock moments.

use super::timing::Timing;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One timing/actions binding of a plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTiming {
    pub uuid: String,

    pub actions_id: String,

    /// Predefined (`*asap`, `*monthly`, ...) or stored timing ID
    pub timing_id: String,

    /// Inline timing, takes precedence over `timing_id` lookups
    #[serde(default)]
    pub timing: Option<Timing>,

    #[serde(default)]
    pub weight: f64,
}

/// Action plan entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActionPlan {
    pub id: String,

    #[serde(default)]
    pub bindings: Vec<ActionTiming>,

    /// `tenant:account` keys
    #[serde(default)]
    pub account_ids: BTreeSet<String>,
}

impl ActionPlan {
    pub fn binding(&self, uuid: &str) -> Option<&ActionTiming> {
        self.bindings.iter().find(|b| b.uuid == uuid)
    }

    /// Whether any bound account belongs to `tenant` (and equals `account` if given)
    pub fn targets(&self, tenant: Option<&str>, account: Option<&str>) -> bool {
        self.account_ids.iter().any(|key| {
            let (t, a) = key.split_once(':').unwrap_or(("", key.as_str()));
            tenant.map_or(true, |want| want == t) && account.map_or(true, |want| want == a)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_filter() {
        let plan = ActionPlan {
            id: "PACKAGE_10".into(),
            bindings: vec![],
            account_ids: ["cgrates.org:1001".to_string(), "other.org:2001".to_string()]
                .into_iter()
                .collect(),
        };
        assert!(plan.targets(None, None));
        assert!(plan.targets(Some("cgrates.org"), None));
        assert!(plan.targets(Some("cgrates.org"), Some("1001")));
        assert!(!plan.targets(Some("cgrates.org"), Some("2001")));
        assert!(!plan.targets(Some("nowhere.org"), None));
    }
}
