//! Rating profile model
//!
//! A rating profile is the time-versioned binding of rating plans to a
//! `tenant/category/subject`. Activations are kept ordered by activation
//! time; each may name fallback profiles consulted when its plan cannot
//! price a destination.

use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Only outbound rating is supported
pub const DIRECTION_OUT: &str = "*out";

/// Subject matching every caller of a tenant/category
pub const ANY_SUBJECT: &str = "*any";

/// Parsed `*out:tenant:category:subject` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RatingProfileKey {
    pub tenant: String,
    pub category: String,
    pub subject: String,
}

impl RatingProfileKey {
    pub fn new(tenant: &str, category: &str, subject: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            category: category.to_string(),
            subject: subject.to_string(),
        }
    }

    /// Parse a full key, or a bare subject relative to `base`
    pub fn parse_relative(raw: &str, base: &RatingProfileKey) -> AppResult<Self> {
        if raw.starts_with(DIRECTION_OUT) {
            return raw.parse();
        }
        if raw.is_empty() {
            return Err(AppError::InvalidInput("empty fallback key".to_string()));
        }
        Ok(Self::new(&base.tenant, &base.category, raw))
    }

    /// Same tenant and category, different subject
    pub fn with_subject(&self, subject: &str) -> Self {
        Self::new(&self.tenant, &self.category, subject)
    }
}

impl fmt::Display for RatingProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            DIRECTION_OUT, self.tenant, self.category, self.subject
        )
    }
}

impl std::str::FromStr for RatingProfileKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(DIRECTION_OUT), Some(t), Some(c), Some(subj))
                if !t.is_empty() && !c.is_empty() && !subj.is_empty() =>
            {
                Ok(Self::new(t, c, subj))
            }
            _ => Err(AppError::InvalidInput(format!(
                "invalid rating profile key: {}",
                s
            ))),
        }
    }
}

/// One dated activation of a rating plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingPlanActivation {
    pub activation_time: DateTime<Utc>,
    pub rating_plan_id: String,

    /// Full profile keys (or bare subjects) tried in order when the plan
    /// has no rate for the destination
    #[serde(default)]
    pub fallback_keys: Vec<String>,
}

/// Rating profile entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RatingProfile {
    /// `*out:tenant:category:subject`
    pub id: String,

    /// Activations ordered by activation time (oldest first)
    #[serde(default)]
    pub activations: Vec<RatingPlanActivation>,
}

impl RatingProfile {
    pub fn new(key: &RatingProfileKey, activations: Vec<RatingPlanActivation>) -> Self {
        let mut profile = Self {
            id: key.to_string(),
            activations,
        };
        profile.sort_activations();
        profile
    }

    pub fn sort_activations(&mut self) {
        self.activations.sort_by_key(|a| a.activation_time);
    }

    /// Activation with the greatest activation time not after `t`
    pub fn active_at(&self, t: DateTime<Utc>) -> Option<&RatingPlanActivation> {
        self.activations
            .iter()
            .rev()
            .find(|a| a.activation_time <= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn activation(day: u32, plan: &str) -> RatingPlanActivation {
        RatingPlanActivation {
            activation_time: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            rating_plan_id: plan.to_string(),
            fallback_keys: vec![],
        }
    }

    #[test]
    fn test_key_roundtrip_and_parse() {
        let key = RatingProfileKey::new("cgrates.org", "call", "1001");
        assert_eq!(key.to_string(), "*out:cgrates.org:call:1001");
        let parsed: RatingProfileKey = "*out:cgrates.org:call:10:01".parse().unwrap();
        assert_eq!(parsed.subject, "10:01");
        assert!("*in:cgrates.org:call:1001".parse::<RatingProfileKey>().is_err());
        assert!("*out:cgrates.org:call".parse::<RatingProfileKey>().is_err());
    }

    #[test]
    fn test_parse_relative_subject() {
        let base = RatingProfileKey::new("cgrates.org", "call", "1001");
        let fb = RatingProfileKey::parse_relative("1002", &base).unwrap();
        assert_eq!(fb.to_string(), "*out:cgrates.org:call:1002");
    }

    #[test]
    fn test_active_at_selects_latest_not_after() {
        let key = RatingProfileKey::new("cgrates.org", "call", "1001");
        let profile = RatingProfile::new(
            &key,
            vec![activation(20, "RP_C"), activation(1, "RP_A"), activation(10, "RP_B")],
        );
        let at = |d| Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap();
        assert_eq!(profile.active_at(at(5)).unwrap().rating_plan_id, "RP_A");
        assert_eq!(profile.active_at(at(10)).unwrap().rating_plan_id, "RP_B");
        assert_eq!(profile.active_at(at(25)).unwrap().rating_plan_id, "RP_C");
        let before = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
        assert!(profile.active_at(before).is_none());
    }
}
