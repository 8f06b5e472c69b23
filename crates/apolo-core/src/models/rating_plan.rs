//! Rating plan model
//!
//! A rating plan binds destinations to rates under timing constraints.
//! Each binding carries a weight used to break ties between bindings that
//! match the same destination at the same moment.

use super::rate::RIRate;
use super::timing::{timing_ids, Timing};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One destination/timing/rate binding of a rating plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingBinding {
    pub destination_id: String,
    pub rating_id: String,
    pub timing_id: String,
    #[serde(default)]
    pub weight: f64,
}

/// Rating plan entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RatingPlan {
    pub id: String,

    /// Timings referenced by the bindings, by ID
    #[serde(default)]
    pub timings: BTreeMap<String, Timing>,

    /// Rates referenced by the bindings, by ID
    #[serde(default)]
    pub ratings: BTreeMap<String, RIRate>,

    #[serde(default)]
    pub bindings: Vec<RatingBinding>,
}

impl RatingPlan {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Add a rate and a binding to it (builder style, used by loaders and tests)
    pub fn with_binding(
        mut self,
        destination_id: &str,
        timing: Timing,
        rate: RIRate,
        weight: f64,
    ) -> Self {
        self.bindings.push(RatingBinding {
            destination_id: destination_id.to_string(),
            rating_id: rate.id.clone(),
            timing_id: timing.id.clone(),
            weight,
        });
        self.timings.insert(timing.id.clone(), timing);
        self.ratings.insert(rate.id.clone(), rate);
        self
    }

    /// Resolve a binding's timing; `*any` needs no declaration
    pub fn timing(&self, id: &str) -> Option<Timing> {
        self.timings
            .get(id)
            .cloned()
            .or_else(|| (id == timing_ids::ANY).then(Timing::any))
    }

    pub fn rating(&self, id: &str) -> Option<&RIRate> {
        self.ratings.get(id)
    }

    /// Distinct destination IDs referenced by the bindings
    pub fn destination_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .bindings
            .iter()
            .map(|b| b.destination_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
