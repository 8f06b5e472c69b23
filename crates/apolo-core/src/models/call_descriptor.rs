//! Call descriptor model
//!
//! The immutable input of rating: who calls, where, and for which window.

use super::account::account_key;
use super::balance::balance_types;
use super::rating_profile::RatingProfileKey;
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

fn default_tor() -> String {
    balance_types::VOICE.to_string()
}

/// Call descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallDescriptor {
    #[serde(default)]
    pub tenant: String,

    #[serde(default)]
    pub category: String,

    /// Rating subject; defaults to the account
    #[serde(default)]
    pub subject: String,

    /// Billed account; defaults to the subject
    #[serde(default)]
    pub account: String,

    pub destination: String,

    pub time_start: DateTime<Utc>,

    pub time_end: DateTime<Utc>,

    /// Usage offset of `time_end` from the start of the whole call, in seconds
    /// (0 = this descriptor covers the call from its beginning)
    #[serde(default)]
    pub duration_index: u64,

    /// Type of record: the unit balance type consumed before money
    #[serde(default = "default_tor")]
    pub tor: String,
}

impl CallDescriptor {
    pub fn new(
        tenant: &str,
        account: &str,
        destination: &str,
        time_start: DateTime<Utc>,
        usage_secs: i64,
    ) -> Self {
        Self {
            tenant: tenant.to_string(),
            category: String::new(),
            subject: account.to_string(),
            account: account.to_string(),
            destination: destination.to_string(),
            time_start,
            time_end: time_start + Duration::seconds(usage_secs),
            duration_index: 0,
            tor: default_tor(),
        }
    }

    /// Fill defaults and reject descriptors that cannot be rated
    ///
    /// Runs before any storage or lock access.
    pub fn prepare(mut self, default_tenant: &str, default_category: &str) -> AppResult<Self> {
        let mut missing = Vec::new();
        if self.subject.is_empty() && self.account.is_empty() {
            missing.push("Account".to_string());
        }
        if self.destination.trim().is_empty() {
            missing.push("Destination".to_string());
        }
        if !missing.is_empty() {
            return Err(AppError::MandatoryFieldMissing(missing));
        }
        if self.time_end < self.time_start {
            return Err(AppError::InvalidInput(
                "time_end precedes time_start".to_string(),
            ));
        }

        if self.tenant.is_empty() {
            self.tenant = default_tenant.to_string();
        }
        if self.category.is_empty() {
            self.category = default_category.to_string();
        }
        if self.subject.is_empty() {
            self.subject = self.account.clone();
        }
        if self.account.is_empty() {
            self.account = self.subject.clone();
        }
        if self.tor.is_empty() {
            self.tor = default_tor();
        }
        Ok(self)
    }

    /// Whole seconds between start and end
    pub fn usage_secs(&self) -> u64 {
        (self.time_end - self.time_start).num_seconds().max(0) as u64
    }

    /// Usage offsets `[start, end)` of this descriptor within the whole call
    pub fn usage_window(&self) -> (u64, u64) {
        let usage = self.usage_secs();
        let end = if self.duration_index > 0 {
            self.duration_index.max(usage)
        } else {
            usage
        };
        (end - usage, end)
    }

    /// Copy covering only the last `remaining` seconds of this window
    pub fn tail(&self, remaining: u64) -> Self {
        let mut tail = self.clone();
        let (_, end) = self.usage_window();
        tail.time_start = self.time_end - Duration::seconds(remaining as i64);
        tail.duration_index = end;
        tail
    }

    /// Copy covering the first `usage` seconds of this window
    pub fn truncated(&self, usage: u64) -> Self {
        let mut head = self.clone();
        let (start, _) = self.usage_window();
        head.time_end = self.time_start + Duration::seconds(usage as i64);
        head.duration_index = if self.duration_index > 0 { start + usage } else { 0 };
        head
    }

    pub fn profile_key(&self) -> RatingProfileKey {
        RatingProfileKey::new(&self.tenant, &self.category, &self.subject)
    }

    pub fn account_key(&self) -> String {
        account_key(&self.tenant, &self.account)
    }
}
