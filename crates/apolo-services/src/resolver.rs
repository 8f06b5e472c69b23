//! Rating profile resolver
//!
//! Finds the rating plan and binding pricing a call descriptor. The profile
//! of the call's subject is consulted first, using the activation in force
//! at the call start; when its plan has no rate for the destination the
//! activation's fallback keys are resolved in order. When that whole chain
//! yields nothing (missing profile, no activation yet, no matching rate) the
//! `*any` subject of the same tenant and category is tried.
//!
//! Every profile key entered is recorded in a visited set, so fallback
//! chains that loop back end in `NotFound` instead of recursing forever.
//! The chain length is bounded by `max_fallback_depth`.

use crate::rate_engine::{MatchedBinding, RateEngine};
use apolo_core::{
    config::GeneralConfig,
    models::{CallDescriptor, RatingProfileKey, ANY_SUBJECT},
    traits::RatingStore,
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRating {
    /// Profile whose activation priced the call
    pub rated_profile: String,
    pub binding: MatchedBinding,
}

/// Resolver over a rating store
pub struct RatingResolver {
    store: Arc<dyn RatingStore>,
    engine: Arc<RateEngine>,
    max_depth: usize,
    any_subject_fallback: bool,
}

struct Lookup<'a> {
    number: &'a str,
    at: DateTime<Utc>,
    visited: HashSet<String>,
}

impl RatingResolver {
    pub fn new(store: Arc<dyn RatingStore>, engine: Arc<RateEngine>, general: &GeneralConfig) -> Self {
        Self {
            store,
            engine,
            max_depth: general.max_fallback_depth,
            any_subject_fallback: general.any_subject_fallback,
        }
    }

    /// Resolve the rating of a prepared descriptor
    #[instrument(skip(self, cd), fields(subject = %cd.subject, destination = %cd.destination))]
    pub async fn resolve(&self, cd: &CallDescriptor) -> AppResult<ResolvedRating> {
        let key = cd.profile_key();
        let mut lookup = Lookup {
            number: &cd.destination,
            at: cd.time_start,
            visited: HashSet::new(),
        };

        let mut resolved = self.resolve_key(key.clone(), 0, &mut lookup).await?;
        if resolved.is_none() && self.any_subject_fallback && key.subject != ANY_SUBJECT {
            debug!("No rating through {}, trying {} subject", key, ANY_SUBJECT);
            resolved = self
                .resolve_key(key.with_subject(ANY_SUBJECT), 0, &mut lookup)
                .await?;
        }

        match resolved {
            Some(resolved) => Ok(resolved),
            None => {
                warn!(
                    "No rating for {} to {} at {} (visited {:?})",
                    key, cd.destination, cd.time_start, lookup.visited
                );
                Err(AppError::NotFound(format!(
                    "rating for {} to {}",
                    key, cd.destination
                )))
            }
        }
    }

    fn resolve_key<'a>(
        &'a self,
        key: RatingProfileKey,
        depth: usize,
        lookup: &'a mut Lookup<'_>,
    ) -> BoxFuture<'a, AppResult<Option<ResolvedRating>>> {
        async move {
            let id = key.to_string();
            if !lookup.visited.insert(id.clone()) {
                warn!("Rating fallback cycle detected at {}", id);
                return Ok(None);
            }

            let profile = match self.store.get_rating_profile(&id).await {
                Ok(profile) => profile,
                Err(e) if e.is_not_found() => {
                    debug!("No profile {}", id);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            let Some(activation) = profile.active_at(lookup.at) else {
                debug!("Profile {} has no activation before {}", id, lookup.at);
                return Ok(None);
            };

            match self.store.get_rating_plan(&activation.rating_plan_id).await {
                Ok(plan) => {
                    if let Some(binding) = self
                        .engine
                        .match_binding(&plan, lookup.number, lookup.at)
                        .await?
                    {
                        return Ok(Some(ResolvedRating {
                            rated_profile: id,
                            binding,
                        }));
                    }
                }
                Err(e) if e.is_not_found() => {
                    warn!("Profile {} activates missing plan {}", id, activation.rating_plan_id);
                }
                Err(e) => return Err(e),
            }

            if depth >= self.max_depth {
                if !activation.fallback_keys.is_empty() {
                    warn!("Fallback depth {} reached at {}", self.max_depth, id);
                }
                return Ok(None);
            }

            for raw in &activation.fallback_keys {
                let next = RatingProfileKey::parse_relative(raw, &key)?;
                debug!("Rating {} falls back to {}", id, next);
                if let Some(resolved) = self.resolve_key(next, depth + 1, lookup).await? {
                    return Ok(Some(resolved));
                }
            }
            Ok(None)
        }
        .boxed()
    }
}
