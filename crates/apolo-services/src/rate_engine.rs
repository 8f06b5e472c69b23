//! Rate engine
//!
//! Picks the binding of a rating plan that prices a dialed number at a
//! given moment, and prices a usage window against its rate.
//!
//! # Binding selection
//!
//! 1. Every destination referenced by the plan is matched against the
//!    number; only the destinations with the longest matching prefix are kept.
//! 2. Bindings to those destinations whose timing is valid at the call
//!    start are candidates.
//! 3. The highest weight wins; ties go to the binding declared first.
//!
//! A plan with no candidate yields `None` ("no rate"), which the resolver
//! treats as a reason to follow fallbacks. A zero-valued rate is a match.

use apolo_core::{
    models::{
        CallDescriptor, Destination, Increment, RIRate, RatingBinding, RatingPlan, TimeSpan,
        ANY_DESTINATION,
    },
    traits::RatingStore,
    AppResult,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Binding chosen to price a call
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedBinding {
    pub rating_plan_id: String,
    pub destination_id: String,
    pub prefix_len: usize,
    pub weight: f64,
    pub rate: RIRate,
}

/// Priced usage window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RatedWindow {
    pub connect_fee: Decimal,
    pub cost: Decimal,
    pub timespans: Vec<TimeSpan>,
}

/// Destination matching and slot pricing
pub struct RateEngine {
    store: Arc<dyn RatingStore>,
    rounding_decimals: u32,
}

impl RateEngine {
    /// `rounding_decimals` is the global precision of the final cost
    pub fn new(store: Arc<dyn RatingStore>, rounding_decimals: u32) -> Self {
        Self {
            store,
            rounding_decimals,
        }
    }

    async fn load_destination(&self, id: &str) -> AppResult<Option<Destination>> {
        if id == ANY_DESTINATION {
            return Ok(Some(Destination::new(ANY_DESTINATION, &[])));
        }
        match self.store.get_destination(id).await {
            Ok(dst) => Ok(Some(dst)),
            Err(e) if e.is_not_found() => {
                debug!("Destination {} referenced but not stored", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Select the binding of `plan` pricing `number` at `at`
    #[instrument(skip(self, plan), fields(plan = %plan.id))]
    pub async fn match_binding(
        &self,
        plan: &RatingPlan,
        number: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Option<MatchedBinding>> {
        let mut best_len: Option<usize> = None;
        let mut longest: Vec<String> = Vec::new();

        for dst_id in plan.destination_ids() {
            let Some(dst) = self.load_destination(dst_id).await? else {
                continue;
            };
            let Some(len) = dst.longest_match(number) else {
                continue;
            };
            match best_len {
                Some(best) if len < best => {}
                Some(best) if len == best => longest.push(dst.id),
                _ => {
                    best_len = Some(len);
                    longest = vec![dst.id];
                }
            }
        }

        let Some(prefix_len) = best_len else {
            debug!("No destination of plan {} matches {}", plan.id, number);
            return Ok(None);
        };

        let mut chosen: Option<&RatingBinding> = None;
        for binding in plan
            .bindings
            .iter()
            .filter(|b| longest.iter().any(|d| d == &b.destination_id))
        {
            let Some(timing) = plan.timing(&binding.timing_id) else {
                debug!("Timing {} missing in plan {}", binding.timing_id, plan.id);
                continue;
            };
            if !timing.is_active_at(at)? {
                trace!("Timing {} not active at {}", binding.timing_id, at);
                continue;
            }
            if chosen.map_or(true, |c| binding.weight > c.weight) {
                chosen = Some(binding);
            }
        }

        let Some(binding) = chosen else {
            debug!("No binding of plan {} valid at {} for {}", plan.id, at, number);
            return Ok(None);
        };
        let Some(rate) = plan.rating(&binding.rating_id) else {
            debug!("Rate {} missing in plan {}", binding.rating_id, plan.id);
            return Ok(None);
        };

        Ok(Some(MatchedBinding {
            rating_plan_id: plan.id.clone(),
            destination_id: binding.destination_id.clone(),
            prefix_len,
            weight: binding.weight,
            rate: rate.clone(),
        }))
    }

    /// Price the usage window of `cd` with the matched rate
    ///
    /// The connect fee is only charged when the window starts the call.
    pub fn price(&self, cd: &CallDescriptor, matched: &MatchedBinding) -> RatedWindow {
        let (window_start, window_end) = cd.usage_window();
        price_window(
            &matched.rate,
            window_start,
            window_end,
            self.rounding_decimals,
            |offset| cd.time_start + Duration::seconds((offset - window_start) as i64),
        )
        .with_span_details(matched)
    }
}

/// Price usage offsets `[start, end)` against a rate
///
/// `at` maps a usage offset to wall-clock time for the produced spans.
pub fn price_window(
    rate: &RIRate,
    start: u64,
    end: u64,
    rounding_decimals: u32,
    at: impl Fn(u64) -> DateTime<Utc>,
) -> RatedWindow {
    let method = rate.rounding_method;
    let connect_fee = if start == 0 {
        rate.connect_fee
    } else {
        Decimal::ZERO
    };

    let slots = rate.sorted_rates();
    let mut timespans = Vec::new();
    let mut slots_cost = Decimal::ZERO;

    for (i, slot) in slots.iter().enumerate() {
        // the first slot also covers usage before its own start
        let slot_start = if i == 0 { 0 } else { slot.group_interval_start };
        let slot_end = slots
            .get(i + 1)
            .map(|next| next.group_interval_start)
            .unwrap_or(u64::MAX);

        let from = start.max(slot_start);
        let to = end.min(slot_end);
        if to <= from {
            continue;
        }

        let increment = slot.increment();
        let count = method.round_whole(Decimal::from(to - from) / Decimal::from(increment));
        let increment_cost = slot.increment_cost();
        let cost = method.round(count * increment_cost, rate.rounding_decimals);
        slots_cost += cost;

        timespans.push(TimeSpan {
            time_start: at(from),
            time_end: at(to),
            duration_index: to,
            rating_plan_id: String::new(),
            rate_id: rate.id.clone(),
            matched_destination_id: String::new(),
            group_interval_start: slot.group_interval_start,
            increment: Increment {
                duration: increment,
                cost: increment_cost,
                compress_factor: count.to_u64().unwrap_or(0),
            },
            cost,
        });
    }

    RatedWindow {
        connect_fee,
        cost: capped(rate, connect_fee + slots_cost, rounding_decimals),
        timespans,
    }
}

/// Apply the rate's cost cap, then the global rounding
fn capped(rate: &RIRate, cost: Decimal, rounding_decimals: u32) -> Decimal {
    let mut cost = cost;
    if rate.max_cost > Decimal::ZERO && cost > rate.max_cost {
        debug!("Cost {} capped at {} by rate {}", cost, rate.max_cost, rate.id);
        cost = rate.max_cost;
    }
    rate.rounding_method.round(cost, rounding_decimals)
}

impl RatedWindow {
    /// Charge the connect fee on a window that starts mid-call
    ///
    /// Used when unit balances paid the head of the call. The cap of the rate
    /// still bounds the total.
    pub fn charge_connect_fee(&mut self, rate: &RIRate, rounding_decimals: u32) {
        self.connect_fee = rate.connect_fee;
        self.cost = capped(rate, self.cost + rate.connect_fee, rounding_decimals);
    }

    fn with_span_details(mut self, matched: &MatchedBinding) -> Self {
        for span in &mut self.timespans {
            span.rating_plan_id = matched.rating_plan_id.clone();
            span.matched_destination_id = matched.destination_id.clone();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_core::models::{RGRate, RoundingMethod, Timing};
    use apolo_store::InMemoryRatingStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn rate(id: &str, connect_fee: Decimal, method: RoundingMethod, slots: Vec<RGRate>) -> RIRate {
        RIRate {
            id: id.to_string(),
            connect_fee,
            rounding_method: method,
            rounding_decimals: 4,
            max_cost: Decimal::ZERO,
            rates: slots,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn price(rate: &RIRate, start: u64, end: u64) -> RatedWindow {
        price_window(rate, start, end, 5, |o| t0() + Duration::seconds(o as i64))
    }

    #[test]
    fn test_price_connect_fee_and_round_up() {
        // 0.60/min billed per 60s, 0.40 connect fee
        let r = rate(
            "RT_STD",
            dec!(0.4),
            RoundingMethod::Up,
            vec![RGRate::new(0, dec!(0.6), 60, 60)],
        );
        let w = price(&r, 0, 61);
        assert_eq!(w.connect_fee, dec!(0.4));
        assert_eq!(w.cost, dec!(1.6));
        assert_eq!(w.timespans.len(), 1);
        assert_eq!(w.timespans[0].increment.compress_factor, 2);
    }

    #[test]
    fn test_price_round_down() {
        let r = rate(
            "RT_DOWN",
            dec!(0),
            RoundingMethod::Down,
            vec![RGRate::new(0, dec!(0.6), 60, 60)],
        );
        assert_eq!(price(&r, 0, 119).cost, dec!(0.6));
    }

    #[test]
    fn test_price_tiered_slots() {
        // first minute 1.00 per 60s, then 0.01 per second
        let r = rate(
            "RT_TIER",
            dec!(0),
            RoundingMethod::Up,
            vec![RGRate::new(60, dec!(0.6), 1, 60), RGRate::new(0, dec!(1), 60, 60)],
        );
        let w = price(&r, 0, 90);
        assert_eq!(w.timespans.len(), 2);
        assert_eq!(w.timespans[0].group_interval_start, 0);
        assert_eq!(w.timespans[1].group_interval_start, 60);
        assert_eq!(w.cost, dec!(1.3));
    }

    #[test]
    fn test_connect_fee_only_at_call_start() {
        let r = rate(
            "RT_STD",
            dec!(0.4),
            RoundingMethod::Up,
            vec![RGRate::new(0, dec!(0.6), 60, 60)],
        );
        let tail = price(&r, 60, 120);
        assert_eq!(tail.connect_fee, dec!(0));
        assert_eq!(tail.cost, dec!(0.6));
    }

    #[test]
    fn test_zero_rate_is_free_not_missing() {
        let r = rate("RT_FREE", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(0), 1, 1)]);
        let w = price(&r, 0, 300);
        assert_eq!(w.cost, dec!(0));
        assert_eq!(w.timespans.len(), 1);
    }

    #[test]
    fn test_max_cost_cap() {
        let mut r = rate("RT_CAP", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(1), 1, 1)]);
        r.max_cost = dec!(10);
        assert_eq!(price(&r, 0, 600).cost, dec!(10));
    }

    #[test]
    fn test_mid_call_connect_fee_stays_under_cap() {
        let mut r = rate("RT_CAP", dec!(0.4), RoundingMethod::Up, vec![RGRate::new(0, dec!(1), 1, 1)]);
        r.max_cost = dec!(10);
        let mut tail = price(&r, 60, 600);
        assert_eq!(tail.cost, dec!(10));
        tail.charge_connect_fee(&r, 5);
        assert_eq!(tail.connect_fee, dec!(0.4));
        assert_eq!(tail.cost, dec!(10));

        let mut short = price(&r, 60, 65);
        short.charge_connect_fee(&r, 5);
        assert_eq!(short.cost, dec!(5.4));
    }

    #[tokio::test]
    async fn test_match_binding_longest_prefix_then_weight() {
        let store = Arc::new(InMemoryRatingStore::new());
        store.set_destination(&Destination::new("DST_PE", &["51"])).await.unwrap();
        store.set_destination(&Destination::new("DST_PE_MOB", &["519"])).await.unwrap();

        let std = rate("RT_STD", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(1), 60, 60)]);
        let mob = rate("RT_MOB", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(2), 60, 60)]);
        let promo = rate("RT_PROMO", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(0), 60, 60)]);
        let plan = RatingPlan::new("RP_PE")
            .with_binding("DST_PE", Timing::any(), std, 10.0)
            .with_binding("DST_PE_MOB", Timing::any(), mob, 10.0)
            .with_binding("DST_PE_MOB", Timing::any(), promo, 20.0);

        let engine = RateEngine::new(store, 5);
        let m = engine.match_binding(&plan, "51987", t0()).await.unwrap().unwrap();
        assert_eq!(m.destination_id, "DST_PE_MOB");
        assert_eq!(m.rate.id, "RT_PROMO");
        assert_eq!(m.prefix_len, 3);

        let m = engine.match_binding(&plan, "+5112", t0()).await.unwrap().unwrap();
        assert_eq!(m.rate.id, "RT_STD");

        assert!(engine.match_binding(&plan, "1212", t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_match_binding_respects_timing() {
        let store = Arc::new(InMemoryRatingStore::new());
        store.set_destination(&Destination::new("DST_US", &["1"])).await.unwrap();
        let peak = Timing {
            id: "PEAK".into(),
            start_time: "08:00:00".into(),
            end_time: "20:00:00".into(),
            ..Default::default()
        };
        let off = Timing {
            id: "OFFPEAK".into(),
            start_time: "20:00:00".into(),
            ..Default::default()
        };
        let plan = RatingPlan::new("RP_US")
            .with_binding(
                "DST_US",
                peak,
                rate("RT_PEAK", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(1), 60, 60)]),
                10.0,
            )
            .with_binding(
                "DST_US",
                off,
                rate("RT_OFF", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(0.5), 60, 60)]),
                10.0,
            );
        let engine = RateEngine::new(store, 5);

        let m = engine.match_binding(&plan, "1212", t0()).await.unwrap().unwrap();
        assert_eq!(m.rate.id, "RT_PEAK");
        let night = Utc.with_ymd_and_hms(2024, 3, 4, 21, 0, 0).unwrap();
        let m = engine.match_binding(&plan, "1212", night).await.unwrap().unwrap();
        assert_eq!(m.rate.id, "RT_OFF");
        let early = Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap();
        assert!(engine.match_binding(&plan, "1212", early).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_any_destination_matches_without_store_entry() {
        let store = Arc::new(InMemoryRatingStore::new());
        let plan = RatingPlan::new("RP_ANY").with_binding(
            ANY_DESTINATION,
            Timing::any(),
            rate("RT_ANY", dec!(0), RoundingMethod::Up, vec![RGRate::new(0, dec!(1), 1, 60)]),
            0.0,
        );
        let engine = RateEngine::new(store, 5);
        let m = engine.match_binding(&plan, "999", t0()).await.unwrap().unwrap();
        assert_eq!(m.prefix_len, 0);
    }
}
