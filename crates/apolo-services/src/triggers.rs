//! Action-trigger evaluator
//!
//! Runs inline after every account mutation, under the account lock. Each
//! ready trigger whose threshold holds runs its actions group on a copy of
//! the account; the copy replaces the account only when the whole group
//! succeeds. A failing trigger is logged and skipped, the remaining ones
//! are still evaluated, and the caller's operation is not failed.
//!
//! Balance thresholds only look at balances touched by the mutation being
//! evaluated, except `*balance_expired` which scans every matching balance.

use crate::actions::{ActionContext, ActionExecutor};
use apolo_core::{
    models::{Account, ActionTrigger, ThresholdType},
    AppError, AppResult,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one evaluation pass
#[derive(Debug, Default)]
pub struct TriggerReport {
    /// `group:unique_id` of every trigger that fired
    pub fired: Vec<String>,
    pub failures: Vec<(String, AppError)>,
}

pub struct TriggerEvaluator {
    executor: Arc<ActionExecutor>,
}

fn trigger_label(t: &ActionTrigger) -> String {
    format!("{}:{}", t.id, t.unique_id)
}

/// Whether the trigger's condition holds on the current account state
fn condition_holds(trigger: &ActionTrigger, account: &Account, ctx: &ActionContext) -> bool {
    if let Some(counter_type) = trigger.threshold_type.counter_type() {
        let value = account.counter(counter_type, &trigger.balance_type);
        return trigger.threshold_type.crossed(value, trigger.threshold_value);
    }

    let chain = account.balances(&trigger.balance_type);
    match trigger.threshold_type {
        ThresholdType::BalanceExpired => chain
            .iter()
            .any(|b| trigger.balance.matches(b) && b.is_expired(ctx.now)),
        _ => chain.iter().any(|b| {
            b.dirty
                && b.is_active(ctx.now)
                && trigger.balance.matches(b)
                && trigger
                    .threshold_type
                    .crossed(b.value, trigger.threshold_value)
        }),
    }
}

impl TriggerEvaluator {
    pub fn new(executor: Arc<ActionExecutor>) -> Self {
        Self { executor }
    }

    async fn fire(
        &self,
        ctx: &ActionContext,
        account: &Account,
        trigger: &ActionTrigger,
    ) -> AppResult<(Account, ActionContext)> {
        let actions = self.executor.load(&trigger.actions_id).await?;
        let mut working = account.clone();
        let mut trigger_ctx =
            ActionContext::new(ctx.now, format!("trigger:{}", trigger_label(trigger)));
        self.executor
            .run(&mut trigger_ctx, &mut working, &actions)
            .await?;
        Ok((working, trigger_ctx))
    }

    /// Evaluate every trigger of `account`, firing those whose condition holds
    ///
    /// Ends by clearing dirty marks and purging expired balances.
    pub async fn evaluate(&self, ctx: &mut ActionContext, account: &mut Account) -> TriggerReport {
        let mut report = TriggerReport::default();

        let mut order: Vec<usize> = (0..account.action_triggers.len()).collect();
        order.sort_by(|&a, &b| {
            account.action_triggers[b]
                .weight
                .total_cmp(&account.action_triggers[a].weight)
        });

        for idx in order {
            let trigger = account.action_triggers[idx].clone();
            if !trigger.is_ready(ctx.now) || !condition_holds(&trigger, account, ctx) {
                continue;
            }

            let label = trigger_label(&trigger);
            match self.fire(ctx, account, &trigger).await {
                Ok((mut working, trigger_ctx)) => {
                    if let Some(t) = working
                        .action_triggers
                        .iter_mut()
                        .find(|t| t.id == trigger.id && t.unique_id == trigger.unique_id)
                    {
                        t.mark_fired(ctx.now);
                    }
                    *account = working;
                    ctx.outbox.extend(trigger_ctx.outbox);
                    info!(
                        account = %account.key(),
                        "Trigger {} ({} {}) fired {}",
                        label, trigger.threshold_type, trigger.threshold_value, trigger.actions_id
                    );
                    report.fired.push(label);
                }
                Err(e) => {
                    error!(account = %account.key(), "Trigger {} failed: {}", label, e);
                    report.failures.push((label, e));
                }
            }
        }

        account.clear_dirty();
        account.clean_expired(ctx.now);
        debug!(
            "Trigger pass on {}: {} fired, {} failed",
            account.key(),
            report.fired.len(),
            report.failures.len()
        );
        report
    }
}
