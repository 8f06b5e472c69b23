//! Action plan scheduler
//!
//! Holds a time-ordered queue of the next fire instant of every action plan
//! binding and a background task that sleeps until the head of the queue
//! is due. A due binding runs its actions group on every account of the
//! plan, each account in its own guarded transaction.
//!
//! One-shot bindings (`*asap`, `+<duration>`) are removed from their plan
//! once fired; recurring ones are put back with their next fire instant.
//! [`Scheduler::reload`] rebuilds the queue from the store and swaps it in
//! whole, so readers never see a half-built queue.

use crate::accounts::AccountManager;
use crate::actions::ActionExecutor;
use crate::commands::ScheduledActionsFilter;
use apolo_core::{
    config::SchedulerConfig,
    models::{ActionPlan, ActionTiming, Timing},
    traits::RatingStore,
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    Stopped,
    Running,
}

/// Public view of one queued binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub next_run_time: DateTime<Utc>,
    pub action_plan_id: String,
    pub actions_id: String,
    pub binding_uuid: String,
    pub timing_id: String,
    pub weight: f64,
    /// `tenant:account` keys bound to the plan when the queue was built
    pub accounts: Vec<String>,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    next: DateTime<Utc>,
    plan: Arc<ActionPlan>,
    binding: ActionTiming,
    timing: Timing,
    one_shot: bool,
}

impl QueueEntry {
    fn view(&self) -> ScheduledAction {
        ScheduledAction {
            next_run_time: self.next,
            action_plan_id: self.plan.id.clone(),
            actions_id: self.binding.actions_id.clone(),
            binding_uuid: self.binding.uuid.clone(),
            timing_id: self.timing.id.clone(),
            weight: self.binding.weight,
            accounts: self.plan.account_ids.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Queue {
    entries: Vec<QueueEntry>,
    plans: usize,
    loaded_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl Queue {
    fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            a.next
                .cmp(&b.next)
                .then_with(|| b.binding.weight.total_cmp(&a.binding.weight))
        });
    }
}

/// What to do with an entry after a fire
enum FireOutcome {
    Done,
    /// The binding can never run again as stored
    Drop,
}

struct Runner {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    rating: Arc<dyn RatingStore>,
    accounts: Arc<AccountManager>,
    executor: Arc<ActionExecutor>,
    config: SchedulerConfig,
    queue: Mutex<Queue>,
    wake: Notify,
    runner: tokio::sync::Mutex<Option<Runner>>,
    firing: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(
        rating: Arc<dyn RatingStore>,
        accounts: Arc<AccountManager>,
        executor: Arc<ActionExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            rating,
            accounts,
            executor,
            config,
            queue: Mutex::new(Queue::default()),
            wake: Notify::new(),
            runner: tokio::sync::Mutex::new(None),
            firing: tokio::sync::Mutex::new(()),
        }
    }

    /// Timing of a binding: inline, predefined, then stored
    async fn resolve_timing(&self, binding: &ActionTiming, loaded_at: DateTime<Utc>) -> AppResult<Timing> {
        if let Some(timing) = &binding.timing {
            return Ok(timing.clone());
        }
        if let Some(timing) = Timing::predefined(&binding.timing_id, loaded_at) {
            return Ok(timing);
        }
        self.rating.get_timing(&binding.timing_id).await
    }

    async fn build_queue(&self, now: DateTime<Utc>) -> AppResult<Queue> {
        let plans = self.rating.get_action_plans().await?;
        let mut queue = Queue {
            loaded_at: Some(now),
            ..Default::default()
        };

        for plan in plans {
            if plan.account_ids.is_empty() {
                debug!("Action plan {} has no accounts, not scheduled", plan.id);
                continue;
            }
            let plan = Arc::new(plan);
            queue.plans += 1;
            for binding in &plan.bindings {
                let timing = match self.resolve_timing(binding, now).await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Plan {} binding {}: timing {}: {}", plan.id, binding.uuid, binding.timing_id, e);
                        continue;
                    }
                };
                let spec = match timing.start_spec() {
                    Ok(spec) => spec,
                    Err(e) => {
                        warn!("Plan {} binding {}: {}", plan.id, binding.uuid, e);
                        continue;
                    }
                };
                match timing.next_fire(now, now, self.config.lookahead_days) {
                    Ok(Some(next)) => queue.entries.push(QueueEntry {
                        next,
                        plan: Arc::clone(&plan),
                        binding: binding.clone(),
                        timing,
                        one_shot: spec.is_one_shot(),
                    }),
                    Ok(None) => debug!("Plan {} binding {} never fires again", plan.id, binding.uuid),
                    Err(e) => warn!("Plan {} binding {}: {}", plan.id, binding.uuid, e),
                }
            }
        }
        queue.sort();
        Ok(queue)
    }

    /// Rebuild the queue from the store and swap it in
    ///
    /// On failure the current queue is kept. Returns the number of queued
    /// bindings.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> AppResult<usize> {
        let fresh = self.build_queue(Utc::now()).await?;
        let (count, plans) = (fresh.entries.len(), fresh.plans);
        {
            let mut queue = self.queue.lock();
            let generation = queue.generation + 1;
            *queue = Queue { generation, ..fresh };
        }
        self.wake.notify_one();
        info!("Scheduler loaded {} bindings from {} action plans", count, plans);
        Ok(count)
    }

    /// Fire every binding due at `now`; returns how many fired
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        let _firing = self.firing.lock().await;
        let (due, generation) = {
            let mut queue = self.queue.lock();
            let split = queue.entries.partition_point(|e| e.next <= now);
            let due: Vec<QueueEntry> = queue.entries.drain(..split).collect();
            (due, queue.generation)
        };
        if due.is_empty() {
            return 0;
        }

        let mut requeue = Vec::new();
        let fired = due.len();
        for mut entry in due {
            let outcome = self.fire(&entry, now).await;
            if matches!(outcome, FireOutcome::Drop) {
                continue;
            }
            if entry.one_shot {
                if let Err(e) = self
                    .rating
                    .remove_action_timing(&entry.plan.id, &entry.binding.uuid)
                    .await
                {
                    warn!("Could not remove fired binding {} of {}: {}", entry.binding.uuid, entry.plan.id, e);
                }
                continue;
            }

            let after = (entry.next + chrono::Duration::seconds(1)).max(now);
            let loaded_at = self.queue.lock().loaded_at.unwrap_or(now);
            match entry.timing.next_fire(after, loaded_at, self.config.lookahead_days) {
                Ok(Some(next)) => {
                    entry.next = next;
                    requeue.push(entry);
                }
                Ok(None) => debug!("Binding {} of {} has no further fire", entry.binding.uuid, entry.plan.id),
                Err(e) => warn!("Binding {} of {}: {}", entry.binding.uuid, entry.plan.id, e),
            }
        }

        let mut queue = self.queue.lock();
        if queue.generation == generation {
            queue.entries.extend(requeue);
            queue.sort();
        } else {
            debug!("Queue reloaded while firing, dropping {} reschedules", requeue.len());
        }
        fired
    }

    /// Run one binding against every account of its plan
    async fn fire(&self, entry: &QueueEntry, now: DateTime<Utc>) -> FireOutcome {
        let plan_id = &entry.plan.id;
        // accounts may have joined or left since the queue was built
        let plan = match self.rating.get_action_plan(plan_id).await {
            Ok(plan) => plan,
            Err(e) if e.is_not_found() => {
                info!("Action plan {} removed, dropping binding {}", plan_id, entry.binding.uuid);
                return FireOutcome::Drop;
            }
            Err(e) => {
                error!("Loading action plan {} failed: {}", plan_id, e);
                return FireOutcome::Done;
            }
        };
        if plan.binding(&entry.binding.uuid).is_none() {
            info!("Binding {} left plan {}, dropping", entry.binding.uuid, plan_id);
            return FireOutcome::Drop;
        }

        let actions = match self.executor.load(&entry.binding.actions_id).await {
            Ok(actions) => actions,
            Err(e) => {
                error!("Plan {}: actions {}: {}", plan_id, entry.binding.actions_id, e);
                return if e.is_not_found() { FireOutcome::Drop } else { FireOutcome::Done };
            }
        };
        if let Err(e) = self.executor.registry().validate(&actions) {
            error!("Plan {}: actions {} not runnable, dropping: {}", plan_id, entry.binding.actions_id, e);
            return FireOutcome::Drop;
        }

        let source = format!("scheduler:{}", plan_id);
        let mut ok = 0usize;
        for key in &plan.account_ids {
            let Some((tenant, account)) = key.split_once(':') else {
                warn!("Plan {} holds malformed account key {}", plan_id, key);
                continue;
            };
            match self
                .accounts
                .apply_actions(tenant, account, &actions, &source, true)
                .await
            {
                Ok(_) => ok += 1,
                Err(e) => error!("Plan {}: actions {} on {} failed: {}", plan_id, entry.binding.actions_id, key, e),
            }
        }
        info!(
            "Fired {} of plan {} scheduled at {} on {}/{} accounts (now {})",
            entry.binding.actions_id,
            plan_id,
            entry.next,
            ok,
            plan.account_ids.len(),
            now
        );
        FireOutcome::Done
    }

    /// Queued bindings matching `filter`, ordered by fire time then weight
    pub fn get_scheduled_actions(&self, filter: &ScheduledActionsFilter) -> Vec<ScheduledAction> {
        let queue = self.queue.lock();
        queue
            .entries
            .iter()
            .filter(|e| {
                e.plan
                    .targets(filter.tenant.as_deref(), filter.account.as_deref())
            })
            .filter(|e| filter.plan_id.as_ref().map_or(true, |id| *id == e.plan.id))
            .filter(|e| filter.time_start.map_or(true, |t| e.next >= t))
            .filter(|e| filter.time_end.map_or(true, |t| e.next <= t))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(QueueEntry::view)
            .collect()
    }

    /// Status, loaded plans and queued bindings
    pub async fn status(&self) -> (SchedulerStatus, usize, usize) {
        let status = if self.runner.lock().await.is_some() {
            SchedulerStatus::Running
        } else {
            SchedulerStatus::Stopped
        };
        let queue = self.queue.lock();
        (status, queue.plans, queue.entries.len())
    }

    fn until_next(&self, now: DateTime<Utc>) -> Duration {
        let tick = Duration::from_secs(self.config.tick_secs.max(1));
        let queue = self.queue.lock();
        match queue.entries.first() {
            Some(head) => (head.next - now).to_std().unwrap_or(Duration::ZERO).min(tick),
            None => tick,
        }
    }

    /// Load the queue and start the background task
    ///
    /// Starting a running scheduler does nothing.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            debug!("Scheduler already running");
            return Ok(());
        }
        self.reload().await?;

        let (stop, stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop(stop_rx).await });
        *runner = Some(Runner { stop, handle });
        info!("Scheduler started");
        Ok(())
    }

    /// Stop the background task and wait for it to finish its current fire
    pub async fn stop(&self) -> AppResult<()> {
        let Some(Runner { stop, handle }) = self.runner.lock().await.take() else {
            return Ok(());
        };
        let _ = stop.send(true);
        handle
            .await
            .map_err(|e| AppError::Server(format!("scheduler task failed: {}", e)))?;
        info!("Scheduler stopped");
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            let wait = self.until_next(Utc::now());
            tokio::select! {
                _ = stop.changed() => break,
                _ = self.wake.notified() => continue,
                _ = tokio::time::sleep(wait) => {
                    let fired = self.run_due(Utc::now()).await;
                    if fired > 0 {
                        debug!("Scheduler pass fired {} bindings", fired);
                    }
                }
            }
        }
    }
}
