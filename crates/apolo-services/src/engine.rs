//! Engine wiring and command dispatch
//!
//! [`Engine`] owns one instance of every service, built from the store,
//! cache and outbound collaborators handed in at startup. There is no
//! global state: tests build as many independent engines as they like.

use crate::accounts::AccountManager;
use crate::actions::{ActionExecutor, ActionRegistry};
use crate::admin::RatingAdmin;
use crate::calculator::CallCostCalculator;
use crate::commands::{Command, Reply};
use crate::guardian::Guardian;
use crate::outbound::OutboundNotifier;
use crate::rate_engine::RateEngine;
use crate::resolver::RatingResolver;
use crate::scheduler::Scheduler;
use crate::triggers::TriggerEvaluator;
use crate::writer::AccountWriter;
use apolo_core::{
    config::AppConfig,
    traits::{AccountStore, CacheNotifier, RatingStore},
    AppResult,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use validator::Validate;

/// External collaborators of an engine
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountStore>,
    pub rating: Arc<dyn RatingStore>,
    pub cache: Arc<dyn CacheNotifier>,
    pub outbound: Arc<dyn OutboundNotifier>,
}

pub struct Engine {
    pub guardian: Arc<Guardian>,
    pub calculator: Arc<CallCostCalculator>,
    pub accounts: Arc<AccountManager>,
    pub admin: Arc<RatingAdmin>,
    pub scheduler: Arc<Scheduler>,
    pub executor: Arc<ActionExecutor>,
}

impl Engine {
    pub fn new(deps: Collaborators, registry: ActionRegistry, config: &AppConfig) -> Self {
        let general = config.general.clone();
        let guardian = Arc::new(Guardian::new());

        let executor = Arc::new(ActionExecutor::new(Arc::new(registry), Arc::clone(&deps.rating)));
        let triggers = Arc::new(TriggerEvaluator::new(Arc::clone(&executor)));
        let writer = Arc::new(AccountWriter::new(
            Arc::clone(&deps.accounts),
            Arc::clone(&guardian),
            triggers,
            Arc::clone(&deps.cache),
            Arc::clone(&deps.outbound),
            general.locking_timeout(),
        ));

        let rate_engine = Arc::new(RateEngine::new(Arc::clone(&deps.rating), general.rounding_decimals));
        let resolver = Arc::new(RatingResolver::new(
            Arc::clone(&deps.rating),
            Arc::clone(&rate_engine),
            &general,
        ));
        let calculator = Arc::new(CallCostCalculator::new(
            resolver,
            rate_engine,
            Arc::clone(&deps.rating),
            Arc::clone(&writer),
            general.clone(),
        ));

        let accounts = Arc::new(AccountManager::new(
            writer,
            Arc::clone(&executor),
            Arc::clone(&deps.rating),
            Arc::clone(&deps.cache),
            Arc::clone(&guardian),
            general.clone(),
        ));
        let admin = Arc::new(RatingAdmin::new(
            Arc::clone(&deps.rating),
            Arc::clone(&deps.cache),
            Arc::clone(&guardian),
            general.locking_timeout(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            deps.rating,
            Arc::clone(&accounts),
            Arc::clone(&executor),
            config.scheduler.clone(),
        ));

        Self {
            guardian,
            calculator,
            accounts,
            admin,
            scheduler,
            executor,
        }
    }

    async fn reload_scheduler_if(&self, requested: bool) {
        if !requested {
            return;
        }
        if let Err(e) = self.scheduler.reload().await {
            warn!("Scheduler reload after write failed: {}", e);
        }
    }

    /// Run one command
    #[instrument(skip(self, command), fields(method = command.name()))]
    pub async fn dispatch(&self, command: Command) -> AppResult<Reply> {
        debug!("Dispatching {}", command.name());
        let reply = match command {
            Command::GetCost(cd) => Reply::CallCost(Box::new(self.calculator.get_cost(cd).await?)),
            Command::Debit(cd) => Reply::CallCost(Box::new(self.calculator.debit(cd).await?)),
            Command::MaxDebit(cd) => Reply::MaxDebit(self.calculator.max_debit(cd).await?),
            Command::RefundIncrements(cc) => Reply::Refund(self.calculator.refund(cc).await?),
            Command::SetAccount(args) => {
                let requested = args.reload_scheduler;
                let update = self.accounts.set_account(args).await?;
                // a plan without accounts was left out of the last queue build
                self.reload_scheduler_if(requested || !update.activated_plans.is_empty())
                    .await;
                Reply::Account(Box::new(update.account))
            }
            Command::GetAccount(r) => {
                r.validate()?;
                Reply::Account(Box::new(self.accounts.get_account(&r.tenant, &r.account).await?))
            }
            Command::RemoveAccount(r) => {
                r.validate()?;
                Reply::Removed {
                    removed: self.accounts.remove_account(&r.tenant, &r.account).await?,
                }
            }
            Command::AddBalance(args) => Reply::Account(Box::new(self.accounts.add_balance(args).await?)),
            Command::ExecuteAction(args) => {
                Reply::Account(Box::new(self.accounts.execute_action(args).await?))
            }
            Command::SetDestination(dst) => {
                self.admin.set_destination(dst).await?;
                Reply::ok()
            }
            Command::SetRatingPlan(plan) => {
                self.admin.set_rating_plan(plan).await?;
                Reply::ok()
            }
            Command::SetRatingProfile(args) => {
                self.admin.set_rating_profile(args).await?;
                Reply::ok()
            }
            Command::SetActions(args) => {
                self.admin.set_actions(args).await?;
                Reply::ok()
            }
            Command::SetActionTriggers(args) => {
                self.admin.set_action_triggers(args).await?;
                Reply::ok()
            }
            Command::SetActionPlan(args) => {
                let reload = args.reload_scheduler;
                self.admin.set_action_plan(args).await?;
                self.reload_scheduler_if(reload).await;
                Reply::ok()
            }
            Command::RemoveActionPlan(args) => {
                self.admin.remove_action_plan(&args.id).await?;
                self.reload_scheduler_if(args.reload_scheduler).await;
                Reply::ok()
            }
            Command::SchedulerReload => {
                self.scheduler.reload().await?;
                Reply::ok()
            }
            Command::SchedulerStatus => {
                let (status, plans, pending) = self.scheduler.status().await;
                Reply::Status { status, plans, pending }
            }
            Command::GetScheduledActions(filter) => {
                Reply::Scheduled(self.scheduler.get_scheduled_actions(&filter))
            }
        };
        Ok(reply)
    }
}
