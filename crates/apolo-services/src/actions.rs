//! Action registry and executor
//!
//! Every action identifier (`*topup`, `*log`, `*http_post`, ...) maps to an
//! [`ActionHandler`] registered at startup. Handlers mutate the working copy
//! of an account handed to them; persisting it is the caller's job, so an
//! actions group either commits as a whole or not at all.

use crate::outbound::Notification;
use apolo_core::{
    models::{
        action_ids, balance_types, sort_actions, Account, Action, ActionTrigger, Balance,
        BalanceFilter, DEFAULT_BALANCE_ID,
    },
    traits::RatingStore,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Per-run state shared by the handlers of one actions group
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub now: DateTime<Utc>,
    /// Who asked for the run: `api`, `scheduler:<plan>`, `trigger:<id>`
    pub source: String,
    /// Notifications to send once the account is committed
    pub outbox: Vec<Notification>,
}

impl ActionContext {
    pub fn new(now: DateTime<Utc>, source: impl Into<String>) -> Self {
        Self {
            now,
            source: source.into(),
            outbox: Vec::new(),
        }
    }
}

/// Capability registered under an action identifier
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &mut ActionContext,
        account: &mut Account,
        action: &Action,
    ) -> AppResult<()>;
}

fn balance_type(action: &Action) -> &str {
    if action.balance_type.is_empty() {
        balance_types::MONETARY
    } else {
        &action.balance_type
    }
}

/// The balance an action targets: its filter identity, else `*default`
fn target_filter(action: &Action) -> BalanceFilter {
    if action.balance.has_identity() {
        action.balance.clone()
    } else {
        BalanceFilter {
            id: Some(DEFAULT_BALANCE_ID.to_string()),
            ..action.balance.clone()
        }
    }
}

/// Target balance of an action, created from its filter when absent
fn target_balance<'a>(account: &'a mut Account, action: &Action) -> &'a mut Balance {
    let filter = target_filter(action);
    let chain = account.balances_mut(balance_type(action));
    let pos = match chain.iter().position(|b| filter.matches(b)) {
        Some(pos) => {
            chain[pos].apply_filter_attributes(&filter);
            pos
        }
        None => {
            chain.push(Balance::from_filter(&filter, Decimal::ZERO));
            chain.len() - 1
        }
    };
    &mut chain[pos]
}

/// Triggers an action applies to: optional group ID in `extra_parameters`,
/// optional balance type
fn selected_triggers<'a>(
    account: &'a mut Account,
    action: &'a Action,
) -> impl Iterator<Item = &'a mut ActionTrigger> + 'a {
    let group = action.extra_parameters.trim();
    account.action_triggers.iter_mut().filter(move |t| {
        (group.is_empty() || t.id == group)
            && (action.balance_type.is_empty() || t.balance_type == action.balance_type)
    })
}

/// Balances of the action's type (or of every type) matching its filter
fn selected_balances<'a>(
    account: &'a mut Account,
    action: &'a Action,
) -> impl Iterator<Item = &'a mut Balance> + 'a {
    account
        .balance_map
        .iter_mut()
        .filter(move |(ty, _)| action.balance_type.is_empty() || **ty == action.balance_type)
        .flat_map(|(_, chain)| chain.iter_mut())
        .filter(move |b| action.balance.matches(b))
}

/// `*log`
pub struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    async fn execute(&self, ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        let totals: HashMap<&str, Decimal> = account
            .balance_map
            .keys()
            .map(|ty| (ty.as_str(), account.total(ty, ctx.now)))
            .collect();
        info!(
            account = %account.key(),
            actions_id = %action.id,
            source = %ctx.source,
            "Account log action: balances {:?}",
            totals
        );
        Ok(())
    }
}

/// `*topup` and `*topup_reset`
pub struct TopupAction {
    pub reset: bool,
}

#[async_trait]
impl ActionHandler for TopupAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        let balance = target_balance(account, action);
        if self.reset {
            balance.set_value(action.units);
        } else {
            balance.add_value(action.units);
        }
        debug!("Balance {} topped up to {}", balance.id, balance.value);
        Ok(())
    }
}

/// `*debit` and `*debit_reset`
pub struct DebitAction {
    pub reset: bool,
}

#[async_trait]
impl ActionHandler for DebitAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        let balance = target_balance(account, action);
        if self.reset {
            balance.set_value(-action.units);
        } else {
            balance.add_value(-action.units);
        }
        debug!("Balance {} debited to {}", balance.id, balance.value);
        Ok(())
    }
}

/// `*reset_account`: zero every balance, counters and trigger state
pub struct ResetAccountAction;

#[async_trait]
impl ActionHandler for ResetAccountAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, _action: &Action) -> AppResult<()> {
        for chain in account.balance_map.values_mut() {
            for b in chain.iter_mut() {
                b.set_value(Decimal::ZERO);
            }
        }
        account.unit_counters.clear();
        for t in account.action_triggers.iter_mut() {
            t.executed = false;
        }
        Ok(())
    }
}

/// `*reset_triggers`
pub struct ResetTriggersAction;

#[async_trait]
impl ActionHandler for ResetTriggersAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        for t in selected_triggers(account, action) {
            t.executed = false;
        }
        Ok(())
    }
}

/// `*set_recurrent` and `*unset_recurrent`
pub struct SetRecurrentAction {
    pub recurrent: bool,
}

#[async_trait]
impl ActionHandler for SetRecurrentAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        for t in selected_triggers(account, action) {
            t.recurrent = self.recurrent;
        }
        Ok(())
    }
}

/// `*allow_negative` and `*deny_negative`
pub struct AllowNegativeAction {
    pub allow: bool,
}

#[async_trait]
impl ActionHandler for AllowNegativeAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, _action: &Action) -> AppResult<()> {
        account.allow_negative = self.allow;
        Ok(())
    }
}

/// `*enable_account` and `*disable_account`
pub struct DisableAccountAction {
    pub disabled: bool,
}

#[async_trait]
impl ActionHandler for DisableAccountAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, _action: &Action) -> AppResult<()> {
        account.disabled = self.disabled;
        Ok(())
    }
}

/// `*reset_counters`
pub struct ResetCountersAction;

#[async_trait]
impl ActionHandler for ResetCountersAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        if action.balance_type.is_empty() {
            account.unit_counters.clear();
        } else {
            account
                .unit_counters
                .retain(|c| c.balance_type != action.balance_type);
        }
        Ok(())
    }
}

/// `*enable_balance` and `*disable_balance`
pub struct DisableBalanceAction {
    pub disabled: bool,
}

#[async_trait]
impl ActionHandler for DisableBalanceAction {
    async fn execute(&self, _ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        for b in selected_balances(account, action) {
            b.disabled = self.disabled;
            b.dirty = true;
        }
        Ok(())
    }
}

/// `*http_post`: queue a JSON notification to the URL in `extra_parameters`
pub struct HttpPostAction;

#[async_trait]
impl ActionHandler for HttpPostAction {
    async fn execute(&self, ctx: &mut ActionContext, account: &mut Account, action: &Action) -> AppResult<()> {
        let url = action.extra_parameters.trim();
        if url.is_empty() {
            return Err(AppError::missing("ExtraParameters"));
        }
        let balances: HashMap<&str, String> = account
            .balance_map
            .keys()
            .map(|ty| (ty.as_str(), account.total(ty, ctx.now).to_string()))
            .collect();
        let body = json!({
            "tenant": account.tenant,
            "account": account.id,
            "actions_id": action.id,
            "source": ctx.source,
            "time": ctx.now,
            "allow_negative": account.allow_negative,
            "disabled": account.disabled,
            "balances": balances,
        });
        ctx.outbox.push(Notification {
            url: url.to_string(),
            account: account.key(),
            actions_id: action.id.clone(),
            body,
        });
        Ok(())
    }
}

/// Identifier to handler map
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in action
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(action_ids::LOG, Arc::new(LogAction));
        registry.register(action_ids::TOPUP, Arc::new(TopupAction { reset: false }));
        registry.register(action_ids::TOPUP_RESET, Arc::new(TopupAction { reset: true }));
        registry.register(action_ids::DEBIT, Arc::new(DebitAction { reset: false }));
        registry.register(action_ids::DEBIT_RESET, Arc::new(DebitAction { reset: true }));
        registry.register(action_ids::RESET_ACCOUNT, Arc::new(ResetAccountAction));
        registry.register(action_ids::RESET_TRIGGERS, Arc::new(ResetTriggersAction));
        registry.register(action_ids::SET_RECURRENT, Arc::new(SetRecurrentAction { recurrent: true }));
        registry.register(action_ids::UNSET_RECURRENT, Arc::new(SetRecurrentAction { recurrent: false }));
        registry.register(action_ids::ALLOW_NEGATIVE, Arc::new(AllowNegativeAction { allow: true }));
        registry.register(action_ids::DENY_NEGATIVE, Arc::new(AllowNegativeAction { allow: false }));
        registry.register(action_ids::ENABLE_ACCOUNT, Arc::new(DisableAccountAction { disabled: false }));
        registry.register(action_ids::DISABLE_ACCOUNT, Arc::new(DisableAccountAction { disabled: true }));
        registry.register(action_ids::RESET_COUNTERS, Arc::new(ResetCountersAction));
        registry.register(action_ids::ENABLE_BALANCE, Arc::new(DisableBalanceAction { disabled: false }));
        registry.register(action_ids::DISABLE_BALANCE, Arc::new(DisableBalanceAction { disabled: true }));
        registry.register(action_ids::HTTP_POST, Arc::new(HttpPostAction));
        registry
    }

    /// Add or replace the handler of an identifier
    pub fn register(&mut self, identifier: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(identifier.to_string(), handler);
    }

    pub fn get(&self, identifier: &str) -> AppResult<Arc<dyn ActionHandler>> {
        self.handlers
            .get(identifier)
            .cloned()
            .ok_or_else(|| AppError::UnknownAction(identifier.to_string()))
    }

    /// Fail on the first unregistered identifier
    pub fn validate(&self, actions: &[Action]) -> AppResult<()> {
        for action in actions {
            if !self.handlers.contains_key(&action.identifier) {
                return Err(AppError::UnknownAction(action.identifier.clone()));
            }
        }
        Ok(())
    }
}

/// Loads actions groups and runs them against an account
pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    store: Arc<dyn RatingStore>,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ActionRegistry>, store: Arc<dyn RatingStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Actions group in execution order
    pub async fn load(&self, actions_id: &str) -> AppResult<Vec<Action>> {
        let mut actions = self.store.get_actions(actions_id).await?;
        sort_actions(&mut actions);
        Ok(actions)
    }

    /// Run a loaded group on the working copy
    ///
    /// Identifiers are validated up front, so an unknown one leaves the
    /// account untouched. The first failing handler aborts the group.
    #[instrument(skip(self, ctx, account, actions), fields(account = %account.key(), source = %ctx.source))]
    pub async fn run(
        &self,
        ctx: &mut ActionContext,
        account: &mut Account,
        actions: &[Action],
    ) -> AppResult<()> {
        self.registry.validate(actions)?;
        for action in actions {
            let handler = self.registry.get(&action.identifier)?;
            debug!("Executing {} from group {}", action.identifier, action.id);
            handler.execute(ctx, account, action).await?;
        }
        account.updated_at = Some(ctx.now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_core::models::{CounterType, ThresholdType};
    use apolo_store::InMemoryRatingStore;
    use rust_decimal_macros::dec;

    fn ctx() -> ActionContext {
        ActionContext::new(Utc::now(), "test")
    }

    async fn run(account: &mut Account, actions: Vec<Action>) -> AppResult<ActionContext> {
        let store = Arc::new(InMemoryRatingStore::new());
        let executor = ActionExecutor::new(Arc::new(ActionRegistry::with_defaults()), store);
        let mut ctx = ctx();
        executor.run(&mut ctx, account, &actions).await?;
        Ok(ctx)
    }

    fn monetary(account: &Account) -> Decimal {
        account.total(balance_types::MONETARY, Utc::now())
    }

    #[tokio::test]
    async fn test_topup_and_topup_reset_on_default_balance() {
        let mut acc = Account::new("cgrates.org", "1001");
        run(
            &mut acc,
            vec![Action::on_balance("TOPUP", action_ids::TOPUP, balance_types::MONETARY, dec!(10))],
        )
        .await
        .unwrap();
        assert_eq!(monetary(&acc), dec!(10));
        assert_eq!(acc.balances(balance_types::MONETARY)[0].id, DEFAULT_BALANCE_ID);

        run(
            &mut acc,
            vec![Action::on_balance("RESET", action_ids::TOPUP_RESET, balance_types::MONETARY, dec!(3))],
        )
        .await
        .unwrap();
        assert_eq!(monetary(&acc), dec!(3));
        assert_eq!(acc.balances(balance_types::MONETARY).len(), 1);
    }

    #[tokio::test]
    async fn test_topup_named_balance_created_with_attributes() {
        let mut acc = Account::new("cgrates.org", "1001");
        let mut action = Action::on_balance("BONUS", action_ids::TOPUP, balance_types::VOICE, dec!(60));
        action.balance = BalanceFilter {
            id: Some("free_minutes".into()),
            weight: Some(20.0),
            destination_ids: Some(vec!["DST_PE".into()]),
            ..Default::default()
        };
        run(&mut acc, vec![action]).await.unwrap();
        let b = &acc.balances(balance_types::VOICE)[0];
        assert_eq!(b.id, "free_minutes");
        assert_eq!(b.weight, 20.0);
        assert_eq!(b.destination_ids, vec!["DST_PE".to_string()]);
        assert_eq!(b.value, dec!(60));
    }

    #[tokio::test]
    async fn test_debit_and_debit_reset() {
        let mut acc = Account::new("cgrates.org", "1001");
        acc.balances_mut(balance_types::MONETARY)
            .push(Balance::new(DEFAULT_BALANCE_ID, dec!(5)));
        run(
            &mut acc,
            vec![Action::on_balance("D", action_ids::DEBIT, balance_types::MONETARY, dec!(2))],
        )
        .await
        .unwrap();
        assert_eq!(monetary(&acc), dec!(3));
        run(
            &mut acc,
            vec![Action::on_balance("DR", action_ids::DEBIT_RESET, balance_types::MONETARY, dec!(1))],
        )
        .await
        .unwrap();
        assert_eq!(monetary(&acc), dec!(-1));
    }

    #[tokio::test]
    async fn test_unknown_action_leaves_account_untouched() {
        let mut acc = Account::new("cgrates.org", "1001");
        let err = run(
            &mut acc,
            vec![
                Action::on_balance("G", action_ids::TOPUP, balance_types::MONETARY, dec!(10)),
                Action::new("G", "*teleport"),
            ],
        )
        .await
        .unwrap_err();
        assert_eq!(err, AppError::UnknownAction("*teleport".into()));
        assert!(acc.balances(balance_types::MONETARY).is_empty());
    }

    #[tokio::test]
    async fn test_account_flags() {
        let mut acc = Account::new("cgrates.org", "1001");
        run(
            &mut acc,
            vec![
                Action::new("F", action_ids::ALLOW_NEGATIVE),
                Action::new("F", action_ids::DISABLE_ACCOUNT),
            ],
        )
        .await
        .unwrap();
        assert!(acc.allow_negative);
        assert!(acc.disabled);
        run(
            &mut acc,
            vec![
                Action::new("F", action_ids::DENY_NEGATIVE),
                Action::new("F", action_ids::ENABLE_ACCOUNT),
            ],
        )
        .await
        .unwrap();
        assert!(!acc.allow_negative);
        assert!(!acc.disabled);
    }

    #[tokio::test]
    async fn test_trigger_and_counter_resets() {
        let mut acc = Account::new("cgrates.org", "1001");
        acc.count_units(balance_types::MONETARY, dec!(2));
        acc.action_triggers.push(ActionTrigger {
            id: "STANDARD_TRIGGERS".into(),
            unique_id: "low".into(),
            threshold_type: ThresholdType::MinBalance,
            threshold_value: dec!(2),
            recurrent: false,
            min_sleep_secs: 0,
            executed: true,
            last_execution_time: None,
            balance_type: balance_types::MONETARY.into(),
            balance: BalanceFilter::default(),
            weight: 0.0,
            activation_date: None,
            expiration_date: None,
            actions_id: "LOG".into(),
        });
        run(
            &mut acc,
            vec![
                Action::new("R", action_ids::RESET_TRIGGERS),
                Action::new("R", action_ids::SET_RECURRENT),
                Action::new("R", action_ids::RESET_COUNTERS),
            ],
        )
        .await
        .unwrap();
        assert!(!acc.action_triggers[0].executed);
        assert!(acc.action_triggers[0].recurrent);
        assert_eq!(acc.counter(CounterType::Event, balance_types::MONETARY), dec!(0));
    }

    #[tokio::test]
    async fn test_disable_balance_by_id() {
        let mut acc = Account::new("cgrates.org", "1001");
        acc.balances_mut(balance_types::MONETARY)
            .extend([Balance::new("main", dec!(5)), Balance::new("bonus", dec!(2))]);
        let mut action = Action::new("DB", action_ids::DISABLE_BALANCE);
        action.balance = BalanceFilter::by_id("bonus");
        run(&mut acc, vec![action]).await.unwrap();
        assert_eq!(monetary(&acc), dec!(5));
    }

    #[tokio::test]
    async fn test_http_post_queues_notification() {
        let mut acc = Account::new("cgrates.org", "1001");
        let mut action = Action::new("NOTIFY", action_ids::HTTP_POST);
        action.extra_parameters = "http://localhost:8080/hook".into();
        let ctx = run(&mut acc, vec![action]).await.unwrap();
        assert_eq!(ctx.outbox.len(), 1);
        assert_eq!(ctx.outbox[0].url, "http://localhost:8080/hook");
        assert_eq!(ctx.outbox[0].body["account"], "1001");

        let err = run(&mut acc, vec![Action::new("NOTIFY", action_ids::HTTP_POST)])
            .await
            .unwrap_err();
        assert_eq!(err, AppError::missing("ExtraParameters"));
    }

    #[tokio::test]
    async fn test_actions_run_by_weight() {
        let mut acc = Account::new("cgrates.org", "1001");
        let mut reset = Action::on_balance("G", action_ids::TOPUP_RESET, balance_types::MONETARY, dec!(1));
        reset.weight = 20.0;
        let mut topup = Action::on_balance("G", action_ids::TOPUP, balance_types::MONETARY, dec!(5));
        topup.weight = 10.0;
        let store = Arc::new(InMemoryRatingStore::new());
        store.set_actions("G", &[topup, reset]).await.unwrap();
        let executor = ActionExecutor::new(Arc::new(ActionRegistry::with_defaults()), store);
        let actions = executor.load("G").await.unwrap();
        executor.run(&mut ctx(), &mut acc, &actions).await.unwrap();
        // reset first, then topup
        assert_eq!(monetary(&acc), dec!(6));
    }

    #[tokio::test]
    async fn test_custom_handler_registration() {
        struct Noop;
        #[async_trait]
        impl ActionHandler for Noop {
            async fn execute(&self, _: &mut ActionContext, _: &mut Account, _: &Action) -> AppResult<()> {
                Ok(())
            }
        }
        let mut registry = ActionRegistry::new();
        assert!(registry.get("*noop").is_err());
        registry.register("*noop", Arc::new(Noop));
        assert!(registry.get("*noop").is_ok());
    }
}
