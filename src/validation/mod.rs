mod builder;
pub mod validators;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures_timer::Delay;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ValidationError;
use crate::node::{FormNode, Node, NodeCore, WeakGroup};
use crate::path::FieldPath;
use crate::runtime::{read, write};

pub use builder::{AsyncOptions, RuleHandle, TreeContext, ValidationBuilder};

pub type ValidationFuture = BoxFuture<'static, Option<ValidationError>>;
pub type ValidatorFn = Arc<dyn Fn(&Value) -> Option<ValidationError> + Send + Sync>;
pub type AsyncValidatorFn = Arc<dyn Fn(Value) -> ValidationFuture + Send + Sync>;
pub type TreeValidatorFn = Arc<dyn Fn(&TreeContext) -> Option<ValidationError> + Send + Sync>;
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

static RULE_OWNER_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

/// Tags every rule attached by one schema application so they can be detached together.
pub(crate) fn next_owner() -> u64 {
    RULE_OWNER_ALLOCATOR.fetch_add(1, Ordering::SeqCst)
}

#[derive(Clone)]
pub struct AsyncValidator {
    pub debounce: Duration,
    pub validator: AsyncValidatorFn,
}

impl AsyncValidator {
    pub fn new<F, Fut>(validator: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<ValidationError>> + Send + 'static,
    {
        Self {
            debounce: Duration::ZERO,
            validator: Arc::new(move |value| Box::pin(validator(value))),
        }
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

pub(crate) fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, ValidationError> {
    serde_json::from_value(value.clone()).map_err(|error| {
        ValidationError::new("type", "Unexpected value type")
            .with_param("detail", error.to_string())
    })
}

/// A gate read fresh on every validation run against the scope the schema was applied to.
#[derive(Clone)]
pub(crate) struct Condition {
    pub(crate) scope: WeakGroup,
    pub(crate) path: FieldPath,
    pub(crate) predicate: Predicate,
}

impl Condition {
    fn holds(&self) -> bool {
        let Some(scope) = self.scope.upgrade() else {
            return false;
        };
        match scope.resolve(&self.path) {
            Ok(node) => (self.predicate)(&node.raw_value()),
            Err(error) => {
                log::warn!("validation condition skipped: {error}");
                false
            }
        }
    }
}

fn all_hold(conditions: &[Condition]) -> bool {
    conditions.iter().all(Condition::holds)
}

#[derive(Clone)]
pub(crate) enum SyncCheck {
    Value(ValidatorFn),
    Tree {
        scope: WeakGroup,
        validator: TreeValidatorFn,
    },
}

#[derive(Clone)]
pub(crate) struct SyncRule {
    pub(crate) owner: u64,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) check: SyncCheck,
}

#[derive(Clone)]
pub(crate) struct AsyncRule {
    pub(crate) owner: u64,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) validator: AsyncValidator,
}

#[derive(Clone)]
pub(crate) enum Rule {
    Sync(SyncRule),
    Async(AsyncRule),
}

impl Rule {
    fn owner(&self) -> u64 {
        match self {
            Rule::Sync(rule) => rule.owner,
            Rule::Async(rule) => rule.owner,
        }
    }
}

/// A rule whose target lies behind an array index. It lives on the scope it was
/// registered against and is matched to whatever node `target` resolves to at run time.
#[derive(Clone)]
pub(crate) struct RoutedRule {
    target: FieldPath,
    rule: Rule,
}

/// Schema-registered rules attached to one node, in registration order, plus the routed
/// rules this node holds as a scope.
#[derive(Clone, Default)]
pub(crate) struct RuleSet {
    sync: Vec<SyncRule>,
    asynchronous: Vec<AsyncRule>,
    routed: Vec<RoutedRule>,
}

impl RuleSet {
    pub(crate) fn push(&mut self, rule: Rule) {
        match rule {
            Rule::Sync(rule) => self.sync.push(rule),
            Rule::Async(rule) => self.asynchronous.push(rule),
        }
    }

    pub(crate) fn push_routed(&mut self, target: FieldPath, rule: Rule) {
        self.routed.push(RoutedRule { target, rule });
    }

    pub(crate) fn remove_owner(&mut self, owner: u64) {
        self.sync.retain(|rule| rule.owner != owner);
        self.asynchronous.retain(|rule| rule.owner != owner);
        self.routed.retain(|routed| routed.rule.owner() != owner);
    }

    /// True when no rule targets this node directly.
    pub(crate) fn is_empty(&self) -> bool {
        self.sync.is_empty() && self.asynchronous.is_empty()
    }

    fn first_error(&self, value: &Value) -> Option<ValidationError> {
        self.sync.iter().find_map(|rule| {
            if !all_hold(&rule.conditions) {
                return None;
            }
            match &rule.check {
                SyncCheck::Value(validator) => validator(value),
                SyncCheck::Tree { scope, validator } => {
                    let scope = scope.upgrade()?;
                    validator(&TreeContext::new(scope))
                }
            }
        })
    }

    fn active_async(&self) -> impl Iterator<Item = AsyncValidator> + '_ {
        self.asynchronous
            .iter()
            .filter(|rule| all_hold(&rule.conditions))
            .map(|rule| rule.validator.clone())
    }
}

pub(crate) enum Outcome {
    Valid,
    Invalid,
    Pending {
        ticket: u64,
        value: Value,
        validators: Vec<AsyncValidator>,
    },
}

/// Runs a node's sync chain: local validators first, then schema rules, stopping at the
/// first failure. Async validators are collected only when every sync rule passed.
pub(crate) fn run_sync(
    core: &NodeCore,
    value: &Value,
    local: &[ValidatorFn],
    local_async: &[AsyncValidator],
) -> Outcome {
    let ticket = {
        let mut validation = write(&core.validation);
        validation.ticket += 1;
        validation.ticket
    };
    let rules = effective_rules(core);

    let error = local
        .iter()
        .find_map(|validator| validator(value))
        .or_else(|| rules.first_error(value));
    let validators = match error {
        Some(_) => Vec::new(),
        None => local_async
            .iter()
            .cloned()
            .chain(rules.active_async())
            .collect::<Vec<_>>(),
    };

    let mut validation = write(&core.validation);
    if validation.ticket != ticket {
        // A rule wrote back into this node and started a newer run; that run's result stands.
        return if validation.errors.is_empty() && !validation.pending {
            Outcome::Valid
        } else {
            Outcome::Invalid
        };
    }
    let failed = error.is_some();
    validation.errors = error.into_iter().collect();
    validation.pending = !failed && !validators.is_empty();
    if failed {
        Outcome::Invalid
    } else if validators.is_empty() {
        Outcome::Valid
    } else {
        Outcome::Pending {
            ticket,
            value: value.clone(),
            validators,
        }
    }
}

/// The node's own rules followed by every routed rule of an ancestor scope whose target
/// currently resolves to this node.
fn effective_rules(core: &NodeCore) -> RuleSet {
    let mut rules = {
        let own = read(&core.rules);
        RuleSet {
            sync: own.sync.clone(),
            asynchronous: own.asynchronous.clone(),
            routed: Vec::new(),
        }
    };
    let mut ancestor = core.parent();
    while let Some(node) = ancestor {
        if let FormNode::Group(scope) = &node {
            let routed = read(&scope.core().rules).routed.clone();
            for entry in routed {
                let hits = scope
                    .resolve(&entry.target)
                    .is_ok_and(|target| target.id() == core.id);
                if hits {
                    rules.push(entry.rule);
                }
            }
        }
        ancestor = node.core().parent();
    }
    rules
}

/// Async validators run one after another. Each step re-checks the ticket, so a run
/// superseded by a newer value neither waits for nor applies its own result.
pub(crate) async fn run_async(
    node: FormNode,
    ticket: u64,
    value: Value,
    validators: Vec<AsyncValidator>,
) -> bool {
    let core = node.core();
    for entry in validators {
        if !entry.debounce.is_zero() {
            Delay::new(entry.debounce).await;
        }
        if !core.is_latest(ticket) {
            log::trace!("async validation ticket {ticket} superseded before running");
            return false;
        }
        let result = (entry.validator)(value.clone()).await;
        if !core.is_latest(ticket) {
            log::trace!("async validation ticket {ticket} superseded; result discarded");
            return false;
        }
        if let Some(error) = result {
            finish_async(core, ticket, vec![error]);
            return false;
        }
    }
    finish_async(core, ticket, Vec::new());
    true
}

fn finish_async(core: &NodeCore, ticket: u64, errors: Vec<ValidationError>) {
    let mut validation = write(&core.validation);
    if validation.ticket != ticket {
        return;
    }
    validation.pending = false;
    validation.errors = errors;
}

/// Applies an outcome for the sync entry point: pending chains are queued on the runtime.
pub(crate) fn schedule(node: FormNode, outcome: Outcome) -> bool {
    match outcome {
        Outcome::Valid => true,
        Outcome::Invalid => false,
        Outcome::Pending {
            ticket,
            value,
            validators,
        } => {
            let runtime = node.core().runtime.clone();
            runtime.spawn(async move {
                run_async(node, ticket, value, validators).await;
            });
            false
        }
    }
}

/// Awaits an outcome for the async entry point.
pub(crate) async fn conclude(node: FormNode, outcome: Outcome) -> bool {
    match outcome {
        Outcome::Valid => true,
        Outcome::Invalid => false,
        Outcome::Pending {
            ticket,
            value,
            validators,
        } => run_async(node, ticket, value, validators).await,
    }
}
