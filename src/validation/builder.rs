use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    AsyncRule, AsyncValidator, AsyncValidatorFn, Condition, Predicate, Rule, SyncCheck,
    SyncRule, TreeValidatorFn, ValidatorFn, decode, next_owner, validators,
};
use crate::error::{FormError, FormResult, ValidationError};
use crate::node::{ArrayNode, FormNode, GroupNode, Node, SetValueOptions};
use crate::path::{AsFieldPath, FieldPath, PathHandle, PathSegment};
use crate::runtime::{Cleanup, write};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AsyncOptions {
    pub debounce: Duration,
}

impl AsyncOptions {
    pub fn debounce(debounce: Duration) -> Self {
        Self { debounce }
    }
}

type ItemSchema = Arc<dyn Fn(&mut ValidationBuilder) + Send + Sync>;

enum RuleKind {
    Sync(ValidatorFn),
    Async(AsyncValidator),
    Tree(TreeValidatorFn),
    Each(ItemSchema),
}

#[derive(Clone)]
struct PendingCondition {
    path: FieldPath,
    predicate: Predicate,
}

struct Registration {
    target: FieldPath,
    conditions: Vec<PendingCondition>,
    kind: RuleKind,
}

/// Collects validation rules while a schema function runs. Nothing touches the tree
/// until [`ValidationBuilder::finish`] resolves every target against a scope.
pub struct ValidationBuilder {
    strict: bool,
    inherited: Vec<Condition>,
    conditions: Vec<PendingCondition>,
    registrations: Vec<Registration>,
    errors: Vec<FormError>,
}

/// Returned by every rule registration so a message can be attached to it.
pub struct RuleHandle<'a> {
    builder: &'a mut ValidationBuilder,
    index: Option<usize>,
}

impl RuleHandle<'_> {
    /// Replaces the message of errors produced by this rule, keeping its code and params.
    pub fn message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        let registration = self
            .index
            .and_then(|index| self.builder.registrations.get_mut(index));
        if let Some(registration) = registration {
            match &mut registration.kind {
                RuleKind::Sync(validator) => {
                    *validator = validators::with_message(validator.clone(), message);
                }
                RuleKind::Tree(validator) => {
                    let inner = validator.clone();
                    *validator = Arc::new(move |context: &TreeContext| {
                        inner(context).map(|error| relabel(error, &message))
                    });
                }
                RuleKind::Async(entry) => {
                    let inner = entry.validator.clone();
                    let validator: AsyncValidatorFn = Arc::new(move |value| {
                        let pending = inner(value);
                        let message = message.clone();
                        Box::pin(async move { pending.await.map(|error| relabel(error, &message)) })
                    });
                    entry.validator = validator;
                }
                RuleKind::Each(_) => {}
            }
        }
        self
    }
}

fn relabel(mut error: ValidationError, message: &str) -> ValidationError {
    error.message = message.to_string();
    error
}

impl ValidationBuilder {
    pub(crate) fn new(strict: bool) -> Self {
        Self::inheriting(strict, Vec::new())
    }

    /// Builder for item schemas nested under conditions of an enclosing schema.
    pub(crate) fn inheriting(strict: bool, inherited: Vec<Condition>) -> Self {
        Self {
            strict,
            inherited,
            conditions: Vec::new(),
            registrations: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn required(&mut self, target: impl AsFieldPath) -> RuleHandle<'_> {
        self.push(target, RuleKind::Sync(validators::required()))
    }

    pub fn min(&mut self, target: impl AsFieldPath, min: impl Into<Decimal>) -> RuleHandle<'_> {
        self.push(target, RuleKind::Sync(validators::min(min)))
    }

    pub fn max(&mut self, target: impl AsFieldPath, max: impl Into<Decimal>) -> RuleHandle<'_> {
        self.push(target, RuleKind::Sync(validators::max(max)))
    }

    pub fn min_length(&mut self, target: impl AsFieldPath, min: usize) -> RuleHandle<'_> {
        self.push(target, RuleKind::Sync(validators::min_length(min)))
    }

    pub fn max_length(&mut self, target: impl AsFieldPath, max: usize) -> RuleHandle<'_> {
        self.push(target, RuleKind::Sync(validators::max_length(max)))
    }

    pub fn pattern(&mut self, target: impl AsFieldPath, pattern: &str) -> RuleHandle<'_> {
        match Regex::new(pattern) {
            Ok(regex) => self.push(target, RuleKind::Sync(validators::pattern(regex))),
            Err(error) => {
                self.errors.push(FormError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: error.to_string(),
                });
                RuleHandle {
                    builder: self,
                    index: None,
                }
            }
        }
    }

    pub fn email(&mut self, target: impl AsFieldPath) -> RuleHandle<'_> {
        self.push(target, RuleKind::Sync(validators::email()))
    }

    /// Custom rule over the target's value decoded as `T`. A value that does not decode
    /// fails with a `type` error.
    pub fn validate<T, F>(&mut self, target: impl AsFieldPath, validator: F) -> RuleHandle<'_>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Option<ValidationError> + Send + Sync + 'static,
    {
        let validator: ValidatorFn = Arc::new(move |value: &Value| match decode::<T>(value) {
            Ok(decoded) => validator(&decoded),
            Err(error) => Some(error),
        });
        self.push(target, RuleKind::Sync(validator))
    }

    /// Async rule, run only after every sync rule on the target passed. Only the result
    /// for the latest value is kept.
    pub fn validate_async<T, F, Fut>(
        &mut self,
        target: impl AsFieldPath,
        validator: F,
        options: AsyncOptions,
    ) -> RuleHandle<'_>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<ValidationError>> + Send + 'static,
    {
        let validator = Arc::new(validator);
        let entry = AsyncValidator::new(move |value: Value| {
            let decoded = decode::<T>(&value);
            let validator = validator.clone();
            async move {
                match decoded {
                    Ok(decoded) => validator(decoded).await,
                    Err(error) => Some(error),
                }
            }
        })
        .debounce(options.debounce);
        self.push(target, RuleKind::Async(entry))
    }

    /// Cross-field rule: reads any field through the [`TreeContext`] and reports on
    /// `target`. Runs whenever `target` validates.
    pub fn validate_tree<F>(&mut self, target: impl AsFieldPath, validator: F) -> RuleHandle<'_>
    where
        F: Fn(&TreeContext) -> Option<ValidationError> + Send + Sync + 'static,
    {
        self.push(target, RuleKind::Tree(Arc::new(validator)))
    }

    /// Applies `schema` to every item of the array at `array`, current and future.
    pub fn each<H, F>(&mut self, array: impl AsFieldPath, schema: F)
    where
        H: PathHandle,
        F: Fn(&mut ValidationBuilder, H) + Send + Sync + 'static,
    {
        let schema: ItemSchema = Arc::new(move |builder: &mut ValidationBuilder| {
            schema(builder, H::from_field_path(FieldPath::root()))
        });
        self.push(array, RuleKind::Each(schema));
    }

    /// Runs a reusable schema once per base handle.
    pub fn apply<H, I, F>(&mut self, bases: I, schema: F)
    where
        I: IntoIterator<Item = H>,
        F: Fn(&mut ValidationBuilder, H),
    {
        for base in bases {
            schema(self, base);
        }
    }

    /// Rules registered inside `schema` only run while the value at `condition` satisfies
    /// `predicate`. The condition is read fresh on every validation run.
    pub fn apply_when<T, P, F>(&mut self, condition: impl AsFieldPath, predicate: P, schema: F)
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool + Send + Sync + 'static,
        F: FnOnce(&mut ValidationBuilder),
    {
        let path = match condition.to_field_path() {
            Ok(path) => path,
            Err(error) => {
                self.errors.push(error);
                return;
            }
        };
        let predicate: Predicate = Arc::new(move |value: &Value| {
            decode::<T>(value).is_ok_and(|decoded| predicate(&decoded))
        });
        self.conditions.push(PendingCondition { path, predicate });
        schema(self);
        self.conditions.pop();
    }

    fn push(&mut self, target: impl AsFieldPath, kind: RuleKind) -> RuleHandle<'_> {
        let index = match target.to_field_path() {
            Ok(target) => {
                self.registrations.push(Registration {
                    target,
                    conditions: self.conditions.clone(),
                    kind,
                });
                Some(self.registrations.len() - 1)
            }
            Err(error) => {
                self.errors.push(error);
                None
            }
        };
        RuleHandle {
            builder: self,
            index,
        }
    }

    /// Resolves every registration against `scope`, then attaches the rules. With strict
    /// paths the first failure is returned and nothing stays attached; otherwise failures
    /// are logged and the affected rule skipped. The returned cleanup detaches every rule.
    pub(crate) fn finish(self, scope: &GroupNode) -> FormResult<Cleanup> {
        let strict = self.strict;
        for error in self.errors {
            surface(strict, error)?;
        }
        let owner = next_owner();
        let mut attachments = Vec::with_capacity(self.registrations.len());
        for registration in self.registrations {
            match resolve(scope, &self.inherited, owner, registration) {
                Ok(attachment) => attachments.push(attachment),
                Err(error) => surface(strict, error)?,
            }
        }

        let count = attachments.len();
        let attached = Cleanup::noop();
        for attachment in attachments {
            match attachment.attach(owner) {
                Ok(cleanup) => attached.add(cleanup),
                Err(error) if strict => {
                    attached.run();
                    return Err(error);
                }
                Err(error) => log::warn!("skipping validation rule: {error}"),
            }
        }
        log::debug!(
            "validation schema attached {count} rules under `{}`",
            FormNode::Group(scope.clone()).path()
        );
        Ok(attached)
    }
}

fn surface(strict: bool, error: FormError) -> FormResult<()> {
    if strict {
        return Err(error);
    }
    log::warn!("skipping validation rule: {error}");
    Ok(())
}

/// A registration whose paths all resolved, ready to be attached.
enum Attachment {
    Direct {
        node: FormNode,
        rule: Rule,
    },
    Routed {
        scope: GroupNode,
        target: FieldPath,
        rule: Rule,
    },
    Each {
        array: ArrayNode,
        schema: ItemSchema,
        conditions: Vec<Condition>,
    },
}

impl Attachment {
    fn attach(self, owner: u64) -> FormResult<Cleanup> {
        match self {
            Attachment::Direct { node, rule } => {
                write(&node.core().rules).push(rule);
                Ok(Cleanup::new(move || {
                    write(&node.core().rules).remove_owner(owner);
                }))
            }
            Attachment::Routed {
                scope,
                target,
                rule,
            } => {
                write(&scope.core().rules).push_routed(target, rule);
                Ok(Cleanup::new(move || {
                    write(&scope.core().rules).remove_owner(owner);
                }))
            }
            Attachment::Each {
                array,
                schema,
                conditions,
            } => array.add_item_validation(schema, conditions),
        }
    }
}

fn resolve(
    scope: &GroupNode,
    inherited: &[Condition],
    owner: u64,
    registration: Registration,
) -> FormResult<Attachment> {
    let target = scope.resolve(&registration.target)?;
    let weak = scope.downgrade();
    let mut conditions = inherited.to_vec();
    for pending in registration.conditions {
        scope.resolve(&pending.path)?;
        conditions.push(Condition {
            scope: weak.clone(),
            path: pending.path,
            predicate: pending.predicate,
        });
    }

    let rule = match registration.kind {
        RuleKind::Sync(validator) => Rule::Sync(SyncRule {
            owner,
            conditions,
            check: SyncCheck::Value(validator),
        }),
        RuleKind::Tree(validator) => Rule::Sync(SyncRule {
            owner,
            conditions,
            check: SyncCheck::Tree {
                scope: weak,
                validator,
            },
        }),
        RuleKind::Async(validator) => Rule::Async(AsyncRule {
            owner,
            conditions,
            validator,
        }),
        RuleKind::Each(schema) => {
            let FormNode::Array(array) = target else {
                return Err(FormError::NodeKindMismatch {
                    path: registration.target.to_string(),
                    expected: "array",
                });
            };
            return Ok(Attachment::Each {
                array,
                schema,
                conditions,
            });
        }
    };

    let indexed = registration
        .target
        .segments()
        .iter()
        .any(|segment| matches!(segment, PathSegment::Index(_)));
    if indexed {
        // Items behind an index are replaced by remove, set_value and reset.
        return Ok(Attachment::Routed {
            scope: scope.clone(),
            target: registration.target,
            rule,
        });
    }
    Ok(Attachment::Direct { node: target, rule })
}

/// View of the scope a cross-field rule was registered against.
pub struct TreeContext {
    scope: GroupNode,
}

impl TreeContext {
    pub(crate) fn new(scope: GroupNode) -> Self {
        Self { scope }
    }

    pub fn form_value(&self) -> Value {
        self.scope.get_value()
    }

    /// Current value at `path`, disabled fields included. `None` when the path does not
    /// resolve.
    pub fn get_field(&self, path: impl AsFieldPath) -> Option<Value> {
        let path = path.to_field_path().ok()?;
        self.scope.resolve(&path).ok().map(|node| node.raw_value())
    }

    pub fn get<T: DeserializeOwned>(&self, path: impl AsFieldPath) -> Option<T> {
        self.get_field(path)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Writes a derived value: events are emitted but the field is not marked dirty.
    pub fn set_field(&self, path: impl AsFieldPath, value: Value) -> FormResult<()> {
        let path = path.to_field_path()?;
        self.scope
            .resolve(&path)?
            .set_value_with(value, SetValueOptions::derived())
    }

    pub fn form_node(&self) -> &GroupNode {
        &self.scope
    }
}
