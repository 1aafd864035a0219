use std::future::Future;
use std::sync::RwLock;

use serde_json::Value;

use crate::behavior::BehaviorBuilder;
use crate::error::{FormError, FormResult};
use crate::node::{GroupNode, Node};
use crate::path::PathHandle;
use crate::runtime::{Cleanup, Runtime, read, write};
use crate::schema::{GroupSchema, NodeFactory, UpdateOn};
use crate::validation::ValidationBuilder;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormOptions {
    /// Unresolvable schema paths fail schema application instead of being logged and
    /// skipped.
    pub strict_paths: bool,
    /// How many times one effect may run within a single flush before it is dropped.
    pub max_effect_runs: usize,
    pub default_update_on: UpdateOn,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            strict_paths: cfg!(debug_assertions),
            max_effect_runs: 100,
            default_update_on: UpdateOn::Change,
        }
    }
}

struct SubmitTracker {
    state: SubmitState,
    count: u32,
}

/// Owner of a node tree: holds the root group, the runtime driving its effects, every
/// behavior cleanup and the submit state. Dropping the form runs the cleanups.
pub struct Form {
    root: GroupNode,
    runtime: Runtime,
    cleanups: Cleanup,
    submit: RwLock<SubmitTracker>,
}

impl Form {
    pub fn new(schema: &GroupSchema) -> Self {
        Self::with_options(schema, FormOptions::default())
    }

    pub fn with_options(schema: &GroupSchema, options: FormOptions) -> Self {
        let runtime = Runtime::new(options);
        let root = NodeFactory::new(runtime.clone()).build_group(schema);
        Self {
            root,
            runtime,
            cleanups: Cleanup::noop(),
            submit: RwLock::new(SubmitTracker {
                state: SubmitState::Idle,
                count: 0,
            }),
        }
    }

    /// Form whose shape is inferred from a defaults object.
    pub fn from_defaults(defaults: &Value) -> Self {
        Self::new(&GroupSchema::infer(defaults))
    }

    pub fn root(&self) -> &GroupNode {
        &self.root
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn options(&self) -> &FormOptions {
        self.runtime.options()
    }

    pub fn apply_validation_schema<H, F>(&self, schema: F) -> FormResult<()>
    where
        H: PathHandle,
        F: FnOnce(&mut ValidationBuilder, H),
    {
        self.root.apply_validation_schema(schema)
    }

    /// Installs a behavior schema on the root. Its cleanup also runs when the form is
    /// disposed.
    pub fn apply_behavior_schema<H, F>(&self, schema: F) -> FormResult<Cleanup>
    where
        H: PathHandle,
        F: FnOnce(&mut BehaviorBuilder, H),
    {
        let cleanup = self.root.apply_behavior_schema(schema)?;
        self.cleanups.add(cleanup.clone());
        Ok(cleanup)
    }

    /// Drives pending async validations and debounced behaviors to completion.
    pub async fn settle(&self) {
        self.runtime.settle().await;
    }

    pub fn value(&self) -> Value {
        self.root.get_value()
    }

    pub fn validate(&self) -> bool {
        self.root.validate()
    }

    pub async fn validate_async(&self) -> bool {
        self.root.validate_async().await
    }

    pub fn reset(&self) -> FormResult<()> {
        self.root.reset();
        let mut submit = write(&self.submit);
        transition_submit_state(&mut submit, SubmitState::Idle)
    }

    pub fn submit_state(&self) -> SubmitState {
        read(&self.submit).state
    }

    pub fn submit_count(&self) -> u32 {
        read(&self.submit).count
    }

    /// Marks every field touched, validates synchronously and hands the value to `f` when
    /// valid. Async validators still pending count as invalid here; use
    /// [`Form::submit_async`] to await them.
    pub fn submit(&self, f: impl FnOnce(&Value) -> FormResult<()>) -> FormResult<()> {
        self.begin_submit()?;
        self.root.mark_all_as_touched();

        if !self.root.validate() {
            return self.finish_submit(SubmitState::Failed);
        }

        self.finish_submit(SubmitState::Submitting)?;
        let submit_result = f(&self.root.get_value());
        self.complete_submit(submit_result)
    }

    pub async fn submit_async<F, Fut>(&self, f: F) -> FormResult<()>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = FormResult<()>>,
    {
        self.begin_submit()?;
        self.root.mark_all_as_touched();

        if !self.root.validate_async().await {
            return self.finish_submit(SubmitState::Failed);
        }

        self.finish_submit(SubmitState::Submitting)?;
        let submit_result = f(self.root.get_value()).await;
        self.complete_submit(submit_result)
    }

    /// Runs every behavior cleanup. Idempotent.
    pub fn dispose(&self) {
        self.cleanups.run();
    }

    fn begin_submit(&self) -> FormResult<()> {
        let mut submit = write(&self.submit);
        if submit.state == SubmitState::Submitting {
            return Err(FormError::AlreadySubmitting);
        }
        transition_submit_state(&mut submit, SubmitState::Validating)?;
        submit.count = submit.count.saturating_add(1);
        Ok(())
    }

    fn finish_submit(&self, next: SubmitState) -> FormResult<()> {
        transition_submit_state(&mut write(&self.submit), next)
    }

    fn complete_submit(&self, submit_result: FormResult<()>) -> FormResult<()> {
        let mut submit = write(&self.submit);
        if submit_result.is_ok() {
            transition_submit_state(&mut submit, SubmitState::Succeeded)?;
        } else {
            transition_submit_state(&mut submit, SubmitState::Failed)?;
        }
        submit_result
    }
}

impl Drop for Form {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn transition_submit_state(tracker: &mut SubmitTracker, next: SubmitState) -> FormResult<()> {
    let current = tracker.state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    tracker.state = next;
    Ok(())
}
