use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use super::{FieldView, Node, NodeCore, NodeId, NodeStatus, SetValueOptions};
use crate::error::{FormResult, ValidationError};
use crate::runtime::{Cleanup, Runtime, read, write};
use crate::schema::{FieldConfig, UpdateOn};
use crate::validation::{self, AsyncValidator, ValidatorFn};

struct FieldState {
    value: Value,
    initial: Value,
    touched: bool,
    dirty: bool,
    disabled: bool,
    component_props: Map<String, Value>,
}

pub(crate) struct FieldInner {
    core: NodeCore,
    validators: Vec<ValidatorFn>,
    async_validators: Vec<AsyncValidator>,
    update_on: UpdateOn,
    component: Option<String>,
    state: RwLock<FieldState>,
}

/// Leaf node holding one JSON value.
#[derive(Clone)]
pub struct FieldNode {
    inner: Arc<FieldInner>,
}

impl FieldNode {
    pub(crate) fn new(runtime: Runtime, config: FieldConfig, update_on: UpdateOn) -> Self {
        Self {
            inner: Arc::new(FieldInner {
                core: NodeCore::new(runtime),
                validators: config.validators,
                async_validators: config.async_validators,
                update_on,
                component: config.component,
                state: RwLock::new(FieldState {
                    value: config.value.clone(),
                    initial: config.value,
                    touched: false,
                    dirty: false,
                    disabled: config.disabled,
                    component_props: config.component_props,
                }),
            }),
        }
    }

    pub(crate) fn core(&self) -> &NodeCore {
        &self.inner.core
    }

    pub fn update_on(&self) -> UpdateOn {
        self.inner.update_on
    }

    pub fn initial_value(&self) -> Value {
        read(&self.inner.state).initial.clone()
    }

    pub async fn validate_async(&self) -> bool {
        if self.is_disabled() {
            self.core().clear_validation();
            return true;
        }
        let outcome = self.run_sync();
        validation::conclude(self.clone().into(), outcome).await
    }

    /// Restores `value` and clears errors, touched and dirty. The construction-time value
    /// is kept for later [`Node::reset`] calls.
    pub fn reset_to(&self, value: Value) {
        let changed = {
            let mut state = write(&self.inner.state);
            let changed = state.value != value;
            state.value = value;
            state.touched = false;
            state.dirty = false;
            changed
        };
        self.core().clear_validation();
        if changed {
            self.core().emit_change();
        }
    }

    pub fn mark_as_untouched(&self) {
        write(&self.inner.state).touched = false;
    }

    pub fn mark_as_dirty(&self) {
        write(&self.inner.state).dirty = true;
    }

    pub fn mark_as_pristine(&self) {
        write(&self.inner.state).dirty = false;
    }

    /// Replaces this field's errors until the next validation run.
    pub fn set_errors(&self, errors: Vec<ValidationError>) {
        self.core().set_errors(errors);
    }

    pub fn clear_errors(&self) {
        self.core().clear_validation();
    }

    pub fn component(&self) -> Option<&str> {
        self.inner.component.as_deref()
    }

    pub fn component_props(&self) -> Map<String, Value> {
        read(&self.inner.state).component_props.clone()
    }

    /// Merges `props` into the field's component props, overwriting existing keys.
    pub fn update_component_props(&self, props: Map<String, Value>) {
        let mut state = write(&self.inner.state);
        for (key, value) in props {
            state.component_props.insert(key, value);
        }
    }

    pub fn view(&self) -> FieldView {
        let state = read(&self.inner.state);
        let errors = if state.disabled {
            Vec::new()
        } else {
            self.core().own_errors()
        };
        FieldView {
            value: state.value.clone(),
            should_show_error: state.touched || state.dirty,
            errors,
            touched: state.touched,
            dirty: state.dirty,
            disabled: state.disabled,
            pending: !state.disabled && self.core().own_pending(),
            component: self.inner.component.clone(),
            component_props: state.component_props.clone(),
        }
    }

    pub fn on_change(&self, callback: impl Fn() + Send + Sync + 'static) -> Cleanup {
        self.core().subscribe(Arc::new(callback))
    }

    fn is_disabled(&self) -> bool {
        read(&self.inner.state).disabled
    }

    fn run_sync(&self) -> validation::Outcome {
        let value = self.value();
        validation::run_sync(
            self.core(),
            &value,
            &self.inner.validators,
            &self.inner.async_validators,
        )
    }
}

impl Node for FieldNode {
    fn id(&self) -> NodeId {
        self.inner.core.id
    }

    fn value(&self) -> Value {
        read(&self.inner.state).value.clone()
    }

    fn errors(&self) -> Vec<ValidationError> {
        if self.is_disabled() {
            return Vec::new();
        }
        self.core().own_errors()
    }

    fn status(&self) -> NodeStatus {
        if self.is_disabled() {
            return NodeStatus::Disabled;
        }
        let validation = read(&self.core().validation);
        if !validation.errors.is_empty() {
            NodeStatus::Invalid
        } else if validation.pending {
            NodeStatus::Pending
        } else {
            NodeStatus::Valid
        }
    }

    fn touched(&self) -> bool {
        read(&self.inner.state).touched
    }

    fn dirty(&self) -> bool {
        read(&self.inner.state).dirty
    }

    fn validate(&self) -> bool {
        if self.is_disabled() {
            self.core().clear_validation();
            return true;
        }
        let outcome = self.run_sync();
        validation::schedule(self.clone().into(), outcome)
    }

    fn reset(&self) {
        let initial = self.initial_value();
        self.reset_to(initial);
    }

    fn mark_as_touched(&self) {
        write(&self.inner.state).touched = true;
        if self.inner.update_on == UpdateOn::Blur {
            self.validate();
        }
    }

    fn set_value_with(&self, value: Value, options: SetValueOptions) -> FormResult<()> {
        let changed = {
            let mut state = write(&self.inner.state);
            let changed = state.value != value;
            state.value = value;
            if options.mark_dirty {
                state.dirty = true;
            }
            changed
        };
        if options.emit_event {
            if self.inner.update_on == UpdateOn::Change {
                self.validate();
            }
            if changed {
                self.core().emit_change();
            }
        }
        Ok(())
    }

    fn enable(&self) {
        {
            let mut state = write(&self.inner.state);
            if !state.disabled {
                return;
            }
            state.disabled = false;
        }
        if self.inner.update_on == UpdateOn::Change {
            self.validate();
        }
        self.core().emit_change();
    }

    fn disable(&self) {
        {
            let mut state = write(&self.inner.state);
            if state.disabled {
                return;
            }
            state.disabled = true;
        }
        self.core().clear_validation();
        self.core().emit_change();
    }
}
