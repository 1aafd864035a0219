use std::sync::{Arc, RwLock, Weak};

use futures::future::join_all;
use serde_json::{Map, Value};

use super::{
    ArrayNode, FieldNode, FormNode, Node, NodeCore, NodeId, NodeStatus, ParentLink,
    SetValueOptions,
};
use crate::behavior::BehaviorBuilder;
use crate::error::{FormError, FormResult, ValidationError};
use crate::path::{AsFieldPath, FieldPath, PathHandle};
use crate::runtime::{Cleanup, Runtime, read, write};
use crate::validation::{self, ValidationBuilder};

#[derive(Default)]
struct GroupState {
    disabled: bool,
}

pub(crate) struct GroupInner {
    core: NodeCore,
    children: Vec<(String, FormNode)>,
    state: RwLock<GroupState>,
}

/// Named, ordered children. Owns form-level errors next to the errors of its children.
#[derive(Clone)]
pub struct GroupNode {
    inner: Arc<GroupInner>,
}

/// Non-owning reference used by rules and effects so they never keep a tree alive.
#[derive(Clone)]
pub(crate) struct WeakGroup(Weak<GroupInner>);

impl WeakGroup {
    pub(crate) fn upgrade(&self) -> Option<GroupNode> {
        self.0.upgrade().map(GroupNode::from_inner)
    }
}

impl GroupNode {
    pub(crate) fn new(runtime: Runtime, children: Vec<(String, FormNode)>) -> Self {
        let inner = Arc::new(GroupInner {
            core: NodeCore::new(runtime),
            children,
            state: RwLock::new(GroupState::default()),
        });
        for (_, child) in &inner.children {
            child
                .core()
                .set_parent(Some(ParentLink::Group(Arc::downgrade(&inner))));
        }
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<GroupInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> WeakGroup {
        WeakGroup(Arc::downgrade(&self.inner))
    }

    pub(crate) fn core(&self) -> &NodeCore {
        &self.inner.core
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.core.runtime
    }

    pub fn get(&self, key: &str) -> Option<FormNode> {
        self.inner
            .children
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, node)| node.clone())
    }

    pub fn field(&self, key: &str) -> Option<FieldNode> {
        self.get(key).and_then(|node| node.as_field().cloned())
    }

    pub fn group(&self, key: &str) -> Option<GroupNode> {
        self.get(key).and_then(|node| node.as_group().cloned())
    }

    pub fn array(&self, key: &str) -> Option<ArrayNode> {
        self.get(key).and_then(|node| node.as_array().cloned())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.children.iter().map(|(key, _)| key.as_str())
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &FormNode)> {
        self.inner
            .children
            .iter()
            .map(|(key, node)| (key.as_str(), node))
    }

    pub(crate) fn key_of(&self, id: NodeId) -> Option<&str> {
        self.inner
            .children
            .iter()
            .find(|(_, node)| node.id() == id)
            .map(|(key, _)| key.as_str())
    }

    pub fn resolve(&self, path: &FieldPath) -> FormResult<FormNode> {
        crate::path::resolve(&FormNode::Group(self.clone()), path)
    }

    pub fn resolve_field(&self, path: impl AsFieldPath) -> FormResult<FieldNode> {
        let path = path.to_field_path()?;
        match self.resolve(&path)? {
            FormNode::Field(field) => Ok(field),
            _ => Err(FormError::NodeKindMismatch {
                path: path.to_string(),
                expected: "field",
            }),
        }
    }

    pub fn resolve_group(&self, path: impl AsFieldPath) -> FormResult<GroupNode> {
        let path = path.to_field_path()?;
        match self.resolve(&path)? {
            FormNode::Group(group) => Ok(group),
            _ => Err(FormError::NodeKindMismatch {
                path: path.to_string(),
                expected: "group",
            }),
        }
    }

    pub fn resolve_array(&self, path: impl AsFieldPath) -> FormResult<ArrayNode> {
        let path = path.to_field_path()?;
        match self.resolve(&path)? {
            FormNode::Array(array) => Ok(array),
            _ => Err(FormError::NodeKindMismatch {
                path: path.to_string(),
                expected: "array",
            }),
        }
    }

    /// Object of every child value, disabled children included.
    pub fn get_raw_value(&self) -> Value {
        let map = self
            .inner
            .children
            .iter()
            .map(|(key, node)| (key.clone(), node.raw_value()))
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }

    /// Hydrates children from `partial` without emitting events, validating, or marking
    /// anything dirty.
    pub fn patch_value(&self, partial: Value) -> FormResult<()> {
        self.set_value_with(partial, SetValueOptions::silent())
    }

    pub async fn validate_async(&self) -> bool {
        if self.is_disabled() {
            self.core().clear_validation();
            return true;
        }
        let children = join_all(
            self.enabled_children()
                .map(|node| node.validate_async())
                .collect::<Vec<_>>(),
        )
        .await;
        let outcome = validation::run_sync(self.core(), &self.value(), &[], &[]);
        let own = validation::conclude(self.clone().into(), outcome).await;
        own && children.into_iter().all(|valid| valid)
    }

    pub fn mark_all_as_touched(&self) {
        for (_, child) in &self.inner.children {
            child.mark_all_as_touched();
        }
    }

    /// Errors owned by the group itself, e.g. returned by a server after submit.
    pub fn set_form_errors(&self, errors: Vec<ValidationError>) {
        self.core().set_errors(errors);
    }

    pub fn clear_form_errors(&self) {
        self.core().clear_validation();
    }

    pub fn form_errors(&self) -> Vec<ValidationError> {
        self.core().own_errors()
    }

    /// Runs `schema` against a handle rooted at this group, then attaches every rule it
    /// registered to its target node. A rule whose target sits behind an array index stays
    /// on this group and finds its target again on every validation run.
    pub fn apply_validation_schema<H, F>(&self, schema: F) -> FormResult<()>
    where
        H: PathHandle,
        F: FnOnce(&mut ValidationBuilder, H),
    {
        let mut builder = ValidationBuilder::new(self.runtime().options().strict_paths);
        schema(&mut builder, H::from_field_path(FieldPath::root()));
        builder.finish(self).map(|_| ())
    }

    /// Runs `schema` against a handle rooted at this group and installs the effects it
    /// registered. The returned cleanup removes all of them.
    pub fn apply_behavior_schema<H, F>(&self, schema: F) -> FormResult<Cleanup>
    where
        H: PathHandle,
        F: FnOnce(&mut BehaviorBuilder, H),
    {
        let mut builder = BehaviorBuilder::new(self.runtime().options().strict_paths);
        schema(&mut builder, H::from_field_path(FieldPath::root()));
        builder.finish(self)
    }

    pub fn on_change(&self, callback: impl Fn() + Send + Sync + 'static) -> Cleanup {
        self.core().subscribe(Arc::new(callback))
    }

    fn is_disabled(&self) -> bool {
        read(&self.inner.state).disabled
    }

    fn enabled_children(&self) -> impl Iterator<Item = &FormNode> {
        self.inner
            .children
            .iter()
            .map(|(_, node)| node)
            .filter(|node| !node.disabled())
    }
}

impl Node for GroupNode {
    fn id(&self) -> NodeId {
        self.inner.core.id
    }

    /// Object of enabled child values.
    fn value(&self) -> Value {
        let map = self
            .inner
            .children
            .iter()
            .filter(|(_, node)| !node.disabled())
            .map(|(key, node)| (key.clone(), node.value()))
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }

    fn errors(&self) -> Vec<ValidationError> {
        if self.is_disabled() {
            return Vec::new();
        }
        let mut errors = self.core().own_errors();
        for node in self.enabled_children() {
            errors.extend(node.errors());
        }
        errors
    }

    fn status(&self) -> NodeStatus {
        if self.is_disabled() {
            return NodeStatus::Disabled;
        }
        if !self.core().own_errors().is_empty() {
            return NodeStatus::Invalid;
        }
        let statuses = self
            .enabled_children()
            .map(Node::status)
            .collect::<Vec<_>>();
        if self.core().own_pending() || statuses.contains(&NodeStatus::Pending) {
            NodeStatus::Pending
        } else if statuses.contains(&NodeStatus::Invalid) {
            NodeStatus::Invalid
        } else {
            NodeStatus::Valid
        }
    }

    fn touched(&self) -> bool {
        self.inner.children.iter().any(|(_, node)| node.touched())
    }

    fn dirty(&self) -> bool {
        self.inner.children.iter().any(|(_, node)| node.dirty())
    }

    /// Validates every enabled descendant, then the group's own rules. Never
    /// short-circuits, so all errors are populated.
    fn validate(&self) -> bool {
        if self.is_disabled() {
            self.core().clear_validation();
            return true;
        }
        let mut valid = true;
        for node in self.enabled_children() {
            valid &= node.validate();
        }
        let outcome = validation::run_sync(self.core(), &self.value(), &[], &[]);
        validation::schedule(self.clone().into(), outcome) && valid
    }

    fn reset(&self) {
        self.runtime().batch(|| {
            for (_, child) in &self.inner.children {
                child.reset();
            }
        });
        self.core().clear_validation();
    }

    fn mark_as_touched(&self) {
        self.mark_all_as_touched();
    }

    /// Writes each key of `value` into the child of the same name as one batched change.
    /// Keys without a matching child are ignored.
    fn set_value_with(&self, value: Value, options: SetValueOptions) -> FormResult<()> {
        let Value::Object(map) = value else {
            return Err(FormError::ValueShape {
                path: FormNode::Group(self.clone()).path().to_string(),
                reason: "group values must be objects",
            });
        };
        self.runtime().batch(|| {
            for (key, next) in map {
                match self.get(&key) {
                    Some(child) => child.set_value_with(next, options)?,
                    None => log::debug!("ignoring value for unknown key `{key}`"),
                }
            }
            Ok(())
        })
    }

    fn enable(&self) {
        write(&self.inner.state).disabled = false;
        self.runtime().batch(|| {
            for (_, child) in &self.inner.children {
                child.enable();
            }
        });
        self.core().emit_change();
    }

    fn disable(&self) {
        write(&self.inner.state).disabled = true;
        self.runtime().batch(|| {
            for (_, child) in &self.inner.children {
                child.disable();
            }
        });
        self.core().clear_validation();
        self.core().emit_change();
    }
}
