mod array;
mod field;
mod group;
mod view;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::path::{FieldPath, PathSegment};
use crate::runtime::{Cleanup, Listener, Runtime, read, write};
use crate::validation::RuleSet;

pub use array::ArrayNode;
pub use field::FieldNode;
pub use group::GroupNode;
pub use view::FieldView;

pub(crate) use array::ArrayInner;
pub(crate) use group::{GroupInner, WeakGroup};

static NODE_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        Self(NODE_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Valid,
    Invalid,
    Pending,
    Disabled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetValueOptions {
    pub emit_event: bool,
    pub mark_dirty: bool,
}

impl Default for SetValueOptions {
    fn default() -> Self {
        Self {
            emit_event: true,
            mark_dirty: true,
        }
    }
}

impl SetValueOptions {
    /// Writes made by the engine itself (computed and copied values).
    pub const fn derived() -> Self {
        Self {
            emit_event: true,
            mark_dirty: false,
        }
    }

    pub const fn silent() -> Self {
        Self {
            emit_event: false,
            mark_dirty: false,
        }
    }
}

/// The capability every node in the tree exposes to binding layers and rules.
pub trait Node {
    fn id(&self) -> NodeId;
    fn value(&self) -> Value;
    fn errors(&self) -> Vec<ValidationError>;
    fn status(&self) -> NodeStatus;
    fn touched(&self) -> bool;
    fn dirty(&self) -> bool;
    fn validate(&self) -> bool;
    fn reset(&self);
    fn mark_as_touched(&self);
    fn set_value_with(&self, value: Value, options: SetValueOptions) -> crate::FormResult<()>;
    fn enable(&self);
    fn disable(&self);

    fn valid(&self) -> bool {
        matches!(self.status(), NodeStatus::Valid | NodeStatus::Disabled)
    }

    fn pending(&self) -> bool {
        self.status() == NodeStatus::Pending
    }

    fn disabled(&self) -> bool {
        self.status() == NodeStatus::Disabled
    }

    fn get_value(&self) -> Value {
        self.value()
    }

    fn set_value(&self, value: Value) -> crate::FormResult<()> {
        self.set_value_with(value, SetValueOptions::default())
    }
}

#[derive(Clone)]
pub enum FormNode {
    Field(FieldNode),
    Group(GroupNode),
    Array(ArrayNode),
}

impl FormNode {
    pub fn kind(&self) -> &'static str {
        match self {
            FormNode::Field(_) => "field",
            FormNode::Group(_) => "group",
            FormNode::Array(_) => "array",
        }
    }

    pub fn as_field(&self) -> Option<&FieldNode> {
        match self {
            FormNode::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            FormNode::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayNode> {
        match self {
            FormNode::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Value including disabled descendants.
    pub fn raw_value(&self) -> Value {
        match self {
            FormNode::Field(field) => field.value(),
            FormNode::Group(group) => group.get_raw_value(),
            FormNode::Array(array) => array.get_raw_value(),
        }
    }

    /// Validates this node and its descendants, awaiting async validators. Boxed because
    /// groups and arrays recurse through it.
    pub fn validate_async(&self) -> BoxFuture<'static, bool> {
        let node = self.clone();
        async move {
            match &node {
                FormNode::Field(field) => field.validate_async().await,
                FormNode::Group(group) => group.validate_async().await,
                FormNode::Array(array) => array.validate_async().await,
            }
        }
        .boxed()
    }

    /// Address of this node from the root of its tree.
    pub fn path(&self) -> FieldPath {
        let mut segments = Vec::new();
        let mut current = self.clone();
        while let Some(parent) = current.core().parent() {
            let id = current.id();
            let segment = match &parent {
                FormNode::Group(group) => group
                    .key_of(id)
                    .map(|key| PathSegment::Key(key.to_string())),
                FormNode::Array(array) => array.index_of(id).map(PathSegment::Index),
                FormNode::Field(_) => None,
            };
            let Some(segment) = segment else {
                break;
            };
            segments.push(segment);
            current = parent;
        }
        segments
            .into_iter()
            .rev()
            .fold(FieldPath::root(), |path, segment| match segment {
                PathSegment::Key(key) => path.child(key),
                PathSegment::Index(index) => path.index(index),
            })
    }

    pub fn set_errors(&self, errors: Vec<ValidationError>) {
        match self {
            FormNode::Field(field) => field.set_errors(errors),
            FormNode::Group(group) => group.set_form_errors(errors),
            FormNode::Array(array) => array.core().set_errors(errors),
        }
    }

    pub fn clear_errors(&self) {
        self.set_errors(Vec::new());
    }

    pub fn mark_all_as_touched(&self) {
        match self {
            FormNode::Field(field) => field.mark_as_touched(),
            FormNode::Group(group) => group.mark_all_as_touched(),
            FormNode::Array(array) => array.mark_all_as_touched(),
        }
    }

    pub fn on_change(&self, callback: impl Fn() + Send + Sync + 'static) -> Cleanup {
        self.core().subscribe(Arc::new(callback))
    }

    pub(crate) fn core(&self) -> &NodeCore {
        match self {
            FormNode::Field(field) => field.core(),
            FormNode::Group(group) => group.core(),
            FormNode::Array(array) => array.core(),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $node:ident => $body:expr) => {
        match $self {
            FormNode::Field($node) => $body,
            FormNode::Group($node) => $body,
            FormNode::Array($node) => $body,
        }
    };
}

impl Node for FormNode {
    fn id(&self) -> NodeId {
        delegate!(self, node => node.id())
    }

    fn value(&self) -> Value {
        delegate!(self, node => node.value())
    }

    fn errors(&self) -> Vec<ValidationError> {
        delegate!(self, node => node.errors())
    }

    fn status(&self) -> NodeStatus {
        delegate!(self, node => node.status())
    }

    fn touched(&self) -> bool {
        delegate!(self, node => node.touched())
    }

    fn dirty(&self) -> bool {
        delegate!(self, node => node.dirty())
    }

    fn validate(&self) -> bool {
        delegate!(self, node => node.validate())
    }

    fn reset(&self) {
        delegate!(self, node => node.reset())
    }

    fn mark_as_touched(&self) {
        delegate!(self, node => node.mark_as_touched())
    }

    fn set_value_with(&self, value: Value, options: SetValueOptions) -> crate::FormResult<()> {
        delegate!(self, node => node.set_value_with(value, options))
    }

    fn enable(&self) {
        delegate!(self, node => node.enable())
    }

    fn disable(&self) {
        delegate!(self, node => node.disable())
    }
}

impl From<FieldNode> for FormNode {
    fn from(node: FieldNode) -> Self {
        FormNode::Field(node)
    }
}

impl From<GroupNode> for FormNode {
    fn from(node: GroupNode) -> Self {
        FormNode::Group(node)
    }
}

impl From<ArrayNode> for FormNode {
    fn from(node: ArrayNode) -> Self {
        FormNode::Array(node)
    }
}

#[derive(Clone)]
pub(crate) enum ParentLink {
    Group(Weak<GroupInner>),
    Array(Weak<ArrayInner>),
}

impl ParentLink {
    fn upgrade(&self) -> Option<FormNode> {
        match self {
            ParentLink::Group(weak) => weak
                .upgrade()
                .map(|inner| GroupNode::from_inner(inner).into()),
            ParentLink::Array(weak) => weak
                .upgrade()
                .map(|inner| ArrayNode::from_inner(inner).into()),
        }
    }
}

/// Results of the node's own rules. `ticket` increases with every validation run so a
/// late async result can tell whether it still describes the current value.
#[derive(Clone, Debug, Default)]
pub(crate) struct ValidationState {
    pub(crate) errors: Vec<ValidationError>,
    pub(crate) pending: bool,
    pub(crate) ticket: u64,
}

/// State shared by every node kind: identity, parent link, change listeners and
/// schema-registered rules.
pub(crate) struct NodeCore {
    pub(crate) id: NodeId,
    pub(crate) runtime: Runtime,
    parent: RwLock<Option<ParentLink>>,
    listeners: Arc<RwLock<Vec<Listener>>>,
    pub(crate) rules: RwLock<RuleSet>,
    pub(crate) validation: RwLock<ValidationState>,
}

impl NodeCore {
    pub(crate) fn new(runtime: Runtime) -> Self {
        Self {
            id: NodeId::next(),
            runtime,
            parent: RwLock::new(None),
            listeners: Arc::new(RwLock::new(Vec::new())),
            rules: RwLock::new(RuleSet::default()),
            validation: RwLock::new(ValidationState::default()),
        }
    }

    pub(crate) fn set_parent(&self, parent: Option<ParentLink>) {
        *write(&self.parent) = parent;
    }

    pub(crate) fn parent(&self) -> Option<FormNode> {
        read(&self.parent).as_ref().and_then(ParentLink::upgrade)
    }

    pub(crate) fn subscribe(&self, callback: crate::runtime::Callback) -> Cleanup {
        let listener = Listener::new(callback);
        write(&self.listeners).push(listener.clone());
        let list = Arc::downgrade(&self.listeners);
        Cleanup::new(move || {
            listener.deactivate();
            if let Some(list) = list.upgrade() {
                write(&list).retain(|candidate| candidate.id != listener.id);
            }
        })
    }

    /// Bubbles a value change from this node through every ancestor.
    pub(crate) fn emit_change(&self) {
        let mut listeners = read(&self.listeners).clone();
        let mut parent = self.parent();
        while let Some(node) = parent {
            listeners.extend(read(&node.core().listeners).iter().cloned());
            parent = node.core().parent();
        }
        self.runtime.notify(listeners);
    }

    pub(crate) fn own_errors(&self) -> Vec<ValidationError> {
        read(&self.validation).errors.clone()
    }

    pub(crate) fn own_pending(&self) -> bool {
        read(&self.validation).pending
    }

    pub(crate) fn set_errors(&self, errors: Vec<ValidationError>) {
        let mut validation = write(&self.validation);
        validation.ticket += 1;
        validation.pending = false;
        validation.errors = errors;
    }

    pub(crate) fn clear_validation(&self) {
        self.set_errors(Vec::new());
    }

    pub(crate) fn is_latest(&self, ticket: u64) -> bool {
        read(&self.validation).ticket == ticket
    }
}
