use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use futures::future::join_all;
use serde_json::Value;

use super::{FormNode, GroupNode, Node, NodeCore, NodeId, NodeStatus, ParentLink, SetValueOptions};
use crate::behavior::BehaviorBuilder;
use crate::error::{FormError, FormResult, ValidationError};
use crate::path::{FieldPath, PathHandle};
use crate::runtime::{Cleanup, Runtime, read, write};
use crate::schema::{ArraySchema, GroupSchema, NodeFactory};
use crate::validation::{self, Condition, ValidationBuilder};

static INSTALLER_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

type InstallFn = Arc<dyn Fn(&GroupNode) -> FormResult<Cleanup> + Send + Sync>;

/// Per-item schema kept by the array so items created later receive it too.
#[derive(Clone)]
struct ItemInstaller {
    id: u64,
    install: InstallFn,
}

struct ArrayItem {
    node: GroupNode,
    cleanups: Vec<(u64, Cleanup)>,
}

impl ArrayItem {
    fn destroy(self) {
        for (_, cleanup) in self.cleanups {
            cleanup.run();
        }
        self.node.core().set_parent(None);
    }
}

#[derive(Default)]
struct ArrayState {
    items: Vec<ArrayItem>,
    touched: bool,
    dirty: bool,
    disabled: bool,
}

pub(crate) struct ArrayInner {
    core: NodeCore,
    factory: Arc<NodeFactory>,
    item_schema: GroupSchema,
    initial: Vec<Value>,
    state: RwLock<ArrayState>,
    installers: RwLock<Vec<ItemInstaller>>,
}

/// Ordered list of group items sharing one item shape. Item state follows the item, so
/// removing or inserting only changes positions.
#[derive(Clone)]
pub struct ArrayNode {
    inner: Arc<ArrayInner>,
}

impl ArrayNode {
    pub(crate) fn new(factory: Arc<NodeFactory>, schema: ArraySchema) -> Self {
        let array = Self {
            inner: Arc::new(ArrayInner {
                core: NodeCore::new(factory.runtime().clone()),
                factory,
                item_schema: schema.item,
                initial: schema.initial,
                state: RwLock::new(ArrayState::default()),
                installers: RwLock::new(Vec::new()),
            }),
        };
        let items = array
            .inner
            .initial
            .iter()
            .map(|value| array.create_item(Some(value)))
            .collect();
        write(&array.inner.state).items = items;
        array
    }

    pub(crate) fn from_inner(inner: Arc<ArrayInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn core(&self) -> &NodeCore {
        &self.inner.core
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.core.runtime
    }

    pub fn len(&self) -> usize {
        read(&self.inner.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> Option<GroupNode> {
        read(&self.inner.state)
            .items
            .get(index)
            .map(|item| item.node.clone())
    }

    pub fn items(&self) -> Vec<GroupNode> {
        read(&self.inner.state)
            .items
            .iter()
            .map(|item| item.node.clone())
            .collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(usize, &GroupNode)) {
        for (index, item) in self.items().iter().enumerate() {
            f(index, item);
        }
    }

    pub fn map<R>(&self, mut f: impl FnMut(usize, &GroupNode) -> R) -> Vec<R> {
        self.items()
            .iter()
            .enumerate()
            .map(|(index, item)| f(index, item))
            .collect()
    }

    pub(crate) fn index_of(&self, id: NodeId) -> Option<usize> {
        read(&self.inner.state)
            .items
            .iter()
            .position(|item| item.node.id() == id)
    }

    /// Appends an item built from the item schema, with `initial` overriding its defaults.
    pub fn push(&self, initial: Option<Value>) -> GroupNode {
        let item = self.create_item(initial.as_ref());
        let node = item.node.clone();
        let len = {
            let mut state = write(&self.inner.state);
            state.items.push(item);
            state.dirty = true;
            state.items.len()
        };
        log::debug!("array {} pushed item, length {len}", self.path());
        self.structure_changed();
        node
    }

    pub fn insert(&self, index: usize, initial: Option<Value>) -> FormResult<GroupNode> {
        self.check_index(index, self.len() + 1)?;
        let item = self.create_item(initial.as_ref());
        let node = item.node.clone();
        {
            let mut state = write(&self.inner.state);
            let index = index.min(state.items.len());
            state.items.insert(index, item);
            state.dirty = true;
        }
        log::debug!("array {} inserted item at {index}", self.path());
        self.structure_changed();
        Ok(node)
    }

    /// Removes the item at `index`, running every behavior cleanup installed on it.
    pub fn remove(&self, index: usize) -> FormResult<()> {
        self.check_index(index, self.len())?;
        let removed = {
            let mut state = write(&self.inner.state);
            if index >= state.items.len() {
                None
            } else {
                state.dirty = true;
                Some(state.items.remove(index))
            }
        };
        if let Some(item) = removed {
            item.destroy();
            log::debug!("array {} removed item at {index}", self.path());
            self.structure_changed();
        }
        Ok(())
    }

    pub fn clear(&self) {
        let removed = {
            let mut state = write(&self.inner.state);
            state.dirty = true;
            std::mem::take(&mut state.items)
        };
        for item in removed {
            item.destroy();
        }
        log::debug!("array {} cleared", self.path());
        self.structure_changed();
    }

    pub fn move_item(&self, from: usize, to: usize) -> FormResult<()> {
        let len = self.len();
        self.check_index(from, len)?;
        self.check_index(to, len)?;
        if from == to {
            return Ok(());
        }
        {
            let mut state = write(&self.inner.state);
            if from >= state.items.len() || to >= state.items.len() {
                return Ok(());
            }
            let item = state.items.remove(from);
            state.items.insert(to, item);
            state.dirty = true;
        }
        log::debug!("array {} moved item {from} -> {to}", self.path());
        self.structure_changed();
        Ok(())
    }

    /// Array of every item value, disabled items included.
    pub fn get_raw_value(&self) -> Value {
        Value::Array(
            self.items()
                .iter()
                .map(GroupNode::get_raw_value)
                .collect(),
        )
    }

    pub async fn validate_async(&self) -> bool {
        if self.is_disabled() {
            self.core().clear_validation();
            return true;
        }
        let items = join_all(
            self.items()
                .into_iter()
                .filter(|item| !item.disabled())
                .map(|item| FormNode::Group(item).validate_async())
                .collect::<Vec<_>>(),
        )
        .await;
        let outcome = validation::run_sync(self.core(), &self.value(), &[], &[]);
        let own = validation::conclude(self.clone().into(), outcome).await;
        own && items.into_iter().all(|valid| valid)
    }

    pub fn mark_all_as_touched(&self) {
        write(&self.inner.state).touched = true;
        for item in self.items() {
            item.mark_all_as_touched();
        }
    }

    /// Applies `schema` to every current item and to every item created later.
    pub fn apply_validation_schema<H, F>(&self, schema: F) -> FormResult<()>
    where
        H: PathHandle,
        F: Fn(&mut ValidationBuilder, H) + Send + Sync + 'static,
    {
        let schema = Arc::new(move |builder: &mut ValidationBuilder| {
            schema(builder, H::from_field_path(FieldPath::root()))
        });
        self.add_item_validation(schema, Vec::new()).map(|_| ())
    }

    /// Installs `schema`'s effects on every current and future item. The returned cleanup
    /// removes them from all items and stops installing them on new ones.
    pub fn apply_behavior_schema<H, F>(&self, schema: F) -> FormResult<Cleanup>
    where
        H: PathHandle,
        F: Fn(&mut BehaviorBuilder, H) + Send + Sync + 'static,
    {
        let schema = Arc::new(move |builder: &mut BehaviorBuilder| {
            schema(builder, H::from_field_path(FieldPath::root()))
        });
        self.add_item_behavior(schema)
    }

    /// Items that already exist get the schema immediately; if any of them rejects it, the
    /// items that accepted it are rolled back.
    pub(crate) fn add_item_validation(
        &self,
        schema: Arc<dyn Fn(&mut ValidationBuilder) + Send + Sync>,
        inherited: Vec<Condition>,
    ) -> FormResult<Cleanup> {
        let strict = self.runtime().options().strict_paths;
        let install: InstallFn = Arc::new(move |item: &GroupNode| {
            let mut builder = ValidationBuilder::inheriting(strict, inherited.clone());
            schema(&mut builder);
            builder.finish(item)
        });
        self.add_installer(install)
    }

    pub(crate) fn add_item_behavior(
        &self,
        schema: Arc<dyn Fn(&mut BehaviorBuilder) + Send + Sync>,
    ) -> FormResult<Cleanup> {
        let strict = self.runtime().options().strict_paths;
        let install: InstallFn = Arc::new(move |item: &GroupNode| {
            let mut builder = BehaviorBuilder::new(strict);
            schema(&mut builder);
            builder.finish(item)
        });
        self.add_installer(install)
    }

    fn add_installer(&self, install: InstallFn) -> FormResult<Cleanup> {
        let installer = ItemInstaller {
            id: INSTALLER_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst),
            install,
        };
        for item in self.items() {
            match (installer.install)(&item) {
                Ok(cleanup) => self.attach_cleanup(&item, installer.id, cleanup),
                Err(error) => {
                    self.remove_installer(installer.id);
                    return Err(error);
                }
            }
        }
        write(&self.inner.installers).push(installer.clone());

        let weak = Arc::downgrade(&self.inner);
        Ok(Cleanup::new(move || {
            if let Some(inner) = Weak::upgrade(&weak) {
                ArrayNode::from_inner(inner).remove_installer(installer.id);
            }
        }))
    }

    fn remove_installer(&self, id: u64) {
        write(&self.inner.installers).retain(|installer| installer.id != id);
        let released = {
            let mut state = write(&self.inner.state);
            state
                .items
                .iter_mut()
                .flat_map(|item| {
                    let (released, kept) = std::mem::take(&mut item.cleanups)
                        .into_iter()
                        .partition::<Vec<_>, _>(|(owner, _)| *owner == id);
                    item.cleanups = kept;
                    released
                })
                .collect::<Vec<_>>()
        };
        for (_, cleanup) in released {
            cleanup.run();
        }
    }

    fn attach_cleanup(&self, node: &GroupNode, id: u64, cleanup: Cleanup) {
        let orphaned = {
            let mut state = write(&self.inner.state);
            match state
                .items
                .iter_mut()
                .find(|item| item.node.id() == node.id())
            {
                Some(item) => {
                    item.cleanups.push((id, cleanup));
                    None
                }
                None => Some(cleanup),
            }
        };
        // The item was removed while its effects were being installed.
        if let Some(cleanup) = orphaned {
            cleanup.run();
        }
    }

    fn create_item(&self, initial: Option<&Value>) -> ArrayItem {
        let schema = match initial {
            Some(value) => self.inner.item_schema.with_defaults(value),
            None => self.inner.item_schema.clone(),
        };
        let node = self.inner.factory.build_group(&schema);
        node.core()
            .set_parent(Some(ParentLink::Array(Arc::downgrade(&self.inner))));

        let installers = read(&self.inner.installers).clone();
        let cleanups = installers
            .into_iter()
            .filter_map(|installer| match (installer.install)(&node) {
                Ok(cleanup) => Some((installer.id, cleanup)),
                Err(error) => {
                    log::warn!("item schema skipped for new item: {error}");
                    None
                }
            })
            .collect();
        ArrayItem { node, cleanups }
    }

    fn rebuild(&self, values: &[Value]) {
        let items = values
            .iter()
            .map(|value| self.create_item(Some(value)))
            .collect::<Vec<_>>();
        let removed = std::mem::replace(&mut write(&self.inner.state).items, items);
        for item in removed {
            item.destroy();
        }
    }

    fn structure_changed(&self) {
        if !read(&self.core().rules).is_empty() {
            self.validate_own();
        }
        self.core().emit_change();
    }

    fn validate_own(&self) -> bool {
        let outcome = validation::run_sync(self.core(), &self.value(), &[], &[]);
        validation::schedule(self.clone().into(), outcome)
    }

    fn check_index(&self, index: usize, bound: usize) -> FormResult<()> {
        if index < bound {
            return Ok(());
        }
        Err(FormError::IndexOutOfBounds {
            path: self.path().to_string(),
            index,
            len: self.len(),
        })
    }

    fn path(&self) -> FieldPath {
        FormNode::Array(self.clone()).path()
    }

    fn is_disabled(&self) -> bool {
        read(&self.inner.state).disabled
    }
}

impl Node for ArrayNode {
    fn id(&self) -> NodeId {
        self.inner.core.id
    }

    /// Array of enabled item values.
    fn value(&self) -> Value {
        Value::Array(
            self.items()
                .iter()
                .filter(|item| !item.disabled())
                .map(GroupNode::get_value)
                .collect(),
        )
    }

    fn errors(&self) -> Vec<ValidationError> {
        if self.is_disabled() {
            return Vec::new();
        }
        let mut errors = self.core().own_errors();
        for item in self.items() {
            errors.extend(item.errors());
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
            .items()
            .iter()
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
        read(&self.inner.state).touched || self.items().iter().any(Node::touched)
    }

    fn dirty(&self) -> bool {
        read(&self.inner.state).dirty || self.items().iter().any(Node::dirty)
    }

    fn validate(&self) -> bool {
        if self.is_disabled() {
            self.core().clear_validation();
            return true;
        }
        let mut valid = true;
        for item in self.items() {
            if !item.disabled() {
                valid &= item.validate();
            }
        }
        self.validate_own() && valid
    }

    /// Rebuilds the items from the construction-time list.
    fn reset(&self) {
        self.rebuild(&self.inner.initial);
        {
            let mut state = write(&self.inner.state);
            state.touched = false;
            state.dirty = false;
        }
        self.core().clear_validation();
        self.core().emit_change();
    }

    fn mark_as_touched(&self) {
        self.mark_all_as_touched();
    }

    /// Destroys every current item and builds fresh ones from `value`. Item-local state
    /// (touched, dirty, errors, installed effects) does not survive.
    fn set_value_with(&self, value: Value, options: SetValueOptions) -> FormResult<()> {
        let Value::Array(values) = value else {
            return Err(FormError::ValueShape {
                path: self.path().to_string(),
                reason: "array values must be lists",
            });
        };
        self.runtime().batch(|| {
            self.rebuild(&values);
            if options.mark_dirty {
                write(&self.inner.state).dirty = true;
            }
            log::debug!("array {} rebuilt with {} items", self.path(), values.len());
            if options.emit_event {
                self.structure_changed();
            }
        });
        Ok(())
    }

    fn enable(&self) {
        write(&self.inner.state).disabled = false;
        self.runtime().batch(|| {
            for item in self.items() {
                item.enable();
            }
        });
        self.core().emit_change();
    }

    fn disable(&self) {
        write(&self.inner.state).disabled = true;
        self.runtime().batch(|| {
            for item in self.items() {
                item.disable();
            }
        });
        self.core().clear_validation();
        self.core().emit_change();
    }
}
