use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{FormError, FormResult, ValidationError};
use crate::node::{FieldNode, GroupNode, Node, SetValueOptions};
use crate::path::AsFieldPath;

/// Handle given to behavior callbacks. Paths resolve against the scope the behavior
/// schema was applied to.
///
/// Contexts handed to async watchers belong to one generation of the watched value. Once
/// the value changes again the context goes stale and its writes are dropped.
#[derive(Clone)]
pub struct BehaviorContext {
    scope: GroupNode,
    generation: Option<(Arc<AtomicU64>, u64)>,
}

impl BehaviorContext {
    pub(crate) fn new(scope: GroupNode) -> Self {
        Self {
            scope,
            generation: None,
        }
    }

    pub(crate) fn tracking(scope: GroupNode, generation: Arc<AtomicU64>, ticket: u64) -> Self {
        Self {
            scope,
            generation: Some((generation, ticket)),
        }
    }

    pub fn is_current(&self) -> bool {
        self.generation
            .as_ref()
            .is_none_or(|(generation, ticket)| generation.load(Ordering::SeqCst) == *ticket)
    }

    pub fn get_field(&self, path: impl AsFieldPath) -> Option<Value> {
        let path = path.to_field_path().ok()?;
        self.scope.resolve(&path).ok().map(|node| node.raw_value())
    }

    pub fn get<T: DeserializeOwned>(&self, path: impl AsFieldPath) -> Option<T> {
        self.get_field(path)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn set_field(&self, path: impl AsFieldPath, value: Value) -> FormResult<()> {
        if !self.is_current() {
            log::trace!("stale behavior context dropped a write");
            return Ok(());
        }
        let path = path.to_field_path()?;
        self.scope
            .resolve(&path)?
            .set_value_with(value, SetValueOptions::derived())
    }

    pub fn update_component_props(
        &self,
        path: impl AsFieldPath,
        props: Map<String, Value>,
    ) -> FormResult<()> {
        if !self.is_current() {
            log::trace!("stale behavior context dropped a props update");
            return Ok(());
        }
        self.field(path)?.update_component_props(props);
        Ok(())
    }

    pub fn validate_field(&self, path: impl AsFieldPath) -> FormResult<bool> {
        let path = path.to_field_path()?;
        Ok(self.scope.resolve(&path)?.validate())
    }

    pub fn set_errors(
        &self,
        path: impl AsFieldPath,
        errors: Vec<ValidationError>,
    ) -> FormResult<()> {
        if !self.is_current() {
            return Ok(());
        }
        let path = path.to_field_path()?;
        self.scope.resolve(&path)?.set_errors(errors);
        Ok(())
    }

    pub fn clear_errors(&self, path: impl AsFieldPath) -> FormResult<()> {
        let path = path.to_field_path()?;
        self.scope.resolve(&path)?.clear_errors();
        Ok(())
    }

    /// Value of the whole scope, disabled fields excluded.
    pub fn get_form(&self) -> Value {
        self.scope.get_value()
    }

    pub fn form_node(&self) -> &GroupNode {
        &self.scope
    }

    fn field(&self, path: impl AsFieldPath) -> FormResult<FieldNode> {
        let path = path.to_field_path()?;
        self.scope
            .resolve(&path)?
            .as_field()
            .cloned()
            .ok_or_else(|| FormError::NodeKindMismatch {
                path: path.to_string(),
                expected: "field",
            })
    }
}
