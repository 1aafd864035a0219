use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::{ArrayNode, FieldNode, FormNode, GroupNode};
use crate::runtime::Runtime;
use crate::validation::{AsyncValidator, ValidatorFn};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOn {
    Change,
    Blur,
    Submit,
}

#[derive(Clone)]
pub struct FieldConfig {
    pub value: Value,
    pub validators: Vec<ValidatorFn>,
    pub async_validators: Vec<AsyncValidator>,
    pub disabled: bool,
    pub update_on: Option<UpdateOn>,
    pub component: Option<String>,
    pub component_props: Map<String, Value>,
}

impl FieldConfig {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            validators: Vec::new(),
            async_validators: Vec::new(),
            disabled: false,
            update_on: None,
            component: None,
            component_props: Map::new(),
        }
    }

    pub fn validator(mut self, validator: ValidatorFn) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn async_validator(mut self, validator: AsyncValidator) -> Self {
        self.async_validators.push(validator);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn update_on(mut self, update_on: UpdateOn) -> Self {
        self.update_on = Some(update_on);
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.component_props.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone)]
pub enum FormSchema {
    Field(FieldConfig),
    Group(GroupSchema),
    Array(ArraySchema),
}

#[derive(Clone)]
pub struct ArraySchema {
    pub item: GroupSchema,
    pub initial: Vec<Value>,
}

impl ArraySchema {
    pub fn new(item: GroupSchema) -> Self {
        Self {
            item,
            initial: Vec::new(),
        }
    }

    pub fn with_items(mut self, initial: Vec<Value>) -> Self {
        self.initial = initial;
        self
    }
}

/// Ordered description of a group's children. Declaration order drives value and error
/// ordering.
#[derive(Clone, Default)]
pub struct GroupSchema {
    entries: Vec<(String, FormSchema)>,
}

impl GroupSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(self, key: impl Into<String>, config: FieldConfig) -> Self {
        self.entry(key, FormSchema::Field(config))
    }

    pub fn group(self, key: impl Into<String>, schema: GroupSchema) -> Self {
        self.entry(key, FormSchema::Group(schema))
    }

    pub fn array(self, key: impl Into<String>, item: GroupSchema) -> Self {
        self.entry(key, FormSchema::Array(ArraySchema::new(item)))
    }

    pub fn array_with(self, key: impl Into<String>, array: ArraySchema) -> Self {
        self.entry(key, FormSchema::Array(array))
    }

    pub fn entry(mut self, key: impl Into<String>, schema: FormSchema) -> Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = schema,
            None => self.entries.push((key, schema)),
        }
        self
    }

    pub fn entries(&self) -> &[(String, FormSchema)] {
        &self.entries
    }

    /// Derives a schema from a defaults object: objects become groups, a one-element
    /// array becomes a repeatable item shape, anything else a field.
    pub fn infer(defaults: &Value) -> Self {
        let Value::Object(map) = defaults else {
            return Self::default();
        };
        map.iter().fold(Self::default(), |schema, (key, value)| {
            schema.entry(key.clone(), FormSchema::infer(value))
        })
    }

    /// Copy of this schema whose construction-time values come from `values` where present.
    pub fn with_defaults(&self, values: &Value) -> Self {
        let Value::Object(map) = values else {
            return self.clone();
        };
        let entries = self
            .entries
            .iter()
            .map(|(key, schema)| {
                let schema = match (schema, map.get(key)) {
                    (FormSchema::Field(config), Some(value)) => FormSchema::Field(FieldConfig {
                        value: value.clone(),
                        ..config.clone()
                    }),
                    (FormSchema::Group(group), Some(value)) => {
                        FormSchema::Group(group.with_defaults(value))
                    }
                    (FormSchema::Array(array), Some(Value::Array(items))) => {
                        FormSchema::Array(ArraySchema {
                            item: array.item.clone(),
                            initial: items.clone(),
                        })
                    }
                    (schema, _) => schema.clone(),
                };
                (key.clone(), schema)
            })
            .collect();
        Self { entries }
    }
}

impl FormSchema {
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Object(_) => FormSchema::Group(GroupSchema::infer(value)),
            Value::Array(items) if items.len() == 1 && items[0].is_object() => {
                FormSchema::Array(ArraySchema::new(GroupSchema::infer(&items[0])))
            }
            _ => FormSchema::Field(FieldConfig::new(value.clone())),
        }
    }
}

/// Builds node trees. Arrays keep the factory so items created later share the runtime
/// and options of the tree they join.
#[derive(Clone)]
pub struct NodeFactory {
    runtime: Runtime,
}

impl NodeFactory {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn build(&self, schema: &FormSchema) -> FormNode {
        match schema {
            FormSchema::Field(config) => self.build_field(config).into(),
            FormSchema::Group(group) => self.build_group(group).into(),
            FormSchema::Array(array) => self.build_array(array).into(),
        }
    }

    pub fn build_field(&self, config: &FieldConfig) -> FieldNode {
        let update_on = config
            .update_on
            .unwrap_or(self.runtime.options().default_update_on);
        FieldNode::new(self.runtime.clone(), config.clone(), update_on)
    }

    pub fn build_group(&self, schema: &GroupSchema) -> GroupNode {
        let children = schema
            .entries()
            .iter()
            .map(|(key, child)| (key.clone(), self.build(child)))
            .collect();
        GroupNode::new(self.runtime.clone(), children)
    }

    pub fn build_array(&self, schema: &ArraySchema) -> ArrayNode {
        ArrayNode::new(Arc::new(self.clone()), schema.clone())
    }
}
