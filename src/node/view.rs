use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Read-only snapshot of a field for a rendering layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldView {
    pub value: Value,
    pub errors: Vec<ValidationError>,
    pub touched: bool,
    pub dirty: bool,
    pub disabled: bool,
    pub pending: bool,
    /// Errors are only shown once the user interacted with the field.
    pub should_show_error: bool,
    pub component: Option<String>,
    pub component_props: Map<String, Value>,
}

impl FieldView {
    pub fn first_error(&self) -> Option<&ValidationError> {
        self.errors.first()
    }

    pub fn display_error(&self) -> Option<&str> {
        if !self.should_show_error {
            return None;
        }
        self.first_error().map(ValidationError::message)
    }
}
