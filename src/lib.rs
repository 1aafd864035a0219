pub mod behavior;
pub mod error;
pub mod form;
pub mod node;
pub mod path;
pub mod prelude;
pub mod runtime;
pub mod schema;
pub mod validation;
pub mod value;

#[cfg(test)]
mod tests;

pub use behavior::{BehaviorBuilder, BehaviorContext, CopyOptions, EnableOptions, WatchOptions};
pub use error::{FormError, FormResult, ValidationError};
pub use form::{Form, FormOptions, SubmitState};
pub use formwork_derive::FormPaths;
pub use node::{
    ArrayNode, FieldNode, FieldView, FormNode, GroupNode, Node, NodeId, NodeStatus,
    SetValueOptions,
};
pub use path::{
    ArrayPath, AsFieldPath, FieldPath, Path, PathHandle, PathNode, PathSegment,
    get_value_by_path, resolve, set_value_by_path,
};
pub use runtime::{Cleanup, Runtime};
pub use schema::{ArraySchema, FieldConfig, FormSchema, GroupSchema, NodeFactory, UpdateOn};
pub use validation::{AsyncOptions, AsyncValidator, RuleHandle, TreeContext, ValidationBuilder};
