pub use crate::behavior::{
    BehaviorBuilder, BehaviorContext, CopyOptions, EnableOptions, WatchOptions,
};
pub use crate::error::{FormError, FormResult, ValidationError};
pub use crate::form::{Form, FormOptions, SubmitState};
pub use crate::node::{ArrayNode, FieldNode, FieldView, FormNode, GroupNode, Node, NodeStatus};
pub use crate::path::{ArrayPath, AsFieldPath, FieldPath, Path, PathHandle, PathNode};
pub use crate::runtime::Cleanup;
pub use crate::schema::{ArraySchema, FieldConfig, GroupSchema, UpdateOn};
pub use crate::validation::{AsyncOptions, TreeContext, ValidationBuilder, validators};
pub use formwork_derive::FormPaths;
