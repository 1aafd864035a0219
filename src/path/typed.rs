use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

use rust_decimal::Decimal;
use serde_json::Value;

use super::FieldPath;
use crate::error::FormResult;

/// Anything a schema author can name a node with: typed handles, `FieldPath`, or a
/// dotted string parsed on demand.
pub trait AsFieldPath {
    fn to_field_path(&self) -> FormResult<FieldPath>;
}

impl AsFieldPath for FieldPath {
    fn to_field_path(&self) -> FormResult<FieldPath> {
        Ok(self.clone())
    }
}

impl AsFieldPath for str {
    fn to_field_path(&self) -> FormResult<FieldPath> {
        FieldPath::parse(self)
    }
}

impl AsFieldPath for String {
    fn to_field_path(&self) -> FormResult<FieldPath> {
        FieldPath::parse(self)
    }
}

impl<P: AsFieldPath + ?Sized> AsFieldPath for &P {
    fn to_field_path(&self) -> FormResult<FieldPath> {
        (**self).to_field_path()
    }
}

/// A lazily built handle carrying an accumulated path. Building one never touches a tree.
pub trait PathHandle: AsFieldPath + Clone + Send + Sync + 'static {
    fn from_field_path(path: FieldPath) -> Self;
    fn field_path(&self) -> &FieldPath;
}

/// Maps a model type onto the handle used to address it.
pub trait PathNode {
    type Handle: PathHandle;

    fn handle(path: FieldPath) -> Self::Handle {
        Self::Handle::from_field_path(path)
    }

    fn root() -> Self::Handle {
        Self::handle(FieldPath::root())
    }
}

pub struct Path<T> {
    path: FieldPath,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Path<T> {
    pub fn new(path: FieldPath) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn child<U: PathNode>(&self, key: impl Into<String>) -> U::Handle {
        U::handle(self.path.child(key))
    }

    pub fn cast<U>(&self) -> Path<U> {
        Path::new(self.path.clone())
    }
}

impl Path<Value> {
    pub fn root() -> Self {
        Self::new(FieldPath::root())
    }

    pub fn key(&self, key: impl Into<String>) -> Path<Value> {
        Path::new(self.path.child(key))
    }

    pub fn at(&self, index: usize) -> Path<Value> {
        Path::new(self.path.index(index))
    }
}

impl<T> Clone for Path<T> {
    fn clone(&self) -> Self {
        Self::new(self.path.clone())
    }
}

impl<T> Debug for Path<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Path").field(&self.path.to_string()).finish()
    }
}

impl<T> AsFieldPath for Path<T> {
    fn to_field_path(&self) -> FormResult<FieldPath> {
        Ok(self.path.clone())
    }
}

impl<T: 'static> PathHandle for Path<T> {
    fn from_field_path(path: FieldPath) -> Self {
        Self::new(path)
    }

    fn field_path(&self) -> &FieldPath {
        &self.path
    }
}

pub struct ArrayPath<T> {
    path: FieldPath,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PathNode> ArrayPath<T> {
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn at(&self, index: usize) -> T::Handle {
        T::handle(self.path.index(index))
    }

    /// Handle relative to one item's own root, for item-level schemas.
    pub fn item(&self) -> T::Handle {
        T::root()
    }
}

impl<T> Clone for ArrayPath<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for ArrayPath<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ArrayPath")
            .field(&self.path.to_string())
            .finish()
    }
}

impl<T> AsFieldPath for ArrayPath<T> {
    fn to_field_path(&self) -> FormResult<FieldPath> {
        Ok(self.path.clone())
    }
}

impl<T: 'static> PathHandle for ArrayPath<T> {
    fn from_field_path(path: FieldPath) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    fn field_path(&self) -> &FieldPath {
        &self.path
    }
}

macro_rules! leaf_path_nodes {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PathNode for $ty {
                type Handle = Path<$ty>;
            }
        )*
    };
}

leaf_path_nodes!(
    bool, String, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, Decimal, Value,
);

impl<T: 'static> PathNode for Option<T> {
    type Handle = Path<Option<T>>;
}

impl<T: PathNode + 'static> PathNode for Vec<T> {
    type Handle = ArrayPath<T>;
}
