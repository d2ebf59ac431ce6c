use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{error::ExecResult, types::Value};

/// An engine-external instance that may be carried by [`Value::Object`].
///
/// Besides identifying itself, an object may take part in the object
/// selector protocol used to resolve paths such as `item.name` or
/// `item[0]`. Every hook is optional; returning `None` (or `false` for
/// setters) means the strategy doesn't apply to this object.
pub trait Object: Any + Send + Sync + fmt::Debug {
    /// Name shown when the object is displayed.
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Resolves `object.name`.
    fn get_property(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Resolves `object[index, ...]`.
    fn get_index(&self, _index: &[Value]) -> Option<Value> {
        None
    }

    /// Writes `object.name`. Returns `false` if not supported.
    fn set_property(&self, _name: &str, _value: Value) -> ExecResult<bool> {
        Ok(false)
    }

    /// Writes `object[index, ...]`. Returns `false` if not supported.
    fn set_index(&self, _index: &[Value], _value: Value) -> ExecResult<bool> {
        Ok(false)
    }
}

/// A shared reference to an [`Object`].
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Object>);

impl ObjectRef {
    pub fn new<O: Object>(object: O) -> ObjectRef {
        ObjectRef(Arc::new(object))
    }

    pub fn from_arc(object: Arc<dyn Object>) -> ObjectRef {
        ObjectRef(object)
    }

    pub fn type_name(&self) -> &str {
        self.0.type_name()
    }

    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The address of the shared object, equal for clones of the same handle.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl std::ops::Deref for ObjectRef {
    type Target = dyn Object;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A mutable property bag. Property names are case-insensitive.
#[derive(Debug, Default)]
pub struct MapObject {
    inner: Mutex<BTreeMap<String, Value>>,
}

impl MapObject {
    pub fn new() -> MapObject {
        MapObject::default()
    }

    pub fn with(self, name: &str, value: impl Into<Value>) -> MapObject {
        self.insert(name, value.into());
        self
    }

    pub fn insert(&self, name: &str, value: Value) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_ascii_lowercase())
            .cloned()
    }
}

impl Object for MapObject {
    fn type_name(&self) -> &str {
        "map"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn get_index(&self, index: &[Value]) -> Option<Value> {
        match index {
            [Value::String(name)] => self.get(name),
            _ => None,
        }
    }

    fn set_property(&self, name: &str, value: Value) -> ExecResult<bool> {
        self.insert(name, value);
        Ok(true)
    }

    fn set_index(&self, index: &[Value], value: Value) -> ExecResult<bool> {
        match index {
            [Value::String(name)] => self.set_property(name, value),
            _ => Ok(false),
        }
    }
}
