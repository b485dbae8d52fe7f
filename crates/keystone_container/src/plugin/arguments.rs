use hashbrown::HashMap;
use std::sync::Arc;

use crate::error::KeystoneError;
use crate::object::{Object, ObjectArray};
use crate::types::TypeKey;

/// A resolved parameter value.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A single dependency or primitive.
    Single(Object),
    /// An array parameter.
    Many(ObjectArray),
}

/// Resolved arguments handed to a plugin builder.
///
/// Every constructor parameter is present. Setters are present only when
/// mandatory or explicitly configured; read them with [`Arguments::optional`].
#[derive(Debug)]
pub struct Arguments<'a> {
    instance_name: &'a str,
    concrete_type: &'a TypeKey,
    values: HashMap<Arc<str>, Resolved>,
}

impl<'a> Arguments<'a> {
    /// Creates an empty argument set for building `concrete_type`.
    #[must_use]
    pub fn new(instance_name: &'a str, concrete_type: &'a TypeKey) -> Self {
        Self {
            instance_name,
            concrete_type,
            values: HashMap::new(),
        }
    }

    /// Adds a resolved value.
    pub fn insert(&mut self, name: impl Into<Arc<str>>, value: Resolved) {
        self.values.insert(name.into(), value);
    }

    /// Name of the instance being built.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        self.instance_name
    }

    /// The concrete type being built. Closed for generic plugins.
    #[must_use]
    pub fn concrete_type(&self) -> &TypeKey {
        self.concrete_type
    }

    /// Returns `true` if `name` was resolved.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns the raw object for a single-valued argument.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<&Object> {
        match self.values.get(name)? {
            Resolved::Single(object) => Some(object),
            Resolved::Many(_) => None,
        }
    }

    /// Returns the raw array for an array argument.
    #[must_use]
    pub fn objects(&self, name: &str) -> Option<&ObjectArray> {
        match self.values.get(name)? {
            Resolved::Many(array) => Some(array),
            Resolved::Single(_) => None,
        }
    }

    /// Returns a dependency as `Arc<T>`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::MissingArgument`] if `name` was not resolved
    /// and [`KeystoneError::WrongType`] if it is not represented as `T`.
    pub fn get<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>, KeystoneError> {
        let object = self.object(name).ok_or_else(|| self.missing(name))?;
        object
            .downcast::<T>()
            .ok_or_else(|| KeystoneError::WrongType {
                expected: TypeKey::of::<T>(),
                actual: object.concrete_type().clone(),
            })
    }

    /// Returns a copy of a primitive argument.
    ///
    /// # Errors
    ///
    /// Same as [`Arguments::get`].
    pub fn value<T: Clone + 'static>(&self, name: &str) -> Result<T, KeystoneError> {
        self.get::<T>(name).map(|value| T::clone(&value))
    }

    /// Returns an optional setter, or `None` when it was not resolved or is
    /// null.
    #[must_use]
    pub fn optional<T: ?Sized + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.object(name)?.downcast::<T>()
    }

    /// Returns an array argument as `Arc<T>` elements in order.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::MissingArgument`] if `name` was not resolved
    /// and [`KeystoneError::WrongType`] if an element is not represented as
    /// `T`.
    pub fn array<T: ?Sized + 'static>(&self, name: &str) -> Result<Vec<Arc<T>>, KeystoneError> {
        let array = self.objects(name).ok_or_else(|| self.missing(name))?;
        array.to_vec::<T>().ok_or_else(|| KeystoneError::WrongType {
            expected: TypeKey::of::<T>(),
            actual: array.element_type().clone(),
        })
    }

    fn missing(&self, name: &str) -> KeystoneError {
        KeystoneError::MissingArgument {
            argument: name.to_string(),
            concrete_type: self.concrete_type.clone(),
        }
    }
}
