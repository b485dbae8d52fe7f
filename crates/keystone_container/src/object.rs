//! Type-erased built values.
//!
//! Every value the container builds travels through the pipeline as an
//! [`Object`]: a reference-counted, type-erased handle that remembers how the
//! value is represented (`Arc<T>` for some `T`, possibly a trait object) and
//! which concrete type produced it.
//!
//! Rust has no runtime subtyping, so turning an `Arc<ColorWidget>` into an
//! `Arc<dyn Widget>` needs an explicit conversion. [`CastRegistry`] holds
//! those conversions, keyed by source representation and target type.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use keystone_container::object::{CastRegistry, Object};
//! use keystone_container::types::TypeKey;
//!
//! trait Widget: Send + Sync {
//!     fn color(&self) -> &str;
//! }
//!
//! struct ColorWidget(String);
//!
//! impl Widget for ColorWidget {
//!     fn color(&self) -> &str {
//!         &self.0
//!     }
//! }
//!
//! let mut casts = CastRegistry::new();
//! casts.register::<ColorWidget, dyn Widget>(|w| w);
//!
//! let object = Object::new(ColorWidget("Red".into()));
//! let widget = casts.conform(&object, &TypeKey::of::<dyn Widget>()).unwrap();
//!
//! assert_eq!(widget.downcast::<dyn Widget>().unwrap().color(), "Red");
//! assert!(widget.ptr_eq(&object));
//! ```

use core::any::Any;
use core::fmt;
use hashbrown::HashMap;
use std::sync::Arc;

use crate::error::KeystoneError;
use crate::types::TypeKey;

/// Marker type used as the representation of null objects.
#[derive(Debug, Clone, Copy)]
pub struct Null;

/// A built, type-erased value.
///
/// Cloning an `Object` clones the handle, never the value. Two objects are
/// the same instance when [`Object::ptr_eq`] holds.
#[derive(Clone)]
pub struct Object {
    value: Option<Arc<dyn Any + Send + Sync>>,
    repr: TypeKey,
    concrete: TypeKey,
    addr: usize,
}

impl Object {
    /// Wraps a freshly built value.
    #[must_use]
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an already shared value, which may be a trait object.
    #[must_use]
    pub fn from_arc<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        let addr = Arc::as_ptr(&value).cast::<()>().addr();
        let key = TypeKey::of::<T>();
        Self {
            value: Some(Arc::new(value)),
            repr: key.clone(),
            concrete: key,
            addr,
        }
    }

    /// The null object.
    #[must_use]
    pub fn null() -> Self {
        let key = TypeKey::of::<Null>();
        Self {
            value: None,
            repr: key.clone(),
            concrete: key,
            addr: 0,
        }
    }

    /// Overrides the concrete type recorded for diagnostics and interception.
    #[must_use]
    pub fn with_concrete_type(mut self, concrete: TypeKey) -> Self {
        self.concrete = concrete;
        self
    }

    /// Returns `true` for the null object.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the shared value as `Arc<T>`, if it is represented as `T`.
    #[must_use]
    pub fn downcast<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.value.as_ref()?.downcast_ref::<Arc<T>>().cloned()
    }

    /// Borrows the value as `&T`, if it is represented as `T`.
    #[must_use]
    pub fn downcast_ref<T: ?Sized + 'static>(&self) -> Option<&T> {
        self.value
            .as_ref()?
            .downcast_ref::<Arc<T>>()
            .map(AsRef::as_ref)
    }

    /// The type the value is currently represented as.
    #[must_use]
    pub fn representation(&self) -> &TypeKey {
        &self.repr
    }

    /// The concrete type that produced the value.
    #[must_use]
    pub fn concrete_type(&self) -> &TypeKey {
        &self.concrete
    }

    /// Returns `true` if both handles point at the same value.
    ///
    /// Casting keeps identity: an `Arc<ColorWidget>` and the `Arc<dyn Widget>`
    /// produced from it compare equal. Null objects are never equal.
    #[must_use]
    pub fn ptr_eq(&self, other: &Object) -> bool {
        !self.is_null() && self.addr == other.addr
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Object(null)");
        }
        f.debug_struct("Object")
            .field("repr", &self.repr)
            .field("concrete", &self.concrete)
            .finish_non_exhaustive()
    }
}

/// The built form of an array instance, in declaration order.
#[derive(Debug, Clone)]
pub struct ObjectArray {
    element_type: TypeKey,
    items: Vec<Object>,
}

impl ObjectArray {
    /// Creates an array of `element_type` holding `items`.
    #[must_use]
    pub fn new(element_type: TypeKey, items: Vec<Object>) -> Self {
        Self {
            element_type,
            items,
        }
    }

    /// The element plugin type.
    #[must_use]
    pub fn element_type(&self) -> &TypeKey {
        &self.element_type
    }

    /// The built elements.
    #[must_use]
    pub fn items(&self) -> &[Object] {
        &self.items
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Downcasts every element to `Arc<T>`.
    ///
    /// Returns `None` if any element is not represented as `T`.
    #[must_use]
    pub fn to_vec<T: ?Sized + 'static>(&self) -> Option<Vec<Arc<T>>> {
        self.items.iter().map(Object::downcast::<T>).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Casts
// ─────────────────────────────────────────────────────────────────────────────

/// Converts an object to another representation, or returns `None` if the
/// object is not of the expected source type.
pub type Caster = Arc<dyn Fn(&Object) -> Option<Object> + Send + Sync>;

/// Builds a [`Caster`] from a typed conversion.
pub fn caster<C, T, F>(cast: F) -> Caster
where
    C: ?Sized + Send + Sync + 'static,
    T: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<C>) -> Arc<T> + Send + Sync + 'static,
{
    Arc::new(move |object: &Object| {
        let source = object.downcast::<C>()?;
        Some(Object::from_arc(cast(source)).with_concrete_type(object.concrete_type().clone()))
    })
}

/// Registered conversions from concrete representations to plugin types.
#[derive(Clone, Default)]
pub struct CastRegistry {
    casts: HashMap<(TypeKey, TypeKey), Caster>,
}

impl CastRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a conversion from `C` to `T`.
    pub fn register<C, T>(&mut self, cast: impl Fn(Arc<C>) -> Arc<T> + Send + Sync + 'static)
    where
        C: ?Sized + Send + Sync + 'static,
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(TypeKey::of::<C>(), TypeKey::of::<T>(), caster(cast));
    }

    /// Registers a prebuilt caster between two keys.
    pub fn insert(&mut self, from: TypeKey, to: TypeKey, caster: Caster) {
        self.casts.insert((from, to), caster);
    }

    /// Copies every conversion of `other` into this registry.
    pub fn extend(&mut self, other: &CastRegistry) {
        for (key, caster) in &other.casts {
            self.casts.insert(key.clone(), Arc::clone(caster));
        }
    }

    /// Returns `true` if objects represented as `from` can be used as `to`.
    #[must_use]
    pub fn can_cast(&self, from: &TypeKey, to: &TypeKey) -> bool {
        from == to || self.casts.contains_key(&(from.clone(), to.clone()))
    }

    /// Number of registered conversions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.casts.len()
    }

    /// Returns `true` if no conversion is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.casts.is_empty()
    }

    /// Converts `object` so that it is represented as `target`.
    ///
    /// Null objects, objects already represented as `target`, and targets
    /// without a Rust identity (named and generic keys) pass through
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::WrongType`] if no conversion is registered.
    pub fn conform(&self, object: &Object, target: &TypeKey) -> Result<Object, KeystoneError> {
        if object.is_null() || target.type_id().is_none() || object.representation() == target {
            return Ok(object.clone());
        }

        self.casts
            .get(&(object.representation().clone(), target.clone()))
            .and_then(|cast| cast(object))
            .ok_or_else(|| KeystoneError::WrongType {
                expected: target.clone(),
                actual: object.concrete_type().clone(),
            })
    }
}

impl fmt::Debug for CastRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.casts.keys()).finish()
    }
}
