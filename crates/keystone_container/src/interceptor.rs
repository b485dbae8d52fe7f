//! Post-construction interception.
//!
//! Two hooks run after an object is built:
//!
//! - An [`InstanceInterceptor`] attached to a single instance, or to a whole
//!   family, sees every object that instance or family produces.
//! - A [`TypeInterceptor`] registered in the [`InterceptorLibrary`] sees
//!   every object whose concrete type it matches, whatever family built it.
//!
//! Interceptors may inspect the object or replace it, for example with a
//! decorating wrapper.
//!
//! # Example
//!
//! ```
//! use keystone_container::interceptor::{InstanceInterceptor, InterceptorLibrary, TypeInterceptor};
//! use keystone_container::object::Object;
//! use keystone_container::types::TypeKey;
//!
//! let mut library = InterceptorLibrary::new();
//! library.add(TypeInterceptor::for_type::<u32>(InstanceInterceptor::enrich::<u32, u32, _>(
//!     |n| Ok(std::sync::Arc::new(*n + 1)),
//! )));
//!
//! let interceptor = library.find_interceptor(&TypeKey::of::<u32>());
//! let object = interceptor.process(Object::new(41_u32)).unwrap();
//! assert_eq!(object.downcast_ref::<u32>(), Some(&42));
//! ```

use core::fmt;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::error::{BoxError, KeystoneError};
use crate::object::Object;
use crate::types::TypeKey;

/// Transforms a built object.
pub type TransformFn = Arc<dyn Fn(Object) -> Result<Object, BoxError> + Send + Sync>;

/// Decides whether a type interceptor applies to a concrete type.
pub type MatchFn = Arc<dyn Fn(&TypeKey) -> bool + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// InstanceInterceptor
// ─────────────────────────────────────────────────────────────────────────────

/// Transforms objects produced by one instance or family.
#[derive(Clone)]
pub struct InstanceInterceptor {
    transform: TransformFn,
}

impl InstanceInterceptor {
    /// Wraps an untyped transform.
    pub fn new(transform: impl Fn(Object) -> Result<Object, BoxError> + Send + Sync + 'static) -> Self {
        Self {
            transform: Arc::new(transform),
        }
    }

    /// Runs `hook` on the built value and keeps the object unchanged.
    ///
    /// Objects not represented as `T` fail with
    /// [`KeystoneError::WrongType`].
    pub fn on_creation<T, F>(hook: F) -> Self
    where
        T: ?Sized + 'static,
        F: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::new(move |object| {
            let value = object.downcast_ref::<T>().ok_or_else(|| wrong_type::<T>(&object))?;
            hook(value)?;
            Ok(object)
        })
    }

    /// Replaces the built value with the result of `wrap`.
    ///
    /// The replacement is recorded with `U` as its concrete type.
    pub fn enrich<T, U, F>(wrap: F) -> Self
    where
        T: ?Sized + 'static,
        U: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Result<Arc<U>, BoxError> + Send + Sync + 'static,
    {
        Self::new(move |object| {
            let value = object.downcast::<T>().ok_or_else(|| wrong_type::<T>(&object))?;
            Ok(Object::from_arc(wrap(value)?))
        })
    }

    /// Applies the transform.
    ///
    /// # Errors
    ///
    /// Returns whatever the transform returns.
    pub fn process(&self, object: Object) -> Result<Object, BoxError> {
        (self.transform)(object)
    }
}

impl fmt::Debug for InstanceInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstanceInterceptor")
    }
}

fn wrong_type<T: ?Sized + 'static>(object: &Object) -> BoxError {
    Box::new(KeystoneError::WrongType {
        expected: TypeKey::of::<T>(),
        actual: object.concrete_type().clone(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// TypeInterceptor
// ─────────────────────────────────────────────────────────────────────────────

/// An interceptor applied to every object whose concrete type matches.
#[derive(Clone)]
pub struct TypeInterceptor {
    matcher: MatchFn,
    interceptor: InstanceInterceptor,
}

impl TypeInterceptor {
    /// Applies `interceptor` to every concrete type accepted by `matcher`.
    pub fn new(
        matcher: impl Fn(&TypeKey) -> bool + Send + Sync + 'static,
        interceptor: InstanceInterceptor,
    ) -> Self {
        Self {
            matcher: Arc::new(matcher),
            interceptor,
        }
    }

    /// Matches objects whose concrete type is exactly `T`.
    #[must_use]
    pub fn for_type<T: ?Sized + 'static>(interceptor: InstanceInterceptor) -> Self {
        Self::for_key(TypeKey::of::<T>(), interceptor)
    }

    /// Matches objects whose concrete type is `key`.
    #[must_use]
    pub fn for_key(key: TypeKey, interceptor: InstanceInterceptor) -> Self {
        Self::new(move |concrete| *concrete == key, interceptor)
    }

    /// Returns `true` if this interceptor applies to `concrete_type`.
    #[must_use]
    pub fn matches_type(&self, concrete_type: &TypeKey) -> bool {
        (self.matcher)(concrete_type)
    }

    /// Applies the transform.
    ///
    /// # Errors
    ///
    /// Returns whatever the transform returns.
    pub fn process(&self, object: Object) -> Result<Object, BoxError> {
        self.interceptor.process(object)
    }
}

impl fmt::Debug for TypeInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TypeInterceptor")
    }
}

/// The ordered type interceptors matching one concrete type.
#[derive(Clone, Default)]
pub struct CompoundInterceptor {
    interceptors: Arc<[TypeInterceptor]>,
}

impl CompoundInterceptor {
    /// Combines `interceptors`, keeping their order.
    #[must_use]
    pub fn new(interceptors: Vec<TypeInterceptor>) -> Self {
        Self {
            interceptors: Arc::from(interceptors),
        }
    }

    /// Number of combined interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if nothing is combined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Applies every interceptor in registration order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing interceptor.
    pub fn process(&self, object: Object) -> Result<Object, BoxError> {
        self.interceptors
            .iter()
            .try_fold(object, |object, interceptor| interceptor.process(object))
    }
}

impl fmt::Debug for CompoundInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompoundInterceptor({})", self.interceptors.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InterceptorLibrary
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered type interceptors with a per-type cache of matches.
///
/// Lookups read the cache without blocking; a miss takes a coarse lock,
/// re-checks, computes the matching subset, and stores it.
#[derive(Default)]
pub struct InterceptorLibrary {
    interceptors: Vec<TypeInterceptor>,
    analyzed: RwLock<HashMap<TypeKey, CompoundInterceptor>>,
    lock: Mutex<()>,
}

impl InterceptorLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor.
    pub fn add(&mut self, interceptor: TypeInterceptor) {
        self.interceptors.push(interceptor);
        self.analyzed.get_mut().clear();
    }

    /// Appends every interceptor of `other` and invalidates the cache.
    pub fn import_from(&mut self, other: &InterceptorLibrary) {
        self.interceptors.extend(other.interceptors.iter().cloned());
        self.analyzed.get_mut().clear();
    }

    /// Returns the interceptors matching `concrete_type`, in order.
    pub fn find_interceptor(&self, concrete_type: &TypeKey) -> CompoundInterceptor {
        if let Some(found) = self.analyzed.read().get(concrete_type) {
            return found.clone();
        }

        let _guard = self.lock.lock();
        if let Some(found) = self.analyzed.read().get(concrete_type) {
            return found.clone();
        }

        let compound = CompoundInterceptor::new(
            self.interceptors
                .iter()
                .filter(|i| i.matches_type(concrete_type))
                .cloned()
                .collect(),
        );
        self.analyzed
            .write()
            .insert(concrete_type.clone(), compound.clone());
        compound
    }

    /// Number of registered type interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if no type interceptor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Number of concrete types with a cached match.
    #[must_use]
    pub fn analyzed_types(&self) -> usize {
        self.analyzed.read().len()
    }
}

impl Clone for InterceptorLibrary {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for InterceptorLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorLibrary")
            .field("interceptors", &self.interceptors.len())
            .field("analyzed", &self.analyzed_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn append(suffix: &'static str) -> InstanceInterceptor {
        InstanceInterceptor::enrich::<String, String, _>(move |s| Ok(Arc::new(format!("{s}{suffix}"))))
    }

    #[test]
    fn library_applies_matches_in_order() {
        let mut library = InterceptorLibrary::new();
        library.add(TypeInterceptor::for_type::<String>(append("-a")));
        library.add(TypeInterceptor::for_type::<u8>(append("-never")));
        library.add(TypeInterceptor::for_type::<String>(append("-b")));

        let compound = library.find_interceptor(&TypeKey::of::<String>());
        assert_eq!(compound.len(), 2);

        let object = compound.process(Object::new(String::from("x"))).unwrap();
        assert_eq!(object.downcast_ref::<String>().unwrap(), "x-a-b");
    }

    #[test]
    fn import_invalidates_cache() {
        let mut library = InterceptorLibrary::new();
        library.add(TypeInterceptor::for_type::<String>(append("-a")));
        assert_eq!(library.find_interceptor(&TypeKey::of::<String>()).len(), 1);
        assert_eq!(library.analyzed_types(), 1);

        let mut other = InterceptorLibrary::new();
        other.add(TypeInterceptor::for_type::<String>(append("-b")));
        library.import_from(&other);

        assert_eq!(library.analyzed_types(), 0);
        assert_eq!(library.find_interceptor(&TypeKey::of::<String>()).len(), 2);
    }

    #[test]
    fn on_creation_rejects_other_types() {
        let hook = InstanceInterceptor::on_creation::<String, _>(|_| Ok(()));
        assert!(hook.process(Object::new(String::new())).is_ok());

        let err = hook.process(Object::new(7_u8)).unwrap_err();
        let err = err.downcast::<KeystoneError>().unwrap();
        assert_eq!(err.code().as_u16(), 250);
    }

    #[test]
    fn concurrent_lookups_agree() {
        let mut library = InterceptorLibrary::new();
        library.add(TypeInterceptor::for_type::<String>(append("-a")));
        let library = Arc::new(library);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let library = Arc::clone(&library);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    library.find_interceptor(&TypeKey::of::<String>()).len()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(library.analyzed_types(), 1);
    }
}
