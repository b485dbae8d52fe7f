use core::cell::RefCell;
use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;

use super::{CacheKey, ObjectCache};
use crate::error::KeystoneError;
use crate::object::Object;

thread_local! {
    static AMBIENT: RefCell<Vec<Arc<Scope>>> = const { RefCell::new(Vec::new()) };
}

/// A named, externally owned object cache.
///
/// Scoped and hybrid lifecycles store objects here instead of in the policy.
/// The owner decides how long the scope lives, typically one unit of work
/// such as a request. Dropping the last handle drops every cached object.
///
/// # Example
///
/// ```
/// use keystone_container::policy::Scope;
///
/// let request = Scope::new("request");
/// {
///     let _guard = request.enter();
///     assert_eq!(Scope::ambient().len(), 1);
/// }
/// assert!(Scope::ambient().is_empty());
/// ```
pub struct Scope {
    name: Arc<str>,
    objects: ObjectCache,
}

impl Scope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            objects: ObjectCache::default(),
        })
    }

    /// The scope name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes this scope ambient on the current thread until the guard drops.
    #[must_use = "the scope is only ambient while the guard is alive"]
    pub fn enter(self: &Arc<Self>) -> ScopeGuard {
        AMBIENT.with_borrow_mut(|stack| stack.push(Arc::clone(self)));
        ScopeGuard {
            scope: Arc::clone(self),
            _not_send: PhantomData,
        }
    }

    /// Scopes entered on the current thread, outermost first.
    #[must_use]
    pub fn ambient() -> Vec<Arc<Scope>> {
        AMBIENT.with_borrow(Clone::clone)
    }

    /// Number of cached objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.len() == 0
    }

    /// Drops every cached object.
    pub fn clear(&self) {
        self.objects.clear();
    }

    pub(crate) fn get_or_build(
        &self,
        key: CacheKey,
        build: impl FnOnce() -> Result<Object, KeystoneError>,
    ) -> Result<Object, KeystoneError> {
        self.objects.get_or_build(key, build)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("objects", &self.len())
            .finish()
    }
}

/// Keeps a scope ambient on the thread that entered it.
pub struct ScopeGuard {
    scope: Arc<Scope>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        AMBIENT.with_borrow_mut(|stack| {
            if let Some(pos) = stack.iter().rposition(|s| Arc::ptr_eq(s, &self.scope)) {
                stack.remove(pos);
            }
        });
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeGuard({})", self.scope.name)
    }
}
