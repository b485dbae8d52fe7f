//! Build policies: how long built objects live.
//!
//! Every family owns a chain of [`BuildPolicy`] decorators built from its
//! [`Lifecycle`]. The innermost link is always [`BuildAlways`], which builds
//! the instance and applies interception. Caching policies wrap it:
//!
//! | Lifecycle | Policy | Cache |
//! |-----------|--------|-------|
//! | `PerRequest` | [`BuildAlways`] | the build session only |
//! | `Singleton` | [`SingletonPolicy`] | the family, for the container's life |
//! | `ThreadLocal` | [`ThreadLocalPolicy`] | the family, one cache per thread |
//! | `Scoped` | [`ScopedPolicy`] | the active [`Scope`] of that name |
//! | `Hybrid` | [`HybridPolicy`] | the active scope, else per thread |

mod scope;

pub use scope::{Scope, ScopeGuard};

use core::fmt;
use hashbrown::HashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::error::KeystoneError;
use crate::instance::{Instance, InstanceId};
use crate::object::Object;
use crate::session::BuildSession;
use crate::types::TypeKey;

/// Cache key of policy caches: plugin type and instance identity.
///
/// Two instances with the same name never share an entry, so replacing a
/// named instance also replaces what it resolves to.
pub type CacheKey = (TypeKey, InstanceId);

fn cache_key(plugin_type: &TypeKey, instance: &Instance) -> CacheKey {
    (plugin_type.clone(), instance.id())
}

/// Objects built at most once per key.
///
/// Each key has its own build slot, taken only while that key builds.
/// Builds of unrelated keys never wait on each other, so nested builds
/// across families or scopes cannot block one another.
#[derive(Default)]
pub(crate) struct ObjectCache {
    objects: RwLock<HashMap<CacheKey, Object>>,
    building: Mutex<HashMap<CacheKey, Arc<ReentrantMutex<()>>>>,
}

impl ObjectCache {
    pub(crate) fn get(&self, key: &CacheKey) -> Option<Object> {
        self.objects.read().get(key).cloned()
    }

    /// Returns the cached object for `key`, or runs `build` and keeps the
    /// first object stored.
    pub(crate) fn get_or_build(
        &self,
        key: CacheKey,
        build: impl FnOnce() -> Result<Object, KeystoneError>,
    ) -> Result<Object, KeystoneError> {
        if let Some(object) = self.get(&key) {
            return Ok(object);
        }

        let slot = Arc::clone(
            self.building
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(ReentrantMutex::new(()))),
        );
        let _guard = slot.lock();
        if let Some(object) = self.get(&key) {
            return Ok(object);
        }

        let built = build();
        let result = built.map(|object| {
            self.objects
                .write()
                .entry(key.clone())
                .or_insert(object)
                .clone()
        });
        self.building.lock().remove(&key);
        result
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, key: CacheKey, object: Object) {
        self.objects.write().insert(key, object);
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub(crate) fn clear(&self) {
        self.objects.write().clear();
    }
}

/// Produces objects for the instances of one family.
pub trait BuildPolicy: Send + Sync + 'static {
    /// Returns the object for `instance`, building it if needed.
    ///
    /// # Errors
    ///
    /// Returns any error raised while building or intercepting.
    fn build(
        &self,
        plugin_type: &TypeKey,
        instance: &Instance,
        session: &mut BuildSession<'_>,
    ) -> Result<Object, KeystoneError>;

    /// Returns a structurally identical chain with empty caches.
    fn clone_policy(&self) -> Arc<dyn BuildPolicy>;

    /// Drops every cached object.
    fn eject_all(&self) {}

    /// Short description for diagnostics.
    fn describe(&self) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Declarative lifetime of a family's objects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// A new object per top-level call.
    #[default]
    PerRequest,
    /// One object for the container's lifetime.
    Singleton,
    /// One object per thread.
    ThreadLocal,
    /// One object per active scope of this name, else per thread.
    Hybrid(Arc<str>),
    /// One object per active scope of this name.
    Scoped {
        /// The scope name.
        scope: Arc<str>,
        /// Fail instead of building uncached when the scope is missing.
        required: bool,
    },
}

impl Lifecycle {
    /// Scoped to `scope`, building uncached when it is not active.
    #[must_use]
    pub fn scoped(scope: impl Into<Arc<str>>) -> Self {
        Self::Scoped {
            scope: scope.into(),
            required: false,
        }
    }

    /// Scoped to `scope`, failing when it is not active.
    #[must_use]
    pub fn scoped_required(scope: impl Into<Arc<str>>) -> Self {
        Self::Scoped {
            scope: scope.into(),
            required: true,
        }
    }

    /// Hybrid lifecycle over the scope called `scope`.
    #[must_use]
    pub fn hybrid(scope: impl Into<Arc<str>>) -> Self {
        Self::Hybrid(scope.into())
    }

    /// Builds the policy chain for this lifecycle.
    #[must_use]
    pub fn create_policy(&self) -> Arc<dyn BuildPolicy> {
        let inner: Arc<dyn BuildPolicy> = Arc::new(BuildAlways);
        match self {
            Self::PerRequest => inner,
            Self::Singleton => Arc::new(SingletonPolicy::new(inner)),
            Self::ThreadLocal => Arc::new(ThreadLocalPolicy::new(inner)),
            Self::Hybrid(scope) => Arc::new(HybridPolicy::new(Arc::clone(scope), inner)),
            Self::Scoped { scope, required } => {
                Arc::new(ScopedPolicy::new(Arc::clone(scope), *required, inner))
            }
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerRequest => f.write_str("PerRequest"),
            Self::Singleton => f.write_str("Singleton"),
            Self::ThreadLocal => f.write_str("ThreadLocal"),
            Self::Hybrid(scope) => write!(f, "Hybrid({scope})"),
            Self::Scoped { scope, .. } => write!(f, "Scoped({scope})"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BuildAlways
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a fresh object every time and applies interception.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildAlways;

impl BuildPolicy for BuildAlways {
    fn build(
        &self,
        plugin_type: &TypeKey,
        instance: &Instance,
        session: &mut BuildSession<'_>,
    ) -> Result<Object, KeystoneError> {
        let object = instance.build(plugin_type, session)?;
        let built_type = object.concrete_type().clone();
        session
            .apply_interception(plugin_type, object)
            .map_err(|source| KeystoneError::TypeInterceptionFailed {
                instance: instance.name().to_string(),
                built_type,
                source,
            })
    }

    fn clone_policy(&self) -> Arc<dyn BuildPolicy> {
        Arc::new(BuildAlways)
    }

    fn describe(&self) -> String {
        "PerRequest".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SingletonPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Caches one object per instance for the container's lifetime.
///
/// Lookups take a read lock. A miss takes the build slot of that instance
/// only, looks again, then builds and stores, so each instance is built once
/// even under contention while other singletons keep building.
pub struct SingletonPolicy {
    inner: Arc<dyn BuildPolicy>,
    cache: ObjectCache,
}

impl SingletonPolicy {
    /// Caches what `inner` builds.
    #[must_use]
    pub fn new(inner: Arc<dyn BuildPolicy>) -> Self {
        Self {
            inner,
            cache: ObjectCache::default(),
        }
    }

    /// Number of cached objects.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl BuildPolicy for SingletonPolicy {
    fn build(
        &self,
        plugin_type: &TypeKey,
        instance: &Instance,
        session: &mut BuildSession<'_>,
    ) -> Result<Object, KeystoneError> {
        self.cache.get_or_build(cache_key(plugin_type, instance), || {
            self.inner.build(plugin_type, instance, session)
        })
    }

    fn clone_policy(&self) -> Arc<dyn BuildPolicy> {
        Arc::new(SingletonPolicy::new(self.inner.clone_policy()))
    }

    fn eject_all(&self) {
        self.cache.clear();
        self.inner.eject_all();
    }

    fn describe(&self) -> String {
        "Singleton".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ThreadLocalPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Caches one object per instance per thread.
pub struct ThreadLocalPolicy {
    inner: Arc<dyn BuildPolicy>,
    caches: Mutex<HashMap<ThreadId, HashMap<CacheKey, Object>>>,
}

impl ThreadLocalPolicy {
    /// Caches what `inner` builds, per thread.
    #[must_use]
    pub fn new(inner: Arc<dyn BuildPolicy>) -> Self {
        Self {
            inner,
            caches: Mutex::new(HashMap::new()),
        }
    }
}

impl BuildPolicy for ThreadLocalPolicy {
    fn build(
        &self,
        plugin_type: &TypeKey,
        instance: &Instance,
        session: &mut BuildSession<'_>,
    ) -> Result<Object, KeystoneError> {
        let thread = std::thread::current().id();
        let key = cache_key(plugin_type, instance);

        let cached = self
            .caches
            .lock()
            .get(&thread)
            .and_then(|cache| cache.get(&key).cloned());
        if let Some(object) = cached {
            return Ok(object);
        }

        // Each thread writes only its own partition.
        let object = self.inner.build(plugin_type, instance, session)?;
        self.caches
            .lock()
            .entry(thread)
            .or_default()
            .insert(key, object.clone());
        Ok(object)
    }

    fn clone_policy(&self) -> Arc<dyn BuildPolicy> {
        Arc::new(ThreadLocalPolicy::new(self.inner.clone_policy()))
    }

    fn eject_all(&self) {
        self.caches.lock().clear();
        self.inner.eject_all();
    }

    fn describe(&self) -> String {
        "ThreadLocal".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScopedPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Caches objects in the session's active [`Scope`] of a given name.
pub struct ScopedPolicy {
    scope: Arc<str>,
    required: bool,
    inner: Arc<dyn BuildPolicy>,
}

impl ScopedPolicy {
    /// Caches what `inner` builds in the scope called `scope`.
    #[must_use]
    pub fn new(scope: Arc<str>, required: bool, inner: Arc<dyn BuildPolicy>) -> Self {
        Self {
            scope,
            required,
            inner,
        }
    }
}

impl BuildPolicy for ScopedPolicy {
    fn build(
        &self,
        plugin_type: &TypeKey,
        instance: &Instance,
        session: &mut BuildSession<'_>,
    ) -> Result<Object, KeystoneError> {
        let Some(scope) = session.scope(&self.scope).cloned() else {
            if self.required {
                return Err(KeystoneError::ScopeNotActive {
                    scope: self.scope.to_string(),
                    instance: instance.name().to_string(),
                });
            }
            return self.inner.build(plugin_type, instance, session);
        };

        scope.get_or_build(cache_key(plugin_type, instance), || {
            self.inner.build(plugin_type, instance, session)
        })
    }

    fn clone_policy(&self) -> Arc<dyn BuildPolicy> {
        Arc::new(ScopedPolicy::new(
            Arc::clone(&self.scope),
            self.required,
            self.inner.clone_policy(),
        ))
    }

    fn eject_all(&self) {
        self.inner.eject_all();
    }

    fn describe(&self) -> String {
        format!("Scoped({})", self.scope)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HybridPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Uses the named scope when it is active, otherwise a per-thread cache.
pub struct HybridPolicy {
    scoped: ScopedPolicy,
    thread_local: ThreadLocalPolicy,
}

impl HybridPolicy {
    /// Caches in the scope called `scope`, or per thread when it is absent.
    #[must_use]
    pub fn new(scope: Arc<str>, inner: Arc<dyn BuildPolicy>) -> Self {
        Self {
            scoped: ScopedPolicy::new(scope, false, Arc::clone(&inner)),
            thread_local: ThreadLocalPolicy::new(inner),
        }
    }
}

impl BuildPolicy for HybridPolicy {
    fn build(
        &self,
        plugin_type: &TypeKey,
        instance: &Instance,
        session: &mut BuildSession<'_>,
    ) -> Result<Object, KeystoneError> {
        if session.scope(&self.scoped.scope).is_some() {
            self.scoped.build(plugin_type, instance, session)
        } else {
            self.thread_local.build(plugin_type, instance, session)
        }
    }

    fn clone_policy(&self) -> Arc<dyn BuildPolicy> {
        Arc::new(HybridPolicy::new(
            Arc::clone(&self.scoped.scope),
            self.thread_local.inner.clone_policy(),
        ))
    }

    fn eject_all(&self) {
        self.thread_local.eject_all();
    }

    fn describe(&self) -> String {
        format!("Hybrid({})", self.scoped.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycles_describe_their_policy() {
        assert_eq!(Lifecycle::PerRequest.create_policy().describe(), "PerRequest");
        assert_eq!(Lifecycle::Singleton.create_policy().describe(), "Singleton");
        assert_eq!(Lifecycle::ThreadLocal.create_policy().describe(), "ThreadLocal");
        assert_eq!(
            Lifecycle::scoped("request").create_policy().describe(),
            "Scoped(request)"
        );
        assert_eq!(
            Lifecycle::hybrid("request").create_policy().describe(),
            "Hybrid(request)"
        );
    }

    #[test]
    fn cloned_policies_keep_their_shape() {
        let policy = Lifecycle::Singleton.create_policy();
        let clone = policy.clone_policy();
        assert_eq!(clone.describe(), "Singleton");
        assert!(!Arc::ptr_eq(&policy, &clone));
    }

    #[test]
    fn object_cache_keeps_objects_per_instance_identity() {
        let cache = ObjectCache::default();
        let plugin_type = TypeKey::of::<u8>();
        let first = Instance::null().named("Same");
        let second = Instance::null().named("Same");

        let a = cache
            .get_or_build(cache_key(&plugin_type, &first), || Ok(Object::new(1_u8)))
            .unwrap();
        let b = cache
            .get_or_build(cache_key(&plugin_type, &second), || Ok(Object::new(2_u8)))
            .unwrap();
        assert_eq!(*a.downcast::<u8>().unwrap(), 1);
        assert_eq!(*b.downcast::<u8>().unwrap(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let cache = ObjectCache::default();
        let key = cache_key(&TypeKey::of::<u8>(), &Instance::null());

        let err = cache.get_or_build(key.clone(), || {
            Err(KeystoneError::FamilyNotFound {
                plugin_type: TypeKey::of::<u8>(),
            })
        });
        assert!(err.is_err());
        assert_eq!(cache.len(), 0);
        assert!(cache.get_or_build(key, || Ok(Object::new(3_u8))).is_ok());
    }

    #[test]
    fn lifecycle_display_matches_describe() {
        let lifecycle = Lifecycle::scoped_required("unit");
        assert_eq!(lifecycle.to_string(), lifecycle.create_policy().describe());
    }
}
