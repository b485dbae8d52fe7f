//! Instances: named recipes for building one object of a plugin type.
//!
//! An [`Instance`] is what a family hands out when asked for a default or a
//! named object. Each variant knows one way of producing the object:
//!
//! | Constructor | Builds |
//! |-------------|--------|
//! | [`Instance::literal`] | the same pre-built value every time |
//! | [`Instance::lambda`] | whatever a closure over the session returns |
//! | [`Instance::configured`] | a plugin's builder with resolved arguments |
//! | [`Instance::reference`] | another instance of the family, by name |
//! | [`Instance::prototype`] | a fresh clone of a template |
//! | [`Instance::default_instance`] | the family's current default |
//! | [`Instance::array`] | an [`ObjectArray`] of child instances, in order |
//! | [`Instance::null`] | the null object |
//!
//! Instances are cheap to clone; clones keep the same [`InstanceId`].
//!
//! # Example
//!
//! ```
//! use keystone_container::instance::{ConfiguredInstance, Instance};
//!
//! struct ColorWidget;
//!
//! let red = Instance::configured(
//!     ConfiguredInstance::of::<ColorWidget>().with_property("color", "Red"),
//! )
//! .named("Red");
//!
//! assert_eq!(red.name(), "Red");
//! ```

mod configured;

pub use configured::{ConfiguredInstance, Setting};

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{BoxError, KeystoneError};
use crate::interceptor::InstanceInterceptor;
use crate::object::{Object, ObjectArray};
use crate::session::BuildSession;
use crate::types::TypeKey;

/// Builds an object through the session.
pub type LambdaFn =
    Arc<dyn Fn(&mut BuildSession<'_>) -> Result<Object, BoxError> + Send + Sync>;

/// Produces a fresh copy of a prototype.
pub type PrototypeFn = Arc<dyn Fn() -> Object + Send + Sync>;

/// Process-unique identity of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// How an instance produces its object.
#[derive(Clone)]
pub enum InstanceKind {
    /// A pre-built object.
    Literal(Object),
    /// A closure over the build session.
    Lambda(LambdaFn),
    /// A plugin builder with configured arguments.
    Configured(ConfiguredInstance),
    /// Another instance of the same family.
    Referenced(Arc<str>),
    /// A template cloned on every build.
    Prototype {
        /// The template's type.
        concrete_type: TypeKey,
        /// Clones the template.
        create: PrototypeFn,
    },
    /// The family's current default.
    Default,
    /// Child instances built into an [`ObjectArray`].
    Array {
        /// The element plugin type.
        element_type: TypeKey,
        /// The children, in build order.
        children: Vec<Instance>,
    },
    /// The null object.
    Null,
}

/// A named recipe for one object.
#[derive(Clone)]
pub struct Instance {
    id: InstanceId,
    name: Arc<str>,
    kind: InstanceKind,
    interceptor: Option<InstanceInterceptor>,
}

impl Instance {
    /// Creates an instance with a generated unique name.
    #[must_use]
    pub fn new(kind: InstanceKind) -> Self {
        Self {
            id: InstanceId::next(),
            name: Arc::from(nanoid::nanoid!()),
            kind,
            interceptor: None,
        }
    }

    /// Always returns `value`.
    #[must_use]
    pub fn literal<T: Send + Sync + 'static>(value: T) -> Self {
        Self::object(Object::new(value))
    }

    /// Always returns the shared `value`, which may be a trait object.
    #[must_use]
    pub fn literal_arc<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self::object(Object::from_arc(value))
    }

    /// Always returns `object`.
    #[must_use]
    pub fn object(object: Object) -> Self {
        Self::new(InstanceKind::Literal(object))
    }

    /// Builds with a closure over the session.
    pub fn lambda<F>(build: F) -> Self
    where
        F: Fn(&mut BuildSession<'_>) -> Result<Object, BoxError> + Send + Sync + 'static,
    {
        Self::new(InstanceKind::Lambda(Arc::new(build)))
    }

    /// Builds a `T` with a closure that ignores the session.
    pub fn factory<T, F>(create: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::lambda(move |_| Ok(Object::new(create())))
    }

    /// Builds through a plugin.
    #[must_use]
    pub fn configured(configured: ConfiguredInstance) -> Self {
        Self::new(InstanceKind::Configured(configured))
    }

    /// Delegates to the instance named `name` in the same family.
    #[must_use]
    pub fn reference(name: impl Into<Arc<str>>) -> Self {
        Self::new(InstanceKind::Referenced(name.into()))
    }

    /// Returns a fresh clone of `template` on every build.
    #[must_use]
    pub fn prototype<T: Clone + Send + Sync + 'static>(template: T) -> Self {
        Self::new(InstanceKind::Prototype {
            concrete_type: TypeKey::of::<T>(),
            create: Arc::new(move || Object::new(template.clone())),
        })
    }

    /// Defers to the family's current default.
    #[must_use]
    pub fn default_instance() -> Self {
        Self::new(InstanceKind::Default)
    }

    /// Builds `children` as an array of `element_type`.
    #[must_use]
    pub fn array(element_type: TypeKey, children: Vec<Instance>) -> Self {
        Self::new(InstanceKind::Array {
            element_type,
            children,
        })
    }

    /// Builds `children` as an array of `T`.
    #[must_use]
    pub fn array_of<T: ?Sized + 'static>(children: Vec<Instance>) -> Self {
        Self::array(TypeKey::of::<T>(), children)
    }

    /// Always builds a null object.
    #[must_use]
    pub fn null() -> Self {
        Self::new(InstanceKind::Null)
    }

    /// Sets the instance name.
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches an interceptor run after every build of this instance.
    #[must_use]
    pub fn intercept_with(mut self, interceptor: InstanceInterceptor) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Identity used for caching.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the instance builds.
    #[must_use]
    pub fn kind(&self) -> &InstanceKind {
        &self.kind
    }

    /// The interceptor of this instance, if any.
    #[must_use]
    pub fn interceptor(&self) -> Option<&InstanceInterceptor> {
        self.interceptor.as_ref()
    }

    /// The concrete type this instance builds, when known up front.
    #[must_use]
    pub fn concrete_type(&self) -> Option<TypeKey> {
        match &self.kind {
            InstanceKind::Literal(object) => Some(object.concrete_type().clone()),
            InstanceKind::Configured(configured) => configured.plugged_type().cloned(),
            InstanceKind::Prototype { concrete_type, .. } => Some(concrete_type.clone()),
            InstanceKind::Array { .. } => Some(TypeKey::of::<ObjectArray>()),
            InstanceKind::Lambda(_)
            | InstanceKind::Referenced(_)
            | InstanceKind::Default
            | InstanceKind::Null => None,
        }
    }

    /// Short description of the variant for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.kind {
            InstanceKind::Literal(object) => format!("Literal {}", object.concrete_type()),
            InstanceKind::Lambda(_) => "Lambda".to_string(),
            InstanceKind::Configured(configured) => format!("Configured {configured}"),
            InstanceKind::Referenced(name) => format!("Reference to '{name}'"),
            InstanceKind::Prototype { concrete_type, .. } => format!("Prototype {concrete_type}"),
            InstanceKind::Default => "Default".to_string(),
            InstanceKind::Array {
                element_type,
                children,
            } => format!("Array of {} {element_type}", children.len()),
            InstanceKind::Null => "Null".to_string(),
        }
    }

    /// Builds the object for `plugin_type`.
    ///
    /// Pushes a build frame, builds the variant, applies this instance's
    /// interceptor, and pops the frame, also on failure.
    ///
    /// # Errors
    ///
    /// Keystone errors raised while building pass through unchanged; other
    /// failures are wrapped in [`KeystoneError::ConstructionFailed`], and
    /// interceptor failures in
    /// [`KeystoneError::InstanceInterceptionFailed`].
    pub fn build(&self, plugin_type: &TypeKey, session: &mut BuildSession<'_>) -> Result<Object, KeystoneError> {
        session.push_frame(plugin_type, self);
        let result = self
            .build_kind(plugin_type, session)
            .and_then(|object| self.intercept(plugin_type, object));
        session.pop_frame();
        result
    }

    fn build_kind(&self, plugin_type: &TypeKey, session: &mut BuildSession<'_>) -> Result<Object, KeystoneError> {
        match &self.kind {
            InstanceKind::Literal(object) => Ok(object.clone()),
            InstanceKind::Lambda(build) => build(session)
                .map_err(|err| KeystoneError::from_build_error(err, &self.name, plugin_type)),
            InstanceKind::Configured(configured) => configured.build(plugin_type, &self.name, session),
            InstanceKind::Referenced(name) => session.create_named(plugin_type, name),
            InstanceKind::Prototype { create, .. } => Ok(create()),
            InstanceKind::Default => session.create_default(plugin_type),
            InstanceKind::Array {
                element_type,
                children,
            } => session
                .create_array(element_type, Some(children.as_slice()))
                .map(Object::new),
            InstanceKind::Null => Ok(Object::null()),
        }
    }

    fn intercept(&self, plugin_type: &TypeKey, object: Object) -> Result<Object, KeystoneError> {
        let Some(interceptor) = &self.interceptor else {
            return Ok(object);
        };

        interceptor
            .process(object)
            .map_err(|source| KeystoneError::InstanceInterceptionFailed {
                instance: self.name.to_string(),
                plugin_type: plugin_type.clone(),
                source,
            })
    }

    /// Closes this instance over generic `args` for a templated family.
    ///
    /// Configured instances of open generic types, references, defaults and
    /// nulls carry over; instances bound to a specific object cannot and
    /// yield `None`. The clone gets a fresh id and keeps the name.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::InvalidGenericArguments`] if the arity does
    /// not match.
    pub fn close_generic(&self, args: &[TypeKey]) -> Result<Option<Instance>, KeystoneError> {
        let kind = match &self.kind {
            InstanceKind::Configured(configured) => match configured.close(args)? {
                Some(closed) => InstanceKind::Configured(closed),
                None => return Ok(None),
            },
            InstanceKind::Referenced(_) | InstanceKind::Default | InstanceKind::Null => self.kind.clone(),
            InstanceKind::Literal(_)
            | InstanceKind::Lambda(_)
            | InstanceKind::Prototype { .. }
            | InstanceKind::Array { .. } => return Ok(None),
        };

        Ok(Some(Self {
            id: InstanceId::next(),
            name: Arc::clone(&self.name),
            kind,
            interceptor: self.interceptor.clone(),
        }))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.describe())
            .finish_non_exhaustive()
    }
}
