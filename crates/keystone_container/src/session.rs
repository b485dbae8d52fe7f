//! Per-request construction context.
//!
//! A [`BuildSession`] is created for every top-level resolution call. It
//! snapshots the container's current defaults, caches every object built
//! during the call so a dependency requested twice is built once, tracks the
//! build stack for diagnostics, and detects cyclic dependencies.
//!
//! Sessions are never shared across threads.

use core::fmt;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{BoxError, KeystoneError};
use crate::instance::{Instance, InstanceId, Setting};
use crate::object::{Object, ObjectArray};
use crate::pipeline::{Pipeline, ResolutionView};
use crate::policy::{BuildAlways, BuildPolicy, Scope};
use crate::types::TypeKey;

// ─────────────────────────────────────────────────────────────────────────────
// ExplicitArguments
// ─────────────────────────────────────────────────────────────────────────────

/// Values passed to a single resolution call.
///
/// Named values override constructor parameters and setters of that name
/// anywhere in the object graph. Typed defaults override the default instance
/// of their plugin type.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use keystone_container::session::ExplicitArguments;
///
/// let args = ExplicitArguments::new()
///     .with("retries", 3_u32)
///     .with_property("endpoint", "https://example.com")
///     .with_default::<String>(Arc::new(String::from("override")));
///
/// assert!(!args.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExplicitArguments {
    properties: HashMap<Arc<str>, Setting>,
    defaults: HashMap<TypeKey, Object>,
}

impl ExplicitArguments {
    /// Creates empty arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a named argument to a typed value.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, name: impl Into<Arc<str>>, value: T) -> Self {
        self.properties
            .insert(name.into(), Setting::Typed(Object::new(value)));
        self
    }

    /// Sets a named argument to a raw string, parsed like configuration.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<Arc<str>>, raw: impl Into<String>) -> Self {
        self.properties
            .insert(name.into(), Setting::Raw(raw.into()));
        self
    }

    /// Overrides the default of plugin type `T` for this call.
    #[must_use]
    pub fn with_default<T: ?Sized + Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.defaults
            .insert(TypeKey::of::<T>(), Object::from_arc(value));
        self
    }

    /// Overrides the default of `plugin_type` with a prebuilt object.
    #[must_use]
    pub fn with_object(mut self, plugin_type: TypeKey, object: Object) -> Self {
        self.defaults.insert(plugin_type, object);
        self
    }

    /// The property value passed for `name`.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Setting> {
        self.properties.get(name)
    }

    /// The object passed as default for `plugin_type`.
    #[must_use]
    pub fn default_for(&self, plugin_type: &TypeKey) -> Option<&Object> {
        self.defaults.get(plugin_type)
    }

    /// Returns `true` if nothing was passed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.defaults.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BuildStack
// ─────────────────────────────────────────────────────────────────────────────

/// One level of the build stack.
#[derive(Debug, Clone)]
pub struct BuildFrame {
    /// The plugin type requested at this level.
    pub plugin_type: TypeKey,
    /// The instance being built.
    pub instance_name: Arc<str>,
    /// The concrete type, when known before building.
    pub concrete_type: Option<TypeKey>,
}

impl fmt::Display for BuildFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ('{}'", self.plugin_type, self.instance_name)?;
        if let Some(concrete) = &self.concrete_type {
            write!(f, ", {concrete}")?;
        }
        f.write_str(")")
    }
}

/// The chain of instances currently being built, root first.
#[derive(Debug, Clone, Default)]
pub struct BuildStack {
    frames: Vec<BuildFrame>,
}

impl BuildStack {
    /// The innermost frame.
    #[must_use]
    pub fn current(&self) -> Option<&BuildFrame> {
        self.frames.last()
    }

    /// The frame that requested the innermost one.
    #[must_use]
    pub fn parent(&self) -> Option<&BuildFrame> {
        self.frames.len().checked_sub(2).map(|i| &self.frames[i])
    }

    /// The outermost frame.
    #[must_use]
    pub fn root(&self) -> Option<&BuildFrame> {
        self.frames.first()
    }

    /// Number of frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames from outermost to innermost.
    pub fn iter(&self) -> impl Iterator<Item = &BuildFrame> {
        self.frames.iter()
    }
}

impl fmt::Display for BuildStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, frame) in self.frames.iter().enumerate() {
            if depth > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{:indent$}{frame}", "", indent = depth * 2)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BuildSession
// ─────────────────────────────────────────────────────────────────────────────

type SessionKey = (TypeKey, InstanceId);

/// Construction context for one top-level resolution call.
pub struct BuildSession<'a> {
    pipeline: &'a Pipeline,
    view: Arc<ResolutionView>,
    cache: HashMap<SessionKey, Object>,
    in_progress: HashSet<SessionKey>,
    stack: BuildStack,
    arguments: ExplicitArguments,
    scopes: Vec<Arc<Scope>>,
}

impl<'a> BuildSession<'a> {
    /// Opens a session over the pipeline's current view.
    ///
    /// Explicit scopes take precedence over the thread's ambient scopes;
    /// among ambient scopes the innermost wins.
    pub(crate) fn new(
        pipeline: &'a Pipeline,
        arguments: ExplicitArguments,
        mut scopes: Vec<Arc<Scope>>,
    ) -> Self {
        scopes.extend(Scope::ambient().into_iter().rev());
        Self {
            pipeline,
            view: pipeline.view(),
            cache: HashMap::new(),
            in_progress: HashSet::new(),
            stack: BuildStack::default(),
            arguments,
            scopes,
        }
    }

    /// Builds the instance named `name` of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::UnknownInstance`] if no such instance exists,
    /// or any error raised while building it.
    pub fn create_named(&mut self, plugin_type: &TypeKey, name: &str) -> Result<Object, KeystoneError> {
        let instance = self
            .find_instance(plugin_type, name)
            .ok_or_else(|| KeystoneError::UnknownInstance {
                name: name.to_string(),
                plugin_type: plugin_type.clone(),
            })?;
        self.create_instance(plugin_type, &instance)
    }

    /// Builds `instance` as `plugin_type`.
    ///
    /// The object is built at most once per session, through the family's
    /// build policy, and conformed to `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::CyclicDependency`] if the instance is already
    /// being built in this session, or any error raised while building it.
    pub fn create_instance(
        &mut self,
        plugin_type: &TypeKey,
        instance: &Instance,
    ) -> Result<Object, KeystoneError> {
        let key = (plugin_type.clone(), instance.id());
        if let Some(object) = self.cache.get(&key) {
            return Ok(object.clone());
        }

        if !self.in_progress.insert(key.clone()) {
            return Err(KeystoneError::CyclicDependency {
                instance: instance.name().to_string(),
                plugin_type: plugin_type.clone(),
                stack: self.stack.to_string(),
            });
        }

        let built = match self.pipeline.find_family(plugin_type, &self.view) {
            Some(family) => family.policy().build(plugin_type, instance, self),
            None => BuildAlways.build(plugin_type, instance, self),
        };
        self.in_progress.remove(&key);

        let object = self.pipeline.casts().conform(&built?, plugin_type)?;
        self.cache.insert(key, object.clone());
        Ok(object)
    }

    /// Builds the default instance of `plugin_type`.
    ///
    /// An explicit default passed to this call wins, then the profile and
    /// container overrides, then the family's own default.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::NoDefaultInstance`] if the family has no
    /// default, [`KeystoneError::FamilyNotFound`] if the type is unknown, or
    /// any error raised while building.
    pub fn create_default(&mut self, plugin_type: &TypeKey) -> Result<Object, KeystoneError> {
        if let Some(object) = self.arguments.default_for(plugin_type) {
            let object = object.clone();
            return self.pipeline.casts().conform(&object, plugin_type);
        }

        if let Some(instance) = self.view.defaults.default_for(plugin_type).cloned() {
            return self.create_instance(plugin_type, &instance);
        }

        let family = self.pipeline.family(plugin_type, &self.view)?;
        let instance = family
            .default_instance()
            .cloned()
            .ok_or_else(|| KeystoneError::NoDefaultInstance {
                plugin_type: plugin_type.clone(),
            })?;
        self.create_instance(plugin_type, &instance)
    }

    /// Builds an array of `element_type`.
    ///
    /// `None` builds every instance of the element type in registration
    /// order; `Some` builds exactly the given instances in order.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while building an element.
    pub fn create_array(
        &mut self,
        element_type: &TypeKey,
        instances: Option<&[Instance]>,
    ) -> Result<ObjectArray, KeystoneError> {
        let instances = match instances {
            Some(list) => list.to_vec(),
            None => self.all_instances(element_type),
        };

        let items = instances
            .iter()
            .map(|instance| self.create_instance(element_type, instance))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ObjectArray::new(element_type.clone(), items))
    }

    /// Runs the family interceptors of `plugin_type`, then the type
    /// interceptors matching the object's concrete type.
    ///
    /// # Errors
    ///
    /// Returns the first interceptor failure.
    pub fn apply_interception(&self, plugin_type: &TypeKey, object: Object) -> Result<Object, BoxError> {
        let object = match self.pipeline.find_family(plugin_type, &self.view) {
            Some(family) => family
                .interceptors()
                .iter()
                .try_fold(object, |object, interceptor| interceptor.process(object))?,
            None => object,
        };

        if object.is_null() {
            return Ok(object);
        }

        self.pipeline
            .interceptors()
            .find_interceptor(object.concrete_type())
            .process(object)
    }

    /// Resolves the default `T`.
    ///
    /// # Errors
    ///
    /// Same as [`BuildSession::create_default`], plus
    /// [`KeystoneError::WrongType`] if the object is not represented as `T`.
    pub fn get<T: ?Sized + 'static>(&mut self) -> Result<Arc<T>, KeystoneError> {
        let object = self.create_default(&TypeKey::of::<T>())?;
        downcast_object(&object)
    }

    /// Resolves the instance of `T` named `name`.
    ///
    /// # Errors
    ///
    /// Same as [`BuildSession::create_named`].
    pub fn get_named<T: ?Sized + 'static>(&mut self, name: &str) -> Result<Arc<T>, KeystoneError> {
        let object = self.create_named(&TypeKey::of::<T>(), name)?;
        downcast_object(&object)
    }

    /// Resolves every instance of `T`.
    ///
    /// # Errors
    ///
    /// Same as [`BuildSession::create_array`].
    pub fn get_all<T: ?Sized + 'static>(&mut self) -> Result<Vec<Arc<T>>, KeystoneError> {
        let array = self.create_array(&TypeKey::of::<T>(), None)?;
        array
            .items()
            .iter()
            .map(downcast_object::<T>)
            .collect()
    }

    /// Returns the active scope called `name`.
    #[must_use]
    pub fn scope(&self, name: &str) -> Option<&Arc<Scope>> {
        self.scopes.iter().find(|scope| scope.name() == name)
    }

    /// Instances currently being built.
    #[must_use]
    pub fn build_stack(&self) -> &BuildStack {
        &self.stack
    }

    /// The plugin type that requested the instance currently being built.
    #[must_use]
    pub fn parent_type(&self) -> Option<&TypeKey> {
        self.stack.parent().map(|frame| &frame.plugin_type)
    }

    /// Explicit arguments of this call.
    #[must_use]
    pub fn arguments(&self) -> &ExplicitArguments {
        &self.arguments
    }

    pub(crate) fn pipeline(&self) -> &'a Pipeline {
        self.pipeline
    }

    pub(crate) fn view(&self) -> &ResolutionView {
        &self.view
    }

    pub(crate) fn push_frame(&mut self, plugin_type: &TypeKey, instance: &Instance) {
        let frame = BuildFrame {
            plugin_type: plugin_type.clone(),
            instance_name: Arc::from(instance.name()),
            concrete_type: instance.concrete_type(),
        };
        tracing::trace!(depth = self.stack.depth(), frame = %frame, "building instance");
        self.stack.frames.push(frame);
    }

    pub(crate) fn pop_frame(&mut self) {
        self.stack.frames.pop();
    }

    /// Injected instances first, then the family's own.
    fn find_instance(&self, plugin_type: &TypeKey, name: &str) -> Option<Instance> {
        if let Some(instance) = self
            .view
            .injected_for(plugin_type)
            .iter()
            .find(|instance| instance.name() == name)
        {
            return Some(instance.clone());
        }

        self.pipeline
            .find_family(plugin_type, &self.view)?
            .instance(name)
            .cloned()
    }

    fn all_instances(&self, plugin_type: &TypeKey) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self
            .pipeline
            .find_family(plugin_type, &self.view)
            .map(|family| family.instances().to_vec())
            .unwrap_or_default();

        for injected in self.view.injected_for(plugin_type) {
            match instances.iter_mut().find(|i| i.name() == injected.name()) {
                Some(existing) => *existing = injected.clone(),
                None => instances.push(injected.clone()),
            }
        }
        instances
    }
}

impl fmt::Debug for BuildSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildSession")
            .field("cached", &self.cache.len())
            .field("stack", &self.stack.depth())
            .field("scopes", &self.scopes.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn downcast_object<T: ?Sized + 'static>(object: &Object) -> Result<Arc<T>, KeystoneError> {
    object.downcast::<T>().ok_or_else(|| KeystoneError::WrongType {
        expected: TypeKey::of::<T>(),
        actual: object.concrete_type().clone(),
    })
}
