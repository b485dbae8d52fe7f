//! The container facade.
//!
//! A [`Container`] wraps a sealed graph and answers resolution requests.
//! Every request opens its own [`BuildSession`] over a snapshot of the
//! current profile, so switching profiles or injecting instances never
//! affects a build in flight.
//!
//! # Example
//!
//! ```
//! use keystone_container::prelude::*;
//! use std::sync::Arc;
//!
//! struct Config {
//!     url: String,
//! }
//!
//! let container = Container::builder()
//!     .configure(|graph| {
//!         graph.add_instance(
//!             &TypeKey::of::<Config>(),
//!             Instance::literal(Config { url: "db://local".into() }),
//!         )
//!     })
//!     .build()
//!     .unwrap();
//!
//! let config: Arc<Config> = container.get_instance().unwrap();
//! assert_eq!(config.url, "db://local");
//! ```

mod builder;
mod diagnostics;

pub use builder::ContainerBuilder;

use std::sync::Arc;

use crate::error::KeystoneError;
use crate::graph::PluginGraph;
use crate::instance::Instance;
use crate::object::{Object, ObjectArray};
use crate::pipeline::Pipeline;
use crate::policy::Scope;
use crate::session::{BuildSession, ExplicitArguments, downcast_object};
use crate::types::TypeKey;

/// Resolves instances from a sealed configuration.
///
/// Cloning is cheap. Clones share families, caches, profile selection and
/// injected instances; only explicit scopes are per clone.
#[derive(Clone)]
pub struct Container {
    pipeline: Arc<Pipeline>,
    scopes: Vec<Arc<Scope>>,
}

impl Container {
    /// Starts configuring a container.
    #[must_use]
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Creates a container over `graph`, sealing it if needed.
    #[must_use]
    pub fn new(graph: PluginGraph) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::from_graph(graph)),
            scopes: Vec::new(),
        }
    }

    /// Returns a container that resolves scoped instances in `scope`.
    ///
    /// Explicit scopes win over the thread's ambient scopes.
    #[must_use]
    pub fn with_scope(&self, scope: Arc<Scope>) -> Self {
        let mut scopes = vec![scope];
        scopes.extend(self.scopes.iter().cloned());
        Self {
            pipeline: Arc::clone(&self.pipeline),
            scopes,
        }
    }

    /// Opens a build session, for callers that resolve several objects
    /// that must share one construction context.
    #[must_use]
    pub fn session(&self) -> BuildSession<'_> {
        self.session_with(ExplicitArguments::default())
    }

    fn session_with(&self, arguments: ExplicitArguments) -> BuildSession<'_> {
        BuildSession::new(&self.pipeline, arguments, self.scopes.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Typed resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolves the default instance of `T`.
    ///
    /// # Errors
    ///
    /// - [`KeystoneError::NoDefaultInstance`] if `T` has no default.
    /// - [`KeystoneError::FamilyNotFound`] if `T` is unknown.
    /// - Any error raised while building the object graph.
    pub fn get_instance<T: ?Sized + 'static>(&self) -> Result<Arc<T>, KeystoneError> {
        downcast_object(&self.get_object(&TypeKey::of::<T>())?)
    }

    /// Resolves the instance of `T` called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::UnknownInstance`] if `T` has no such
    /// instance, or any error raised while building it.
    pub fn get_named<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>, KeystoneError> {
        downcast_object(&self.get_named_object(&TypeKey::of::<T>(), name)?)
    }

    /// Builds `instance` as `T`, whether or not it was configured.
    ///
    /// # Errors
    ///
    /// Any error raised while building the instance.
    pub fn get_with_instance<T: ?Sized + 'static>(&self, instance: &Instance) -> Result<Arc<T>, KeystoneError> {
        downcast_object(&self.get_object_with_instance(&TypeKey::of::<T>(), instance)?)
    }

    /// Resolves the default `T` with explicit arguments overriding
    /// configured properties and dependencies.
    ///
    /// # Errors
    ///
    /// Same as [`Container::get_instance`].
    pub fn get_with_args<T: ?Sized + 'static>(&self, arguments: ExplicitArguments) -> Result<Arc<T>, KeystoneError> {
        downcast_object(&self.get_object_with_args(&TypeKey::of::<T>(), arguments)?)
    }

    /// Resolves the default `T`, or `None` when `T` has no default.
    ///
    /// # Errors
    ///
    /// Errors other than a missing default for `T` itself.
    pub fn try_get_instance<T: ?Sized + 'static>(&self) -> Result<Option<Arc<T>>, KeystoneError> {
        let plugin_type = TypeKey::of::<T>();
        match self.get_object(&plugin_type) {
            Ok(object) => downcast_object(&object).map(Some),
            Err(
                KeystoneError::NoDefaultInstance { plugin_type: missing }
                | KeystoneError::FamilyNotFound { plugin_type: missing },
            ) if missing == plugin_type => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Resolves every instance of `T`, in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while building an instance.
    pub fn get_all_instances<T: ?Sized + 'static>(&self) -> Result<Vec<Arc<T>>, KeystoneError> {
        self.get_all_objects(&TypeKey::of::<T>())?
            .items()
            .iter()
            .map(downcast_object::<T>)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Untyped resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Untyped [`Container::get_instance`].
    ///
    /// # Errors
    ///
    /// Same as [`Container::get_instance`].
    pub fn get_object(&self, plugin_type: &TypeKey) -> Result<Object, KeystoneError> {
        self.session().create_default(plugin_type)
    }

    /// Untyped [`Container::get_named`].
    ///
    /// # Errors
    ///
    /// Same as [`Container::get_named`].
    pub fn get_named_object(&self, plugin_type: &TypeKey, name: &str) -> Result<Object, KeystoneError> {
        self.session().create_named(plugin_type, name)
    }

    /// Untyped [`Container::get_with_instance`].
    ///
    /// # Errors
    ///
    /// Same as [`Container::get_with_instance`].
    pub fn get_object_with_instance(&self, plugin_type: &TypeKey, instance: &Instance) -> Result<Object, KeystoneError> {
        self.session().create_instance(plugin_type, instance)
    }

    /// Untyped [`Container::get_with_args`].
    ///
    /// # Errors
    ///
    /// Same as [`Container::get_with_args`].
    pub fn get_object_with_args(
        &self,
        plugin_type: &TypeKey,
        arguments: ExplicitArguments,
    ) -> Result<Object, KeystoneError> {
        self.session_with(arguments).create_default(plugin_type)
    }

    /// Untyped [`Container::get_all_instances`].
    ///
    /// # Errors
    ///
    /// Same as [`Container::get_all_instances`].
    pub fn get_all_objects(&self, plugin_type: &TypeKey) -> Result<ObjectArray, KeystoneError> {
        self.session().create_array(plugin_type, None)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Runtime configuration
    // ─────────────────────────────────────────────────────────────────────────

    /// Makes `value` the default `T` for every later request.
    pub fn inject<T: ?Sized + Send + Sync + 'static>(&self, value: Arc<T>) {
        self.pipeline
            .inject(TypeKey::of::<T>(), Instance::literal_arc(value), true);
    }

    /// Adds `value` as the instance of `T` called `name`, replacing a
    /// configured instance of that name.
    pub fn inject_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str, value: Arc<T>) {
        self.pipeline.inject(
            TypeKey::of::<T>(),
            Instance::literal_arc(value).named(name),
            false,
        );
    }

    /// Adds `instance` to `plugin_type`, optionally as its default.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::NotAssignable`] if the instance's concrete
    /// type cannot be used as `plugin_type`.
    pub fn inject_instance(
        &self,
        plugin_type: &TypeKey,
        instance: Instance,
        make_default: bool,
    ) -> Result<(), KeystoneError> {
        self.pipeline.check_assignable(plugin_type, &instance)?;
        self.pipeline
            .inject(plugin_type.clone(), instance, make_default);
        Ok(())
    }

    /// Overrides the default of `plugin_type`. The override survives
    /// profile switches.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::NotAssignable`] if the instance's concrete
    /// type cannot be used as `plugin_type`.
    pub fn set_default(&self, plugin_type: &TypeKey, instance: Instance) -> Result<(), KeystoneError> {
        self.pipeline.check_assignable(plugin_type, &instance)?;
        self.pipeline.set_override(plugin_type.clone(), instance);
        Ok(())
    }

    /// Makes the instance of `plugin_type` called `name` its default.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::UnknownInstance`] if there is no such
    /// instance.
    pub fn set_default_by_name(&self, plugin_type: &TypeKey, name: &str) -> Result<(), KeystoneError> {
        let instance = self
            .pipeline
            .find_instance(plugin_type, name)
            .ok_or_else(|| KeystoneError::UnknownInstance {
                name: name.to_string(),
                plugin_type: plugin_type.clone(),
            })?;
        self.pipeline.set_override(plugin_type.clone(), instance);
        Ok(())
    }

    /// Switches the current profile. An empty name selects the default
    /// profile.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::ProfileNotFound`] for an unknown profile.
    pub fn set_defaults_to_profile(&self, profile: &str) -> Result<(), KeystoneError> {
        self.pipeline.set_profile(profile)
    }

    /// Name of the current profile. Empty when no profile is selected.
    #[must_use]
    pub fn current_profile(&self) -> String {
        self.pipeline.current_profile()
    }

    /// Names of every configured profile, sorted.
    #[must_use]
    pub fn profile_names(&self) -> Vec<String> {
        self.pipeline.profile_names()
    }

    /// Clears every cached `T` and removes its instances from resolution.
    pub fn eject_all_instances_of<T: ?Sized + 'static>(&self) {
        self.eject_all_instances_of_type(&TypeKey::of::<T>());
    }

    /// Untyped [`Container::eject_all_instances_of`].
    pub fn eject_all_instances_of_type(&self, plugin_type: &TypeKey) {
        self.pipeline.eject(plugin_type);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Diagnostics
    // ─────────────────────────────────────────────────────────────────────────

    /// Configuration problems recorded while the graph was built.
    #[must_use]
    pub fn configuration_problems(&self) -> &[String] {
        self.pipeline.problems()
    }

    /// Builds every configured instance once and reports all failures.
    ///
    /// Singleton instances built here stay cached.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::InvalidConfiguration`] listing recorded
    /// configuration problems and every instance that failed to build.
    pub fn assert_configuration_is_valid(&self) -> Result<(), KeystoneError> {
        let mut problems: Vec<String> = self.pipeline.problems().to_vec();

        for family in self.pipeline.families() {
            let plugin_type = family.plugin_type();
            if plugin_type.is_open_generic() {
                continue;
            }
            for instance in family.instances() {
                if let Err(err) = self.session().create_instance(plugin_type, instance) {
                    problems.push(format!(
                        "instance '{}' of {plugin_type}: {err}",
                        instance.name()
                    ));
                }
            }
        }

        if problems.is_empty() {
            tracing::debug!("configuration is valid");
            return Ok(());
        }
        Err(KeystoneError::InvalidConfiguration { problems })
    }

    /// Human-readable listing of every family, its lifecycle, its instances
    /// and the current defaults.
    #[must_use]
    pub fn what_do_i_have(&self) -> String {
        diagnostics::WhatDoIHave::new(&self.pipeline).to_string()
    }
}

impl core::fmt::Debug for Container {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Container")
            .field("profile", &self.current_profile())
            .field("scopes", &self.scopes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Param, Plugin};

    trait Widget: Send + Sync {
        fn color(&self) -> &str;
    }

    struct ColorWidget {
        color: String,
    }

    impl Widget for ColorWidget {
        fn color(&self) -> &str {
            &self.color
        }
    }

    fn widget() -> TypeKey {
        TypeKey::of::<dyn Widget>()
    }

    fn container() -> Container {
        Container::builder()
            .configure(|graph| {
                graph.add_plugin(
                    &widget(),
                    Plugin::new::<ColorWidget, _>(|args| {
                        Ok(ColorWidget {
                            color: args.value::<String>("color")?,
                        })
                    })
                    .with_key("Color")
                    .arg(Param::primitive::<String>("color"))
                    .implements::<dyn Widget, ColorWidget>(|w| w),
                )?;
                for color in ["Red", "Blue"] {
                    graph.add_instance(
                        &widget(),
                        Instance::configured(
                            crate::instance::ConfiguredInstance::for_concrete_key("Color")
                                .with_property("color", color),
                        )
                        .named(color),
                    )?;
                }
                graph.set_default_key(&widget(), "Red")
            })
            .with_plugin_cache(Arc::new(crate::plugin::PluginCache::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn default_and_named_resolution() {
        let container = container();
        let red: Arc<dyn Widget> = container.get_instance().unwrap();
        let blue: Arc<dyn Widget> = container.get_named("Blue").unwrap();
        assert_eq!(red.color(), "Red");
        assert_eq!(blue.color(), "Blue");
    }

    #[test]
    fn set_default_by_name_overrides_the_family_default() {
        let container = container();
        container.set_default_by_name(&widget(), "Blue").unwrap();
        let resolved: Arc<dyn Widget> = container.get_instance().unwrap();
        assert_eq!(resolved.color(), "Blue");

        let err = container.set_default_by_name(&widget(), "Green").unwrap_err();
        assert_eq!(err.code().as_u16(), 200);
    }

    #[test]
    fn try_get_instance_returns_none_for_unknown_types() {
        struct Unknown;
        let container = container();
        assert!(container.try_get_instance::<Unknown>().unwrap().is_none());
    }

    #[test]
    fn ejected_types_no_longer_resolve() {
        let container = container();
        container.eject_all_instances_of::<dyn Widget>();
        assert!(container.get_instance::<dyn Widget>().is_err());
        assert!(container.get_all_instances::<dyn Widget>().unwrap().is_empty());
    }

    #[test]
    fn clones_share_injected_instances() {
        let container = container();
        let clone = container.clone();
        let injected: Arc<dyn Widget> = Arc::new(ColorWidget {
            color: "Green".into(),
        });
        clone.inject(Arc::clone(&injected));

        let resolved: Arc<dyn Widget> = container.get_instance().unwrap();
        assert!(Arc::ptr_eq(&resolved, &injected));
    }
}
