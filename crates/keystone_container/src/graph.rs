//! The configuration model every front-end writes into.
//!
//! A [`PluginGraph`] collects families, interceptors, casts and profile
//! overrides. Front-ends ([`Registry`](crate::registry::Registry)
//! implementations, or direct calls) only ever talk to the container through
//! this mutation API. Sealing the graph freezes it and prepares it for
//! resolution.
//!
//! # Example
//!
//! ```
//! use keystone_container::graph::PluginGraph;
//! use keystone_container::instance::Instance;
//! use keystone_container::types::TypeKey;
//!
//! let mut graph = PluginGraph::new();
//! graph
//!     .add_instance(&TypeKey::of::<String>(), Instance::literal(String::from("hello")))
//!     .unwrap();
//! graph.seal();
//!
//! assert!(graph.is_sealed());
//! assert!(graph.add_instance(&TypeKey::of::<String>(), Instance::null()).is_err());
//! ```

use hashbrown::HashMap;
use std::sync::Arc;

use crate::error::KeystoneError;
use crate::family::PluginFamily;
use crate::instance::Instance;
use crate::interceptor::{InstanceInterceptor, InterceptorLibrary, TypeInterceptor};
use crate::object::CastRegistry;
use crate::plugin::{Plugin, PluginCache};
use crate::policy::Lifecycle;
use crate::profile::{Profile, ProfileManager};
use crate::types::TypeKey;

/// Families, interceptors, casts and profiles, before and after sealing.
pub struct PluginGraph {
    families: HashMap<TypeKey, PluginFamily>,
    interceptors: InterceptorLibrary,
    casts: CastRegistry,
    profiles: ProfileManager,
    plugin_cache: Arc<PluginCache>,
    problems: Vec<String>,
    sealed: bool,
}

impl Default for PluginGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginGraph {
    /// Creates an empty graph backed by the global [`PluginCache`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_plugin_cache(PluginCache::global())
    }

    /// Creates an empty graph backed by `plugin_cache`.
    #[must_use]
    pub fn with_plugin_cache(plugin_cache: Arc<PluginCache>) -> Self {
        Self {
            families: HashMap::new(),
            interceptors: InterceptorLibrary::new(),
            casts: CastRegistry::new(),
            profiles: ProfileManager::new(),
            plugin_cache,
            problems: Vec::new(),
            sealed: false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Families
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns the family of `plugin_type`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once the graph is sealed.
    pub fn family_mut(&mut self, plugin_type: &TypeKey) -> Result<&mut PluginFamily, KeystoneError> {
        self.ensure_unsealed("modify a plugin family")?;
        Ok(self
            .families
            .entry(plugin_type.clone())
            .or_insert_with(|| PluginFamily::new(plugin_type.clone())))
    }

    /// Returns the family of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::FamilyNotFound`] if no family exists.
    pub fn family(&self, plugin_type: &TypeKey) -> Result<&PluginFamily, KeystoneError> {
        self.families
            .get(plugin_type)
            .ok_or_else(|| KeystoneError::FamilyNotFound {
                plugin_type: plugin_type.clone(),
            })
    }

    /// Returns `true` if `plugin_type` has a family.
    #[must_use]
    pub fn has_family(&self, plugin_type: &TypeKey) -> bool {
        self.families.contains_key(plugin_type)
    }

    /// Every family, in no particular order.
    pub fn families(&self) -> impl Iterator<Item = &PluginFamily> {
        self.families.values()
    }

    /// Removes the family of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once the graph is sealed.
    pub fn eject_family(&mut self, plugin_type: &TypeKey) -> Result<Option<PluginFamily>, KeystoneError> {
        self.ensure_unsealed("eject a plugin family")?;
        Ok(self.families.remove(plugin_type))
    }

    /// Adds a plugin to the family of `plugin_type` and registers its casts.
    ///
    /// Registering the same concrete type twice merges the registrations.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed, or any error of
    /// [`PluginFamily::add_plugin`].
    pub fn add_plugin(&mut self, plugin_type: &TypeKey, plugin: Plugin) -> Result<(), KeystoneError> {
        self.ensure_unsealed("add a plugin")?;
        for (target, caster) in plugin.casts() {
            self.casts
                .insert(plugin.plugged_type().clone(), target.clone(), Arc::clone(caster));
        }
        self.family_mut(plugin_type)?.add_plugin(plugin)
    }

    /// Adds an instance to the family of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed, or
    /// [`KeystoneError::NotAssignable`] if the instance's concrete type is
    /// known and cannot be used as `plugin_type`.
    pub fn add_instance(&mut self, plugin_type: &TypeKey, instance: Instance) -> Result<(), KeystoneError> {
        self.ensure_unsealed("add an instance")?;
        self.check_assignable(plugin_type, &instance)?;
        self.family_mut(plugin_type)?.add_instance(instance);
        Ok(())
    }

    /// Adds `instance` and makes it the default of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Same as [`PluginGraph::add_instance`].
    pub fn set_default(&mut self, plugin_type: &TypeKey, instance: Instance) -> Result<(), KeystoneError> {
        self.ensure_unsealed("set a default instance")?;
        self.check_assignable(plugin_type, &instance)?;
        self.family_mut(plugin_type)?.set_default(instance);
        Ok(())
    }

    /// Names the default instance of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn set_default_key(&mut self, plugin_type: &TypeKey, name: &str) -> Result<(), KeystoneError> {
        self.family_mut(plugin_type)?.set_default_key(name);
        Ok(())
    }

    /// Sets the lifecycle of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn set_lifecycle(&mut self, plugin_type: &TypeKey, lifecycle: Lifecycle) -> Result<(), KeystoneError> {
        self.family_mut(plugin_type)?.set_lifecycle(lifecycle);
        Ok(())
    }

    /// Appends an interceptor to the family of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn add_family_interceptor(
        &mut self,
        plugin_type: &TypeKey,
        interceptor: InstanceInterceptor,
    ) -> Result<(), KeystoneError> {
        self.family_mut(plugin_type)?.add_interceptor(interceptor);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Interceptors, casts, profiles
    // ─────────────────────────────────────────────────────────────────────────

    /// Appends a type interceptor.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn add_type_interceptor(&mut self, interceptor: TypeInterceptor) -> Result<(), KeystoneError> {
        self.ensure_unsealed("add a type interceptor")?;
        self.interceptors.add(interceptor);
        Ok(())
    }

    /// Imports every interceptor of `library`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn import_interceptors(&mut self, library: &InterceptorLibrary) -> Result<(), KeystoneError> {
        self.ensure_unsealed("import interceptors")?;
        self.interceptors.import_from(library);
        Ok(())
    }

    /// Registers a conversion making `C` usable as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn register_cast<C, T>(
        &mut self,
        cast: impl Fn(Arc<C>) -> Arc<T> + Send + Sync + 'static,
    ) -> Result<(), KeystoneError>
    where
        C: ?Sized + Send + Sync + 'static,
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_unsealed("register a cast")?;
        self.casts.register(cast);
        Ok(())
    }

    /// Overrides the default of `plugin_type` in `profile`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn set_profile_default(
        &mut self,
        profile: &str,
        plugin_type: TypeKey,
        instance: Instance,
    ) -> Result<(), KeystoneError> {
        self.ensure_unsealed("set a profile default")?;
        self.profiles.set_profile_default(profile, plugin_type, instance);
        Ok(())
    }

    /// Overrides the default of `plugin_type` on `machine`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn set_machine_default(
        &mut self,
        machine: &str,
        plugin_type: TypeKey,
        instance: Instance,
    ) -> Result<(), KeystoneError> {
        self.ensure_unsealed("set a machine default")?;
        self.profiles.set_machine_default(machine, plugin_type, instance);
        Ok(())
    }

    /// Profile used when none is selected.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn set_default_profile(&mut self, name: &str) -> Result<(), KeystoneError> {
        self.ensure_unsealed("set the default profile")?;
        self.profiles.set_default_profile_name(name);
        Ok(())
    }

    /// Machine whose overrides apply.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::GraphSealed`] once sealed.
    pub fn set_machine_name(&mut self, name: &str) -> Result<(), KeystoneError> {
        self.ensure_unsealed("set the machine name")?;
        self.profiles.set_machine_name(name);
        Ok(())
    }

    /// Profiles and machine overrides configured so far.
    #[must_use]
    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    /// Type interceptors configured so far.
    #[must_use]
    pub fn interceptors(&self) -> &InterceptorLibrary {
        &self.interceptors
    }

    /// Casts registered so far.
    #[must_use]
    pub fn casts(&self) -> &CastRegistry {
        &self.casts
    }

    /// The plugin cache plugins are registered in on seal.
    #[must_use]
    pub fn plugin_cache(&self) -> &Arc<PluginCache> {
        &self.plugin_cache
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Problems and sealing
    // ─────────────────────────────────────────────────────────────────────────

    /// Records a configuration problem without aborting.
    pub fn log_problem(&mut self, problem: impl Into<String>) {
        let problem = problem.into();
        tracing::warn!(problem = %problem, "configuration problem");
        self.problems.push(problem);
    }

    /// Problems recorded so far.
    #[must_use]
    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    /// Returns `true` once sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freezes the graph.
    ///
    /// Seals every family, registers every plugin in the plugin cache in one
    /// operation, and computes the current profile defaults. Sealing twice is
    /// a no-op.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }

        let mut problems = Vec::new();
        for family in self.families.values_mut() {
            problems.extend(family.seal());
        }
        for problem in problems {
            self.log_problem(problem);
        }

        self.plugin_cache
            .register_all(self.families.values().flat_map(PluginFamily::plugins));

        let mut family_defaults = Profile::default();
        for family in self.families.values() {
            if let Some(instance) = family.default_instance() {
                family_defaults.set_default(family.plugin_type().clone(), instance.clone());
            }
        }
        self.profiles.seal(family_defaults);

        self.sealed = true;
        tracing::debug!(
            families = self.families.len(),
            interceptors = self.interceptors.len(),
            casts = self.casts.len(),
            problems = self.problems.len(),
            "sealed plugin graph"
        );
    }

    pub(crate) fn into_parts(self) -> GraphParts {
        GraphParts {
            families: self.families,
            interceptors: self.interceptors,
            casts: self.casts,
            profiles: self.profiles,
            plugin_cache: self.plugin_cache,
            problems: self.problems,
        }
    }

    fn ensure_unsealed(&self, operation: &'static str) -> Result<(), KeystoneError> {
        if self.sealed {
            return Err(KeystoneError::GraphSealed { operation });
        }
        Ok(())
    }

    /// Instances with a known concrete type must plug into `plugin_type`
    /// directly or through a registered cast.
    fn check_assignable(&self, plugin_type: &TypeKey, instance: &Instance) -> Result<(), KeystoneError> {
        let Some(concrete) = instance.concrete_type() else {
            return Ok(());
        };
        if concrete.plugs_into(plugin_type) || self.casts.can_cast(&concrete, plugin_type) {
            return Ok(());
        }

        let castable = self
            .families
            .values()
            .flat_map(PluginFamily::plugins)
            .any(|p| p.plugged_type() == &concrete && p.can_be_cast_to(plugin_type));
        if castable {
            return Ok(());
        }

        Err(KeystoneError::NotAssignable {
            plugged_type: concrete,
            plugin_type: plugin_type.clone(),
        })
    }
}

/// A sealed graph taken apart for the resolution pipeline.
pub(crate) struct GraphParts {
    pub(crate) families: HashMap<TypeKey, PluginFamily>,
    pub(crate) interceptors: InterceptorLibrary,
    pub(crate) casts: CastRegistry,
    pub(crate) profiles: ProfileManager,
    pub(crate) plugin_cache: Arc<PluginCache>,
    pub(crate) problems: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::instance::ConfiguredInstance;

    trait Widget: Send + Sync {}
    struct ColorWidget;
    impl Widget for ColorWidget {}

    fn isolated() -> PluginGraph {
        PluginGraph::with_plugin_cache(Arc::new(PluginCache::new()))
    }

    #[test]
    fn family_lookup_distinguishes_configuration_and_resolution() {
        let mut graph = isolated();
        let widget = TypeKey::of::<dyn Widget>();

        assert_eq!(graph.family(&widget).unwrap_err().code(), ErrorCode::FamilyNotFound);
        graph.family_mut(&widget).unwrap();
        assert!(graph.family(&widget).is_ok());
    }

    #[test]
    fn mutation_after_seal_fails() {
        let mut graph = isolated();
        graph.seal();
        graph.seal();

        let err = graph.family_mut(&TypeKey::of::<dyn Widget>()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::GraphSealed);
        assert!(graph.set_default_profile("Blue").is_err());
    }

    #[test]
    fn literal_instances_need_a_cast() {
        let mut graph = isolated();
        let widget = TypeKey::of::<dyn Widget>();

        let err = graph
            .add_instance(&widget, Instance::literal(ColorWidget))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAssignable);

        graph.register_cast::<ColorWidget, dyn Widget>(|w| w).unwrap();
        graph.add_instance(&widget, Instance::literal(ColorWidget)).unwrap();
        graph
            .add_instance(&widget, Instance::literal_arc::<dyn Widget>(Arc::new(ColorWidget)))
            .unwrap();
    }

    #[test]
    fn seal_registers_plugins_and_defaults() {
        let cache = Arc::new(PluginCache::new());
        let mut graph = PluginGraph::with_plugin_cache(Arc::clone(&cache));
        let widget = TypeKey::of::<dyn Widget>();
        graph
            .add_plugin(
                &widget,
                Plugin::new::<ColorWidget, _>(|_| Ok(ColorWidget)).implements::<dyn Widget, ColorWidget>(|w| w),
            )
            .unwrap();
        graph.seal();

        assert!(cache.contains(&TypeKey::of::<ColorWidget>()));
        assert!(graph.casts().can_cast(&TypeKey::of::<ColorWidget>(), &widget));
        let defaults = graph.profiles().current_defaults();
        assert_eq!(defaults.default_for(&widget).unwrap().name(), "ColorWidget");
    }

    #[test]
    fn seal_logs_family_problems() {
        let mut graph = isolated();
        let widget = TypeKey::of::<dyn Widget>();
        graph
            .add_instance(
                &widget,
                Instance::configured(ConfiguredInstance::for_concrete_key("Missing")).named("Broken"),
            )
            .unwrap();
        graph.set_default_key(&widget, "Nope").unwrap();
        graph.seal();

        assert_eq!(graph.problems().len(), 2);
    }
}
