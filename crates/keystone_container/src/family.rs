//! Plugin families: everything the container knows about one plugin type.

use core::fmt;
use std::sync::Arc;

use crate::error::KeystoneError;
use crate::instance::{ConfiguredInstance, Instance, InstanceKind};
use crate::interceptor::InstanceInterceptor;
use crate::plugin::Plugin;
use crate::policy::{BuildPolicy, Lifecycle};
use crate::types::TypeKey;

/// The instances, plugins, lifecycle and interceptors of one plugin type.
///
/// Instance names are unique; adding an instance under an existing name
/// replaces it in place. Concrete keys of plugins are unique; registering
/// the same concrete type twice merges the registrations.
pub struct PluginFamily {
    plugin_type: TypeKey,
    default_key: Option<String>,
    instances: Vec<Instance>,
    plugins: Vec<Plugin>,
    lifecycle: Lifecycle,
    policy: Arc<dyn BuildPolicy>,
    interceptors: Vec<InstanceInterceptor>,
    sealed: bool,
}

impl PluginFamily {
    /// Creates an empty, per-request family.
    #[must_use]
    pub fn new(plugin_type: TypeKey) -> Self {
        let lifecycle = Lifecycle::default();
        Self {
            plugin_type,
            default_key: None,
            instances: Vec::new(),
            plugins: Vec::new(),
            policy: lifecycle.create_policy(),
            lifecycle,
            interceptors: Vec::new(),
            sealed: false,
        }
    }

    /// The plugin type of this family.
    #[must_use]
    pub fn plugin_type(&self) -> &TypeKey {
        &self.plugin_type
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Instances
    // ─────────────────────────────────────────────────────────────────────────

    /// Adds an instance, replacing any instance with the same name.
    pub fn add_instance(&mut self, instance: Instance) {
        match self
            .instances
            .iter_mut()
            .find(|existing| existing.name() == instance.name())
        {
            Some(existing) => *existing = instance,
            None => self.instances.push(instance),
        }
    }

    /// Removes the instance called `name`.
    pub fn remove_instance(&mut self, name: &str) -> Option<Instance> {
        let pos = self.instances.iter().position(|i| i.name() == name)?;
        Some(self.instances.remove(pos))
    }

    /// Returns the instance called `name`.
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name() == name)
    }

    /// All instances in registration order.
    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Adds `instance` and makes it the default.
    pub fn set_default(&mut self, instance: Instance) {
        self.default_key = Some(instance.name().to_string());
        self.add_instance(instance);
    }

    /// Names the default instance.
    pub fn set_default_key(&mut self, name: impl Into<String>) {
        self.default_key = Some(name.into());
    }

    /// Name of the default instance, if set.
    #[must_use]
    pub fn default_key(&self) -> Option<&str> {
        self.default_key.as_deref()
    }

    /// The default instance, if the default key names a known instance.
    #[must_use]
    pub fn default_instance(&self) -> Option<&Instance> {
        self.instance(self.default_key.as_deref()?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Plugins
    // ─────────────────────────────────────────────────────────────────────────

    /// Adds a plugin.
    ///
    /// # Errors
    ///
    /// - [`KeystoneError::MissingConcreteKey`] if the key is empty.
    /// - [`KeystoneError::NotAssignable`] if the plugged type cannot be used
    ///   as this family's plugin type.
    /// - [`KeystoneError::DuplicateConcreteKey`] if the key is taken by
    ///   another plugged type.
    pub fn add_plugin(&mut self, plugin: Plugin) -> Result<(), KeystoneError> {
        if plugin.concrete_key().is_empty() {
            return Err(KeystoneError::MissingConcreteKey {
                plugged_type: plugin.plugged_type().clone(),
            });
        }

        if !plugin.can_be_cast_to(&self.plugin_type) {
            return Err(KeystoneError::NotAssignable {
                plugged_type: plugin.plugged_type().clone(),
                plugin_type: self.plugin_type.clone(),
            });
        }

        match self
            .plugins
            .iter_mut()
            .find(|p| p.concrete_key() == plugin.concrete_key())
        {
            Some(existing) if existing.plugged_type() == plugin.plugged_type() => {
                existing.merge(&plugin);
                Ok(())
            }
            Some(existing) => Err(KeystoneError::DuplicateConcreteKey {
                key: plugin.concrete_key().to_string(),
                plugin_type: self.plugin_type.clone(),
                existing: existing.plugged_type().clone(),
                plugged_type: plugin.plugged_type().clone(),
            }),
            None => {
                self.plugins.push(plugin);
                Ok(())
            }
        }
    }

    /// Returns the plugin registered under `concrete_key`.
    #[must_use]
    pub fn plugin(&self, concrete_key: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.concrete_key() == concrete_key)
    }

    /// Returns the plugin for `plugged_type`.
    #[must_use]
    pub fn plugin_for_type(&self, plugged_type: &TypeKey) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.plugged_type() == plugged_type)
    }

    /// All plugins in registration order.
    #[must_use]
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle and interception
    // ─────────────────────────────────────────────────────────────────────────

    /// Sets the lifecycle and rebuilds the policy chain with empty caches.
    pub fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.policy = lifecycle.create_policy();
        self.lifecycle = lifecycle;
    }

    /// The configured lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// The build policy chain.
    #[must_use]
    pub fn policy(&self) -> &Arc<dyn BuildPolicy> {
        &self.policy
    }

    /// Appends an interceptor run on every object this family builds.
    pub fn add_interceptor(&mut self, interceptor: InstanceInterceptor) {
        self.interceptors.push(interceptor);
    }

    /// Family interceptors in registration order.
    #[must_use]
    pub fn interceptors(&self) -> &[InstanceInterceptor] {
        &self.interceptors
    }

    /// Drops every object cached by the policy chain.
    pub fn eject_all(&self) {
        self.policy.eject_all();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sealing
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns `true` once sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Finalizes the family and returns the problems found.
    ///
    /// A lone instance becomes the default. A family with no instances and
    /// exactly one plugin gets an implicit configured default. Sealing twice
    /// is a no-op.
    pub fn seal(&mut self) -> Vec<String> {
        if self.sealed {
            return Vec::new();
        }
        self.sealed = true;

        if self.instances.is_empty() && self.plugins.len() == 1 {
            let plugin = &self.plugins[0];
            let implicit = Instance::configured(ConfiguredInstance::for_concrete_key(
                plugin.concrete_key(),
            ))
            .named(plugin.concrete_key());
            self.add_instance(implicit);
        }

        if self.default_key.is_none() && self.instances.len() == 1 {
            self.default_key = Some(self.instances[0].name().to_string());
        }

        let mut problems = Vec::new();
        if let Some(key) = &self.default_key
            && self.instance(key).is_none()
        {
            problems.push(format!(
                "default instance '{key}' of {} is not a registered instance",
                self.plugin_type
            ));
        }

        for instance in &self.instances {
            if let InstanceKind::Configured(configured) = instance.kind()
                && let Some(key) = configured.concrete_key()
                && self.plugin(key).is_none()
            {
                problems.push(format!(
                    "instance '{}' of {} uses unknown concrete key '{key}'",
                    instance.name(),
                    self.plugin_type
                ));
            }
        }

        problems
    }

    /// Creates a family for the closed generic `plugin_type<args>`.
    ///
    /// Plugins and instances are closed over `args`, the policy chain is
    /// cloned with empty caches, and the result is sealed.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::InvalidGenericArguments`] if `args` does not
    /// match the plugin type's arity.
    pub fn create_templated_clone(&self, args: &[TypeKey]) -> Result<PluginFamily, KeystoneError> {
        let mut family = PluginFamily {
            plugin_type: self.plugin_type.close(args)?,
            default_key: self.default_key.clone(),
            instances: Vec::new(),
            plugins: Vec::new(),
            lifecycle: self.lifecycle.clone(),
            policy: self.policy.clone_policy(),
            interceptors: self.interceptors.clone(),
            sealed: false,
        };

        for plugin in &self.plugins {
            family.plugins.push(plugin.close(args)?);
        }

        for instance in &self.instances {
            if let Some(closed) = instance.close_generic(args)? {
                family.instances.push(closed);
            }
        }

        for problem in family.seal() {
            tracing::warn!(plugin_type = %family.plugin_type, "{problem}");
        }
        Ok(family)
    }
}

impl fmt::Debug for PluginFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFamily")
            .field("plugin_type", &self.plugin_type)
            .field("default_key", &self.default_key)
            .field("instances", &self.instances.len())
            .field("plugins", &self.plugins.len())
            .field("lifecycle", &self.lifecycle)
            .field("sealed", &self.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    trait Widget: Send + Sync {}
    struct ColorWidget;
    impl Widget for ColorWidget {}
    struct Unrelated;

    fn widget_plugin() -> Plugin {
        Plugin::new::<ColorWidget, _>(|_| Ok(ColorWidget)).implements::<dyn Widget, ColorWidget>(|w| w)
    }

    #[test]
    fn re_adding_a_name_replaces_in_place() {
        let mut family = PluginFamily::new(TypeKey::of::<dyn Widget>());
        family.add_instance(Instance::null().named("Red"));
        family.add_instance(Instance::null().named("Blue"));
        let replacement = Instance::null().named("Red");
        let id = replacement.id();
        family.add_instance(replacement);

        assert_eq!(family.instances().len(), 2);
        assert_eq!(family.instances()[0].id(), id);
    }

    #[test]
    fn plugins_must_be_assignable() {
        let mut family = PluginFamily::new(TypeKey::of::<dyn Widget>());
        let err = family
            .add_plugin(Plugin::new::<Unrelated, _>(|_| Ok(Unrelated)))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAssignable);

        family.add_plugin(widget_plugin()).unwrap();
        family.add_plugin(widget_plugin()).unwrap();
        assert_eq!(family.plugins().len(), 1);
    }

    #[test]
    fn concrete_keys_are_unique() {
        let mut family = PluginFamily::new(TypeKey::named("Anything"));
        family
            .add_plugin(Plugin::new::<ColorWidget, _>(|_| Ok(ColorWidget)).with_key("W"))
            .unwrap();
        let err = family
            .add_plugin(Plugin::new::<Unrelated, _>(|_| Ok(Unrelated)).with_key("W"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateConcreteKey);

        let err = family
            .add_plugin(Plugin::new::<Unrelated, _>(|_| Ok(Unrelated)).with_key(""))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingConcreteKey);
    }

    #[test]
    fn seal_promotes_lone_instance() {
        let mut family = PluginFamily::new(TypeKey::of::<dyn Widget>());
        family.add_instance(Instance::null().named("Only"));
        assert!(family.seal().is_empty());
        assert_eq!(family.default_key(), Some("Only"));
    }

    #[test]
    fn seal_creates_implicit_instance_for_lone_plugin() {
        let mut family = PluginFamily::new(TypeKey::of::<dyn Widget>());
        family.add_plugin(widget_plugin()).unwrap();
        assert!(family.seal().is_empty());

        let default = family.default_instance().unwrap();
        assert_eq!(default.name(), "ColorWidget");
        assert!(matches!(default.kind(), InstanceKind::Configured(_)));
    }

    #[test]
    fn seal_reports_unknown_default() {
        let mut family = PluginFamily::new(TypeKey::of::<dyn Widget>());
        family.add_instance(Instance::null().named("Red"));
        family.add_instance(Instance::null().named("Blue"));
        family.set_default_key("Green");

        let problems = family.seal();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("'Green'"));
        assert!(family.seal().is_empty());
    }

    #[test]
    fn templated_clone_closes_and_seals() {
        let open = TypeKey::generic("Repository", 1);
        let mut family = PluginFamily::new(open.clone());
        family
            .add_plugin(Plugin::descriptor(TypeKey::generic("SqlRepository", 1)))
            .unwrap();
        family.add_instance(Instance::literal(1_u8).named("Fixed"));
        family.set_lifecycle(Lifecycle::Singleton);

        let args = [TypeKey::of::<ColorWidget>()];
        let closed = family.create_templated_clone(&args).unwrap();

        assert_eq!(closed.plugin_type(), &open.close(&args).unwrap());
        assert!(closed.is_sealed());
        assert!(closed.plugins()[0].plugged_type().is_closed_generic());
        assert_eq!(closed.instances().len(), 1);
        assert_eq!(closed.default_key(), Some("SqlRepository"));
        assert_eq!(closed.lifecycle(), &Lifecycle::Singleton);
        assert!(!Arc::ptr_eq(closed.policy(), family.policy()));
    }
}
