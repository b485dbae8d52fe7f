use core::fmt;
use hashbrown::HashMap;
use std::sync::Arc;

use super::{Instance, InstanceKind};
use crate::error::KeystoneError;
use crate::object::Object;
use crate::plugin::{Arguments, Param, ParamKind, Plugin, PluginCache, Resolved};
use crate::session::BuildSession;
use crate::types::TypeKey;

/// A configured property value.
#[derive(Clone)]
pub enum Setting {
    /// A string parsed with the parameter's parse capability.
    Raw(String),
    /// A typed value used as is when its type matches.
    Typed(Object),
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(raw) => write!(f, "Raw({raw:?})"),
            Self::Typed(object) => write!(f, "Typed({})", object.concrete_type()),
        }
    }
}

/// An instance built by a plugin's builder from configured arguments.
///
/// The plugin is selected by concrete key, or by plugged type. Each builder
/// parameter is resolved in order from: an explicit argument of the call, a
/// configured property, a configured child instance or child array, and
/// finally the container default for its type. Primitives are never
/// defaulted.
///
/// A raw string property on a dependency parameter names another instance of
/// the dependency's plugin type.
#[derive(Clone, Default)]
pub struct ConfiguredInstance {
    plugged_type: Option<TypeKey>,
    concrete_key: Option<String>,
    properties: HashMap<Arc<str>, Setting>,
    children: HashMap<Arc<str>, Instance>,
    arrays: HashMap<Arc<str>, Vec<Instance>>,
}

impl ConfiguredInstance {
    /// Builds the concrete type `C`.
    #[must_use]
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self::for_type(TypeKey::of::<C>())
    }

    /// Builds the concrete type named by `plugged_type`.
    #[must_use]
    pub fn for_type(plugged_type: TypeKey) -> Self {
        Self {
            plugged_type: Some(plugged_type),
            ..Self::default()
        }
    }

    /// Builds the family plugin registered under `key`.
    #[must_use]
    pub fn for_concrete_key(key: impl Into<String>) -> Self {
        Self {
            concrete_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Sets a property from a raw string.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<Arc<str>>, raw: impl Into<String>) -> Self {
        self.properties.insert(name.into(), Setting::Raw(raw.into()));
        self
    }

    /// Sets a property to a typed value.
    #[must_use]
    pub fn with_value<T: Send + Sync + 'static>(mut self, name: impl Into<Arc<str>>, value: T) -> Self {
        self.properties
            .insert(name.into(), Setting::Typed(Object::new(value)));
        self
    }

    /// Uses `child` for the dependency called `name`.
    #[must_use]
    pub fn with_child(mut self, name: impl Into<Arc<str>>, child: Instance) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    /// Uses exactly `children`, in order, for the array called `name`.
    #[must_use]
    pub fn with_array(mut self, name: impl Into<Arc<str>>, children: Vec<Instance>) -> Self {
        self.arrays.insert(name.into(), children);
        self
    }

    /// The concrete type to build, if given.
    #[must_use]
    pub fn plugged_type(&self) -> Option<&TypeKey> {
        self.plugged_type.as_ref()
    }

    /// The concrete key to build, if given.
    #[must_use]
    pub fn concrete_key(&self) -> Option<&str> {
        self.concrete_key.as_deref()
    }

    /// The raw or typed value configured for `name`.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Setting> {
        self.properties.get(name)
    }

    /// The child instance configured for `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Instance> {
        self.children.get(name)
    }

    /// The array elements configured for `name`.
    #[must_use]
    pub fn array(&self, name: &str) -> Option<&[Instance]> {
        self.arrays.get(name).map(Vec::as_slice)
    }

    /// Returns `true` if anything was configured for `name`.
    #[must_use]
    pub fn is_configured(&self, name: &str) -> bool {
        self.properties.contains_key(name)
            || self.children.contains_key(name)
            || self.arrays.contains_key(name)
    }

    pub(crate) fn close(&self, args: &[TypeKey]) -> Result<Option<ConfiguredInstance>, KeystoneError> {
        match &self.plugged_type {
            Some(plugged) if plugged.is_open_generic() => Ok(Some(Self {
                plugged_type: Some(plugged.close(args)?),
                ..self.clone()
            })),
            Some(_) => Ok(None),
            None => Ok(Some(self.clone())),
        }
    }

    pub(crate) fn build(
        &self,
        plugin_type: &TypeKey,
        instance_name: &str,
        session: &mut BuildSession<'_>,
    ) -> Result<Object, KeystoneError> {
        let plugin = self.select_plugin(plugin_type, instance_name, session)?;
        let Some(builder) = plugin.builder().cloned() else {
            return Err(builder_not_found(plugin.plugged_type(), instance_name, plugin_type));
        };

        let concrete = plugin.plugged_type().clone();
        let mut args = Arguments::new(instance_name, &concrete);

        for param in plugin.params() {
            let value = self.resolve(param, instance_name, &concrete, session)?;
            args.insert(param.name(), value);
        }

        for setter in plugin.setters() {
            let name = setter.param.name();
            if setter.mandatory
                || self.is_configured(name)
                || session.arguments().property(name).is_some()
            {
                let value = self.resolve(&setter.param, instance_name, &concrete, session)?;
                args.insert(name, value);
            }
        }

        let object = builder(&args)
            .map_err(|err| KeystoneError::from_build_error(err, instance_name, plugin_type))?;

        if concrete.type_id().is_none() {
            return Ok(object.with_concrete_type(concrete.clone()));
        }
        Ok(object)
    }

    /// Concrete key in the family, else the plugged type in the family, else
    /// the plugin cache. Plugins without a builder borrow the cached one.
    fn select_plugin(
        &self,
        plugin_type: &TypeKey,
        instance_name: &str,
        session: &BuildSession<'_>,
    ) -> Result<Plugin, KeystoneError> {
        let pipeline = session.pipeline();
        let family = pipeline.find_family(plugin_type, session.view());
        let cache = pipeline.plugin_cache();

        if let Some(key) = &self.concrete_key {
            let plugin = family
                .as_deref()
                .and_then(|family| family.plugin(key))
                .cloned()
                .ok_or_else(|| KeystoneError::UnknownConcreteKey {
                    key: key.clone(),
                    plugin_type: plugin_type.clone(),
                })?;
            return with_cached_builder(plugin, cache, instance_name, plugin_type);
        }

        let target = self.plugged_type.as_ref().unwrap_or(plugin_type);
        let plugin = family
            .as_deref()
            .and_then(|family| family.plugin_for_type(target))
            .cloned()
            .or_else(|| cache.plugin_for(target))
            .ok_or_else(|| builder_not_found(target, instance_name, plugin_type))?;
        with_cached_builder(plugin, cache, instance_name, plugin_type)
    }

    fn resolve(
        &self,
        param: &Param,
        instance_name: &str,
        concrete: &TypeKey,
        session: &mut BuildSession<'_>,
    ) -> Result<Resolved, KeystoneError> {
        let name = param.name();
        let setting = session
            .arguments()
            .property(name)
            .or_else(|| self.properties.get(name))
            .cloned();
        if let Some(setting) = setting {
            return convert(&setting, param, session).map(Resolved::Single);
        }

        if let Some(child) = self.children.get(name) {
            return match (param.kind(), child.kind()) {
                (ParamKind::Array(element), InstanceKind::Array { children, .. }) => session
                    .create_array(element, Some(children.as_slice()))
                    .map(Resolved::Many),
                (ParamKind::Array(element), _) => session
                    .create_array(element, Some(core::slice::from_ref(child)))
                    .map(Resolved::Many),
                _ => session
                    .create_instance(param.value_type(), child)
                    .map(Resolved::Single),
            };
        }

        if let Some(children) = self.arrays.get(name) {
            return session
                .create_array(param.value_type(), Some(children.as_slice()))
                .map(Resolved::Many);
        }

        match param.kind() {
            ParamKind::Primitive { value_type, .. } => Err(KeystoneError::MissingPrimitiveArgument {
                argument: name.to_string(),
                argument_type: value_type.clone(),
                instance: instance_name.to_string(),
                concrete_type: concrete.clone(),
            }),
            ParamKind::Array(element) => session.create_array(element, None).map(Resolved::Many),
            ParamKind::Dependency(dependency) => session.create_default(dependency).map(Resolved::Single),
        }
    }
}

fn convert(setting: &Setting, param: &Param, session: &mut BuildSession<'_>) -> Result<Object, KeystoneError> {
    let failed = |value: String, reason: String| KeystoneError::ConversionFailed {
        argument: param.name().to_string(),
        value,
        target: param.value_type().clone(),
        reason,
    };

    match (setting, param.kind()) {
        (Setting::Typed(object), _) if object.representation() == param.value_type() => Ok(object.clone()),
        (Setting::Typed(object), ParamKind::Primitive { parse, .. }) => match object.downcast_ref::<String>() {
            Some(raw) => parse(raw.as_str()).map_err(|reason| failed(raw.clone(), reason)),
            None => Err(failed(
                object.concrete_type().to_string(),
                "value has a different type".to_string(),
            )),
        },
        (Setting::Typed(object), _) => session
            .pipeline()
            .casts()
            .conform(object, param.value_type())
            .map_err(|err| failed(object.concrete_type().to_string(), err.to_string())),
        (Setting::Raw(raw), ParamKind::Primitive { parse, .. }) => {
            parse(raw.as_str()).map_err(|reason| failed(raw.clone(), reason))
        }
        (Setting::Raw(raw), ParamKind::Dependency(dependency)) if dependency.is::<String>() => {
            Ok(Object::new(raw.clone()))
        }
        (Setting::Raw(raw), ParamKind::Dependency(dependency)) => session.create_named(dependency, raw),
        (Setting::Raw(raw), ParamKind::Array(_)) => Err(failed(
            raw.clone(),
            "arrays cannot be configured from a string".to_string(),
        )),
    }
}

fn with_cached_builder(
    mut plugin: Plugin,
    cache: &PluginCache,
    instance_name: &str,
    plugin_type: &TypeKey,
) -> Result<Plugin, KeystoneError> {
    if plugin.has_builder() {
        return Ok(plugin);
    }

    match cache.plugin_for(plugin.plugged_type()) {
        Some(cached) if cached.has_builder() => {
            plugin.merge(&cached);
            Ok(plugin)
        }
        _ => Err(builder_not_found(plugin.plugged_type(), instance_name, plugin_type)),
    }
}

fn builder_not_found(plugged_type: &TypeKey, instance_name: &str, plugin_type: &TypeKey) -> KeystoneError {
    KeystoneError::BuilderNotFound {
        plugged_type: plugged_type.clone(),
        instance: instance_name.to_string(),
        plugin_type: plugin_type.clone(),
    }
}

impl fmt::Display for ConfiguredInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.plugged_type, &self.concrete_key) {
            (_, Some(key)) => write!(f, "key '{key}'"),
            (Some(plugged), None) => write!(f, "{plugged}"),
            (None, None) => f.write_str("family plugin"),
        }
    }
}

impl fmt::Debug for ConfiguredInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredInstance")
            .field("plugged_type", &self.plugged_type)
            .field("concrete_key", &self.concrete_key)
            .field("properties", &self.properties)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("arrays", &self.arrays.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gateway;

    #[test]
    fn configured_names_are_tracked() {
        let configured = ConfiguredInstance::of::<Gateway>()
            .with_property("host", "localhost")
            .with_value("port", 8080_u16)
            .with_child("logger", Instance::null())
            .with_array("filters", vec![Instance::null(), Instance::null()]);

        assert!(configured.is_configured("host"));
        assert!(configured.is_configured("logger"));
        assert!(configured.is_configured("filters"));
        assert!(!configured.is_configured("timeout"));
        assert_eq!(configured.array("filters").unwrap().len(), 2);
        assert!(matches!(configured.property("port"), Some(Setting::Typed(_))));
    }

    #[test]
    fn close_keeps_only_generic_or_keyed_instances() {
        let args = [TypeKey::of::<Gateway>()];

        let generic = ConfiguredInstance::for_type(TypeKey::generic("Queue", 1));
        let closed = generic.close(&args).unwrap().unwrap();
        assert!(closed.plugged_type().unwrap().is_closed_generic());

        let keyed = ConfiguredInstance::for_concrete_key("Fast");
        assert_eq!(keyed.close(&args).unwrap().unwrap().concrete_key(), Some("Fast"));

        assert!(ConfiguredInstance::of::<Gateway>().close(&args).unwrap().is_none());
    }

    #[test]
    fn display_prefers_concrete_key() {
        assert_eq!(ConfiguredInstance::for_concrete_key("Red").to_string(), "key 'Red'");
        assert_eq!(
            ConfiguredInstance::for_type(TypeKey::named("Gateway")).to_string(),
            "Gateway"
        );
    }
}
