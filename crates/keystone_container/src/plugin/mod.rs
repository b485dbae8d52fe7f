//! Concrete type candidates and their construction capability.
//!
//! A [`Plugin`] describes one concrete type that can be plugged into a
//! family: its concrete key, the parameters its builder needs, optional
//! setters, the builder closure itself, and the casts that make it usable as
//! the family's plugin type.
//!
//! There is no reflection. The builder is a closure that receives already
//! resolved [`Arguments`] and returns the built value.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use keystone_container::plugin::{Param, Plugin};
//!
//! trait Widget: Send + Sync {}
//!
//! struct ColorWidget {
//!     color: String,
//! }
//!
//! impl Widget for ColorWidget {}
//!
//! let plugin = Plugin::new::<ColorWidget, _>(|args| {
//!     Ok(ColorWidget {
//!         color: args.value::<String>("color")?,
//!     })
//! })
//! .arg(Param::primitive::<String>("color"))
//! .implements::<dyn Widget, ColorWidget>(|w| w);
//!
//! assert_eq!(plugin.concrete_key(), "ColorWidget");
//! ```

mod arguments;
mod cache;

pub use arguments::{Arguments, Resolved};
pub use cache::PluginCache;

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use crate::error::{BoxError, KeystoneError};
use crate::object::{Caster, Object, caster};
use crate::types::TypeKey;

/// Builds an object from resolved arguments.
pub type BuildFn = Arc<dyn Fn(&Arguments<'_>) -> Result<Object, BoxError> + Send + Sync>;

/// Parses a configured string into a primitive value.
pub type ParseFn = Arc<dyn Fn(&str) -> Result<Object, String> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Param
// ─────────────────────────────────────────────────────────────────────────────

/// What a parameter expects.
#[derive(Clone)]
pub enum ParamKind {
    /// Another plugin type, resolved through the container.
    Dependency(TypeKey),
    /// Every instance of an element plugin type.
    Array(TypeKey),
    /// A value parsed from configuration. Never defaulted.
    Primitive {
        /// The primitive type.
        value_type: TypeKey,
        /// Parses raw configuration strings.
        parse: ParseFn,
    },
}

/// A named constructor parameter or setter.
#[derive(Clone)]
pub struct Param {
    name: Arc<str>,
    kind: ParamKind,
}

impl Param {
    /// A dependency on plugin type `T`.
    #[must_use]
    pub fn dependency<T: ?Sized + 'static>(name: impl Into<Arc<str>>) -> Self {
        Self::dependency_key(name, TypeKey::of::<T>())
    }

    /// A dependency on the plugin type named by `key`.
    #[must_use]
    pub fn dependency_key(name: impl Into<Arc<str>>, key: TypeKey) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Dependency(key),
        }
    }

    /// An array of every instance of element type `T`.
    #[must_use]
    pub fn array<T: ?Sized + 'static>(name: impl Into<Arc<str>>) -> Self {
        Self::array_key(name, TypeKey::of::<T>())
    }

    /// An array of the element plugin type named by `key`.
    #[must_use]
    pub fn array_key(name: impl Into<Arc<str>>, element_type: TypeKey) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Array(element_type),
        }
    }

    /// A primitive value parsed with [`FromStr`].
    #[must_use]
    pub fn primitive<T>(name: impl Into<Arc<str>>) -> Self
    where
        T: FromStr + Send + Sync + 'static,
        T::Err: fmt::Display,
    {
        let parse: ParseFn =
            Arc::new(|raw| raw.parse::<T>().map(Object::new).map_err(|e| e.to_string()));
        Self {
            name: name.into(),
            kind: ParamKind::Primitive {
                value_type: TypeKey::of::<T>(),
                parse,
            },
        }
    }

    /// The parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the parameter is resolved.
    #[must_use]
    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }

    /// The type this parameter resolves to. For arrays, the element type.
    #[must_use]
    pub fn value_type(&self) -> &TypeKey {
        match &self.kind {
            ParamKind::Dependency(key) | ParamKind::Array(key) => key,
            ParamKind::Primitive { value_type, .. } => value_type,
        }
    }

    /// Returns `true` for parameters parsed from strings.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, ParamKind::Primitive { .. })
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ParamKind::Dependency(_) => "dependency",
            ParamKind::Array(_) => "array",
            ParamKind::Primitive { .. } => "primitive",
        };
        write!(f, "{}: {kind} {}", self.name, self.value_type())
    }
}

/// A setter: a parameter that is only resolved when mandatory or configured.
#[derive(Debug, Clone)]
pub struct Setter {
    /// The setter parameter.
    pub param: Param,
    /// Whether the setter must always be resolved.
    pub mandatory: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin
// ─────────────────────────────────────────────────────────────────────────────

/// How a plugin entered the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefinitionSource {
    /// Registered by a configuration front-end.
    #[default]
    Explicit,
    /// Created by the container, for example a family's lone plugin.
    Implicit,
}

/// A concrete type candidate for a plugin family.
#[derive(Clone)]
pub struct Plugin {
    plugged_type: TypeKey,
    concrete_key: String,
    source: DefinitionSource,
    params: Vec<Param>,
    setters: Vec<Setter>,
    builder: Option<BuildFn>,
    casts: Vec<(TypeKey, Caster)>,
}

impl Plugin {
    /// Creates a plugin for the concrete type `C` with a typed builder.
    pub fn new<C, F>(build: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(&Arguments<'_>) -> Result<C, BoxError> + Send + Sync + 'static,
    {
        let builder: BuildFn = Arc::new(move |args| build(args).map(Object::new));
        Self::with_builder(TypeKey::of::<C>(), Some(builder))
    }

    /// Creates a plugin for `plugged_type` with an untyped builder.
    ///
    /// Used for generic definitions, whose builders read the closed type from
    /// [`Arguments::concrete_type`].
    pub fn from_fn<F>(plugged_type: TypeKey, build: F) -> Self
    where
        F: Fn(&Arguments<'_>) -> Result<Object, BoxError> + Send + Sync + 'static,
    {
        Self::with_builder(plugged_type, Some(Arc::new(build)))
    }

    /// Declares `plugged_type` without a builder. The builder is looked up in
    /// the [`PluginCache`] at build time.
    #[must_use]
    pub fn descriptor(plugged_type: TypeKey) -> Self {
        Self::with_builder(plugged_type, None)
    }

    fn with_builder(plugged_type: TypeKey, builder: Option<BuildFn>) -> Self {
        Self {
            concrete_key: plugged_type.short_name(),
            plugged_type,
            source: DefinitionSource::Explicit,
            params: Vec::new(),
            setters: Vec::new(),
            builder,
            casts: Vec::new(),
        }
    }

    /// Overrides the concrete key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.concrete_key = key.into();
        self
    }

    /// Marks the plugin as discovered rather than declared.
    #[must_use]
    pub fn implicit(mut self) -> Self {
        self.source = DefinitionSource::Implicit;
        self
    }

    /// Appends a constructor parameter.
    #[must_use]
    pub fn arg(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Appends an optional setter.
    #[must_use]
    pub fn setter(mut self, param: Param) -> Self {
        self.add_setter(Setter {
            param,
            mandatory: false,
        });
        self
    }

    /// Appends a setter that is always resolved.
    #[must_use]
    pub fn mandatory_setter(mut self, param: Param) -> Self {
        self.add_setter(Setter {
            param,
            mandatory: true,
        });
        self
    }

    /// Makes objects of this plugin usable as `T`.
    ///
    /// `C` is the representation produced by the builder, usually the
    /// concrete type itself.
    #[must_use]
    pub fn implements<T, C>(mut self, cast: impl Fn(Arc<C>) -> Arc<T> + Send + Sync + 'static) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        C: ?Sized + Send + Sync + 'static,
    {
        self.casts.push((TypeKey::of::<T>(), caster(cast)));
        self
    }

    /// The concrete type this plugin builds.
    #[must_use]
    pub fn plugged_type(&self) -> &TypeKey {
        &self.plugged_type
    }

    /// The key instances use to select this plugin.
    #[must_use]
    pub fn concrete_key(&self) -> &str {
        &self.concrete_key
    }

    /// Whether the plugin was declared or discovered.
    #[must_use]
    pub fn source(&self) -> DefinitionSource {
        self.source
    }

    /// Constructor parameters, in order.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Optional and mandatory setters.
    #[must_use]
    pub fn setters(&self) -> &[Setter] {
        &self.setters
    }

    /// The builder, if one is registered.
    #[must_use]
    pub fn builder(&self) -> Option<&BuildFn> {
        self.builder.as_ref()
    }

    /// Returns `true` if the plugin can build objects itself.
    #[must_use]
    pub fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    /// Plugin types this plugin can be cast to.
    pub fn cast_targets(&self) -> impl Iterator<Item = &TypeKey> {
        self.casts.iter().map(|(target, _)| target)
    }

    pub(crate) fn casts(&self) -> &[(TypeKey, Caster)] {
        &self.casts
    }

    /// Returns `true` if this plugin can be plugged into `plugin_type`.
    #[must_use]
    pub fn can_be_cast_to(&self, plugin_type: &TypeKey) -> bool {
        self.plugged_type.plugs_into(plugin_type)
            || self.casts.iter().any(|(target, _)| target == plugin_type)
    }

    /// Looks up a constructor parameter or setter by name.
    #[must_use]
    pub fn find_param(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .chain(self.setters.iter().map(|s| &s.param))
            .find(|p| p.name() == name)
    }

    /// Closes a generic plugin over `args`.
    ///
    /// Non-generic plugins are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::InvalidGenericArguments`] if the arity does
    /// not match.
    pub fn close(&self, args: &[TypeKey]) -> Result<Plugin, KeystoneError> {
        if !self.plugged_type.is_open_generic() {
            return Ok(self.clone());
        }

        let mut closed = self.clone();
        closed.plugged_type = self.plugged_type.close(args)?;
        Ok(closed)
    }

    /// Merges a duplicate registration of the same concrete type.
    ///
    /// Setter sets and casts are unioned; a missing builder or parameter list
    /// is taken from `other`.
    pub fn merge(&mut self, other: &Plugin) {
        for setter in &other.setters {
            self.add_setter(setter.clone());
        }

        for (target, cast) in &other.casts {
            if !self.casts.iter().any(|(existing, _)| existing == target) {
                self.casts.push((target.clone(), Arc::clone(cast)));
            }
        }

        if self.builder.is_none() {
            self.builder.clone_from(&other.builder);
        }

        if self.params.is_empty() {
            self.params.clone_from(&other.params);
        }
    }

    fn add_setter(&mut self, setter: Setter) {
        match self
            .setters
            .iter_mut()
            .find(|s| s.param.name() == setter.param.name())
        {
            Some(existing) => existing.mandatory |= setter.mandatory,
            None => self.setters.push(setter),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("plugged_type", &self.plugged_type)
            .field("concrete_key", &self.concrete_key)
            .field("source", &self.source)
            .field("params", &self.params)
            .field("setters", &self.setters)
            .field("has_builder", &self.builder.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Engine: Send + Sync {}

    struct Diesel;
    impl Engine for Diesel {}

    #[test]
    fn concrete_key_defaults_to_short_name() {
        let plugin = Plugin::new::<Diesel, _>(|_| Ok(Diesel));
        assert_eq!(plugin.concrete_key(), "Diesel");
        assert_eq!(plugin.with_key("Big").concrete_key(), "Big");
    }

    #[test]
    fn casts_make_plugin_assignable() {
        let plain = Plugin::new::<Diesel, _>(|_| Ok(Diesel));
        assert!(!plain.can_be_cast_to(&TypeKey::of::<dyn Engine>()));

        let cast = plain.implements::<dyn Engine, Diesel>(|d| d);
        assert!(cast.can_be_cast_to(&TypeKey::of::<dyn Engine>()));
        assert!(cast.can_be_cast_to(&TypeKey::of::<Diesel>()));
    }

    #[test]
    fn merge_unions_setters_and_fills_builder() {
        let mut descriptor = Plugin::descriptor(TypeKey::of::<Diesel>())
            .setter(Param::primitive::<u32>("cylinders"));
        let full = Plugin::new::<Diesel, _>(|_| Ok(Diesel))
            .mandatory_setter(Param::primitive::<u32>("cylinders"))
            .setter(Param::primitive::<String>("fuel"));

        descriptor.merge(&full);

        assert!(descriptor.has_builder());
        assert_eq!(descriptor.setters().len(), 2);
        assert!(descriptor.setters()[0].mandatory);
    }

    #[test]
    fn close_only_touches_open_generics() {
        let plain = Plugin::new::<Diesel, _>(|_| Ok(Diesel));
        let closed = plain.close(&[TypeKey::of::<u8>()]).unwrap();
        assert_eq!(closed.plugged_type(), plain.plugged_type());

        let generic = Plugin::descriptor(TypeKey::generic("Cache", 1));
        let closed = generic.close(&[TypeKey::of::<u8>()]).unwrap();
        assert!(closed.plugged_type().is_closed_generic());
        assert_eq!(closed.concrete_key(), "Cache");
    }

    #[test]
    fn primitive_params_parse_with_from_str() {
        let param = Param::primitive::<u16>("port");
        let ParamKind::Primitive { parse, .. } = param.kind() else {
            panic!("expected primitive");
        };
        assert_eq!(parse("8080").unwrap().downcast_ref::<u16>(), Some(&8080));
        assert!(parse("eighty").is_err());
    }
}
