//! Runtime type identity.
//!
//! [`TypeKey`] names the plugin types and concrete types the container works
//! with. Two kinds of identity are supported:
//!
//! - **Rust types**: `TypeKey::of::<T>()` for any `T: ?Sized + 'static`,
//!   including trait objects such as `dyn Widget`.
//! - **Generic definitions**: `TypeKey::generic("Repository", 1)` names an
//!   *open* generic type. Closing it with concrete arguments produces a
//!   *closed* key (`Repository<User>`) that families and plugins can be
//!   derived for at resolution time.
//!
//! Rust has no runtime generics, so the open/closed relationship is carried
//! explicitly by the key instead of being discovered by reflection.
//!
//! # Example
//!
//! ```
//! use keystone_container::types::TypeKey;
//!
//! struct User;
//!
//! let open = TypeKey::generic("Repository", 1);
//! assert!(open.is_open_generic());
//!
//! let closed = open.close(&[TypeKey::of::<User>()]).unwrap();
//! assert!(closed.is_closed_generic());
//! assert_eq!(closed.generic_definition(), Some(open));
//! ```

use core::any::TypeId;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::KeystoneError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Identity {
    Rust(TypeId),
    Generic { name: Arc<str>, arity: usize },
}

/// Identity of a plugin type or concrete type.
///
/// Cheap to clone. Equality and hashing consider the identity and the generic
/// arguments only; the display name is informational.
#[derive(Clone)]
pub struct TypeKey {
    identity: Identity,
    name: Arc<str>,
    args: Arc<[TypeKey]>,
}

impl TypeKey {
    /// Creates a key for the Rust type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            identity: Identity::Rust(TypeId::of::<T>()),
            name: Arc::from(core::any::type_name::<T>()),
            args: Arc::from(Vec::new()),
        }
    }

    /// Creates a key for a named generic definition with `arity` type
    /// parameters.
    ///
    /// An arity of zero yields a plain named key, useful for abstractions that
    /// have no Rust type of their own.
    #[must_use]
    pub fn generic(name: impl Into<Arc<str>>, arity: usize) -> Self {
        let name = name.into();
        Self {
            identity: Identity::Generic {
                name: Arc::clone(&name),
                arity,
            },
            name,
            args: Arc::from(Vec::new()),
        }
    }

    /// Creates a plain named key with no generic parameters.
    #[must_use]
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::generic(name, 0)
    }

    /// Closes an open generic key with the given type arguments.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::InvalidGenericArguments`] if this key is not
    /// an open generic definition or the number of arguments does not match
    /// its arity.
    pub fn close(&self, args: &[TypeKey]) -> Result<TypeKey, KeystoneError> {
        if !self.is_open_generic() || args.len() != self.arity() {
            return Err(KeystoneError::InvalidGenericArguments {
                key: self.clone(),
                given: args.len(),
            });
        }

        Ok(Self {
            identity: self.identity.clone(),
            name: Arc::clone(&self.name),
            args: Arc::from(args.to_vec()),
        })
    }

    /// Returns the number of generic parameters of the definition.
    #[must_use]
    pub fn arity(&self) -> usize {
        match &self.identity {
            Identity::Rust(_) => 0,
            Identity::Generic { arity, .. } => *arity,
        }
    }

    /// Returns `true` for a generic definition without arguments.
    #[must_use]
    pub fn is_open_generic(&self) -> bool {
        self.arity() > 0 && self.args.is_empty()
    }

    /// Returns `true` for a generic definition closed over its arguments.
    #[must_use]
    pub fn is_closed_generic(&self) -> bool {
        self.arity() > 0 && !self.args.is_empty()
    }

    /// Returns the open definition of a generic key.
    ///
    /// Open keys return themselves; non-generic keys return `None`.
    #[must_use]
    pub fn generic_definition(&self) -> Option<TypeKey> {
        if self.arity() == 0 {
            return None;
        }

        Some(Self {
            identity: self.identity.clone(),
            name: Arc::clone(&self.name),
            args: Arc::from(Vec::new()),
        })
    }

    /// Returns the generic arguments of a closed key.
    #[must_use]
    pub fn generic_args(&self) -> &[TypeKey] {
        &self.args
    }

    /// Returns the Rust [`TypeId`], if this key names a Rust type.
    #[must_use]
    pub fn type_id(&self) -> Option<TypeId> {
        match &self.identity {
            Identity::Rust(id) => Some(*id),
            Identity::Generic { .. } => None,
        }
    }

    /// Returns `true` if this key names the Rust type `T`.
    #[must_use]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }

    /// Returns the full name without generic arguments.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the last path segment of the name.
    ///
    /// `my_app::widgets::ColorWidget` becomes `ColorWidget`. Used as the
    /// default concrete key of plugins.
    #[must_use]
    pub fn short_name(&self) -> String {
        let (base, rest) = match self.name.find('<') {
            Some(idx) => self.name.split_at(idx),
            None => (&*self.name, ""),
        };
        let base = base.rsplit("::").next().unwrap_or(base);
        format!("{base}{rest}")
    }

    /// Returns `true` if an implementation of `self` may be plugged into a
    /// family of `plugin_type` without an explicit cast.
    ///
    /// Identical keys always match. Generic keys match when both are open
    /// with the same arity, or both are closed over the same arguments.
    /// Named plugin types that carry no Rust identity accept any key.
    #[must_use]
    pub fn plugs_into(&self, plugin_type: &TypeKey) -> bool {
        if self == plugin_type {
            return true;
        }

        if plugin_type.is_open_generic() {
            return self.is_open_generic() && self.arity() == plugin_type.arity();
        }

        if plugin_type.is_closed_generic() {
            return self.is_closed_generic() && self.args == plugin_type.args;
        }

        plugin_type.type_id().is_none()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.args == other.args
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.args.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;

        if self.is_open_generic() {
            write!(f, "<{}>", ",".repeat(self.arity() - 1))?;
        } else if self.is_closed_generic() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }

        Ok(())
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Widget {}
    struct ColorWidget;
    struct User;
    struct Order;

    #[test]
    fn rust_keys_compare_by_type_id() {
        assert_eq!(TypeKey::of::<ColorWidget>(), TypeKey::of::<ColorWidget>());
        assert_ne!(TypeKey::of::<ColorWidget>(), TypeKey::of::<dyn Widget>());
        assert!(TypeKey::of::<dyn Widget>().is::<dyn Widget>());
    }

    #[test]
    fn short_name_strips_module_path() {
        let key = TypeKey::of::<ColorWidget>();
        assert_eq!(key.short_name(), "ColorWidget");
        assert_eq!(TypeKey::named("Handler").short_name(), "Handler");
    }

    #[test]
    fn close_requires_matching_arity() {
        let open = TypeKey::generic("Map", 2);
        assert!(open.close(&[TypeKey::of::<User>()]).is_err());

        let closed = open
            .close(&[TypeKey::of::<User>(), TypeKey::of::<Order>()])
            .unwrap();
        assert_eq!(closed.generic_args().len(), 2);
        assert!(closed.close(&[TypeKey::of::<User>()]).is_err());
    }

    #[test]
    fn closed_keys_differ_by_arguments() {
        let open = TypeKey::generic("Repository", 1);
        let users = open.close(&[TypeKey::of::<User>()]).unwrap();
        let orders = open.close(&[TypeKey::of::<Order>()]).unwrap();

        assert_ne!(users, orders);
        assert_ne!(users, open);
        assert_eq!(users.generic_definition(), orders.generic_definition());
    }

    #[test]
    fn display_renders_generic_shape() {
        let open = TypeKey::generic("Map", 2);
        assert_eq!(open.to_string(), "Map<,>");

        let closed = TypeKey::generic("Box", 1)
            .close(&[TypeKey::named("User")])
            .unwrap();
        assert_eq!(closed.to_string(), "Box<User>");
    }

    #[test]
    fn plugs_into_follows_generic_shape() {
        let family = TypeKey::generic("Repository", 1);
        let plugin = TypeKey::generic("SqlRepository", 1);
        assert!(plugin.plugs_into(&family));
        assert!(!TypeKey::generic("Pair", 2).plugs_into(&family));

        let user = [TypeKey::of::<User>()];
        let closed_family = family.close(&user).unwrap();
        let closed_plugin = plugin.close(&user).unwrap();
        assert!(closed_plugin.plugs_into(&closed_family));
        assert!(!TypeKey::of::<ColorWidget>().plugs_into(&TypeKey::of::<dyn Widget>()));
    }
}
