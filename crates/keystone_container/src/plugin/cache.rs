use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use super::Plugin;
use crate::types::TypeKey;

static GLOBAL: OnceLock<Arc<PluginCache>> = OnceLock::new();

/// Process-wide registry of plugins keyed by concrete type.
///
/// Sealing a graph registers all of its plugins here, so a configured
/// instance can build any concrete type some graph has described, even if
/// its own family never listed it. Tests that need isolation create their own
/// cache with [`PluginCache::new`] instead of using [`PluginCache::global`].
#[derive(Default)]
pub struct PluginCache {
    plugins: RwLock<HashMap<TypeKey, Plugin>>,
}

impl PluginCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared process-wide cache.
    #[must_use]
    pub fn global() -> Arc<PluginCache> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PluginCache::new())))
    }

    /// Registers a plugin, merging with an existing entry for the same type.
    pub fn register(&self, plugin: &Plugin) {
        let mut plugins = self.plugins.write();
        Self::register_locked(&mut plugins, plugin);
    }

    /// Registers many plugins under a single write lock.
    pub fn register_all<'p>(&self, plugins: impl IntoIterator<Item = &'p Plugin>) {
        let mut cached = self.plugins.write();
        for plugin in plugins {
            Self::register_locked(&mut cached, plugin);
        }
    }

    fn register_locked(cached: &mut HashMap<TypeKey, Plugin>, plugin: &Plugin) {
        cached
            .entry(plugin.plugged_type().clone())
            .and_modify(|existing| existing.merge(plugin))
            .or_insert_with(|| plugin.clone());
    }

    /// Returns the plugin for `concrete_type`.
    ///
    /// Closed generic types fall back to their open definition, closed over
    /// the same arguments.
    #[must_use]
    pub fn plugin_for(&self, concrete_type: &TypeKey) -> Option<Plugin> {
        let plugins = self.plugins.read();
        if let Some(plugin) = plugins.get(concrete_type) {
            return Some(plugin.clone());
        }

        let definition = concrete_type.generic_definition()?;
        plugins
            .get(&definition)?
            .close(concrete_type.generic_args())
            .ok()
    }

    /// Returns `true` if `concrete_type` has a cached plugin.
    #[must_use]
    pub fn contains(&self, concrete_type: &TypeKey) -> bool {
        self.plugins.read().contains_key(concrete_type)
    }

    /// Forgets every registered plugin.
    pub fn reset(&self) {
        self.plugins.write().clear();
    }

    /// Number of cached plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Param;

    struct Mailer;

    #[test]
    fn duplicate_registrations_merge() {
        let cache = PluginCache::new();
        cache.register(&Plugin::descriptor(TypeKey::of::<Mailer>()).setter(Param::primitive::<u16>("port")));
        cache.register(
            &Plugin::new::<Mailer, _>(|_| Ok(Mailer)).setter(Param::primitive::<String>("host")),
        );

        let plugin = cache.plugin_for(&TypeKey::of::<Mailer>()).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(plugin.has_builder());
        assert_eq!(plugin.setters().len(), 2);
    }

    #[test]
    fn closed_generics_use_open_definition() {
        let cache = PluginCache::new();
        let open = TypeKey::generic("Queue", 1);
        cache.register_all([&Plugin::descriptor(open.clone())]);

        let closed = open.close(&[TypeKey::of::<Mailer>()]).unwrap();
        let plugin = cache.plugin_for(&closed).unwrap();
        assert_eq!(plugin.plugged_type(), &closed);
    }

    #[test]
    fn reset_clears_cache() {
        let cache = PluginCache::new();
        cache.register(&Plugin::new::<Mailer, _>(|_| Ok(Mailer)));
        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.plugin_for(&TypeKey::of::<Mailer>()).is_none());
    }
}
