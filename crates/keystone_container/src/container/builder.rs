use hashbrown::HashSet;
use std::sync::Arc;

use super::Container;
use crate::error::KeystoneError;
use crate::graph::PluginGraph;
use crate::plugin::PluginCache;
use crate::registry::{BoxedRegistry, Registries, Registry, RegistryFn, RegistryId, sort_by_dependencies};
use crate::settings::ContainerSettings;

/// Collects registries and settings, then builds a [`Container`].
///
/// Registries run in dependency order. Among registries without a
/// dependency between them, the order they were added in is kept.
///
/// ```ignore
/// let container = Container::builder()
///     .add_registries(StorageRegistry)
///     .add_registries(HandlerRegistry)
///     .with_settings(ContainerSettings::new().with_default_profile("Test"))
///     .build()?;
/// ```
#[derive(Default)]
pub struct ContainerBuilder {
    registries: Vec<BoxedRegistry>,
    registry_ids: HashSet<RegistryId>,
    duplicates: Vec<String>,
    settings: ContainerSettings,
    plugin_cache: Option<Arc<PluginCache>>,
}

impl ContainerBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registry or a [`RegistryGroupBuilder`](crate::registry::RegistryGroupBuilder).
    #[must_use]
    pub fn add_registries<R: Registries>(mut self, registries: R) -> Self {
        registries.add_to_builder(&mut self);
        self
    }

    /// Adds a closure as a registry.
    #[must_use]
    pub fn configure<F>(self, configure: F) -> Self
    where
        F: Fn(&mut PluginGraph) -> Result<(), KeystoneError> + Send + Sync + 'static,
    {
        self.add_registries(RegistryFn::new(configure))
    }

    /// Replaces the container settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Uses `plugin_cache` instead of the process-wide cache.
    #[must_use]
    pub fn with_plugin_cache(mut self, plugin_cache: Arc<PluginCache>) -> Self {
        self.plugin_cache = Some(plugin_cache);
        self
    }

    /// Number of registries added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Returns true if no registry was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    pub(crate) fn add_registry_boxed(&mut self, id: RegistryId, registry: Box<dyn Registry>) {
        if registry.is_unique() && !self.registry_ids.insert(id) {
            self.duplicates.push(registry.name().to_string());
            return;
        }
        self.registries.push(BoxedRegistry { id, registry });
    }

    /// Configures every registry in dependency order, applies the settings
    /// and seals the graph.
    ///
    /// A registry that fails records a configuration problem and the build
    /// continues.
    ///
    /// # Errors
    ///
    /// - [`KeystoneError::DuplicateRegistry`] if a unique registry was added
    ///   twice.
    /// - [`KeystoneError::RegistryDependencyMissing`] or
    ///   [`KeystoneError::RegistryCycle`] if the registries cannot be ordered.
    /// - Errors from [`ContainerSettings::apply`].
    pub fn build(self) -> Result<Container, KeystoneError> {
        if let Some(name) = self.duplicates.into_iter().next() {
            return Err(KeystoneError::DuplicateRegistry(name));
        }

        let mut graph = match self.plugin_cache {
            Some(plugin_cache) => PluginGraph::with_plugin_cache(plugin_cache),
            None => PluginGraph::new(),
        };

        for entry in sort_by_dependencies(self.registries)? {
            tracing::debug!(registry = entry.name(), "configuring registry");
            if let Err(err) = entry.registry.configure(&mut graph) {
                graph.log_problem(format!("registry '{}' failed: {err}", entry.name()));
            }
        }

        self.settings.apply(&mut graph)?;
        graph.seal();
        Ok(Container::new(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::types::TypeKey;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct First(Log);
    impl Registry for First {
        fn configure(&self, _graph: &mut PluginGraph) -> Result<(), KeystoneError> {
            self.0.lock().push("first");
            Ok(())
        }
    }

    struct Second(Log);
    impl Registry for Second {
        fn configure(&self, _graph: &mut PluginGraph) -> Result<(), KeystoneError> {
            self.0.lock().push("second");
            Ok(())
        }
        fn dependencies(&self) -> Vec<RegistryId> {
            vec![RegistryId::of::<First>()]
        }
    }

    #[test]
    fn registries_run_after_their_dependencies() {
        let log = Log::default();
        Container::builder()
            .add_registries(Second(Arc::clone(&log)))
            .add_registries(First(Arc::clone(&log)))
            .build()
            .unwrap();

        assert_eq!(*log.lock(), ["first", "second"]);
    }

    #[test]
    fn unique_registries_cannot_be_added_twice() {
        let log = Log::default();
        let err = Container::builder()
            .add_registries(First(Arc::clone(&log)))
            .add_registries(First(Arc::clone(&log)))
            .build()
            .unwrap_err();

        assert_eq!(err.code().as_u16(), 142);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn closures_can_be_added_many_times() {
        let builder = Container::builder()
            .configure(|_graph| Ok(()))
            .configure(|_graph| Ok(()));
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn settings_cannot_be_applied_to_a_sealed_graph() {
        let err = Container::builder()
            .configure(|graph| {
                graph.seal();
                Ok(())
            })
            .build()
            .unwrap_err();

        assert_eq!(err.code().as_u16(), 130);
    }

    #[test]
    fn registry_errors_do_not_abort_the_build() {
        let container = Container::builder()
            .configure(|graph| {
                graph.add_instance(&TypeKey::of::<u32>(), Instance::literal(7_u32))?;
                graph.add_instance(&TypeKey::of::<u32>(), Instance::literal("seven"))
            })
            .build()
            .unwrap();

        assert_eq!(container.configuration_problems().len(), 1);
        assert_eq!(*container.get_instance::<u32>().unwrap(), 7);
        assert!(container.assert_configuration_is_valid().is_err());
    }
}
