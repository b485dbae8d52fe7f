//! Registries: the configuration front-ends of a container.
//!
//! A [`Registry`] mutates a [`PluginGraph`] before it is sealed. Every
//! configuration source (hand-written registrations, settings files, the
//! tracing front-end) is a registry, and all of them drive the same graph
//! API.
//!
//! # Example
//!
//! ```
//! use keystone_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct English;
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         "hello".into()
//!     }
//! }
//!
//! struct GreeterRegistry;
//!
//! impl Registry for GreeterRegistry {
//!     fn configure(&self, graph: &mut PluginGraph) -> Result<(), KeystoneError> {
//!         let greeter = TypeKey::of::<dyn Greeter>();
//!         graph.add_plugin(
//!             &greeter,
//!             Plugin::new::<English, _>(|_| Ok(English))
//!                 .implements::<dyn Greeter, English>(|english| english),
//!         )?;
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::builder()
//!     .add_registries(GreeterRegistry)
//!     .build()
//!     .unwrap();
//! let greeter: Arc<dyn Greeter> = container.get_instance().unwrap();
//! assert_eq!(greeter.greet(), "hello");
//! ```

use core::any::TypeId;

use crate::container::ContainerBuilder;
use crate::error::KeystoneError;
use crate::graph::PluginGraph;

// ─────────────────────────────────────────────────────────────────────────────
// RegistryId
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a registry type.
///
/// Used for dependency ordering and duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryId {
    type_id: TypeId,
    type_name: &'static str,
}

impl RegistryId {
    /// Creates a `RegistryId` for the given registry type.
    #[must_use]
    pub fn of<R: Registry>() -> Self {
        Self {
            type_id: TypeId::of::<R>(),
            type_name: core::any::type_name::<R>(),
        }
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the type name for debugging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of container configuration.
///
/// Registries are configured once, in dependency order, when
/// [`ContainerBuilder::build`] runs. An error returned from
/// [`configure`](Self::configure) is recorded as a configuration problem
/// and reported by
/// [`Container::assert_configuration_is_valid`](crate::Container::assert_configuration_is_valid);
/// the remaining registries still run.
pub trait Registry: Send + Sync + 'static {
    /// Adds families, plugins, instances and profiles to the graph.
    ///
    /// # Errors
    ///
    /// Returns the first graph error the registry could not recover from.
    fn configure(&self, graph: &mut PluginGraph) -> Result<(), KeystoneError>;

    /// Returns the registry's name for diagnostics.
    ///
    /// Default implementation returns the type name.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Declares registries that must be configured before this one.
    fn dependencies(&self) -> Vec<RegistryId> {
        Vec::new()
    }

    /// Returns true if this registry can only be added once.
    ///
    /// Default is `true`. Adding a unique registry twice makes
    /// [`ContainerBuilder::build`] fail with
    /// [`KeystoneError::DuplicateRegistry`].
    fn is_unique(&self) -> bool {
        true
    }
}

/// A registry built from a closure. Never unique.
pub struct RegistryFn<F> {
    configure: F,
}

impl<F> RegistryFn<F>
where
    F: Fn(&mut PluginGraph) -> Result<(), KeystoneError> + Send + Sync + 'static,
{
    /// Wraps `configure` as a registry.
    pub fn new(configure: F) -> Self {
        Self { configure }
    }
}

impl<F> Registry for RegistryFn<F>
where
    F: Fn(&mut PluginGraph) -> Result<(), KeystoneError> + Send + Sync + 'static,
{
    fn configure(&self, graph: &mut PluginGraph) -> Result<(), KeystoneError> {
        (self.configure)(graph)
    }

    fn name(&self) -> &str {
        "RegistryFn"
    }

    fn is_unique(&self) -> bool {
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registries Trait (for add_registries polymorphism)
// ─────────────────────────────────────────────────────────────────────────────

/// Types that can be added to a [`ContainerBuilder`]: single registries and
/// [`RegistryGroupBuilder`]s.
pub trait Registries {
    /// Adds these registries to the builder.
    fn add_to_builder(self, builder: &mut ContainerBuilder);
}

impl<R: Registry> Registries for R {
    fn add_to_builder(self, builder: &mut ContainerBuilder) {
        builder.add_registry_boxed(RegistryId::of::<R>(), Box::new(self));
    }
}

impl Registries for RegistryGroupBuilder {
    fn add_to_builder(self, builder: &mut ContainerBuilder) {
        for boxed in self.registries {
            builder.add_registry_boxed(boxed.id, boxed.registry);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RegistryGroup
// ─────────────────────────────────────────────────────────────────────────────

/// A bundle of registries added together.
///
/// ```ignore
/// pub struct ServiceRegistries;
///
/// impl RegistryGroup for ServiceRegistries {
///     fn build(self) -> RegistryGroupBuilder {
///         RegistryGroupBuilder::new()
///             .add(StorageRegistry)
///             .add(HandlerRegistry)
///     }
/// }
///
/// Container::builder()
///     .add_registries(ServiceRegistries.build().disable::<StorageRegistry>())
///     .build()?;
/// ```
pub trait RegistryGroup {
    /// Returns the registries in this group.
    fn build(self) -> RegistryGroupBuilder;
}

/// A boxed registry with its captured [`RegistryId`].
pub(crate) struct BoxedRegistry {
    pub(crate) id: RegistryId,
    pub(crate) registry: Box<dyn Registry>,
}

impl BoxedRegistry {
    pub(crate) fn name(&self) -> &str {
        self.registry.name()
    }
}

/// Builder for customizing registry groups.
#[derive(Default)]
pub struct RegistryGroupBuilder {
    registries: Vec<BoxedRegistry>,
}

impl RegistryGroupBuilder {
    /// Creates a new empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registries: Vec::new(),
        }
    }

    /// Adds a registry to the end of the group.
    #[must_use]
    #[expect(
        clippy::should_implement_trait,
        reason = "This is a builder method, not std::ops::Add"
    )]
    pub fn add<R: Registry>(mut self, registry: R) -> Self {
        self.registries.push(boxed(registry));
        self
    }

    /// Adds a registry before `Target`, or at the beginning if `Target` is
    /// not in the group.
    #[must_use]
    pub fn add_before<R: Registry, Target: Registry>(mut self, registry: R) -> Self {
        let target = RegistryId::of::<Target>();
        let position = self
            .registries
            .iter()
            .position(|r| r.id == target)
            .unwrap_or(0);
        self.registries.insert(position, boxed(registry));
        self
    }

    /// Adds a registry after `Target`, or at the end if `Target` is not in
    /// the group.
    #[must_use]
    pub fn add_after<R: Registry, Target: Registry>(mut self, registry: R) -> Self {
        let target = RegistryId::of::<Target>();
        let position = self
            .registries
            .iter()
            .position(|r| r.id == target)
            .map_or(self.registries.len(), |i| i + 1);
        self.registries.insert(position, boxed(registry));
        self
    }

    /// Removes every registry of type `R`. No-op if absent.
    #[must_use]
    pub fn disable<R: Registry>(mut self) -> Self {
        let target = RegistryId::of::<R>();
        self.registries.retain(|r| r.id != target);
        self
    }

    /// Returns the number of registries in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Returns true if the group contains no registries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

fn boxed<R: Registry>(registry: R) -> BoxedRegistry {
    BoxedRegistry {
        id: RegistryId::of::<R>(),
        registry: Box::new(registry),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordering
// ─────────────────────────────────────────────────────────────────────────────

/// Orders registries so that every registry follows its dependencies.
///
/// Kahn's algorithm with a FIFO queue, so independent registries keep the
/// order they were added in.
///
/// # Errors
///
/// - [`KeystoneError::RegistryDependencyMissing`] if a dependency was never
///   added.
/// - [`KeystoneError::RegistryCycle`] if dependencies form a cycle.
pub(crate) fn sort_by_dependencies(registries: Vec<BoxedRegistry>) -> Result<Vec<BoxedRegistry>, KeystoneError> {
    use hashbrown::HashMap;
    use std::collections::VecDeque;

    let n = registries.len();
    let mut first_index: HashMap<RegistryId, usize> = HashMap::new();
    for (i, entry) in registries.iter().enumerate() {
        first_index.entry(entry.id).or_insert(i);
    }

    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, entry) in registries.iter().enumerate() {
        for dependency in entry.registry.dependencies() {
            let Some(&dep_idx) = first_index.get(&dependency) else {
                return Err(KeystoneError::RegistryDependencyMissing {
                    registry: entry.name().to_string(),
                    dependency: dependency.type_name(),
                });
            };
            dependents[dep_idx].push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted_indices: Vec<usize> = Vec::with_capacity(n);

    while let Some(idx) = queue.pop_front() {
        sorted_indices.push(idx);
        for &dependent_idx in &dependents[idx] {
            in_degree[dependent_idx] -= 1;
            if in_degree[dependent_idx] == 0 {
                queue.push_back(dependent_idx);
            }
        }
    }

    if sorted_indices.len() != n {
        let registries = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| registries[i].name().to_string())
            .collect();
        return Err(KeystoneError::RegistryCycle { registries });
    }

    let mut slots: Vec<Option<BoxedRegistry>> = registries.into_iter().map(Some).collect();
    Ok(sorted_indices
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RegistryA;
    impl Registry for RegistryA {
        fn configure(&self, _graph: &mut PluginGraph) -> Result<(), KeystoneError> {
            Ok(())
        }
    }

    struct RegistryB;
    impl Registry for RegistryB {
        fn configure(&self, _graph: &mut PluginGraph) -> Result<(), KeystoneError> {
            Ok(())
        }
        fn dependencies(&self) -> Vec<RegistryId> {
            vec![RegistryId::of::<RegistryA>()]
        }
    }

    struct RegistryC;
    impl Registry for RegistryC {
        fn configure(&self, _graph: &mut PluginGraph) -> Result<(), KeystoneError> {
            Ok(())
        }
    }

    struct Loop1;
    impl Registry for Loop1 {
        fn configure(&self, _graph: &mut PluginGraph) -> Result<(), KeystoneError> {
            Ok(())
        }
        fn dependencies(&self) -> Vec<RegistryId> {
            vec![RegistryId::of::<Loop2>()]
        }
    }

    struct Loop2;
    impl Registry for Loop2 {
        fn configure(&self, _graph: &mut PluginGraph) -> Result<(), KeystoneError> {
            Ok(())
        }
        fn dependencies(&self) -> Vec<RegistryId> {
            vec![RegistryId::of::<Loop1>()]
        }
    }

    fn names(registries: &[BoxedRegistry]) -> Vec<&str> {
        registries
            .iter()
            .map(|r| r.name().rsplit("::").next().unwrap_or_default())
            .collect()
    }

    #[test]
    fn registry_id_equality() {
        assert_eq!(RegistryId::of::<RegistryA>(), RegistryId::of::<RegistryA>());
        assert_ne!(RegistryId::of::<RegistryA>(), RegistryId::of::<RegistryB>());
        assert!(RegistryId::of::<RegistryA>().type_name().contains("RegistryA"));
    }

    #[test]
    fn registry_defaults() {
        assert!(RegistryA.is_unique());
        assert!(RegistryA.dependencies().is_empty());
        assert!(RegistryA.name().contains("RegistryA"));
    }

    #[test]
    fn closure_registries_are_not_unique() {
        let registry = RegistryFn::new(|_graph: &mut PluginGraph| Ok(()));
        assert!(!registry.is_unique());
    }

    #[test]
    fn group_builder_add_before_and_after() {
        let group = RegistryGroupBuilder::new()
            .add(RegistryA)
            .add(RegistryB)
            .add_before::<_, RegistryB>(RegistryC);
        assert_eq!(names(&group.registries), ["RegistryA", "RegistryC", "RegistryB"]);

        let group = RegistryGroupBuilder::new()
            .add(RegistryA)
            .add(RegistryB)
            .add_after::<_, RegistryA>(RegistryC);
        assert_eq!(names(&group.registries), ["RegistryA", "RegistryC", "RegistryB"]);
    }

    #[test]
    fn group_builder_missing_target() {
        let group = RegistryGroupBuilder::new()
            .add(RegistryA)
            .add_before::<_, RegistryB>(RegistryC);
        assert_eq!(names(&group.registries), ["RegistryC", "RegistryA"]);

        let group = RegistryGroupBuilder::new()
            .add(RegistryA)
            .add_after::<_, RegistryB>(RegistryC);
        assert_eq!(names(&group.registries), ["RegistryA", "RegistryC"]);
    }

    #[test]
    fn group_builder_disable() {
        let group = RegistryGroupBuilder::new()
            .add(RegistryA)
            .add(RegistryB)
            .disable::<RegistryA>()
            .disable::<RegistryC>();
        assert_eq!(group.len(), 1);
        assert!(!group.is_empty());
        assert_eq!(names(&group.registries), ["RegistryB"]);
    }

    #[test]
    fn sort_places_dependencies_first() {
        let registries = vec![boxed(RegistryB), boxed(RegistryC), boxed(RegistryA)];
        let sorted = sort_by_dependencies(registries).unwrap();
        assert_eq!(names(&sorted), ["RegistryC", "RegistryA", "RegistryB"]);
    }

    #[test]
    fn sort_reports_missing_dependency() {
        let err = sort_by_dependencies(vec![boxed(RegistryB)]).err().unwrap();
        assert_eq!(err.code().as_u16(), 140);
        assert!(err.to_string().contains("RegistryA"));
    }

    #[test]
    fn sort_reports_cycle() {
        let err = sort_by_dependencies(vec![boxed(Loop1), boxed(Loop2), boxed(RegistryA)])
            .err()
            .unwrap();
        assert_eq!(err.code().as_u16(), 141);
        match err {
            KeystoneError::RegistryCycle { registries } => assert_eq!(registries.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
