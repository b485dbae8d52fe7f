//! Integration tests for the tracing registry inside a container.

use keystone_container::Container;
use keystone_container::error::KeystoneError;
use keystone_container::graph::PluginGraph;
use keystone_container::registry::{Registry, RegistryGroupBuilder, RegistryId};
use keystone_container::types::TypeKey;
use keystone_tracing::{TracingConfig, TracingFormat, TracingRegistry};
use std::sync::Arc;
use tracing::Level;

struct NeedsTracing;

impl Registry for NeedsTracing {
    fn configure(&self, graph: &mut PluginGraph) -> Result<(), KeystoneError> {
        assert!(graph.has_family(&TypeKey::of::<TracingConfig>()));
        Ok(())
    }

    fn dependencies(&self) -> Vec<RegistryId> {
        vec![RegistryId::of::<TracingRegistry>()]
    }
}

#[test]
fn config_is_a_shared_singleton() {
    let container = Container::builder()
        .add_registries(TracingRegistry::default().with_format(TracingFormat::Json))
        .build()
        .unwrap();

    let first: Arc<TracingConfig> = container.get_instance().unwrap();
    let second: Arc<TracingConfig> = container.get_instance().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.format, TracingFormat::Json);
    assert_eq!(first.level, Level::INFO);
    assert!(!first.build_traces);
}

#[test]
fn build_traces_are_published() {
    let container = Container::builder()
        .add_registries(TracingRegistry::default().with_build_traces(true))
        .build()
        .unwrap();

    let config: Arc<TracingConfig> = container.get_instance().unwrap();
    assert!(config.build_traces);
    assert!(config.directives().ends_with("keystone_container=trace"));
}

#[test]
fn dependents_run_after_tracing() {
    let group = RegistryGroupBuilder::new()
        .add(NeedsTracing)
        .add(TracingRegistry::default());

    let container = Container::builder().add_registries(group).build().unwrap();
    assert!(container.configuration_problems().is_empty());
}

#[test]
fn tracing_registry_is_unique() {
    let err = Container::builder()
        .add_registries(TracingRegistry::default())
        .add_registries(TracingRegistry::default())
        .build()
        .unwrap_err();
    assert_eq!(err.code().as_u16(), 142);
}
