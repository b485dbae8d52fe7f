//! Tracing front-end for Keystone containers.
//!
//! [`TracingRegistry`] is an ordinary [`Registry`]: added to a container
//! builder, it installs a `tracing` subscriber before the other registries
//! configure their families, and publishes what it installed as a
//! [`TracingConfig`] singleton that services can depend on.
//!
//! Keystone logs family derivation, profile switches and ejection at
//! `debug`, and every build frame at `trace`. [`TracingRegistry::with_build_traces`]
//! turns the frame traces on without raising the level of everything else.
//!
//! # Example
//!
//! ```
//! use keystone_container::Container;
//! use keystone_tracing::{TracingConfig, TracingFormat, TracingRegistry};
//! use std::sync::Arc;
//! use tracing::Level;
//!
//! let container = Container::builder()
//!     .add_registries(
//!         TracingRegistry::default()
//!             .with_level(Level::DEBUG)
//!             .with_format(TracingFormat::Compact),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let config: Arc<TracingConfig> = container.get_instance().unwrap();
//! assert_eq!(config.level, Level::DEBUG);
//! ```

use keystone_container::error::KeystoneError;
use keystone_container::graph::PluginGraph;
use keystone_container::instance::Instance;
use keystone_container::policy::Lifecycle;
use keystone_container::registry::Registry;
use keystone_container::types::TypeKey;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry as Subscriber};

/// Target of the container's own events.
const CONTAINER_TARGET: &str = "keystone_container";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line, colored.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

/// The tracing settings a container was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Maximum level for everything but the container's build frames.
    pub level: Level,
    /// Output format.
    pub format: TracingFormat,
    /// Whether each build frame is traced.
    pub build_traces: bool,
}

impl TracingConfig {
    /// The filter directives these settings stand for.
    #[must_use]
    pub fn directives(&self) -> String {
        if self.build_traces {
            format!("{},{CONTAINER_TARGET}=trace", self.level)
        } else {
            self.level.to_string()
        }
    }
}

/// Installs a `tracing` subscriber and registers [`TracingConfig`].
///
/// A process has one global subscriber. When one is already installed,
/// including by an earlier container, installing is skipped and only the
/// config instance is registered.
///
/// ```
/// use keystone_tracing::{TracingFormat, TracingRegistry};
///
/// // Watch every object the container builds.
/// let debugging = TracingRegistry::default().with_build_traces(true);
///
/// // JSON for log aggregation, with the container quieter than the app.
/// let production = TracingRegistry::default()
///     .with_format(TracingFormat::Json)
///     .with_env_filter("info,keystone_container=warn");
/// ```
#[derive(Debug, Clone)]
pub struct TracingRegistry {
    config: TracingConfig,
    env_filter: Option<String>,
}

impl Default for TracingRegistry {
    fn default() -> Self {
        Self {
            config: TracingConfig {
                level: Level::INFO,
                format: TracingFormat::Pretty,
                build_traces: false,
            },
            env_filter: None,
        }
    }
}

impl TracingRegistry {
    /// Info level, pretty output, no build traces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.config.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Traces every build frame: plugin type, instance and depth.
    #[must_use]
    pub fn with_build_traces(mut self, enabled: bool) -> Self {
        self.config.build_traces = enabled;
        self
    }

    /// Replaces the derived filter with `target=level` directives.
    ///
    /// An invalid filter falls back to the derived one.
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// The settings this registry publishes.
    #[must_use]
    pub fn config(&self) -> TracingConfig {
        self.config
    }

    fn env_filter(&self) -> EnvFilter {
        let derived = || EnvFilter::new(self.config.directives());
        match &self.env_filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| derived()),
            None => derived(),
        }
    }

    fn install_subscriber(&self) -> bool {
        let output: Box<dyn Layer<Subscriber> + Send + Sync> = match self.config.format {
            TracingFormat::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
            TracingFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
            TracingFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        };

        tracing_subscriber::registry()
            .with(output)
            .with(self.env_filter())
            .try_init()
            .is_ok()
    }
}

impl Registry for TracingRegistry {
    fn configure(&self, graph: &mut PluginGraph) -> Result<(), KeystoneError> {
        let config = TypeKey::of::<TracingConfig>();
        graph.add_instance(&config, Instance::literal(self.config).named("TracingConfig"))?;
        graph.set_lifecycle(&config, Lifecycle::Singleton)?;

        let installed = self.install_subscriber();
        tracing::info!(
            level = %self.config.level,
            format = ?self.config.format,
            build_traces = self.config.build_traces,
            installed,
            "container tracing configured"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "keystone::tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_info_and_pretty() {
        let config = TracingRegistry::default().config();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, TracingFormat::Pretty);
        assert!(!config.build_traces);
    }

    #[test]
    fn build_traces_raise_only_the_container_target() {
        let config = TracingRegistry::new()
            .with_level(Level::WARN)
            .with_build_traces(true)
            .config();
        assert_eq!(config.directives(), "WARN,keystone_container=trace");
        assert_eq!(TracingRegistry::new().config().directives(), "INFO");
    }

    #[test]
    fn custom_filters_replace_the_derived_one() {
        let registry = TracingRegistry::new()
            .with_format(TracingFormat::Json)
            .with_env_filter("keystone_container=debug");
        assert_eq!(registry.env_filter.as_deref(), Some("keystone_container=debug"));
        assert_eq!(registry.config().format, TracingFormat::Json);
    }

    #[test]
    fn registry_adds_config_instance() {
        let mut graph = PluginGraph::new();
        TracingRegistry::default().configure(&mut graph).unwrap();

        let family = graph.family(&TypeKey::of::<TracingConfig>()).unwrap();
        assert_eq!(family.instances().len(), 1);
        assert_eq!(family.lifecycle(), &Lifecycle::Singleton);
    }
}
