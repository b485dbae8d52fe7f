//! The instance resolution core of Keystone.
//!
//! `keystone_container` turns a description of how plugin types map to
//! concrete implementations into object graphs at runtime:
//!
//! - [`types`] - Runtime type identity, including generic keys
//! - [`object`] - Type-erased built values and casts
//! - [`plugin`] - Concrete types, their builders and the plugin cache
//! - [`instance`] - Recipes for building one object
//! - [`family`] - All instances and plugins of one plugin type
//! - [`policy`] - Lifecycles and scopes
//! - [`interceptor`] - Post-construction hooks
//! - [`session`] - The construction context of one request
//! - [`profile`] - Profile and machine overrides of defaults
//! - [`graph`] - The configuration model
//! - [`registry`] - Configuration front-ends
//! - [`settings`] - Container-wide settings
//! - [`container`] - The resolution facade
//!
//! # Example
//!
//! ```
//! use keystone_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Widget: Send + Sync {
//!     fn color(&self) -> &str;
//! }
//!
//! struct ColorWidget {
//!     color: String,
//! }
//!
//! impl Widget for ColorWidget {
//!     fn color(&self) -> &str {
//!         &self.color
//!     }
//! }
//!
//! let container = Container::builder()
//!     .configure(|graph| {
//!         let widget = TypeKey::of::<dyn Widget>();
//!         graph.add_plugin(
//!             &widget,
//!             Plugin::new::<ColorWidget, _>(|args| {
//!                 Ok(ColorWidget { color: args.value("color")? })
//!             })
//!             .with_key("Color")
//!             .arg(Param::primitive::<String>("color"))
//!             .implements::<dyn Widget, ColorWidget>(|w| w),
//!         )?;
//!         graph.add_instance(
//!             &widget,
//!             Instance::configured(
//!                 ConfiguredInstance::for_concrete_key("Color").with_property("color", "Red"),
//!             )
//!             .named("Red"),
//!         )
//!     })
//!     .build()
//!     .unwrap();
//!
//! let widget: Arc<dyn Widget> = container.get_instance().unwrap();
//! assert_eq!(widget.color(), "Red");
//! ```

/// Runtime type identity.
pub mod types;

/// Errors and their stable codes.
pub mod error;

/// Type-erased built values, arrays and casts.
pub mod object;

/// Concrete types, their signatures and builders.
pub mod plugin;

/// Instances: recipes for building one object.
pub mod instance;

/// Plugin families.
pub mod family;

/// Build policies, lifecycles and scopes.
pub mod policy;

/// Instance and type interceptors.
pub mod interceptor;

/// Build sessions.
pub mod session;

/// Profiles and machine overrides.
pub mod profile;

/// The configuration graph.
pub mod graph;

/// Configuration front-ends.
pub mod registry;

/// Container settings.
pub mod settings;

/// The container facade.
pub mod container;

mod pipeline;

pub use container::{Container, ContainerBuilder};
pub use error::{ErrorCode, ErrorKind, KeystoneError};

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::container::*;
    pub use crate::error::*;
    pub use crate::family::*;
    pub use crate::graph::*;
    pub use crate::instance::*;
    pub use crate::interceptor::*;
    pub use crate::object::*;
    pub use crate::plugin::*;
    pub use crate::policy::*;
    pub use crate::profile::*;
    pub use crate::registry::*;
    pub use crate::session::*;
    pub use crate::settings::*;
    pub use crate::types::*;
}
