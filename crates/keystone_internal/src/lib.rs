//! # Keystone Internal Library
//!
//! Re-exports the core Keystone crates for convenience.

/// Object model, build pipeline and container facade.
pub use keystone_container;

/// Logging front-end for container configuration.
pub use keystone_tracing;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use keystone_container::prelude::*;
    pub use keystone_tracing::{TracingConfig, TracingFormat, TracingRegistry};
}
