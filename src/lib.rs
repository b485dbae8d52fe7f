//! An inversion-of-control container for Rust.
//!

pub use keystone_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use keystone_internal::prelude::*;
}
