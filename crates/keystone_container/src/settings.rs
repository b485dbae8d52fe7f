//! Container-wide settings.
//!
//! Settings are applied to the graph just before it is sealed, after every
//! registry has run.
//!
//! ```
//! use keystone_container::settings::ContainerSettings;
//!
//! let settings = ContainerSettings::from_json_str(
//!     r#"{ "default_profile": "Blue", "machine_name": "SERVER" }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(settings.default_profile, "Blue");
//! assert_eq!(settings.machine_name.as_deref(), Some("SERVER"));
//! assert!(!settings.strict_profiles);
//! ```

use serde::Deserialize;

use crate::error::KeystoneError;
use crate::graph::PluginGraph;

/// Environment variables consulted for the machine name, in order.
const MACHINE_NAME_VARS: [&str; 2] = ["HOSTNAME", "COMPUTERNAME"];

/// Settings applied when a container is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerSettings {
    /// Profile selected when the container starts. Empty means none.
    pub default_profile: String,

    /// Machine whose overrides apply. `None` reads the environment.
    pub machine_name: Option<String>,

    /// Fail the build when `default_profile` names no configured profile.
    pub strict_profiles: bool,
}

impl ContainerSettings {
    /// Creates default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses settings from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::InvalidSettings`] if the JSON is malformed
    /// or has unknown fields.
    pub fn from_json_str(json: &str) -> Result<Self, KeystoneError> {
        serde_json::from_str(json).map_err(|err| KeystoneError::InvalidSettings(err.to_string()))
    }

    /// Sets the default profile.
    #[must_use]
    pub fn with_default_profile(mut self, profile: impl Into<String>) -> Self {
        self.default_profile = profile.into();
        self
    }

    /// Sets the machine name.
    #[must_use]
    pub fn with_machine_name(mut self, machine: impl Into<String>) -> Self {
        self.machine_name = Some(machine.into());
        self
    }

    /// Makes an unknown default profile a build error.
    #[must_use]
    pub fn with_strict_profiles(mut self, strict: bool) -> Self {
        self.strict_profiles = strict;
        self
    }

    /// The configured machine name, else the first non-empty environment
    /// variable of `HOSTNAME` and `COMPUTERNAME`, else empty.
    #[must_use]
    pub fn resolved_machine_name(&self) -> String {
        if let Some(machine) = &self.machine_name {
            return machine.clone();
        }
        MACHINE_NAME_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .unwrap_or_default()
    }

    /// Writes the profile selection into an unsealed graph.
    ///
    /// # Errors
    ///
    /// - [`KeystoneError::GraphSealed`] if the graph is already sealed.
    /// - [`KeystoneError::ProfileNotFound`] if `strict_profiles` is set and
    ///   the default profile is unknown.
    pub fn apply(&self, graph: &mut PluginGraph) -> Result<(), KeystoneError> {
        graph.set_machine_name(&self.resolved_machine_name())?;
        if self.default_profile.is_empty() {
            return Ok(());
        }

        if !graph.profiles().has_profile(&self.default_profile) {
            if self.strict_profiles {
                return Err(KeystoneError::ProfileNotFound(self.default_profile.clone()));
            }
            graph.log_problem(format!(
                "default profile '{}' has no overrides configured",
                self.default_profile
            ));
        }
        graph.set_default_profile(&self.default_profile)
    }
}
