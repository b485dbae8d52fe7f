//! Profiles and machine overrides of default instances.
//!
//! The default instance of a plugin type is resolved in three layers, each
//! overriding the one below:
//!
//! 1. the family's own default,
//! 2. the override registered for the current machine,
//! 3. the override registered for the current profile.
//!
//! [`ProfileManager::calculate_defaults`] flattens the layers into a single
//! [`Profile`] that build sessions read without further lookups.

use hashbrown::HashMap;
use std::sync::Arc;

use crate::error::KeystoneError;
use crate::instance::Instance;
use crate::types::TypeKey;

/// A named set of default-instance overrides.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    name: String,
    instances: HashMap<TypeKey, Instance>,
}

impl Profile {
    /// Creates an empty profile called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: HashMap::new(),
        }
    }

    /// The profile name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overrides the default of `plugin_type`.
    pub fn set_default(&mut self, plugin_type: TypeKey, instance: Instance) {
        self.instances.insert(plugin_type, instance);
    }

    /// Removes the override of `plugin_type`.
    pub fn remove_default(&mut self, plugin_type: &TypeKey) -> Option<Instance> {
        self.instances.remove(plugin_type)
    }

    /// The override of `plugin_type`.
    #[must_use]
    pub fn default_for(&self, plugin_type: &TypeKey) -> Option<&Instance> {
        self.instances.get(plugin_type)
    }

    /// Every override, in no particular order.
    pub fn defaults(&self) -> impl Iterator<Item = (&TypeKey, &Instance)> {
        self.instances.iter()
    }

    /// Copies every override of `other` over this profile.
    pub fn overlay(&mut self, other: &Profile) {
        for (plugin_type, instance) in &other.instances {
            self.instances.insert(plugin_type.clone(), instance.clone());
        }
    }

    /// Number of overridden plugin types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if the profile overrides nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Holds every profile and machine override and the current selection.
#[derive(Debug, Clone, Default)]
pub struct ProfileManager {
    profiles: HashMap<String, Profile>,
    machines: HashMap<String, Profile>,
    default_profile_name: String,
    machine_name: String,
    current_profile: String,
    family_defaults: Profile,
    current_defaults: Arc<Profile>,
}

impl ProfileManager {
    /// Creates a manager with no profiles or machines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile used when no profile is selected.
    pub fn set_default_profile_name(&mut self, name: impl Into<String>) {
        self.default_profile_name = name.into();
    }

    /// Name of the profile used when none is selected.
    #[must_use]
    pub fn default_profile_name(&self) -> &str {
        &self.default_profile_name
    }

    /// Machine whose overrides apply.
    pub fn set_machine_name(&mut self, name: impl Into<String>) {
        self.machine_name = name.into();
    }

    /// Name of the machine whose overrides apply.
    #[must_use]
    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Returns the profile called `name`, creating it if needed.
    pub fn profile_mut(&mut self, name: &str) -> &mut Profile {
        self.profiles
            .entry(name.to_string())
            .or_insert_with(|| Profile::new(name))
    }

    /// Returns the overrides of machine `name`, creating them if needed.
    pub fn machine_mut(&mut self, name: &str) -> &mut Profile {
        self.machines
            .entry(name.to_string())
            .or_insert_with(|| Profile::new(name))
    }

    /// Overrides the default of `plugin_type` in profile `profile`.
    pub fn set_profile_default(&mut self, profile: &str, plugin_type: TypeKey, instance: Instance) {
        self.profile_mut(profile).set_default(plugin_type, instance);
    }

    /// Overrides the default of `plugin_type` on machine `machine`.
    pub fn set_machine_default(&mut self, machine: &str, plugin_type: TypeKey, instance: Instance) {
        self.machine_mut(machine).set_default(plugin_type, instance);
    }

    /// The profile called `name`, if configured.
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Returns `true` if a profile called `name` is configured.
    #[must_use]
    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Names of every profile, sorted.
    #[must_use]
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Flattens family defaults, machine overrides and profile overrides.
    ///
    /// An empty `profile` means the default profile. Missing machines and
    /// profiles contribute nothing.
    #[must_use]
    pub fn calculate_defaults(&self, family_defaults: &Profile, machine: &str, profile: &str) -> Profile {
        let profile = if profile.is_empty() {
            self.default_profile_name.as_str()
        } else {
            profile
        };

        let mut defaults = Profile::new(profile);
        defaults.overlay(family_defaults);
        if let Some(machine) = self.machines.get(machine) {
            defaults.overlay(machine);
        }
        if let Some(profile) = self.profiles.get(profile) {
            defaults.overlay(profile);
        }
        defaults
    }

    /// Stores the family defaults and computes the current defaults.
    pub(crate) fn seal(&mut self, family_defaults: Profile) {
        self.family_defaults = family_defaults;
        self.current_profile = self.default_profile_name.clone();
        self.recalculate();
    }

    /// Switches the current profile.
    ///
    /// An empty name selects the default profile.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::ProfileNotFound`] for an unknown non-empty
    /// name.
    pub fn set_current_profile(&mut self, name: &str) -> Result<Arc<Profile>, KeystoneError> {
        if !name.is_empty() && !self.profiles.contains_key(name) {
            return Err(KeystoneError::ProfileNotFound(name.to_string()));
        }

        self.current_profile = name.to_string();
        self.recalculate();
        tracing::debug!(profile = %self.current_defaults.name(), "switched profile");
        Ok(Arc::clone(&self.current_defaults))
    }

    /// Name of the current profile. Empty means the default profile.
    #[must_use]
    pub fn current_profile(&self) -> &str {
        &self.current_profile
    }

    /// The flattened defaults of the current profile.
    #[must_use]
    pub fn current_defaults(&self) -> Arc<Profile> {
        Arc::clone(&self.current_defaults)
    }

    /// The defaults declared by the families themselves.
    #[must_use]
    pub fn family_defaults(&self) -> &Profile {
        &self.family_defaults
    }

    fn recalculate(&mut self) {
        self.current_defaults = Arc::new(self.calculate_defaults(
            &self.family_defaults,
            &self.machine_name,
            &self.current_profile,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Widget;

    fn widget() -> TypeKey {
        TypeKey::of::<Widget>()
    }

    fn named(name: &str) -> Instance {
        Instance::null().named(name)
    }

    fn family_defaults(name: &str) -> Profile {
        let mut defaults = Profile::default();
        defaults.set_default(widget(), named(name));
        defaults
    }

    #[test]
    fn profile_beats_machine_beats_family() {
        let mut manager = ProfileManager::new();
        manager.set_machine_default("SERVER", widget(), named("Machine"));
        manager.set_profile_default("Blue", widget(), named("Profile"));

        let resolve = |machine: &str, profile: &str| {
            manager
                .calculate_defaults(&family_defaults("Family"), machine, profile)
                .default_for(&widget())
                .map(|i| i.name().to_string())
        };

        assert_eq!(resolve("SERVER", "Blue").as_deref(), Some("Profile"));
        assert_eq!(resolve("SERVER", "").as_deref(), Some("Machine"));
        assert_eq!(resolve("LAPTOP", "Green").as_deref(), Some("Family"));
    }

    #[test]
    fn empty_profile_uses_default_profile() {
        let mut manager = ProfileManager::new();
        manager.set_default_profile_name("Blue");
        manager.set_profile_default("Blue", widget(), named("BlueWidget"));
        manager.seal(Profile::default());

        let defaults = manager.current_defaults();
        assert_eq!(defaults.name(), "Blue");
        assert_eq!(defaults.default_for(&widget()).unwrap().name(), "BlueWidget");
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let mut manager = ProfileManager::new();
        manager.seal(Profile::default());
        let err = manager.set_current_profile("Missing").unwrap_err();
        assert_eq!(err.code().as_u16(), 280);
        assert!(manager.set_current_profile("").is_ok());
    }

    proptest! {
        #[test]
        fn precedence_holds_for_any_combination(
            family in any::<bool>(),
            machine in any::<bool>(),
            profile in any::<bool>(),
        ) {
            let mut manager = ProfileManager::new();
            if machine {
                manager.set_machine_default("M", widget(), named("M"));
            }
            if profile {
                manager.set_profile_default("P", widget(), named("P"));
            }
            let base = if family { family_defaults("D") } else { Profile::default() };

            let expected = if profile {
                Some("P")
            } else if machine {
                Some("M")
            } else if family {
                Some("D")
            } else {
                None
            };

            let defaults = manager.calculate_defaults(&base, "M", "P");
            prop_assert_eq!(defaults.default_for(&widget()).map(Instance::name), expected);
        }
    }
}
