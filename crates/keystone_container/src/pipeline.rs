//! The sealed, shared resolution state behind a container.

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::KeystoneError;
use crate::family::PluginFamily;
use crate::graph::PluginGraph;
use crate::instance::Instance;
use crate::interceptor::InterceptorLibrary;
use crate::object::CastRegistry;
use crate::plugin::{Plugin, PluginCache};
use crate::profile::{Profile, ProfileManager};
use crate::types::TypeKey;

/// What one build session sees: flattened defaults plus container-level
/// injections and ejections at the moment the session opened.
#[derive(Debug, Default)]
pub(crate) struct ResolutionView {
    pub(crate) profile: String,
    pub(crate) defaults: Profile,
    injected: HashMap<TypeKey, Vec<Instance>>,
    ejected: HashSet<TypeKey>,
}

impl ResolutionView {
    pub(crate) fn injected_for(&self, plugin_type: &TypeKey) -> &[Instance] {
        self.injected.get(plugin_type).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn is_ejected(&self, plugin_type: &TypeKey) -> bool {
        self.ejected.contains(plugin_type)
    }
}

/// Mutable container-level state layered over the sealed graph.
struct PipelineState {
    profiles: ProfileManager,
    overrides: Profile,
    injected: HashMap<TypeKey, Vec<Instance>>,
    ejected: HashSet<TypeKey>,
    view: Arc<ResolutionView>,
}

impl PipelineState {
    /// Rebuilds the view: profile defaults, minus ejected types, plus
    /// container overrides.
    fn refresh(&mut self) {
        let mut defaults = Profile::clone(&self.profiles.current_defaults());
        for plugin_type in &self.ejected {
            defaults.remove_default(plugin_type);
        }
        defaults.overlay(&self.overrides);

        self.view = Arc::new(ResolutionView {
            profile: defaults.name().to_string(),
            defaults,
            injected: self.injected.clone(),
            ejected: self.ejected.clone(),
        });
    }
}

/// Families and services of a sealed graph, shared by every clone of a
/// container.
///
/// The sealed families are read without locks. Closed generic families and
/// implicit families for cached concrete types are derived on first use and
/// kept for the container's lifetime.
pub(crate) struct Pipeline {
    families: HashMap<TypeKey, Arc<PluginFamily>>,
    derived: RwLock<HashMap<TypeKey, Arc<PluginFamily>>>,
    interceptors: InterceptorLibrary,
    casts: CastRegistry,
    plugin_cache: Arc<PluginCache>,
    problems: Vec<String>,
    state: RwLock<PipelineState>,
}

impl Pipeline {
    pub(crate) fn from_graph(mut graph: PluginGraph) -> Self {
        graph.seal();
        let parts = graph.into_parts();

        let mut state = PipelineState {
            profiles: parts.profiles,
            overrides: Profile::default(),
            injected: HashMap::new(),
            ejected: HashSet::new(),
            view: Arc::default(),
        };
        state.refresh();

        Self {
            families: parts
                .families
                .into_iter()
                .map(|(plugin_type, family)| (plugin_type, Arc::new(family)))
                .collect(),
            derived: RwLock::new(HashMap::new()),
            interceptors: parts.interceptors,
            casts: parts.casts,
            plugin_cache: parts.plugin_cache,
            problems: parts.problems,
            state: RwLock::new(state),
        }
    }

    pub(crate) fn view(&self) -> Arc<ResolutionView> {
        Arc::clone(&self.state.read().view)
    }

    pub(crate) fn interceptors(&self) -> &InterceptorLibrary {
        &self.interceptors
    }

    pub(crate) fn casts(&self) -> &CastRegistry {
        &self.casts
    }

    pub(crate) fn plugin_cache(&self) -> &PluginCache {
        &self.plugin_cache
    }

    pub(crate) fn problems(&self) -> &[String] {
        &self.problems
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Families
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns the family of `plugin_type`, deriving it if possible.
    pub(crate) fn find_family(&self, plugin_type: &TypeKey, view: &ResolutionView) -> Option<Arc<PluginFamily>> {
        if view.is_ejected(plugin_type) {
            return None;
        }
        if let Some(family) = self.families.get(plugin_type) {
            return Some(Arc::clone(family));
        }
        self.derive_family(plugin_type)
    }

    /// Returns the family of `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoneError::FamilyNotFound`] if no family exists or can
    /// be derived.
    pub(crate) fn family(&self, plugin_type: &TypeKey, view: &ResolutionView) -> Result<Arc<PluginFamily>, KeystoneError> {
        self.find_family(plugin_type, view)
            .ok_or_else(|| KeystoneError::FamilyNotFound {
                plugin_type: plugin_type.clone(),
            })
    }

    pub(crate) fn has_family(&self, plugin_type: &TypeKey) -> bool {
        self.families.contains_key(plugin_type) || self.derived.read().contains_key(plugin_type)
    }

    /// Sealed and derived families, sorted by plugin type name.
    pub(crate) fn families(&self) -> Vec<Arc<PluginFamily>> {
        let mut families: Vec<_> = self
            .families
            .values()
            .chain(self.derived.read().values())
            .cloned()
            .collect();
        families.sort_by_key(|family| family.plugin_type().to_string());
        families
    }

    fn derive_family(&self, plugin_type: &TypeKey) -> Option<Arc<PluginFamily>> {
        if let Some(family) = self.derived.read().get(plugin_type) {
            return Some(Arc::clone(family));
        }

        let family = self
            .templated_family(plugin_type)
            .or_else(|| self.implicit_family(plugin_type))?;

        tracing::debug!(plugin_type = %plugin_type, "derived plugin family");
        let mut derived = self.derived.write();
        Some(Arc::clone(
            derived
                .entry(plugin_type.clone())
                .or_insert_with(|| Arc::new(family)),
        ))
    }

    /// `Name<Args>` from the open family `Name<..>`.
    fn templated_family(&self, plugin_type: &TypeKey) -> Option<PluginFamily> {
        if !plugin_type.is_closed_generic() {
            return None;
        }
        let open = self.families.get(&plugin_type.generic_definition()?)?;
        match open.create_templated_clone(plugin_type.generic_args()) {
            Ok(family) => Some(family),
            Err(err) => {
                tracing::warn!(plugin_type = %plugin_type, error = %err, "could not close generic family");
                None
            }
        }
    }

    /// A family whose only plugin is the cached plugin of a concrete type.
    fn implicit_family(&self, plugin_type: &TypeKey) -> Option<PluginFamily> {
        let plugin: Plugin = self.plugin_cache.plugin_for(plugin_type)?;
        if !plugin.has_builder() {
            return None;
        }

        let mut family = PluginFamily::new(plugin_type.clone());
        family.add_plugin(plugin.implicit()).ok()?;
        family.seal();
        Some(family)
    }

    /// The instance called `name`: injected first, then the family's own.
    pub(crate) fn find_instance(&self, plugin_type: &TypeKey, name: &str) -> Option<Instance> {
        let view = self.view();
        if let Some(instance) = view.injected_for(plugin_type).iter().find(|i| i.name() == name) {
            return Some(instance.clone());
        }
        self.find_family(plugin_type, &view)?.instance(name).cloned()
    }

    /// Instances with a known concrete type must plug into `plugin_type`
    /// directly or through a registered cast.
    pub(crate) fn check_assignable(&self, plugin_type: &TypeKey, instance: &Instance) -> Result<(), KeystoneError> {
        let Some(concrete) = instance.concrete_type() else {
            return Ok(());
        };
        if concrete.plugs_into(plugin_type) || self.casts.can_cast(&concrete, plugin_type) {
            return Ok(());
        }
        Err(KeystoneError::NotAssignable {
            plugged_type: concrete,
            plugin_type: plugin_type.clone(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Container-level state
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn current_profile(&self) -> String {
        self.state.read().view.profile.clone()
    }

    pub(crate) fn profile_names(&self) -> Vec<String> {
        self.state
            .read()
            .profiles
            .profile_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn set_profile(&self, name: &str) -> Result<(), KeystoneError> {
        let mut state = self.state.write();
        state.profiles.set_current_profile(name)?;
        state.refresh();
        Ok(())
    }

    /// Adds a named instance, replacing one with the same name, and
    /// optionally makes it the default.
    pub(crate) fn inject(&self, plugin_type: TypeKey, instance: Instance, make_default: bool) {
        let mut state = self.state.write();
        if make_default {
            state.overrides.set_default(plugin_type.clone(), instance.clone());
        }

        let injected = state.injected.entry(plugin_type).or_default();
        match injected.iter_mut().find(|i| i.name() == instance.name()) {
            Some(existing) => *existing = instance,
            None => injected.push(instance),
        }
        state.refresh();
    }

    pub(crate) fn set_override(&self, plugin_type: TypeKey, instance: Instance) {
        let mut state = self.state.write();
        state.overrides.set_default(plugin_type, instance);
        state.refresh();
    }

    /// Clears every cache of `plugin_type` and hides its configured and
    /// injected instances.
    pub(crate) fn eject(&self, plugin_type: &TypeKey) {
        if let Some(family) = self
            .families
            .get(plugin_type)
            .cloned()
            .or_else(|| self.derived.read().get(plugin_type).cloned())
        {
            family.eject_all();
        }

        let mut state = self.state.write();
        state.injected.remove(plugin_type);
        state.overrides.remove_default(plugin_type);
        state.ejected.insert(plugin_type.clone());
        state.refresh();
        tracing::debug!(plugin_type = %plugin_type, "ejected all instances");
    }
}
