use core::fmt;

use crate::pipeline::Pipeline;

const RULE: &str = "===========================================================================";

/// The `what_do_i_have` report.
///
/// One block per family: plugin type and lifecycle, then one line per
/// instance. The instance currently resolved as default is marked `*`.
pub(super) struct WhatDoIHave<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> WhatDoIHave<'a> {
    pub(super) fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline }
    }
}

impl fmt::Display for WhatDoIHave<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = self.pipeline.view();
        let profile = if view.profile.is_empty() {
            "(none)"
        } else {
            view.profile.as_str()
        };

        writeln!(f, "{RULE}")?;
        writeln!(f, "Profile: {profile}")?;
        let names = self.pipeline.profile_names();
        if !names.is_empty() {
            writeln!(f, "Profiles: {}", names.join(", "))?;
        }
        writeln!(f, "{RULE}")?;

        for family in self.pipeline.families() {
            let plugin_type = family.plugin_type();
            if view.is_ejected(plugin_type) {
                continue;
            }
            writeln!(f, "{plugin_type} ({})", family.lifecycle())?;

            let default = view
                .defaults
                .default_for(plugin_type)
                .or_else(|| family.default_instance());
            let injected = view.injected_for(plugin_type);

            for instance in family.instances().iter().chain(injected) {
                let marker = if default.is_some_and(|d| d.id() == instance.id()) {
                    '*'
                } else {
                    ' '
                };
                writeln!(f, "  {marker} {:<24} {}", instance.name(), instance.describe())?;
            }

            if let Some(default) = default
                && !family
                    .instances()
                    .iter()
                    .chain(injected)
                    .any(|i| i.id() == default.id())
            {
                writeln!(f, "  * {:<24} {}", default.name(), default.describe())?;
            }
        }

        for (plugin_type, instance) in view.defaults.defaults() {
            if !self.pipeline.has_family(plugin_type) {
                writeln!(f, "{plugin_type} (no family)")?;
                writeln!(f, "  * {:<24} {}", instance.name(), instance.describe())?;
            }
        }
        write!(f, "{RULE}")
    }
}

#[cfg(test)]
mod tests {
    use crate::container::Container;
    use crate::instance::Instance;
    use crate::policy::Lifecycle;
    use crate::types::TypeKey;

    #[test]
    fn report_marks_defaults_and_lifecycles() {
        let container = Container::builder()
            .configure(|graph| {
                let number = TypeKey::of::<u32>();
                graph.add_instance(&number, Instance::literal(1_u32).named("One"))?;
                graph.add_instance(&number, Instance::literal(2_u32).named("Two"))?;
                graph.set_default_key(&number, "Two")?;
                graph.set_lifecycle(&number, Lifecycle::Singleton)
            })
            .build()
            .unwrap();

        let report = container.what_do_i_have();
        assert!(report.contains("u32 (Singleton)"));
        assert!(report.contains("* Two"));
        assert!(report.contains("  One"));
        assert!(report.contains("Profile: (none)"));
    }

    #[test]
    fn report_lists_injected_instances() {
        let container = Container::builder()
            .configure(|graph| graph.add_instance(&TypeKey::of::<u32>(), Instance::literal(1_u32)))
            .build()
            .unwrap();
        container.inject_named("Injected", std::sync::Arc::new(5_u32));

        assert!(container.what_do_i_have().contains("Injected"));
    }
}
