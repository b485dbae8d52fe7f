//! Profile, machine and family defaults, container overrides and settings.


use keystone_container::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use test_utils::*;

const MACHINE: &str = "build-box";

fn green() -> Instance {
    Instance::configured(ConfiguredInstance::for_concrete_key("Color").with_property("color", "Green"))
        .named("Green")
}

/// Red is the family default, the machine picks Blue and the "Test"
/// profile picks Green. "Empty" exists but overrides nothing widget-related.
fn configure_profiles(graph: &mut PluginGraph, machine: bool, profile: bool) -> Result<(), KeystoneError> {
    configure_widgets(graph)?;
    if machine {
        graph.set_machine_default(MACHINE, widget(), Instance::reference("Blue"))?;
    }
    if profile {
        graph.set_profile_default("Test", widget(), green())?;
    }
    graph.set_profile_default("Empty", TypeKey::of::<String>(), Instance::literal(String::from("empty")))
}

fn container(machine: bool, profile: bool, settings: ContainerSettings) -> Container {
    builder()
        .configure(move |graph| configure_profiles(graph, machine, profile))
        .with_settings(settings.with_machine_name(MACHINE))
        .build()
        .unwrap()
}

fn color(container: &Container) -> String {
    container.get_instance::<dyn Widget>().unwrap().color().to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRECEDENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn profile_beats_machine_beats_family() {
    let container = container(true, true, ContainerSettings::new());
    assert_eq!(color(&container), "Blue");

    container.set_defaults_to_profile("Test").unwrap();
    assert_eq!(container.current_profile(), "Test");
    assert_eq!(color(&container), "Green");

    container.set_defaults_to_profile("").unwrap();
    assert_eq!(container.current_profile(), "");
    assert_eq!(color(&container), "Blue");
}

#[test]
fn other_machines_do_not_apply() {
    let container = builder()
        .configure(|graph| configure_profiles(graph, true, false))
        .with_settings(ContainerSettings::new().with_machine_name("laptop"))
        .build()
        .unwrap();

    assert_eq!(color(&container), "Red");
}

#[test]
fn settings_select_the_default_profile() {
    let container = container(true, true, ContainerSettings::new().with_default_profile("Test"));

    assert_eq!(container.current_profile(), "Test");
    assert_eq!(color(&container), "Green");

    // Switching to the empty name goes back to the configured default.
    container.set_defaults_to_profile("Empty").unwrap();
    assert_eq!(color(&container), "Blue");
    container.set_defaults_to_profile("").unwrap();
    assert_eq!(color(&container), "Green");
}

#[test]
fn profile_names_are_sorted() {
    let container = container(false, true, ContainerSettings::new());
    assert_eq!(container.profile_names(), ["Empty", "Test"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever is configured, the most specific default wins.
    #[test]
    fn most_specific_default_wins(machine in any::<bool>(), profile in any::<bool>(), select in any::<bool>()) {
        let container = container(machine, profile, ContainerSettings::new());
        if select {
            container.set_defaults_to_profile("Empty").unwrap();
            if profile {
                container.set_defaults_to_profile("Test").unwrap();
            }
        }

        let expected = match (select && profile, machine) {
            (true, _) => "Green",
            (false, true) => "Blue",
            (false, false) => "Red",
        };
        prop_assert_eq!(color(&container), expected);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNKNOWN PROFILES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn unknown_profiles_raise_280_and_keep_the_current_one() {
    let container = container(false, true, ContainerSettings::new());
    container.set_defaults_to_profile("Test").unwrap();

    let err = container.set_defaults_to_profile("Production").unwrap_err();
    assert_eq!(err.code().as_u16(), 280);
    assert_eq!(container.current_profile(), "Test");
    assert_eq!(color(&container), "Green");
}

#[test]
fn strict_settings_reject_unknown_default_profiles() {
    let err = builder()
        .configure(configure_widgets)
        .with_settings(ContainerSettings::new().with_default_profile("Missing").with_strict_profiles(true))
        .build()
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProfileNotFound);
}

#[test]
fn lenient_settings_record_unknown_default_profiles() {
    let container = builder()
        .configure(configure_widgets)
        .with_settings(ContainerSettings::new().with_default_profile("Missing"))
        .build()
        .unwrap();

    assert_eq!(container.configuration_problems().len(), 1);
    assert_eq!(color(&container), "Red");
}

#[test]
fn settings_load_from_json() {
    let settings = ContainerSettings::from_json_str(r#"{ "default_profile": "Test" }"#).unwrap();
    let container = container(false, true, settings);
    assert_eq!(color(&container), "Green");
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTAINER OVERRIDES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn overrides_survive_profile_switches() {
    let container = container(true, true, ContainerSettings::new());
    container.set_default_by_name(&widget(), "Red").unwrap();
    assert_eq!(color(&container), "Red");

    container.set_defaults_to_profile("Test").unwrap();
    assert_eq!(color(&container), "Red");
}

#[test]
fn injected_defaults_beat_profiles() {
    let container = container(false, true, ContainerSettings::new());
    container.set_defaults_to_profile("Test").unwrap();

    let injected: Arc<dyn Widget> = Arc::new(ColorWidget {
        color: "Black".to_string(),
    });
    container.inject(Arc::clone(&injected));

    let resolved: Arc<dyn Widget> = container.get_instance().unwrap();
    assert!(Arc::ptr_eq(&resolved, &injected));
}

#[test]
fn set_default_rejects_unassignable_instances() {
    let container = container(false, false, ContainerSettings::new());

    let err = container
        .set_default(&widget(), Instance::configured(ConfiguredInstance::of::<String>()))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAssignable);
    assert_eq!(color(&container), "Red");
}

#[test]
fn unknown_names_cannot_become_defaults() {
    let container = container(false, false, ContainerSettings::new());

    let err = container.set_default_by_name(&widget(), "Purple").unwrap_err();
    assert_eq!(err.code().as_u16(), 200);
}
