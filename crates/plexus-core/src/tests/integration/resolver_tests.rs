#![cfg(test)]

use crate::kernel::error::{Error, ErrorKind};
use crate::plugin_system::dependency::{DependencyError, PluginImport};
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::version::PluginVersion;
use crate::tests::integration::common::{new_journal, passive_plugin, plugin, TestRuntime, TestWorld};

fn v(s: &str) -> PluginVersion {
    PluginVersion::parse(s).unwrap()
}

#[test]
fn test_cycle_resolves_and_starts() {
    let journal = new_journal();
    let world = TestWorld::new(
        &journal,
        vec![TestRuntime::new("sloop1", &journal), TestRuntime::new("sloop2", &journal)],
    );
    world.install(plugin("sloop1").import(PluginImport::required("sloop2")));
    world.install(plugin("sloop2").import(PluginImport::required("sloop1")));

    world.ctx.start_plugin("sloop1").expect("start through the cycle");

    assert_eq!(world.ctx.plugin_state("sloop1"), PluginState::Active);
    assert_eq!(world.ctx.plugin_state("sloop2"), PluginState::Active);
    assert_eq!(
        world.journal(),
        vec!["create:sloop2", "start:sloop2", "create:sloop1", "start:sloop1"]
    );
}

#[test]
fn test_cycle_stops_both() {
    let journal = new_journal();
    let world = TestWorld::new(
        &journal,
        vec![TestRuntime::new("sloop1", &journal), TestRuntime::new("sloop2", &journal)],
    );
    world.install(plugin("sloop1").import(PluginImport::required("sloop2")));
    world.install(plugin("sloop2").import(PluginImport::required("sloop1")));
    world.ctx.start_plugin("sloop1").unwrap();
    world.clear_journal();

    world.ctx.stop_plugin("sloop2").unwrap();

    assert_eq!(world.journal(), vec!["stop:sloop1", "stop:sloop2"]);
    assert_eq!(world.ctx.plugin_state("sloop1"), PluginState::Resolved);
    assert_eq!(world.ctx.plugin_state("sloop2"), PluginState::Resolved);

    world.ctx.uninstall_plugin("sloop1").unwrap();
    assert_eq!(world.ctx.plugin_state("sloop2"), PluginState::Installed);
}

#[test]
fn test_missing_import_leaves_plugins_installed() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![TestRuntime::new("app", &journal), TestRuntime::new("lib", &journal)]);
    world.install(plugin("app").import(PluginImport::required("lib")));
    world.install(plugin("lib").import(PluginImport::required("missing")));

    let err = world.ctx.start_plugin("app").unwrap_err();
    match err {
        Error::Dependency(DependencyError::MissingPlugin { plugin_id, import_id }) => {
            assert_eq!(plugin_id, "lib");
            assert_eq!(import_id, "missing");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(world.ctx.plugin_state("app"), PluginState::Installed);
    assert_eq!(world.ctx.plugin_state("lib"), PluginState::Installed);
    assert!(world.journal().is_empty());

    // installing the missing piece makes the graph resolvable
    world.install(passive_plugin("missing"));
    world.ctx.start_plugin("app").unwrap();
    assert_eq!(world.ctx.plugin_state("missing"), PluginState::Active);
}

#[test]
fn test_failed_resolution_severs_edges() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("app").import(PluginImport::required("lib")));
    world.install(passive_plugin("lib").import(PluginImport::required("missing")));
    assert!(world.ctx.start_plugin("app").is_err());

    // if the failed walk had left app -> lib behind, stopping lib would
    // have to visit app; uninstalling lib must leave app untouched
    world.ctx.uninstall_plugin("lib").unwrap();
    assert_eq!(world.ctx.plugin_state("app"), PluginState::Installed);
}

#[test]
fn test_optional_import_may_be_missing() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("app").import(PluginImport::optional("extras")));

    world.ctx.start_plugin("app").unwrap();
    assert_eq!(world.ctx.plugin_state("app"), PluginState::Active);
}

#[test]
fn test_optional_import_is_started_when_present() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("app").import(PluginImport::optional("extras")));
    world.install(passive_plugin("extras"));

    world.ctx.start_plugin("app").unwrap();
    assert_eq!(world.ctx.plugin_state("extras"), PluginState::Active);
}

#[test]
fn test_version_must_match_without_compatibility_floor() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("lib").version("2.0.0"));
    world.install(passive_plugin("app").import(PluginImport::required("lib").with_version(v("1.0.0"))));

    let err = world.ctx.start_plugin("app").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);
    assert!(matches!(
        err,
        Error::Dependency(DependencyError::IncompatibleVersion { .. })
    ));
    assert_eq!(world.ctx.plugin_state("lib"), PluginState::Installed);
}

#[test]
fn test_compatibility_floor_accepts_older_imports() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("lib").version("2.1.0").abi_compatibility(v("1.5")));
    world.install(passive_plugin("app").import(PluginImport::required("lib").with_version(v("1.6"))));
    world.install(passive_plugin("old").import(PluginImport::required("lib").with_version(v("1.4"))));
    world.install(passive_plugin("new").import(PluginImport::required("lib").with_version(v("2.2"))));

    world.ctx.start_plugin("app").expect("1.6 lies between 1.5 and 2.1.0");
    assert_eq!(world.ctx.start_plugin("old").unwrap_err().kind(), ErrorKind::Dependency);
    assert_eq!(world.ctx.start_plugin("new").unwrap_err().kind(), ErrorKind::Dependency);
}

#[test]
fn test_required_framework_version() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("future").required_framework(v("999.0")));
    world.install(passive_plugin("present").required_framework(v("0.0.1")));

    let err = world.ctx.start_plugin("future").unwrap_err();
    assert!(matches!(
        err,
        Error::Dependency(DependencyError::IncompatibleFramework { .. })
    ));
    world.ctx.start_plugin("present").unwrap();
}

#[test]
fn test_missing_runtime_library_fails_resolution() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(plugin("orphan"));

    let err = world.ctx.start_plugin("orphan").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(world.ctx.plugin_state("orphan"), PluginState::Installed);
}

#[test]
fn test_missing_runtime_table_fails_resolution() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![TestRuntime::new("lib", &journal)]);
    world.install(passive_plugin("lib").runtime("lib", Some("no_such_table")));

    let err = world.ctx.start_plugin("lib").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_diamond_starts_shared_import_once() {
    let journal = new_journal();
    let world = TestWorld::new(
        &journal,
        vec![
            TestRuntime::new("top", &journal),
            TestRuntime::new("left", &journal),
            TestRuntime::new("right", &journal),
            TestRuntime::new("base", &journal),
        ],
    );
    world.install(
        plugin("top")
            .import(PluginImport::required("left"))
            .import(PluginImport::required("right")),
    );
    world.install(plugin("left").import(PluginImport::required("base")));
    world.install(plugin("right").import(PluginImport::required("base")));
    world.install(plugin("base"));

    world.ctx.start_plugin("top").unwrap();
    let starts: Vec<String> = world.journal().into_iter().filter(|e| e.starts_with("start:")).collect();
    assert_eq!(starts, vec!["start:base", "start:left", "start:right", "start:top"]);
}
