#![cfg(test)]

use std::sync::{Arc, Mutex};

use crate::event::LogSeverity;
use crate::kernel::error::ErrorKind;
use crate::plugin_system::dependency::PluginImport;
use crate::plugin_system::plugin::PluginState;
use crate::tests::integration::common::{new_journal, passive_plugin, plugin, TestRuntime, TestWorld};

fn chain_world() -> TestWorld {
    let journal = new_journal();
    let world = TestWorld::new(
        &journal,
        vec![
            TestRuntime::new("chain1", &journal),
            TestRuntime::new("chain2", &journal),
            TestRuntime::new("chain3", &journal),
        ],
    );
    world.install(plugin("chain1").import(PluginImport::required("chain2")));
    world.install(plugin("chain2").import(PluginImport::required("chain3")));
    world.install(plugin("chain3"));
    world
}

#[test]
fn test_start_starts_imports_first() {
    let world = chain_world();
    world.ctx.start_plugin("chain1").expect("start chain1");

    for id in ["chain1", "chain2", "chain3"] {
        assert_eq!(world.ctx.plugin_state(id), PluginState::Active, "{} should be active", id);
    }
    assert_eq!(
        world.journal(),
        vec![
            "create:chain3",
            "start:chain3",
            "create:chain2",
            "start:chain2",
            "create:chain1",
            "start:chain1"
        ]
    );
}

#[test]
fn test_stop_stops_dependents_first() {
    let world = chain_world();
    world.ctx.start_plugin("chain1").unwrap();
    world.clear_journal();

    world.ctx.stop_plugin("chain3").expect("stop chain3");

    assert_eq!(world.journal(), vec!["stop:chain1", "stop:chain2", "stop:chain3"]);
    for id in ["chain1", "chain2", "chain3"] {
        assert_eq!(world.ctx.plugin_state(id), PluginState::Resolved);
    }
}

#[test]
fn test_restart_reuses_instance() {
    let world = chain_world();
    world.ctx.start_plugin("chain3").unwrap();
    world.ctx.stop_plugin("chain3").unwrap();
    world.clear_journal();

    world.ctx.start_plugin("chain3").unwrap();
    assert_eq!(world.journal(), vec!["start:chain3"]);
}

#[test]
fn test_uninstall_unresolves_dependents() {
    let world = chain_world();
    world.ctx.start_plugin("chain1").unwrap();
    world.clear_journal();

    world.ctx.uninstall_plugin("chain3").expect("uninstall chain3");

    assert_eq!(world.ctx.plugin_state("chain3"), PluginState::Uninstalled);
    assert_eq!(world.ctx.plugin_state("chain2"), PluginState::Installed);
    assert_eq!(world.ctx.plugin_state("chain1"), PluginState::Installed);
    let journal = world.journal();
    assert_eq!(&journal[..3], &["stop:chain1", "stop:chain2", "stop:chain3"]);
    assert!(journal.contains(&"destroy:chain1".to_string()));
    assert!(journal.contains(&"destroy:chain2".to_string()));
    assert!(journal.contains(&"destroy:chain3".to_string()));

    // chain2 now imports a plugin that is gone
    let err = world.ctx.start_plugin("chain1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);
}

#[test]
fn test_failed_start_rolls_back() {
    let journal = new_journal();
    let world = TestWorld::new(
        &journal,
        vec![
            TestRuntime::new("base", &journal),
            TestRuntime::new("top", &journal).failing_start("no device"),
        ],
    );
    world.install(plugin("base"));
    world.install(plugin("top").import(PluginImport::required("base")));

    let err = world.ctx.start_plugin("top").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.to_string().contains("no device"));

    assert_eq!(world.ctx.plugin_state("top"), PluginState::Resolved);
    assert_eq!(world.ctx.plugin_state("base"), PluginState::Resolved);
    assert_eq!(
        world.journal(),
        vec![
            "create:base",
            "start:base",
            "create:top",
            "start:top",
            "stop:top",
            "destroy:top",
            "stop:base"
        ]
    );
}

#[test]
fn test_failed_start_keeps_previously_active_imports() {
    let journal = new_journal();
    let world = TestWorld::new(
        &journal,
        vec![
            TestRuntime::new("base", &journal),
            TestRuntime::new("top", &journal).failing_start("broken"),
        ],
    );
    world.install(plugin("base"));
    world.install(plugin("top").import(PluginImport::required("base")));
    world.ctx.start_plugin("base").unwrap();

    assert!(world.ctx.start_plugin("top").is_err());
    assert_eq!(world.ctx.plugin_state("base"), PluginState::Active);
}

#[test]
fn test_plugin_without_runtime_starts_directly() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("data"));

    world.ctx.start_plugin("data").unwrap();
    assert_eq!(world.ctx.plugin_state("data"), PluginState::Active);
    world.ctx.stop_plugin("data").unwrap();
    assert_eq!(world.ctx.plugin_state("data"), PluginState::Resolved);
}

#[test]
fn test_duplicate_install_conflicts() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    world.install(passive_plugin("twice"));

    let again = Arc::new(passive_plugin("twice").version("2.0.0").build());
    let err = world.ctx.install_plugin(&again).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let installed = world.ctx.plugin_info("twice").unwrap();
    assert_eq!(installed.version.as_ref().map(|v| v.as_str()), Some("1.0.0"));
    world.ctx.release_info(&installed);
}

#[test]
fn test_extension_point_conflict() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    // both resolve to the global extension point "org.x.y"
    world.install(passive_plugin("org").ext_point("x.y", None));
    let clash = Arc::new(passive_plugin("org.x").ext_point("y", None).build());

    let err = world.ctx.install_plugin(&clash).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(world.ctx.plugin_state("org.x"), PluginState::Uninstalled);

    world.ctx.uninstall_plugin("org").unwrap();
    world.ctx.install_plugin(&clash).expect("extension point is free again");
}

#[test]
fn test_unknown_plugin_operations() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);

    assert_eq!(world.ctx.start_plugin("ghost").unwrap_err().kind(), ErrorKind::Unknown);
    assert_eq!(world.ctx.stop_plugin("ghost").unwrap_err().kind(), ErrorKind::Unknown);
    assert_eq!(world.ctx.uninstall_plugin("ghost").unwrap_err().kind(), ErrorKind::Unknown);
    assert_eq!(world.ctx.plugin_state("ghost"), PluginState::Uninstalled);
}

#[test]
fn test_stop_plugins_in_reverse_activation_order() {
    let journal = new_journal();
    let world = TestWorld::new(
        &journal,
        vec![
            TestRuntime::new("first", &journal),
            TestRuntime::new("second", &journal),
            TestRuntime::new("third", &journal),
        ],
    );
    world.install(plugin("first"));
    world.install(plugin("second"));
    world.install(plugin("third"));
    world.ctx.start_plugin("second").unwrap();
    world.ctx.start_plugin("first").unwrap();
    world.ctx.start_plugin("third").unwrap();
    world.clear_journal();

    world.ctx.stop_plugins();
    assert_eq!(world.journal(), vec!["stop:third", "stop:first", "stop:second"]);
}

#[test]
fn test_destroy_stops_and_uninstalls_everything() {
    let journal = new_journal();
    let mut world = TestWorld::new(&journal, vec![TestRuntime::new("alpha", &journal)]);
    world.install(plugin("alpha"));
    world.ctx.start_plugin("alpha").unwrap();
    world.clear_journal();

    world.destroy();
    assert_eq!(world.journal(), vec!["stop:alpha", "destroy:alpha"]);
}

#[test]
#[should_panic(expected = "destroyed")]
fn test_context_unusable_after_destroy() {
    let journal = new_journal();
    let mut world = TestWorld::new(&journal, vec![]);
    let ctx = world.ctx.clone();
    world.destroy();
    ctx.plugin_state("anything");
}

#[test]
#[should_panic(expected = "stale context")]
fn test_plugin_context_invalidated_by_unresolve() {
    let journal = new_journal();
    let captured = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    let world = TestWorld::new(
        &journal,
        vec![TestRuntime::new("alpha", &journal).on_start(move |ctx| {
            *slot.lock().unwrap() = Some(ctx.clone());
            Ok(())
        })],
    );
    world.install(plugin("alpha"));
    world.ctx.start_plugin("alpha").unwrap();
    world.ctx.uninstall_plugin("alpha").unwrap();

    let stale = captured.lock().unwrap().take().unwrap();
    stale.log(LogSeverity::Info, "still here?");
}
