#![cfg(test)]

use std::fs;
use std::path::Path;

use tempfile::{tempdir, TempDir};

use crate::context::info::info_key;
use crate::kernel::error::ErrorKind;
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::scanner::ScanFlags;
use crate::tests::integration::common::{new_journal, TestWorld};

/// Write `<collection>/<dir>/plugin.json`
fn write_plugin(collection: &Path, dir: &str, descriptor: &str) {
    let plugin_dir = collection.join(dir);
    fs::create_dir_all(&plugin_dir).unwrap();
    fs::write(plugin_dir.join("plugin.json"), descriptor).unwrap();
}

fn versioned(id: &str, version: &str) -> String {
    format!(r#"{{ "identifier": "{}", "version": "{}" }}"#, id, version)
}

fn collection_with(plugins: &[(&str, &str)]) -> TempDir {
    let dir = tempdir().expect("Failed to create temporary directory");
    for (id, version) in plugins {
        write_plugin(dir.path(), &format!("{}-{}", id, version), &versioned(id, version));
    }
    dir
}

fn installed_version(world: &TestWorld, id: &str) -> Option<String> {
    let info = world.ctx.plugin_info(id).ok()?;
    let version = info.version.as_ref().map(|v| v.to_string());
    world.ctx.release_info(&info);
    version
}

#[test]
fn test_scan_installs_every_plugin() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let collection = collection_with(&[("alpha", "1.0.0"), ("beta", "0.3")]);
    world.ctx.register_collection(collection.path()).unwrap();

    world.ctx.scan_plugins(ScanFlags::default()).expect("scan");

    assert_eq!(world.ctx.plugin_state("alpha"), PluginState::Installed);
    assert_eq!(world.ctx.plugin_state("beta"), PluginState::Installed);
    let all = world.ctx.plugins_info();
    assert_eq!(all.iter().map(|d| d.identifier.as_str()).collect::<Vec<_>>(), vec!["alpha", "beta"]);
    world.ctx.release_info(&all);
}

#[test]
fn test_scan_keeps_highest_version() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let old = collection_with(&[("alpha", "1.0.0")]);
    let new = collection_with(&[("alpha", "1.2.0")]);
    world.ctx.register_collection(old.path()).unwrap();
    world.ctx.register_collection(new.path()).unwrap();

    world.ctx.scan_plugins(ScanFlags::default()).unwrap();
    assert_eq!(installed_version(&world, "alpha").as_deref(), Some("1.2.0"));
}

#[test]
fn test_scan_upgrades_only_when_allowed() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let old = collection_with(&[("alpha", "1.0.0")]);
    let new = collection_with(&[("alpha", "2.0.0")]);
    world.ctx.register_collection(old.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default()).unwrap();

    world.ctx.register_collection(new.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default()).unwrap();
    assert_eq!(installed_version(&world, "alpha").as_deref(), Some("1.0.0"));

    world.ctx.scan_plugins(ScanFlags::default().upgrade()).unwrap();
    assert_eq!(installed_version(&world, "alpha").as_deref(), Some("2.0.0"));
}

#[test]
fn test_scan_never_downgrades() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let old = collection_with(&[("alpha", "1.0.0")]);
    let new = collection_with(&[("alpha", "2.0.0")]);
    world.ctx.register_collection(old.path()).unwrap();
    world.ctx.register_collection(new.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default().upgrade()).unwrap();

    world.ctx.unregister_collection(new.path());
    world.ctx.scan_plugins(ScanFlags::default().upgrade()).unwrap();
    assert_eq!(installed_version(&world, "alpha").as_deref(), Some("2.0.0"));
}

#[test]
fn test_scan_restarts_active_plugins_after_upgrade() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let old = collection_with(&[("alpha", "1.0.0")]);
    let new = collection_with(&[("alpha", "2.0.0")]);
    world.ctx.register_collection(old.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default()).unwrap();
    world.ctx.start_plugin("alpha").unwrap();

    world.ctx.register_collection(new.path()).unwrap();
    world
        .ctx
        .scan_plugins(ScanFlags::default().upgrade().stop_all_on_upgrade().restart_active())
        .unwrap();

    assert_eq!(installed_version(&world, "alpha").as_deref(), Some("2.0.0"));
    assert_eq!(world.ctx.plugin_state("alpha"), PluginState::Active);
}

#[test]
fn test_scan_without_restart_leaves_upgraded_plugin_installed() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let old = collection_with(&[("alpha", "1.0.0")]);
    let new = collection_with(&[("alpha", "2.0.0")]);
    world.ctx.register_collection(old.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default()).unwrap();
    world.ctx.start_plugin("alpha").unwrap();

    world.ctx.register_collection(new.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default().upgrade()).unwrap();
    assert_eq!(world.ctx.plugin_state("alpha"), PluginState::Installed);
}

#[test]
fn test_stop_all_on_install() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let first = collection_with(&[("alpha", "1.0.0")]);
    world.ctx.register_collection(first.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default()).unwrap();
    world.ctx.start_plugin("alpha").unwrap();

    let second = collection_with(&[("beta", "1.0.0")]);
    world.ctx.register_collection(second.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default().stop_all_on_install()).unwrap();

    assert_eq!(world.ctx.plugin_state("alpha"), PluginState::Resolved);
    assert_eq!(world.ctx.plugin_state("beta"), PluginState::Installed);
}

#[test]
fn test_scan_reports_failures_and_continues() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let collection = collection_with(&[("alpha", "1.0.0")]);
    write_plugin(collection.path(), "broken", "{ not json");
    fs::create_dir_all(collection.path().join("empty")).unwrap();
    world.ctx.register_collection(collection.path()).unwrap();

    let err = world.ctx.scan_plugins(ScanFlags::default()).unwrap_err();
    // Malformed outranks the missing descriptor's I/O error
    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert_eq!(world.ctx.plugin_state("alpha"), PluginState::Installed);
}

#[test]
fn test_scan_of_missing_collection_is_io_error() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let gone = tempdir().unwrap();
    let path = gone.path().join("nothing-here");
    world.ctx.register_collection(&path).unwrap();

    let err = world.ctx.scan_plugins(ScanFlags::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[cfg(feature = "yaml-config")]
#[test]
fn test_scan_reads_yaml_descriptors() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let collection = tempdir().unwrap();
    let plugin_dir = collection.path().join("gamma");
    fs::create_dir_all(&plugin_dir).unwrap();
    fs::write(plugin_dir.join("plugin.yaml"), "identifier: gamma\nversion: \"3.1\"\n").unwrap();
    world.ctx.register_collection(collection.path()).unwrap();

    world.ctx.scan_plugins(ScanFlags::default()).unwrap();
    assert_eq!(installed_version(&world, "gamma").as_deref(), Some("3.1"));
}

#[test]
fn test_scan_descriptors_are_released() {
    let journal = new_journal();
    let mut world = TestWorld::new(&journal, vec![]);
    let collection = collection_with(&[("alpha", "1.0.0"), ("beta", "1.0.0")]);
    world.ctx.register_collection(collection.path()).unwrap();
    world.ctx.scan_plugins(ScanFlags::default()).unwrap();

    let info = world.ctx.plugin_info("alpha").unwrap();
    let guard = world.ctx.environment().lock();
    // installed descriptor: one reference held by the environment, one by us
    assert_eq!(guard.state().infos.usage(info_key(&info)), Some(2));
    assert_eq!(guard.state().infos.len(), 2);
    drop(guard);
    world.ctx.release_info(&info);
    world.destroy();
}
