#![cfg(test)]

use std::env;
use std::path::PathBuf;

use crate::plugin_system::error::LoaderError;
use crate::plugin_system::loader::{DynamicLoader, NativeLoader};

const SAMPLE_LIBRARY: &str = "counter";

/// Directory holding the built sample plugin library, if it has been built
fn sample_library_dir() -> Option<PathBuf> {
    let current_dir = env::current_dir().ok()?;
    let candidates = [
        // relative to crates/plexus-core
        current_dir.join("../../target/debug"),
        // relative to the workspace root
        current_dir.join("target/debug"),
    ];
    candidates
        .into_iter()
        .find(|dir| DynamicLoader::library_path(Some(dir), SAMPLE_LIBRARY).exists())
}

#[test]
fn test_dynamic_loader_opens_sample_plugin() {
    let Some(dir) = sample_library_dir() else {
        println!("Skipping: sample plugin library has not been built");
        return;
    };
    let library = DynamicLoader::new().open(Some(&dir), SAMPLE_LIBRARY).expect("open sample library");
    assert_eq!(library.name(), SAMPLE_LIBRARY);

    let table = library.symbol("counter_runtime");
    assert!(table.is_some_and(|address| !address.is_null()));
    assert!(library.symbol("no_such_symbol").is_none());
    assert!(library.runtime("counter_runtime").is_ok());
    assert!(matches!(
        library.runtime("no_such_table"),
        Err(LoaderError::MissingSymbol { .. })
    ));
}
