use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConfigFormat;
use crate::kernel::constants::DESCRIPTOR_FILE_NAMES;
use crate::kernel::error::{Error, Result};

/// List the immediate subdirectories of `path`, sorted by name.
///
/// Hidden directories (names starting with `.`) are skipped.
pub fn list_subdirectories<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let entries = fs::read_dir(path).map_err(|e| Error::io(e, "read_dir", path))?;

    let mut result = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, "read_dir_entry", path))?;
        let entry_path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry_path.is_dir() {
            result.push(entry_path);
        }
    }
    result.sort();
    Ok(result)
}

/// Locate the descriptor file of a plugin directory.
///
/// Exactly one of the supported descriptor file names must be present.
pub fn find_descriptor<P: AsRef<Path>>(dir: P) -> Result<(PathBuf, ConfigFormat)> {
    let dir = dir.as_ref();
    let mut found: Vec<PathBuf> = DESCRIPTOR_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .filter(|candidate| candidate.is_file())
        .collect();

    match found.len() {
        0 => {
            let source = std::io::Error::new(std::io::ErrorKind::NotFound, "no plugin descriptor file");
            Err(Error::io(source, "find_descriptor", dir))
        }
        1 => {
            let file = found.remove(0);
            let format = ConfigFormat::from_path(&file)
                .ok_or_else(|| Error::malformed(Some(file.clone()), "unsupported descriptor format"))?;
            Ok((file, format))
        }
        _ => Err(Error::malformed(
            Some(dir.to_path_buf()),
            format!("multiple descriptor files: {:?}", found),
        )),
    }
}
