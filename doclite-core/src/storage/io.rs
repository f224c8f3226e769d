// storage/io.rs
// Low-level file and directory operations
//
// Every operation returns a tagged Result instead of panicking; callers
// decide whether a missing file is an error or an empty read.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Read a UTF-8 text file.
pub fn read_file(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path)?)
}

/// Write a UTF-8 text file, creating or truncating it.
pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)?;
    Ok(())
}

/// Delete a single file.
pub fn delete_file(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    Ok(())
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Create a directory and any missing parents.
pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Delete a directory recursively.
pub fn delete_dir(path: &Path) -> Result<()> {
    fs::remove_dir_all(path)?;
    Ok(())
}

pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

/// List the entries of a directory (non-recursive).
pub fn list_dir(path: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        entries.push(entry?.path());
    }
    entries.sort();
    Ok(entries)
}
