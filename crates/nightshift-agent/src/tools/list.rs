//! `list_files`, also used to build the project listing for the system turn

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Filters and cap for recursive listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSettings {
    /// Stop after this many files
    pub max_entries: usize,
    /// Directory names never descended into. Dot-directories are always skipped.
    pub ignore_dirs: Vec<String>,
    /// File suffixes left out of the listing
    pub ignore_extensions: Vec<String>,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ignore_dirs: [
                ".git",
                ".gradle",
                ".idea",
                ".venv",
                "__pycache__",
                "build",
                ".kotlin",
                "node_modules",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignore_extensions: [".jar", ".class", ".pyc", ".so", ".dylib"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// List files under `dir` recursively, one per line.
///
/// Paths are shown relative to `root` when `dir` lies inside it. Hidden
/// entries and ignored directories/extensions are skipped; once
/// `max_entries` files have been collected, any further file is replaced by a
/// single `... (truncated, N+ files)` line.
pub fn list_files(root: &Path, dir: &Path, settings: &ListSettings) -> io::Result<String> {
    tracing::info!("Listing files in: {}", dir.display());

    let mut files = Vec::new();
    let truncated = walk(root, dir, settings, &mut files)?;
    if truncated {
        tracing::warn!("File list truncated at {} files", settings.max_entries);
        files.push(format!("... (truncated, {}+ files)", settings.max_entries));
    }

    if files.is_empty() {
        return Ok("(no files found)".to_string());
    }
    Ok(files.join("\n"))
}

/// Returns true when the cap was hit with files still remaining
fn walk(root: &Path, dir: &Path, settings: &ListSettings, files: &mut Vec<String>) -> io::Result<bool> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.flatten().collect();
    entries.sort_by_key(|e| e.file_name());

    let mut subdirs = Vec::new();
    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if !settings.ignore_dirs.iter().any(|d| d == name.as_ref()) {
                subdirs.push(entry.path());
            }
            continue;
        }

        if settings
            .ignore_extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
        {
            continue;
        }

        if files.len() >= settings.max_entries {
            return Ok(true);
        }
        let path = entry.path();
        let shown = path.strip_prefix(root).unwrap_or(&path);
        files.push(shown.display().to_string());
    }

    for subdir in subdirs {
        match walk(root, &subdir, settings, files) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => tracing::debug!("Skipping {}: {}", subdir.display(), e),
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_filters_hidden_and_ignored() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "README.md");
        touch(root, ".env");
        touch(root, "app/src/Main.kt");
        touch(root, "app/build/out.txt");
        touch(root, "libs/dep.jar");
        touch(root, ".git/HEAD");
        touch(root, ".hidden/x.kt");
        touch(root, "node_modules/pkg/index.js");

        let listing = list_files(root, root, &ListSettings::default()).unwrap();
        assert_eq!(listing, "README.md\napp/src/Main.kt");
    }

    #[test]
    fn test_cap_adds_single_marker() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for i in 0..5 {
            touch(root, &format!("f{}.txt", i));
        }
        let settings = ListSettings {
            max_entries: 3,
            ..Default::default()
        };

        let listing = list_files(root, root, &settings).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(
            lines,
            vec!["f0.txt", "f1.txt", "f2.txt", "... (truncated, 3+ files)"]
        );
    }

    #[test]
    fn test_exact_cap_has_no_marker() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for i in 0..3 {
            touch(root, &format!("f{}.txt", i));
        }
        let settings = ListSettings {
            max_entries: 3,
            ..Default::default()
        };

        let listing = list_files(root, root, &settings).unwrap();
        assert!(!listing.contains("truncated"));
    }

    #[test]
    fn test_subdirectory_paths_stay_relative_to_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "shared/src/Api.kt");

        let listing = list_files(root, &root.join("shared"), &ListSettings::default()).unwrap();
        assert_eq!(listing, "shared/src/Api.kt");
    }

    #[test]
    fn test_missing_directory_errors() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        assert!(list_files(root, &root.join("nope"), &ListSettings::default()).is_err());
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let listing = list_files(dir.path(), dir.path(), &ListSettings::default()).unwrap();
        assert_eq!(listing, "(no files found)");
    }
}
