#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the pipeline's data directory.
//!
//! Defaults are relative to the project root's `data/` directory and can be
//! overridden per run through `[paths]` in the configuration.

use std::path::{Path, PathBuf};

use taxi_audit_config::PathsConfig;

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`, falling back to the
/// current directory if the manifest path has fewer ancestors than expected.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the default `data/raw/` directory of raw batches.
#[must_use]
pub fn raw_dir() -> PathBuf {
    data_dir().join("raw")
}

/// Returns the default `data/processed/` directory.
#[must_use]
pub fn processed_dir() -> PathBuf {
    data_dir().join("processed")
}

/// Returns the default `data/results/` directory for derived tables.
#[must_use]
pub fn results_dir() -> PathBuf {
    data_dir().join("results")
}

/// Directories a single run reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    /// Raw batches.
    pub raw: PathBuf,
    /// Processed partitions root.
    pub processed: PathBuf,
    /// Derived tables.
    pub results: PathBuf,
}

impl DataPaths {
    /// Applies configured overrides on top of the default layout.
    #[must_use]
    pub fn resolve(config: &PathsConfig) -> Self {
        Self {
            raw: config.raw_dir.clone().unwrap_or_else(raw_dir),
            processed: config.processed_dir.clone().unwrap_or_else(processed_dir),
            results: config.results_dir.clone().unwrap_or_else(results_dir),
        }
    }

    /// The clean partition directory.
    #[must_use]
    pub fn clean_dir(&self) -> PathBuf {
        self.processed.join("clean")
    }

    /// The audit partition directory.
    #[must_use]
    pub fn audit_dir(&self) -> PathBuf {
        self.processed.join("audit")
    }
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Removes a directory and everything in it, then recreates it empty.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be removed or created.
pub fn reset_dir(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)
}

/// Lists `*.parquet` files directly inside `dir`, sorted by file name.
///
/// A missing directory yields an empty list.
#[must_use]
pub fn list_parquet_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("parquet") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence() {
        let config = PathsConfig {
            raw_dir: Some(PathBuf::from("/in")),
            processed_dir: None,
            results_dir: Some(PathBuf::from("/out")),
        };
        let paths = DataPaths::resolve(&config);
        assert_eq!(paths.raw, PathBuf::from("/in"));
        assert_eq!(paths.processed, processed_dir());
        assert_eq!(paths.results, PathBuf::from("/out"));
        assert_eq!(paths.clean_dir(), processed_dir().join("clean"));
    }

    #[test]
    fn lists_only_parquet_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.parquet", "a.parquet", "notes.txt", "c.parquet.tmp"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = list_parquet_files(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.parquet", "b.parquet"]);
    }

    #[test]
    fn reset_dir_empties_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clean");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("old.parquet"), b"x").unwrap();

        reset_dir(&target).unwrap();
        assert!(target.exists());
        assert!(list_parquet_files(&target).is_empty());
    }

    #[test]
    fn missing_dir_lists_nothing() {
        assert!(list_parquet_files(Path::new("/definitely/not/here")).is_empty());
    }
}
