#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Embedded `DuckDB` access for the taxi audit pipeline.
//!
//! Every stage reads and writes parquet files; `DuckDB` is used purely as
//! an in-process columnar engine. Connections are in-memory and never
//! shared between threads: each worker opens its own with
//! [`open_in_memory`] against the same read-only files.

pub mod paths;

use std::path::{Path, PathBuf};

use duckdb::Connection;
use taxi_audit_config::EngineConfig;

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Opens an in-memory `DuckDB` connection with the configured thread count
/// and memory limit.
///
/// Insertion order is preserved so that writing the same input twice
/// produces identical files.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or settings fail.
pub fn open_in_memory(engine: &EngineConfig) -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;

    conn.execute_batch(&format!(
        "SET threads = {threads};
         SET memory_limit = {limit};
         SET preserve_insertion_order = true;",
        threads = engine.threads,
        limit = sql_string(&engine.memory_limit),
    ))?;

    Ok(conn)
}

/// Quotes `value` as a SQL string literal.
#[must_use]
pub fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quotes a filesystem path as a SQL string literal with forward slashes.
#[must_use]
pub fn sql_path(path: &Path) -> String {
    sql_string(&path.to_string_lossy().replace('\\', "/"))
}

/// Renders a list of files as a `read_parquet` argument: `['a', 'b']`.
#[must_use]
pub fn sql_path_list(paths: &[PathBuf]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| sql_path(p)).collect();
    format!("[{}]", quoted.join(", "))
}

/// A parquet file written next to its destination with a `.tmp` suffix,
/// not yet visible under its final name.
///
/// Dropping an uncommitted file removes the temporary file.
#[derive(Debug)]
pub struct StagedParquet {
    tmp: PathBuf,
    dest: PathBuf,
    rows: u64,
    committed: bool,
}

impl StagedParquet {
    /// Rows written.
    #[must_use]
    pub const fn rows(&self) -> u64 {
        self.rows
    }

    /// Final location.
    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Renames the temporary file into place.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Io`] if the rename fails.
    pub fn commit(mut self) -> Result<u64, DbError> {
        std::fs::rename(&self.tmp, &self.dest)?;
        self.committed = true;
        log::debug!("Wrote {} rows to {}", self.rows, self.dest.display());
        Ok(self.rows)
    }
}

impl Drop for StagedParquet {
    fn drop(&mut self) {
        if !self.committed {
            std::fs::remove_file(&self.tmp).ok();
        }
    }
}

/// Writes the result of `select_sql` to `{dest}.tmp` as parquet.
///
/// Nothing appears at `dest` until [`StagedParquet::commit`] is called, so
/// several outputs can be staged and published only once all of them were
/// written.
///
/// # Errors
///
/// Returns [`DbError`] if the directory cannot be created or the query or
/// write fails.
pub fn stage_parquet(
    conn: &Connection,
    select_sql: &str,
    dest: &Path,
) -> Result<StagedParquet, DbError> {
    if let Some(parent) = dest.parent() {
        paths::ensure_dir(parent)?;
    }

    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    let mut staged = StagedParquet {
        tmp: PathBuf::from(tmp),
        dest: dest.to_path_buf(),
        rows: 0,
        committed: false,
    };

    let rows = conn.execute(
        &format!(
            "COPY ({select_sql}) TO {} (FORMAT PARQUET)",
            sql_path(&staged.tmp)
        ),
        [],
    )?;
    staged.rows = u64::try_from(rows).unwrap_or(0);

    Ok(staged)
}

/// Writes the result of `select_sql` to `dest` as parquet.
///
/// The file is written next to `dest` with a `.tmp` suffix and renamed
/// into place, so readers never observe a partial file.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`DbError`] if the query, write, or rename fails.
pub fn copy_to_parquet(conn: &Connection, select_sql: &str, dest: &Path) -> Result<u64, DbError> {
    stage_parquet(conn, select_sql, dest)?.commit()
}

/// Runs a single-row, single-column `COUNT(*)`-style query.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn query_count(conn: &Connection, sql: &str) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    u64::try_from(count).map_err(|_| DbError::Conversion {
        message: format!("negative count {count}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EngineConfig {
        EngineConfig {
            threads: 1,
            memory_limit: "256MB".to_string(),
            max_parallel: 1,
        }
    }

    #[test]
    fn quotes_literals() {
        assert_eq!(sql_string("it's"), "'it''s'");
        assert_eq!(sql_path(Path::new("a/b.parquet")), "'a/b.parquet'");
        assert_eq!(
            sql_path_list(&[PathBuf::from("x.parquet"), PathBuf::from("y.parquet")]),
            "['x.parquet', 'y.parquet']"
        );
    }

    #[test]
    fn writes_parquet_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("out.parquet");
        let conn = open_in_memory(&engine()).unwrap();

        let rows = copy_to_parquet(&conn, "SELECT range AS n FROM range(10)", &dest).unwrap();
        assert_eq!(rows, 10);
        assert!(dest.exists());
        assert!(!dir.path().join("nested").join("out.parquet.tmp").exists());

        let count = query_count(
            &conn,
            &format!("SELECT COUNT(*) FROM read_parquet({})", sql_path(&dest)),
        )
        .unwrap();
        assert_eq!(count, 10);
    }

    #[test]
    fn dropped_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.parquet");
        let conn = open_in_memory(&engine()).unwrap();

        let staged = stage_parquet(&conn, "SELECT range AS n FROM range(3)", &dest).unwrap();
        assert_eq!(staged.rows(), 3);
        assert!(!dest.exists());
        assert!(dir.path().join("out.parquet.tmp").exists());

        drop(staged);
        assert!(!dir.path().join("out.parquet.tmp").exists());
        assert!(!dest.exists());
    }
}
