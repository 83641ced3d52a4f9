//! On-disk dump of merged inserts that exhausted every backend.
//!
//! Dumps are plain `.sql` files meant for manual or scripted replay; the
//! proxy never reads them back. File names encode the destination table,
//! a UTC timestamp, and a process-wide sequence number, so concurrent
//! dumps and restarts cannot collide and a directory listing sorts in
//! replay order.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct FileDumper {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FileDumper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one complete replayable statement.
    ///
    /// Non-empty pass-through parameters are recorded as a leading SQL
    /// comment so the file stays replayable as-is while keeping the
    /// request context.
    pub async fn dump(
        &self,
        table: &str,
        params: &str,
        statement: &str,
    ) -> Result<PathBuf, DumpError> {
        fs::create_dir_all(&self.dir).await?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let name = format!("dump-{}-{}-{:04}.sql", sanitize(table), stamp, seq);
        let path = self.dir.join(name);

        let mut contents = String::with_capacity(statement.len() + 64);
        if !params.is_empty() {
            contents.push_str("-- params: ");
            contents.push_str(params);
            contents.push('\n');
        }
        contents.push_str(statement);
        if !statement.ends_with('\n') {
            contents.push('\n');
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;

        Ok(path)
    }
}

/// Keep table names filesystem-safe without losing readability.
fn sanitize(table: &str) -> String {
    table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dump_writes_replayable_statement() {
        let dir = tempfile::tempdir().unwrap();
        let dumper = FileDumper::new(dir.path());

        let path = dumper
            .dump("metrics", "", "INSERT INTO metrics (a) VALUES (1),(2)")
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "INSERT INTO metrics (a) VALUES (1),(2)\n");

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("dump-metrics-"));
        assert!(name.ends_with(".sql"));
    }

    #[tokio::test]
    async fn dump_records_params_as_sql_comment() {
        let dir = tempfile::tempdir().unwrap();
        let dumper = FileDumper::new(dir.path());

        let path = dumper
            .dump("t", "database=prod", "INSERT INTO t VALUES (1)")
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "-- params: database=prod\nINSERT INTO t VALUES (1)\n");
    }

    #[tokio::test]
    async fn concurrent_dumps_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let dumper = std::sync::Arc::new(FileDumper::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let dumper = std::sync::Arc::clone(&dumper);
            handles.push(tokio::spawn(async move {
                dumper
                    .dump("t", "", &format!("INSERT INTO t VALUES ({i})"))
                    .await
                    .unwrap()
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
    }

    #[tokio::test]
    async fn dump_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let dumper = FileDumper::new(&nested);

        let path = dumper.dump("t", "", "INSERT INTO t VALUES (1)").await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(sanitize("db.metrics"), "db.metrics");
        assert_eq!(sanitize("weird/name e"), "weird_name_e");
        assert_eq!(sanitize("`quoted`"), "_quoted_");
    }
}
