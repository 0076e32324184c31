//! Append-only audit log.
//!
//! One newline-delimited JSON record per notable action (analyze, signup,
//! signin, view_items, posted_<platform>, feedback, subscribe).  The file
//! rotates on size with a fixed number of numbered backups; the newest
//! backup can optionally be gzip-compressed.  Write failures are logged
//! and never fail the request that triggered them.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use dashmap::DashMap;
use flate2::write::GzEncoder;
use flate2::Compression;

/// In-memory aggregation of recorded actions: per-action counts plus the
/// distinct users seen.  Feeds the analytics endpoint and is maintained
/// whether or not a file log is configured.
#[derive(Default)]
pub struct ActionStats {
    actions: DashMap<String, u64>,
    users: DashMap<String, ()>,
}

impl ActionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, user: Option<&str>, action: &str) {
        *self.actions.entry(action.to_string()).or_insert(0) += 1;
        if let Some(user) = user {
            self.users.entry(user.to_string()).or_insert(());
        }
    }

    /// Current action counts (sorted for stable output) and the distinct
    /// user count.
    pub fn snapshot(&self) -> (BTreeMap<String, u64>, usize) {
        let actions = self
            .actions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        (actions, self.users.len())
    }
}

pub struct AuditLog {
    inner: Mutex<LogFile>,
}

struct LogFile {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl AuditLog {
    pub fn open(
        path: &str,
        max_bytes: Option<u64>,
        keep: usize,
        compress: bool,
    ) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Mutex::new(LogFile {
                path: PathBuf::from(path),
                file,
                max_bytes,
                keep,
                compress,
            }),
        })
    }

    /// Append one record.  Best-effort: failures are logged, not
    /// propagated.
    pub fn record(&self, user: Option<&str>, action: &str, details: serde_json::Value) {
        let line = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "user": user,
            "action": action,
            "details": details,
        })
        .to_string();
        match self.inner.lock() {
            Ok(mut log) => {
                if let Err(err) = log.append(&line) {
                    tracing::warn!(error = %err, action, "failed to write audit line");
                }
            }
            Err(_) => tracing::warn!(action, "audit log mutex poisoned, dropping record"),
        }
    }
}

impl LogFile {
    fn append(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            if self.current_size() >= limit {
                self.rotate();
            }
        }
        writeln!(self.file, "{}", line)
    }

    fn current_size(&self) -> u64 {
        self.path.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn rotate(&mut self) {
        if self.keep == 0 {
            return;
        }
        // Shift <path>.N-1 -> <path>.N, oldest falls off the end.  Backups
        // may be compressed, so each slot is shifted under whichever name
        // it exists as.
        for idx in (1..=self.keep).rev() {
            if idx == 1 {
                if self.path.exists() {
                    let _ = fs::rename(&self.path, numbered(&self.path, 1));
                }
                continue;
            }
            let plain = numbered(&self.path, idx - 1);
            let gz = gz_numbered(&self.path, idx - 1);
            if gz.exists() {
                let _ = fs::rename(&gz, gz_numbered(&self.path, idx));
            } else if plain.exists() {
                let _ = fs::rename(&plain, numbered(&self.path, idx));
            }
        }
        if self.compress {
            self.compress_newest_backup();
        }
        match fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            Ok(file) => self.file = file,
            Err(err) => tracing::warn!(error = %err, path = %self.path.display(), "failed to reopen audit log after rotation"),
        }
    }

    fn compress_newest_backup(&self) {
        let rotated = numbered(&self.path, 1);
        let Ok(data) = fs::read(&rotated) else {
            return;
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if encoder.write_all(&data).is_ok() {
            if let Ok(buf) = encoder.finish() {
                if fs::write(gz_numbered(&self.path, 1), buf).is_ok() {
                    let _ = fs::remove_file(&rotated);
                }
            }
        }
    }
}

fn numbered(path: &std::path::Path, idx: usize) -> PathBuf {
    path.with_extension(format!("{}", idx))
}

fn gz_numbered(path: &std::path::Path, idx: usize) -> PathBuf {
    path.with_extension(format!("{}.gz", idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(path.to_str().unwrap(), None, 1, false).unwrap();
        log.record(Some("a@b.com"), "analyze", serde_json::json!({"itemId": "1"}));
        log.record(None, "subscribe", serde_json::json!({}));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "analyze");
        assert_eq!(first["user"], "a@b.com");
        assert_eq!(first["details"]["itemId"], "1");
    }

    #[test]
    fn rotation_keeps_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(path.to_str().unwrap(), Some(64), 1, false).unwrap();
        for i in 0..20 {
            log.record(None, "analyze", serde_json::json!({"i": i}));
        }
        assert!(path.exists());
        assert!(path.with_extension("1").exists());
    }

    #[test]
    fn compressed_rotation_shifts_older_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(path.to_str().unwrap(), Some(64), 2, true).unwrap();
        for i in 0..60 {
            log.record(None, "analyze", serde_json::json!({"i": i}));
        }
        assert!(path.exists());
        // Both backup slots hold compressed files; the newest rotation did
        // not clobber the older one.
        assert!(path.with_extension("1.gz").exists());
        assert!(path.with_extension("2.gz").exists());
        assert!(!path.with_extension("1").exists());
    }

    #[test]
    fn stats_count_actions_and_distinct_users() {
        let stats = ActionStats::new();
        stats.record(Some("a@b.com"), "analyze");
        stats.record(Some("a@b.com"), "analyze");
        stats.record(Some("c@d.com"), "feedback");
        stats.record(None, "view_items");

        let (actions, users) = stats.snapshot();
        assert_eq!(actions.get("analyze"), Some(&2));
        assert_eq!(actions.get("feedback"), Some(&1));
        assert_eq!(actions.get("view_items"), Some(&1));
        assert_eq!(users, 2);
    }
}
