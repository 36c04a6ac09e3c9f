use crate::error::{Result, SessionError};
use crate::integrity::{ChainAnalyzer, ChainStatus, IntegrityReport};
use crate::paths::write_atomic;
use crate::reader::{physical_lines, strip_terminator, terminator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::TextDiff;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Sidecar written next to every backup payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMeta {
    pub session_id: String,
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub fixed_at: String,
    pub orphans_fixed: usize,
}

/// Backups keyed by session id: `<id>.jsonl` plus `<id>.meta.json`.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session_id))
    }

    pub fn meta_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", session_id))
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.payload_path(session_id).exists()
    }

    /// Every backup's metadata, sorted by session id. Unreadable sidecars are
    /// skipped.
    pub fn list(&self) -> Result<Vec<BackupMeta>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut metas = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".meta.json"));
            if !is_meta {
                continue;
            }
            match read_meta(&path) {
                Ok(meta) => metas.push(meta),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping backup metadata")
                }
            }
        }
        metas.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(metas)
    }

    /// Resolve an id or unique prefix to its backup metadata. An exact id
    /// wins over longer ids sharing the prefix.
    pub fn find(&self, prefix: &str) -> Result<BackupMeta> {
        let mut matches: Vec<BackupMeta> = self
            .list()?
            .into_iter()
            .filter(|m| m.session_id.starts_with(prefix))
            .collect();
        if let Some(pos) = matches.iter().position(|m| m.session_id == prefix) {
            return Ok(matches.swap_remove(pos));
        }
        match matches.len() {
            0 => Err(SessionError::BackupNotFound(prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(SessionError::Ambiguous {
                prefix: prefix.to_string(),
                matches: matches.into_iter().map(|m| m.session_id).collect(),
            }),
        }
    }

    fn discard(&self, session_id: &str) {
        for path in [self.payload_path(session_id), self.meta_path(session_id)] {
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove backup file");
            }
        }
    }
}

fn read_meta(path: &Path) -> Result<BackupMeta> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Result of a single-session repair attempt.
#[derive(Debug)]
pub enum FixOutcome {
    AlreadyHealthy,
    /// Analysis said unfixable or error; the file was not touched.
    NotFixable(IntegrityReport),
    Committed { backup: PathBuf, rewired: usize },
}

#[derive(Debug)]
pub struct FixAttempt {
    pub path: PathBuf,
    pub session_id: String,
    pub orphans: usize,
    pub result: Result<FixOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub session_id: String,
    pub restored_to: PathBuf,
}

type CopyFn = fn(&Path, &Path) -> io::Result<u64>;

/// Backup, patch, verify and rollback for orphan rewiring.
pub struct RepairEngine {
    store: BackupStore,
    copy: CopyFn,
}

impl RepairEngine {
    pub fn new(store: BackupStore) -> Self {
        Self {
            store,
            copy: copy_file,
        }
    }

    #[cfg(test)]
    fn with_copy(mut self, copy: CopyFn) -> Self {
        self.copy = copy;
        self
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Back up `path`, then rewrite the `parentUuid` of each `(line, parent)`
    /// pair in one atomic write. Returns the backup payload path.
    ///
    /// Refuses to run while a backup for the session already exists.
    pub fn apply_fix(&self, path: &Path, rewires: &[(usize, String)]) -> Result<PathBuf> {
        let session_id = session_id_of(path)?;
        let backup = self.store.payload_path(&session_id);
        if backup.exists() {
            return Err(SessionError::BackupExists { session_id, backup });
        }

        fs::create_dir_all(self.store.dir())?;
        let meta = BackupMeta {
            session_id: session_id.clone(),
            original_path: path.to_path_buf(),
            backup_path: backup.clone(),
            fixed_at: chrono::Utc::now().to_rfc3339(),
            orphans_fixed: rewires.len(),
        };
        // Sidecar first: a payload on disk always has metadata that `restore`
        // and `list` can see.
        if let Err(e) = self.backup_and_patch(path, &meta, rewires) {
            self.store.discard(&session_id);
            return Err(e);
        }

        tracing::info!(
            session = %session_id,
            rewired = rewires.len(),
            backup = %backup.display(),
            "patched session"
        );
        Ok(backup)
    }

    fn backup_and_patch(
        &self,
        path: &Path,
        meta: &BackupMeta,
        rewires: &[(usize, String)],
    ) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(self.store.meta_path(&meta.session_id), json + "\n")?;
        (self.copy)(path, &meta.backup_path)?;
        let original = fs::read_to_string(path)?;
        let patched = patch_lines(path, &original, rewires)?;
        write_atomic(path, patched.as_bytes())
    }

    /// Analyze, fix and verify one session. A fix that does not verify
    /// healthy is rolled back and reported as [`SessionError::Verification`].
    pub fn repair(&self, path: &Path) -> Result<FixOutcome> {
        let report = ChainAnalyzer::analyze(path);
        match report.status {
            ChainStatus::Healthy => Ok(FixOutcome::AlreadyHealthy),
            ChainStatus::Fixable => self.commit(&report),
            ChainStatus::Unfixable | ChainStatus::Error => Ok(FixOutcome::NotFixable(report)),
        }
    }

    /// Repair every session among `paths` that is not healthy. One session
    /// failing never stops the others. Unfixable and unreadable sessions are
    /// reported as [`FixOutcome::NotFixable`] and left untouched.
    pub fn fix_all(&self, paths: &[PathBuf]) -> Vec<FixAttempt> {
        paths
            .iter()
            .map(ChainAnalyzer::analyze)
            .filter(|report| report.status != ChainStatus::Healthy)
            .map(|report| {
                let path = report.path.clone();
                let session_id = report.session_id.clone();
                let orphans = report.orphans.len();
                let result = match report.status {
                    ChainStatus::Fixable => self.commit(&report),
                    _ => Ok(FixOutcome::NotFixable(report)),
                };
                FixAttempt {
                    path,
                    session_id,
                    orphans,
                    result,
                }
            })
            .collect()
    }

    fn commit(&self, report: &IntegrityReport) -> Result<FixOutcome> {
        let path = report.path.as_path();
        let rewires = report.rewires();
        let backup = self.apply_fix(path, &rewires)?;

        let verify = ChainAnalyzer::analyze(path);
        if verify.status == ChainStatus::Healthy {
            return Ok(FixOutcome::Committed {
                backup,
                rewired: rewires.len(),
            });
        }

        (self.copy)(&backup, path)?;
        self.store.discard(&report.session_id);
        tracing::warn!(
            session = %report.session_id,
            status = %verify.status,
            "fix did not verify, rolled back"
        );
        Err(SessionError::Verification {
            path: path.to_path_buf(),
            detail: format!("status after fix was {}, rolled back", verify.status),
        })
    }

    /// Unified diff of the lines a fix would rewrite. Nothing is written.
    pub fn preview(&self, report: &IntegrityReport) -> Result<String> {
        let path = report.path.as_path();
        let original = fs::read_to_string(path)?;
        let patched = patch_lines(path, &original, &report.rewires())?;
        let name = path.display().to_string();
        let diff = TextDiff::from_lines(&original, &patched);
        Ok(diff
            .unified_diff()
            .context_radius(1)
            .header(&name, &name)
            .to_string())
    }

    /// Copy a backup over its original path, verify by size, then drop the
    /// backup. A failed verification leaves the backup in place.
    pub fn restore(&self, prefix: &str) -> Result<RestoreOutcome> {
        let meta = self.store.find(prefix)?;
        let backup = self.store.payload_path(&meta.session_id);
        if !backup.exists() {
            return Err(SessionError::structure(&backup, "backup file missing"));
        }

        (self.copy)(&backup, &meta.original_path)?;

        let expected = fs::metadata(&backup)?.len();
        let actual = fs::metadata(&meta.original_path).map(|m| m.len()).ok();
        if actual != Some(expected) {
            return Err(SessionError::Verification {
                path: meta.original_path.clone(),
                detail: format!(
                    "restored size {:?} does not match backup size {}, backup preserved at {}",
                    actual,
                    expected,
                    backup.display()
                ),
            });
        }

        self.store.discard(&meta.session_id);
        tracing::info!(
            session = %meta.session_id,
            path = %meta.original_path.display(),
            "restored from backup"
        );
        Ok(RestoreOutcome {
            session_id: meta.session_id,
            restored_to: meta.original_path,
        })
    }

    pub fn list(&self) -> Result<Vec<BackupMeta>> {
        self.store.list()
    }
}

fn copy_file(from: &Path, to: &Path) -> io::Result<u64> {
    fs::copy(from, to)
}

fn session_id_of(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| SessionError::structure(path, "unusable file name"))
}

/// Rewrite `parentUuid` on the given 1-based lines. Every other byte,
/// line terminators included, is kept.
fn patch_lines(path: &Path, content: &str, rewires: &[(usize, String)]) -> Result<String> {
    let mut lines: Vec<String> = physical_lines(content).into_iter().map(str::to_string).collect();
    for (line, parent) in rewires {
        let slot = line
            .checked_sub(1)
            .and_then(|idx| lines.get_mut(idx))
            .ok_or_else(|| SessionError::structure(path, format!("line {} out of range", line)))?;
        let mut value: Value =
            serde_json::from_str(strip_terminator(slot)).map_err(|e| SessionError::Parse {
                path: path.to_path_buf(),
                line: *line,
                message: e.to_string(),
            })?;
        let Some(object) = value.as_object_mut() else {
            return Err(SessionError::structure(path, format!("line {} is not an object", line)));
        };
        object.insert("parentUuid".to_string(), Value::String(parent.clone()));
        let rewritten = format!("{}{}", serde_json::to_string(&value)?, terminator(slot));
        *slot = rewritten;
    }
    Ok(lines.concat())
}
