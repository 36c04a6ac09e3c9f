//! Parent/child ledger of cloned and restored sessions, kept in
//! `lineage.json` beside the repair backups.

use crate::error::{Result, SessionError};
use crate::paths;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.0";

pub const MAX_ANCESTRY_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageMethod {
    Clone,
    Restore,
}

impl fmt::Display for LineageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineageMethod::Clone => "clone",
            LineageMethod::Restore => "restore",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub child_session_id: String,
    pub parent_session_id: String,
    pub cloned_at: DateTime<Utc>,
    pub method: LineageMethod,
    pub parent_project_path: String,
    /// Only known for restores; the archive carries it.
    pub parent_machine_id: Option<String>,
    pub target_project_path: String,
    pub target_machine_id: String,
    pub paths_translated: bool,
    pub archive_path: Option<String>,
}

impl LineageEntry {
    /// `None` when the parent machine is unknown.
    pub fn is_cross_machine(&self) -> Option<bool> {
        self.parent_machine_id
            .as_ref()
            .map(|parent| *parent != self.target_machine_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageFile {
    pub schema_version: String,
    #[serde(default)]
    pub sessions: BTreeMap<String, LineageEntry>,
}

impl Default for LineageFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            sessions: BTreeMap::new(),
        }
    }
}

/// What a clone or restore reports to the ledger. The target machine is
/// filled in by the store.
#[derive(Debug, Clone)]
pub struct LineageRecord {
    pub child_session_id: String,
    pub parent_session_id: String,
    pub method: LineageMethod,
    pub parent_project_path: PathBuf,
    pub target_project_path: PathBuf,
    pub parent_machine_id: Option<String>,
    pub paths_translated: bool,
    pub archive_path: Option<PathBuf>,
}

/// `user@host` for the current process.
pub fn machine_id() -> String {
    let user = env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}@{}", user, host_name())
}

/// The system host name (`gethostname(2)`), not the shell's `HOSTNAME`.
fn host_name() -> String {
    let host = gethostname::gethostname().to_string_lossy().trim().to_string();
    if host.is_empty() {
        "unknown".to_string()
    } else {
        host
    }
}

struct LedgerLock {
    file: fs::File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub struct LineageStore {
    file: PathBuf,
}

impl LineageStore {
    pub fn new<P: Into<PathBuf>>(file: P) -> Self {
        Self { file: file.into() }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    fn lock_path(&self) -> PathBuf {
        self.file.with_extension("lock")
    }

    fn lock(&self) -> Result<LedgerLock> {
        if let Some(dir) = self.file.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path())?;
        file.lock_exclusive()?;
        Ok(LedgerLock { file })
    }

    pub fn load(&self) -> Result<LineageFile> {
        match fs::read_to_string(&self.file) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                SessionError::Storage(format!("{}: {}", self.file.display(), e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LineageFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Add or replace the entry for the child session. Read-modify-write
    /// happens under an exclusive lock on `lineage.lock`.
    pub fn record(&self, record: LineageRecord) -> Result<LineageEntry> {
        let entry = LineageEntry {
            child_session_id: record.child_session_id,
            parent_session_id: record.parent_session_id,
            cloned_at: Utc::now(),
            method: record.method,
            parent_project_path: record.parent_project_path.to_string_lossy().into_owned(),
            parent_machine_id: record.parent_machine_id,
            target_project_path: record.target_project_path.to_string_lossy().into_owned(),
            target_machine_id: machine_id(),
            paths_translated: record.paths_translated,
            archive_path: record
                .archive_path
                .map(|p| p.to_string_lossy().into_owned()),
        };

        let _lock = self.lock()?;
        let mut ledger = self.load()?;
        ledger
            .sessions
            .insert(entry.child_session_id.clone(), entry.clone());
        let json = serde_json::to_string_pretty(&ledger)?;
        paths::write_atomic(&self.file, json.as_bytes())?;
        tracing::info!(
            child = %entry.child_session_id,
            parent = %entry.parent_session_id,
            method = %entry.method,
            "lineage recorded"
        );
        Ok(entry)
    }

    /// Entry for a child session id or unique prefix.
    pub fn entry(&self, id_or_prefix: &str) -> Result<Option<LineageEntry>> {
        let ledger = self.load()?;
        Ok(resolve(&ledger, id_or_prefix)?.and_then(|id| ledger.sessions.get(&id).cloned()))
    }

    /// Children of `parent`, matched exactly or by prefix, in id order.
    pub fn children(&self, parent: &str) -> Result<Vec<String>> {
        let ledger = self.load()?;
        Ok(ledger
            .sessions
            .values()
            .filter(|e| e.parent_session_id.starts_with(parent))
            .map(|e| e.child_session_id.clone())
            .collect())
    }

    /// `[root, ..., parent, session]`, at most [`MAX_ANCESTRY_DEPTH`] long.
    pub fn ancestry(&self, session_id: &str) -> Result<Vec<String>> {
        let ledger = self.load()?;
        let mut current = resolve(&ledger, session_id)?.unwrap_or_else(|| session_id.to_string());
        let mut chain = Vec::new();
        while chain.len() < MAX_ANCESTRY_DEPTH {
            chain.push(current.clone());
            match ledger.sessions.get(&current) {
                Some(entry) => current = entry.parent_session_id.clone(),
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }
}

fn resolve(ledger: &LineageFile, id_or_prefix: &str) -> Result<Option<String>> {
    if ledger.sessions.contains_key(id_or_prefix) {
        return Ok(Some(id_or_prefix.to_string()));
    }
    let matches: Vec<String> = ledger
        .sessions
        .keys()
        .filter(|id| id.starts_with(id_or_prefix))
        .cloned()
        .collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.into_iter().next()),
        _ => Err(SessionError::Ambiguous {
            prefix: id_or_prefix.to_string(),
            matches,
        }),
    }
}
