//! Self-contained session archives and restoring from them.

use crate::artifacts::{TaskFileKind, TaskFiles};
use crate::config::Config;
use crate::discovery::SessionFinder;
use crate::error::{Result, SessionError};
use crate::identity::{self, IdentityMapping};
use crate::lineage::{self, LineageEntry, LineageMethod, LineageRecord, LineageStore};
use crate::snapshot::{self, Carry, SessionFile, SessionSnapshot};
use crate::translate::PathTranslator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const ARCHIVE_VERSION: &str = "1.3";

const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionArchive {
    pub version: String,
    pub session_id: String,
    pub archived_at: DateTime<Utc>,
    pub original_project_path: String,
    pub claude_code_version: String,
    /// Filename -> decoded records, main transcript included.
    pub files: BTreeMap<String, Vec<Value>>,
    /// Agent files that lived under `<session>/subagents/`.
    #[serde(default)]
    pub nested_agents: BTreeSet<String>,
    #[serde(default)]
    pub plan_files: BTreeMap<String, String>,
    #[serde(default)]
    pub tool_results: BTreeMap<String, String>,
    #[serde(default)]
    pub todos: BTreeMap<String, String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, String>,
    #[serde(default)]
    pub task_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub machine_id: Option<String>,
}

impl SessionArchive {
    pub fn from_snapshot(snapshot: &SessionSnapshot, machine_id: Option<String>) -> Self {
        let mut files = BTreeMap::new();
        files.insert(snapshot.main_filename(), snapshot.main.clone());
        let mut nested_agents = BTreeSet::new();
        for agent in &snapshot.agents {
            files.insert(agent.filename.clone(), agent.records.clone());
            if agent.nested {
                nested_agents.insert(agent.filename.clone());
            }
        }
        Self {
            version: ARCHIVE_VERSION.to_string(),
            session_id: snapshot.session_id.clone(),
            archived_at: Utc::now(),
            original_project_path: snapshot.project_path.to_string_lossy().into_owned(),
            claude_code_version: snapshot
                .version
                .clone()
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            files,
            nested_agents,
            plan_files: snapshot.plans.clone(),
            tool_results: snapshot.tool_results.clone(),
            todos: snapshot.todos.clone(),
            tasks: snapshot.tasks.tasks.clone(),
            task_metadata: snapshot.tasks.metadata.clone(),
            machine_id,
        }
    }

    /// Rebuild the session view. The archive must hold the main transcript
    /// and only agent files besides it.
    pub fn to_snapshot(&self) -> Result<SessionSnapshot> {
        self.validate()?;
        let main_name = format!("{}.jsonl", self.session_id);
        let main = self
            .files
            .get(&main_name)
            .cloned()
            .ok_or_else(|| SessionError::Storage(format!("archive has no {}", main_name)))?;
        let agents = self
            .files
            .iter()
            .filter(|(name, _)| **name != main_name)
            .map(|(name, records)| SessionFile {
                filename: name.clone(),
                nested: self.nested_agents.contains(name),
                records: records.clone(),
            })
            .collect();
        Ok(SessionSnapshot {
            session_id: self.session_id.clone(),
            project_path: PathBuf::from(&self.original_project_path),
            version: Some(self.claude_code_version.clone()).filter(|v| v != UNKNOWN_VERSION),
            main,
            agents,
            plans: self.plan_files.clone(),
            todos: self.todos.clone(),
            tool_results: self.tool_results.clone(),
            tasks: TaskFiles {
                tasks: self.tasks.clone(),
                metadata: self.task_metadata.clone(),
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Any `1.x` archive is readable; missing newer sections default empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let archive: Self = serde_json::from_slice(bytes)
            .map_err(|e| SessionError::Storage(format!("invalid archive: {}", e)))?;
        if !archive.version.starts_with("1.") {
            return Err(SessionError::Storage(format!(
                "unsupported archive version {}",
                archive.version
            )));
        }
        archive.validate()?;
        Ok(archive)
    }

    /// Every key that becomes part of a destination path must be a plain
    /// name of the expected shape. Archives come from other machines.
    pub fn validate(&self) -> Result<()> {
        identity::validate_session_id(&self.session_id)?;
        let main_name = format!("{}.jsonl", self.session_id);
        check_names(self.files.keys(), "transcript", |name| {
            *name == main_name || identity::agent_id_from_filename(name).is_some()
        })?;
        check_names(self.plan_files.keys(), "plan", |slug| identity::is_slug(slug))?;
        check_names(self.tool_results.keys(), "tool result", |id| {
            identity::is_tool_use_id(id)
        })?;
        check_names(self.todos.keys(), "todo", |name| {
            identity::is_todo_filename(name, &self.session_id)
        })?;
        check_names(self.tasks.keys(), "task", |name| {
            TaskFileKind::classify(name) == TaskFileKind::Task
        })?;
        check_names(self.task_metadata.keys(), "task metadata", |name| {
            TaskFileKind::classify(name) == TaskFileKind::Metadata
        })
    }

    pub fn record_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

fn check_names<'a>(
    names: impl IntoIterator<Item = &'a String>,
    kind: &str,
    valid: impl Fn(&str) -> bool,
) -> Result<()> {
    let bad: Vec<&str> = names
        .into_iter()
        .map(String::as_str)
        .filter(|name| !valid(name))
        .collect();
    if bad.is_empty() {
        return Ok(());
    }
    Err(SessionError::InvalidIdentity(format!(
        "archive {} entries are not plain names: {}",
        kind,
        bad.join(", ")
    )))
}

/// Where archives are kept.
pub trait StorageBackend {
    /// Store `bytes` under `name`, returning a location the user can pass
    /// back to `load`.
    fn save(&self, name: &str, bytes: &[u8]) -> Result<String>;

    fn load(&self, name: &str) -> Result<Vec<u8>>;
}

/// Archives as files in one local directory. Never overwrites.
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let plain = !name.is_empty()
            && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
        if !plain {
            return Err(SessionError::Storage(format!(
                "archive name must be a plain file name: {:?}",
                name
            )));
        }
        Ok(self.dir.join(name))
    }
}

impl StorageBackend for LocalStorage {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let dest = self.path_for(name)?;
        if !self.dir.is_dir() {
            return Err(SessionError::Storage(format!(
                "output directory does not exist: {}",
                self.dir.display()
            )));
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist_noclobber(&dest).map_err(|e| match e.error.kind() {
            io::ErrorKind::AlreadyExists => {
                SessionError::Storage(format!("file already exists: {}", dest.display()))
            }
            _ => SessionError::Io(e.error),
        })?;
        Ok(dest.to_string_lossy().into_owned())
    }

    fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                SessionError::Storage(format!("archive not found: {}", path.display()))
            }
            _ => SessionError::Io(e),
        })
    }
}

/// `session-<prefix>-<YYYYmmdd_HHMMSS>.json`
pub fn default_archive_name(session_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "session-{}-{}.json",
        identity::session_prefix(session_id),
        at.format("%Y%m%d_%H%M%S")
    )
}

#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub session_id: String,
    pub location: String,
    pub files: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Default)]
pub struct UnarchiveOptions {
    /// Defaults to the archive's original project.
    pub target_project: Option<PathBuf>,
    /// Keep the original ids and filenames, and restore task files.
    pub in_place: bool,
    pub translate_paths: bool,
}

#[derive(Debug, Clone)]
pub struct UnarchiveOutcome {
    pub original_session_id: String,
    pub session_id: String,
    pub transcript: PathBuf,
    pub files_written: usize,
    pub records: usize,
    pub paths_translated: bool,
    /// Not recorded for in-place restores.
    pub lineage: Option<LineageEntry>,
}

pub struct Archiver<'a> {
    config: &'a Config,
}

impl<'a> Archiver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn archive(
        &self,
        id_or_prefix: &str,
        storage: &dyn StorageBackend,
        name: Option<&str>,
    ) -> Result<ArchiveOutcome> {
        let finder = SessionFinder::new(self.config);
        let location = finder.find(id_or_prefix)?;
        let snapshot = SessionSnapshot::capture(&finder, self.config.resolver(), &location)?;
        let archive = SessionArchive::from_snapshot(&snapshot, Some(lineage::machine_id()));
        let name = match name {
            Some(name) => name.to_string(),
            None => default_archive_name(&archive.session_id, archive.archived_at),
        };
        let location = storage.save(&name, &archive.to_bytes()?)?;
        tracing::info!(session_id = %archive.session_id, %location, "session archived");
        Ok(ArchiveOutcome {
            session_id: archive.session_id.clone(),
            location,
            files: archive.files.len(),
            records: archive.record_count(),
        })
    }

    pub fn load(&self, storage: &dyn StorageBackend, name: &str) -> Result<SessionArchive> {
        SessionArchive::from_bytes(&storage.load(name)?)
    }

    pub fn unarchive(
        &self,
        archive: &SessionArchive,
        archive_path: Option<&Path>,
        options: &UnarchiveOptions,
    ) -> Result<UnarchiveOutcome> {
        self.unarchive_as(archive, archive_path, options, identity::new_session_id())
    }

    fn unarchive_as(
        &self,
        archive: &SessionArchive,
        archive_path: Option<&Path>,
        options: &UnarchiveOptions,
        new_session_id: String,
    ) -> Result<UnarchiveOutcome> {
        let mut snapshot = archive.to_snapshot()?;
        let target = options
            .target_project
            .clone()
            .unwrap_or_else(|| snapshot.project_path.clone());
        let translator = if options.translate_paths {
            PathTranslator::between(&snapshot.project_path, &target)
        } else {
            None
        };

        let (mapping, carry) = if options.in_place {
            // Plans are shared by slug; only bring back the ones that are gone.
            let plans_dir = self.config.resolver().plans_dir()?;
            snapshot
                .plans
                .retain(|slug, _| !plans_dir.join(format!("{}.md", slug)).exists());
            (
                IdentityMapping::unchanged(&snapshot.session_id),
                Carry { plans: true, tasks: true },
            )
        } else {
            (
                snapshot.derive_mapping(&new_session_id)?,
                Carry { plans: true, tasks: false },
            )
        };

        let written = snapshot::materialize(
            &snapshot,
            &mapping,
            translator.as_ref(),
            self.config.resolver(),
            &target,
            carry,
        )?;

        let lineage = if options.in_place {
            None
        } else {
            Some(LineageStore::new(self.config.lineage_file()?).record(LineageRecord {
                child_session_id: written.session_id.clone(),
                parent_session_id: snapshot.session_id.clone(),
                method: LineageMethod::Restore,
                parent_project_path: snapshot.project_path.clone(),
                target_project_path: target,
                parent_machine_id: archive.machine_id.clone(),
                paths_translated: translator.is_some(),
                archive_path: archive_path.map(Path::to_path_buf),
            })?)
        };

        Ok(UnarchiveOutcome {
            original_session_id: snapshot.session_id.clone(),
            session_id: written.session_id,
            transcript: written.transcript,
            files_written: written.written.len(),
            records: snapshot.record_count(),
            paths_translated: translator.is_some(),
            lineage,
        })
    }
}
