//! Removing a session and everything it owns, all or nothing.
//!
//! Every file is enumerated up front; a file discovery cannot account for
//! stops the delete before anything is touched. A [`SessionArchive`] is
//! written to the state directory first, and kept afterwards unless the
//! caller opts out, so `unarchive --in-place` can bring the session back.

use crate::archive::{LocalStorage, SessionArchive, StorageBackend};
use crate::artifacts::TaskFileKind;
use crate::config::Config;
use crate::discovery::{SessionFinder, SessionLocation};
use crate::error::{Result, SessionError};
use crate::identity;
use crate::lineage;
use crate::paths;
use crate::snapshot::SessionSnapshot;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArtifactKind {
    Transcript,
    Agent,
    Plan,
    ToolResult,
    Todo,
    Task,
    TaskMetadata,
    /// Deleted but never backed up.
    TaskLock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size: u64,
}

/// What a delete removes. Directories are ordered deepest first.
#[derive(Debug, Clone)]
pub struct DeleteManifest {
    pub session_id: String,
    pub native: bool,
    /// Mint time of a cloned or restored (v7) session.
    pub created_at: Option<DateTime<Utc>>,
    pub files: Vec<Artifact>,
    pub dirs: Vec<PathBuf>,
    pub unexpected: Vec<PathBuf>,
}

impl DeleteManifest {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.files.iter().filter(|f| f.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Required for native sessions.
    pub force: bool,
    pub dry_run: bool,
    /// Drop the backup once the delete succeeds.
    pub no_backup: bool,
}

#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    DryRun(DeleteManifest),
    Deleted {
        manifest: DeleteManifest,
        /// `None` with `no_backup`.
        backup: Option<PathBuf>,
        dirs_removed: Vec<PathBuf>,
    },
}

type RemoveFn = fn(&Path) -> io::Result<()>;

pub struct SessionDeleter<'a> {
    config: &'a Config,
    remove: RemoveFn,
}

impl<'a> SessionDeleter<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            remove: remove_file,
        }
    }

    #[cfg(test)]
    fn with_remove(mut self, remove: RemoveFn) -> Self {
        self.remove = remove;
        self
    }

    /// Enumerate every file and directory the session owns.
    pub fn manifest(&self, id_or_prefix: &str) -> Result<DeleteManifest> {
        let finder = SessionFinder::new(self.config);
        let location = finder.find(id_or_prefix)?;
        let snapshot = SessionSnapshot::capture(&finder, self.config.resolver(), &location)?;
        self.discover(&finder, &location, &snapshot)
    }

    fn discover(
        &self,
        finder: &SessionFinder<'_>,
        location: &SessionLocation,
        snapshot: &SessionSnapshot,
    ) -> Result<DeleteManifest> {
        let resolver = self.config.resolver();
        let sid = &location.session_id;
        let mut found: Vec<Artifact> = Vec::new();
        let mut dirs: Vec<PathBuf> = Vec::new();
        let mut unexpected: Vec<PathBuf> = Vec::new();
        let mut add = |path: PathBuf, kind: ArtifactKind| -> Result<()> {
            let size = fs::metadata(&path)?.len();
            found.push(Artifact { path, kind, size });
            Ok(())
        };

        add(location.path.clone(), ArtifactKind::Transcript)?;
        let agents = finder.agent_files(&location.project_dir, sid)?;
        for agent in &agents {
            add(agent.path.clone(), ArtifactKind::Agent)?;
        }

        let plans_dir = resolver.plans_dir()?;
        for slug in snapshot.plans.keys() {
            add(plans_dir.join(format!("{}.md", slug)), ArtifactKind::Plan)?;
        }

        let todos_dir = resolver.todos_dir()?;
        for name in snapshot.todos.keys() {
            add(todos_dir.join(name), ArtifactKind::Todo)?;
        }

        let tasks_dir = resolver.tasks_dir(sid)?;
        if tasks_dir.is_dir() {
            for entry in fs::read_dir(&tasks_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let kind = match TaskFileKind::classify(&name) {
                    TaskFileKind::Task => ArtifactKind::Task,
                    TaskFileKind::Metadata => ArtifactKind::TaskMetadata,
                    TaskFileKind::Lock => ArtifactKind::TaskLock,
                    TaskFileKind::Unexpected => {
                        unexpected.push(entry.path());
                        continue;
                    }
                };
                add(entry.path(), kind)?;
            }
            dirs.push(tasks_dir);
        }

        // <project>/<session>/ holds nested agents and tool results only.
        let session_dir = location.project_dir.join(sid);
        let results_dir = paths::tool_results_dir(&location.project_dir, sid);
        let nested: BTreeSet<&Path> = agents
            .iter()
            .filter(|a| a.nested)
            .map(|a| a.path.as_path())
            .collect();
        let mut below = Vec::new();
        walk(&session_dir, &mut below, &mut dirs)?;
        for path in below {
            if nested.contains(path.as_path()) {
                continue;
            }
            let is_result = path.parent() == Some(results_dir.as_path())
                && path.extension().is_some_and(|ext| ext == "txt");
            if is_result {
                add(path, ArtifactKind::ToolResult)?;
            } else {
                unexpected.push(path);
            }
        }

        // session-env is expected empty; any file in it is unexpected.
        walk(&resolver.session_env_dir(sid)?, &mut unexpected, &mut dirs)?;

        found.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path.cmp(&b.path)));
        dirs.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
        dirs.dedup();
        unexpected.sort();
        Ok(DeleteManifest {
            session_id: sid.clone(),
            native: identity::is_native_session(sid)?,
            created_at: identity::restoration_timestamp(sid)?,
            files: found,
            dirs,
            unexpected,
        })
    }

    pub fn delete(&self, id_or_prefix: &str, options: &DeleteOptions) -> Result<DeleteOutcome> {
        let finder = SessionFinder::new(self.config);
        let location = finder.find(id_or_prefix)?;
        let snapshot = SessionSnapshot::capture(&finder, self.config.resolver(), &location)?;
        let manifest = self.discover(&finder, &location, &snapshot)?;

        if !manifest.unexpected.is_empty() {
            return Err(SessionError::UnexpectedArtifacts {
                paths: manifest.unexpected.clone(),
            });
        }
        if options.dry_run {
            return Ok(DeleteOutcome::DryRun(manifest));
        }
        if manifest.native && !options.force {
            return Err(SessionError::NativeSession(manifest.session_id.clone()));
        }

        let backup = self.write_backup(&snapshot)?;
        tracing::info!(
            session_id = %manifest.session_id,
            backup = %backup.display(),
            "backup written"
        );

        let dirs_removed = self.remove_all(&manifest, &backup)?;

        let backup = if options.no_backup {
            fs::remove_file(&backup)?;
            None
        } else {
            Some(backup)
        };
        tracing::info!(
            session_id = %manifest.session_id,
            files = manifest.files.len(),
            dirs = dirs_removed.len(),
            bytes = manifest.total_size(),
            "session deleted"
        );
        Ok(DeleteOutcome::Deleted {
            manifest,
            backup,
            dirs_removed,
        })
    }

    /// `<state>/deleted/<session>-<YYYYmmdd-HHMMSS>.json`
    fn write_backup(&self, snapshot: &SessionSnapshot) -> Result<PathBuf> {
        let dir = self.config.deleted_dir()?;
        fs::create_dir_all(&dir)?;
        let archive = SessionArchive::from_snapshot(snapshot, Some(lineage::machine_id()));
        let name = format!(
            "{}-{}.json",
            archive.session_id,
            archive.archived_at.format("%Y%m%d-%H%M%S")
        );
        let location = LocalStorage::new(&dir).save(&name, &archive.to_bytes()?)?;
        Ok(PathBuf::from(location))
    }

    /// Remove every file, then the emptied directories. When a step fails,
    /// whatever was removed is put back byte for byte and the backup is
    /// dropped. It is kept if putting things back fails too.
    fn remove_all(&self, manifest: &DeleteManifest, backup: &Path) -> Result<Vec<PathBuf>> {
        let mut saved: Vec<(&Path, Vec<u8>)> = Vec::with_capacity(manifest.files.len());
        let mut dirs_removed: Vec<PathBuf> = Vec::new();

        let result = (|| -> Result<()> {
            for file in &manifest.files {
                let bytes = fs::read(&file.path)?;
                (self.remove)(&file.path)?;
                saved.push((&file.path, bytes));
            }
            for dir in &manifest.dirs {
                if dir.exists() {
                    fs::remove_dir(dir)?;
                    dirs_removed.push(dir.clone());
                }
            }
            Ok(())
        })();

        let Err(error) = result else {
            return Ok(dirs_removed);
        };
        tracing::error!(
            session_id = %manifest.session_id,
            error = %error,
            "delete failed, rolling back"
        );
        if let Err(rollback) = put_back(&saved, &dirs_removed) {
            return Err(SessionError::RollbackFailed {
                error: error.to_string(),
                rollback: rollback.to_string(),
                backup: backup.to_path_buf(),
            });
        }
        if let Err(e) = fs::remove_file(backup) {
            tracing::warn!(
                backup = %backup.display(),
                error = %e,
                "failed to remove backup after rollback"
            );
        }
        Err(error)
    }
}

fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

fn put_back(saved: &[(&Path, Vec<u8>)], dirs_removed: &[PathBuf]) -> io::Result<()> {
    for dir in dirs_removed.iter().rev() {
        fs::create_dir_all(dir)?;
    }
    for (path, bytes) in saved.iter().rev() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
    }
    Ok(())
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

/// Files and directories below `dir`, `dir` included. Absent is empty.
fn walk(dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            walk(&entry.path(), files, dirs)?;
        } else {
            files.push(entry.path());
        }
    }
    dirs.push(dir.to_path_buf());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archiver, UnarchiveOptions};
    use crate::clone::fixtures::*;
    use crate::clone::{CloneOptions, SessionCloner};

    fn session_files(tree: &Tree) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        walk(&tree.claude(), &mut files, &mut dirs).unwrap();
        files.sort();
        files
    }

    #[test]
    fn test_manifest_enumerates_every_artifact() {
        let tree = setup_session();
        let manifest = SessionDeleter::new(&tree.config).manifest("5f3c").unwrap();
        assert!(manifest.native);
        assert_eq!(manifest.created_at, None);
        assert!(manifest.unexpected.is_empty());
        assert_eq!(manifest.count(ArtifactKind::Transcript), 1);
        assert_eq!(manifest.count(ArtifactKind::Agent), 2);
        assert_eq!(manifest.count(ArtifactKind::Plan), 1);
        assert_eq!(manifest.count(ArtifactKind::ToolResult), 1);
        assert_eq!(manifest.count(ArtifactKind::Todo), 1);
        assert_eq!(manifest.count(ArtifactKind::Task), 1);
        assert_eq!(manifest.count(ArtifactKind::TaskMetadata), 1);
        assert_eq!(manifest.count(ArtifactKind::TaskLock), 1);
        assert!(manifest.total_size() > 0);

        // Deepest first, so each directory is empty when its turn comes.
        let project = tree.project_dir();
        let session_dir = project.join(SID);
        let pos = |p: &Path| manifest.dirs.iter().position(|d| d == p).unwrap();
        assert!(pos(&paths::subagents_dir(&project, SID)) < pos(&session_dir));
        assert!(pos(&paths::tool_results_dir(&project, SID)) < pos(&session_dir));
    }

    #[test]
    fn test_native_session_needs_force() {
        let tree = setup_session();
        let before = session_files(&tree);
        let deleter = SessionDeleter::new(&tree.config);
        assert!(matches!(
            deleter.delete(SID, &DeleteOptions::default()),
            Err(SessionError::NativeSession(_))
        ));
        assert_eq!(session_files(&tree), before);
        assert!(!tree.config.deleted_dir().unwrap().exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let tree = setup_session();
        let before = session_files(&tree);
        let options = DeleteOptions {
            dry_run: true,
            ..Default::default()
        };
        match SessionDeleter::new(&tree.config).delete(SID, &options).unwrap() {
            DeleteOutcome::DryRun(manifest) => assert_eq!(manifest.files.len(), 9),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(session_files(&tree), before);
        assert!(!tree.config.deleted_dir().unwrap().exists());
    }

    #[test]
    fn test_unexpected_file_stops_delete() {
        let tree = setup_session();
        let env_dir = tree.claude().join("session-env").join(SID);
        fs::create_dir_all(&env_dir).unwrap();
        let stray = env_dir.join("leftover");
        fs::write(&stray, "x").unwrap();
        let options = DeleteOptions {
            force: true,
            ..Default::default()
        };
        match SessionDeleter::new(&tree.config).delete(SID, &options) {
            Err(SessionError::UnexpectedArtifacts { paths }) => assert_eq!(paths, vec![stray]),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(paths::transcript_file(&tree.project_dir(), SID).exists());
    }

    #[test]
    fn test_delete_then_unarchive_in_place_restores() {
        let tree = setup_session();
        let options = DeleteOptions {
            force: true,
            ..Default::default()
        };
        let outcome = SessionDeleter::new(&tree.config).delete("5f3c", &options);
        let (backup, dirs_removed) = match outcome {
            Ok(DeleteOutcome::Deleted {
                backup,
                dirs_removed,
                ..
            }) => (backup.unwrap(), dirs_removed),
            other => panic!("unexpected result: {other:?}"),
        };
        assert!(backup.starts_with(tree.config.deleted_dir().unwrap()));
        assert!(dirs_removed.contains(&tree.project_dir().join(SID)));
        assert!(!tree.project_dir().join(SID).exists());
        assert!(!tree.claude().join("tasks").join(SID).exists());
        assert!(!tree.claude().join("session-env").join(SID).exists());
        assert!(!tree.claude().join("plans").join(format!("{SLUG}.md")).exists());
        assert!(!paths::transcript_file(&tree.project_dir(), SID).exists());

        let archive = SessionArchive::from_bytes(&fs::read(&backup).unwrap()).unwrap();
        let options = UnarchiveOptions {
            in_place: true,
            ..Default::default()
        };
        Archiver::new(&tree.config)
            .unarchive(&archive, Some(backup.as_path()), &options)
            .unwrap();
        assert!(paths::transcript_file(&tree.project_dir(), SID).exists());
        assert!(tree.claude().join("plans").join(format!("{SLUG}.md")).exists());
        assert!(tree.claude().join("tasks").join(SID).join("1.json").exists());
        assert!(tree.claude().join("session-env").join(SID).is_dir());
    }

    #[test]
    fn test_no_backup_drops_archive_after_success() {
        let tree = setup_session();
        let options = DeleteOptions {
            force: true,
            no_backup: true,
            ..Default::default()
        };
        match SessionDeleter::new(&tree.config).delete(SID, &options).unwrap() {
            DeleteOutcome::Deleted { backup, .. } => assert_eq!(backup, None),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let left = fs::read_dir(tree.config.deleted_dir().unwrap()).unwrap().count();
        assert_eq!(left, 0);
    }

    #[test]
    fn test_clone_deletes_without_force() {
        let tree = setup_session();
        let clone = SessionCloner::new(&tree.config)
            .clone_session(SID, &CloneOptions::default())
            .unwrap();
        let deleter = SessionDeleter::new(&tree.config);
        let manifest = deleter.manifest(&clone.new_session_id).unwrap();
        assert!(!manifest.native);
        assert!(manifest.created_at.is_some());

        deleter
            .delete(&clone.new_session_id, &DeleteOptions::default())
            .unwrap();
        assert!(!paths::transcript_file(&tree.project_dir(), &clone.new_session_id).exists());
        assert!(paths::transcript_file(&tree.project_dir(), SID).exists());
        assert!(tree.claude().join("plans").join(format!("{SLUG}.md")).exists());
    }

    fn failing_on_todo(path: &Path) -> io::Result<()> {
        if path.to_string_lossy().contains("todos") {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        fs::remove_file(path)
    }

    #[test]
    fn test_failed_delete_rolls_back() {
        let tree = setup_session();
        let before: Vec<(PathBuf, Vec<u8>)> = session_files(&tree)
            .into_iter()
            .map(|p| {
                let bytes = fs::read(&p).unwrap();
                (p, bytes)
            })
            .collect();
        let options = DeleteOptions {
            force: true,
            ..Default::default()
        };
        let result = SessionDeleter::new(&tree.config)
            .with_remove(failing_on_todo)
            .delete(SID, &options);
        assert!(matches!(result, Err(SessionError::Io(_))));

        for (path, bytes) in &before {
            assert_eq!(&fs::read(path).unwrap(), bytes, "{}", path.display());
        }
        let left = fs::read_dir(tree.config.deleted_dir().unwrap()).unwrap().count();
        assert_eq!(left, 0);
    }
}
