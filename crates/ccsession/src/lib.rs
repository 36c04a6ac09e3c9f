#![doc = include_str!("../README.md")]

pub mod archive;
pub mod artifacts;
pub mod clone;
pub mod config;
pub mod delete;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod index;
pub mod integrity;
pub mod lineage;
pub mod paths;
pub mod reader;
pub mod repair;
pub mod snapshot;
pub mod translate;
pub mod types;

pub use archive::{
    ArchiveOutcome, Archiver, LocalStorage, SessionArchive, StorageBackend, UnarchiveOptions,
    UnarchiveOutcome,
};
pub use clone::{CloneOptions, CloneOutcome, SessionCloner};
pub use config::Config;
pub use delete::{ArtifactKind, DeleteManifest, DeleteOptions, DeleteOutcome, SessionDeleter};
pub use discovery::{AgentFile, SessionFinder, SessionLocation};
pub use error::{Result, SessionError};
pub use integrity::{ChainAnalyzer, ChainStatus, IntegrityReport, Orphan};
pub use lineage::{LineageEntry, LineageMethod, LineageStore};
pub use paths::PathResolver;
pub use reader::TranscriptReader;
pub use repair::{BackupMeta, BackupStore, FixAttempt, FixOutcome, RepairEngine, RestoreOutcome};
pub use types::{Line, Record, RecordKind, Transcript};

use std::path::{Path, PathBuf};

/// High-level entry point: every operation, driven by one [`Config`].
///
/// # Example
///
/// ```rust,no_run
/// use ccsession::{ChainStatus, Config, SessionKeeper};
///
/// let keeper = SessionKeeper::new(Config::new());
///
/// for report in keeper.scan()? {
///     if report.status != ChainStatus::Healthy {
///         println!("{}: {}", report.session_id, report.status);
///     }
/// }
/// # Ok::<(), ccsession::SessionError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SessionKeeper {
    config: Config,
}

impl Default for SessionKeeper {
    fn default() -> Self {
        Self::new(Config::new())
    }
}

impl SessionKeeper {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn finder(&self) -> SessionFinder<'_> {
        SessionFinder::new(&self.config)
    }

    /// Resolve a session id or unique prefix to its transcript.
    pub fn find_session(&self, id_or_prefix: &str) -> Result<SessionLocation> {
        self.finder().find(id_or_prefix)
    }

    /// Every main transcript under `projects/`.
    pub fn session_files(&self) -> Result<Vec<PathBuf>> {
        self.finder().all_sessions()
    }

    /// Analyze every session. Worst status first, then by path.
    pub fn scan(&self) -> Result<Vec<IntegrityReport>> {
        let mut reports: Vec<IntegrityReport> = self
            .session_files()?
            .iter()
            .map(ChainAnalyzer::analyze)
            .collect();
        reports.sort_by(|a, b| b.status.cmp(&a.status).then_with(|| a.path.cmp(&b.path)));
        Ok(reports)
    }

    pub fn check(&self, id_or_prefix: &str) -> Result<IntegrityReport> {
        let location = self.find_session(id_or_prefix)?;
        Ok(ChainAnalyzer::analyze(&location.path))
    }

    pub fn check_file<P: AsRef<Path>>(&self, path: P) -> IntegrityReport {
        ChainAnalyzer::analyze(path)
    }

    pub fn repair_engine(&self) -> Result<RepairEngine> {
        Ok(RepairEngine::new(BackupStore::new(self.config.backup_dir()?)))
    }

    pub fn fix(&self, id_or_prefix: &str) -> Result<FixOutcome> {
        let location = self.find_session(id_or_prefix)?;
        self.repair_engine()?.repair(&location.path)
    }

    /// The diff a fix would apply, or `None` when the session is not
    /// fixable.
    pub fn fix_preview(&self, id_or_prefix: &str) -> Result<(IntegrityReport, Option<String>)> {
        let report = self.check(id_or_prefix)?;
        let diff = match report.status {
            ChainStatus::Fixable => Some(self.repair_engine()?.preview(&report)?),
            _ => None,
        };
        Ok((report, diff))
    }

    pub fn fix_all(&self) -> Result<Vec<FixAttempt>> {
        Ok(self.repair_engine()?.fix_all(&self.session_files()?))
    }

    /// Undo a repair from its backup.
    pub fn restore_backup(&self, prefix: &str) -> Result<RestoreOutcome> {
        self.repair_engine()?.restore(prefix)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupMeta>> {
        self.repair_engine()?.list()
    }

    pub fn clone_session(
        &self,
        id_or_prefix: &str,
        options: &CloneOptions,
    ) -> Result<CloneOutcome> {
        SessionCloner::new(&self.config).clone_session(id_or_prefix, options)
    }

    pub fn archive(
        &self,
        id_or_prefix: &str,
        storage: &dyn StorageBackend,
        name: Option<&str>,
    ) -> Result<ArchiveOutcome> {
        Archiver::new(&self.config).archive(id_or_prefix, storage, name)
    }

    /// Load a local archive file and restore it.
    pub fn unarchive_file(
        &self,
        archive: &Path,
        options: &UnarchiveOptions,
    ) -> Result<UnarchiveOutcome> {
        let name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SessionError::Storage(format!("not a file: {}", archive.display())))?;
        let dir = archive
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let archiver = Archiver::new(&self.config);
        let loaded = archiver.load(&LocalStorage::new(dir), name)?;
        archiver.unarchive(&loaded, Some(archive), options)
    }

    /// Remove a session and its artifacts, keeping an archive to undo from.
    pub fn delete(&self, id_or_prefix: &str, options: &DeleteOptions) -> Result<DeleteOutcome> {
        SessionDeleter::new(&self.config).delete(id_or_prefix, options)
    }

    pub fn lineage(&self) -> Result<LineageStore> {
        Ok(LineageStore::new(self.config.lineage_file()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::fixtures::*;
    use std::fs;

    fn keeper() -> (Tree, SessionKeeper) {
        let tree = setup_session();
        let keeper = SessionKeeper::new(tree.config.clone());
        (tree, keeper)
    }

    fn break_chain(tree: &Tree) {
        let main = paths::transcript_file(&tree.project_dir(), SID);
        let text = fs::read_to_string(&main)
            .unwrap()
            .replace(r#""parentUuid":"u1""#, r#""parentUuid":"gone""#);
        fs::write(&main, text).unwrap();
    }

    #[test]
    fn test_scan_and_check() {
        let (tree, keeper) = keeper();
        let reports = keeper.scan().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, ChainStatus::Healthy);

        break_chain(&tree);
        assert_eq!(keeper.check("5f3c").unwrap().status, ChainStatus::Fixable);
    }

    #[test]
    fn test_fix_then_restore_backup() {
        let (tree, keeper) = keeper();
        break_chain(&tree);
        let main = paths::transcript_file(&tree.project_dir(), SID);
        let broken = fs::read(&main).unwrap();

        let (_, diff) = keeper.fix_preview(SID).unwrap();
        assert!(diff.unwrap().contains("+{"));
        assert_eq!(fs::read(&main).unwrap(), broken);

        match keeper.fix(SID).unwrap() {
            FixOutcome::Committed { rewired, .. } => assert_eq!(rewired, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(keeper.check(SID).unwrap().status, ChainStatus::Healthy);
        assert_eq!(keeper.list_backups().unwrap().len(), 1);

        keeper.restore_backup("5f3c").unwrap();
        assert_eq!(fs::read(&main).unwrap(), broken);
        assert!(keeper.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_archive_file_round_trip() {
        let (tree, keeper) = keeper();
        let out = tempfile::TempDir::new().unwrap();
        let outcome = keeper
            .archive(SID, &LocalStorage::new(out.path()), None)
            .unwrap();
        assert!(outcome.location.contains("session-5f3c9a10-"));

        let options = UnarchiveOptions {
            translate_paths: true,
            ..Default::default()
        };
        let restored = keeper
            .unarchive_file(Path::new(&outcome.location), &options)
            .unwrap();
        assert_ne!(restored.session_id, SID);
        assert!(restored.transcript.starts_with(tree.project_dir()));
        let entry = keeper.lineage().unwrap().entry(&restored.session_id).unwrap().unwrap();
        assert_eq!(entry.archive_path.as_deref(), Some(outcome.location.as_str()));
    }
}
