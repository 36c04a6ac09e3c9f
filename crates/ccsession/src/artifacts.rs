//! Auxiliary files tied to a session identity: plan files, todos, tool
//! results, task files and the session-env directory, plus the
//! all-or-nothing [`RelocationPlan`] that writes them under a new identity.

use crate::error::{Result, SessionError};
use crate::paths;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Plan contents by slug. Slugs without a plan file are skipped.
pub fn collect_plan_files<'a>(
    plans_dir: &Path,
    slugs: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, String>> {
    let mut plans = BTreeMap::new();
    for slug in slugs {
        let path = plans_dir.join(format!("{}.md", slug));
        match fs::read_to_string(&path) {
            Ok(content) => {
                plans.insert(slug.to_string(), content);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(slug, "no plan file");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(plans)
}

/// Todo contents by filename, for todos owned by `session_id`
/// (`<session_id>-agent-*.json`).
pub fn collect_todos(todos_dir: &Path, session_id: &str) -> Result<BTreeMap<String, String>> {
    let prefix = format!("{}-agent-", session_id);
    read_files(todos_dir, |name| name.starts_with(&prefix) && name.ends_with(".json"))
}

/// Tool-result blobs by tool-use id.
pub fn collect_tool_results(
    project_dir: &Path,
    session_id: &str,
) -> Result<BTreeMap<String, String>> {
    let files = read_files(&paths::tool_results_dir(project_dir, session_id), |name| {
        name.ends_with(".txt")
    })?;
    Ok(files
        .into_iter()
        .map(|(name, content)| (name.trim_end_matches(".txt").to_string(), content))
        .collect())
}

fn read_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<BTreeMap<String, String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = BTreeMap::new();
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if entry.file_type()?.is_file() && keep(&name) {
            files.insert(name, fs::read_to_string(entry.path())?);
        }
    }
    Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFileKind {
    /// `<n>.json`
    Task,
    /// `.highwatermark`
    Metadata,
    /// `.lock`, process-local and never copied.
    Lock,
    Unexpected,
}

impl TaskFileKind {
    pub fn classify(name: &str) -> Self {
        match name {
            ".lock" => TaskFileKind::Lock,
            ".highwatermark" => TaskFileKind::Metadata,
            _ => match name.strip_suffix(".json") {
                Some(stem) if !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()) => {
                    TaskFileKind::Task
                }
                _ => TaskFileKind::Unexpected,
            },
        }
    }
}

/// Contents of `tasks/<session>/`, lock file excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFiles {
    pub tasks: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

impl TaskFiles {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.metadata.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len() + self.metadata.len()
    }
}

/// Read a session's task directory. Any file that is not a task, the
/// high-water mark or the lock is reported as unexpected.
pub fn collect_tasks(tasks_dir: &Path) -> Result<TaskFiles> {
    let entries = match fs::read_dir(tasks_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TaskFiles::default()),
        Err(e) => return Err(e.into()),
    };

    let mut files = TaskFiles::default();
    let mut unexpected = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        match TaskFileKind::classify(&name) {
            TaskFileKind::Lock => {}
            TaskFileKind::Task if entry.file_type()?.is_file() => {
                files.tasks.insert(name, fs::read_to_string(&path)?);
            }
            TaskFileKind::Metadata if entry.file_type()?.is_file() => {
                files.metadata.insert(name, fs::read_to_string(&path)?);
            }
            _ => unexpected.push(path),
        }
    }
    if !unexpected.is_empty() {
        unexpected.sort();
        return Err(SessionError::UnexpectedArtifacts { paths: unexpected });
    }
    Ok(files)
}

/// The session-env directory must be absent or hold no files.
pub fn validate_session_env_empty(dir: &Path) -> Result<()> {
    let mut found = Vec::new();
    collect_files(dir, &mut found)?;
    if found.is_empty() {
        Ok(())
    } else {
        found.sort();
        Err(SessionError::UnexpectedArtifacts { paths: found })
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            collect_files(&entry.path(), out)?;
        } else {
            out.push(entry.path());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub dest: PathBuf,
    pub bytes: Vec<u8>,
}

/// Every file a clone or restore will create, checked as a batch before
/// anything touches disk.
#[derive(Debug, Clone, Default)]
pub struct RelocationPlan {
    writes: Vec<PlannedWrite>,
    dirs: Vec<PathBuf>,
}

impl RelocationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<P: Into<PathBuf>>(&mut self, dest: P, bytes: impl Into<Vec<u8>>) {
        self.writes.push(PlannedWrite {
            dest: dest.into(),
            bytes: bytes.into(),
        });
    }

    /// A directory to create after the files are written.
    pub fn ensure_dir<P: Into<PathBuf>>(&mut self, dir: P) {
        self.dirs.push(dir.into());
    }

    pub fn writes(&self) -> &[PlannedWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Destinations that already exist, or that the plan itself targets
    /// twice.
    pub fn collisions(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut collisions = Vec::new();
        for write in &self.writes {
            if write.dest.exists() || !seen.insert(write.dest.as_path()) {
                collisions.push(write.dest.clone());
            }
        }
        collisions
    }

    /// Write every file, or none. Returns the written paths in plan order.
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        let collisions = self.collisions();
        if !collisions.is_empty() {
            return Err(SessionError::Collision { paths: collisions });
        }

        let mut written: Vec<PathBuf> = Vec::with_capacity(self.writes.len());
        for write in &self.writes {
            if let Err(e) = write_new(&write.dest, &write.bytes) {
                for path in written.iter().rev() {
                    if let Err(cleanup) = fs::remove_file(path) {
                        tracing::warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "failed to undo partial write"
                        );
                    }
                }
                return Err(match e.kind() {
                    io::ErrorKind::AlreadyExists => SessionError::Collision {
                        paths: vec![write.dest.clone()],
                    },
                    _ => e.into(),
                });
            }
            written.push(write.dest.clone());
        }
        for dir in &self.dirs {
            fs::create_dir_all(dir)?;
        }
        tracing::debug!(files = written.len(), "relocation committed");
        Ok(written)
    }
}

fn write_new(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)?;
    file.write_all(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_task_files() {
        assert_eq!(TaskFileKind::classify("1.json"), TaskFileKind::Task);
        assert_eq!(TaskFileKind::classify("42.json"), TaskFileKind::Task);
        assert_eq!(TaskFileKind::classify(".highwatermark"), TaskFileKind::Metadata);
        assert_eq!(TaskFileKind::classify(".lock"), TaskFileKind::Lock);
        assert_eq!(TaskFileKind::classify("a.json"), TaskFileKind::Unexpected);
        assert_eq!(TaskFileKind::classify(".json"), TaskFileKind::Unexpected);
        assert_eq!(TaskFileKind::classify("notes.txt"), TaskFileKind::Unexpected);
    }

    #[test]
    fn test_collect_tasks_skips_lock() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("1.json"), "{\"id\":\"1\"}").unwrap();
        fs::write(temp.path().join(".highwatermark"), "1").unwrap();
        fs::write(temp.path().join(".lock"), "").unwrap();
        let files = collect_tasks(temp.path()).unwrap();
        assert_eq!(files.tasks.len(), 1);
        assert_eq!(files.metadata.get(".highwatermark").map(String::as_str), Some("1"));
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_collect_tasks_flags_unknown_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("1.json"), "{}").unwrap();
        fs::write(temp.path().join("state.db"), "").unwrap();
        match collect_tasks(temp.path()).unwrap_err() {
            SessionError::UnexpectedArtifacts { paths } => {
                assert_eq!(paths, vec![temp.path().join("state.db")])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(collect_tasks(&temp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_collect_todos_by_owner() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("s1-agent-s1.json"), "[]").unwrap();
        fs::write(temp.path().join("s1-agent-a9.json"), "[1]").unwrap();
        fs::write(temp.path().join("s2-agent-s1.json"), "[]").unwrap();
        let todos = collect_todos(temp.path(), "s1").unwrap();
        assert_eq!(
            todos.keys().cloned().collect::<Vec<_>>(),
            vec!["s1-agent-a9.json".to_string(), "s1-agent-s1.json".to_string()]
        );
    }

    #[test]
    fn test_collect_plans_and_tool_results() {
        let temp = TempDir::new().unwrap();
        let plans = temp.path().join("plans");
        fs::create_dir_all(&plans).unwrap();
        fs::write(plans.join("happy-orbiting-fox.md"), "# plan").unwrap();
        let found =
            collect_plan_files(&plans, ["happy-orbiting-fox", "expired-plan-slug"]).unwrap();
        assert_eq!(found.len(), 1);

        let project = temp.path().join("proj");
        let results = paths::tool_results_dir(&project, "s1");
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join("toolu_01.txt"), "output").unwrap();
        let blobs = collect_tool_results(&project, "s1").unwrap();
        assert_eq!(blobs.get("toolu_01").map(String::as_str), Some("output"));
    }

    #[test]
    fn test_session_env_must_be_empty() {
        let temp = TempDir::new().unwrap();
        let env = temp.path().join("session-env/s1");
        validate_session_env_empty(&env).unwrap();
        fs::create_dir_all(env.join("nested")).unwrap();
        validate_session_env_empty(&env).unwrap();
        fs::write(env.join("nested/vars"), "X=1").unwrap();
        assert!(matches!(
            validate_session_env_empty(&env),
            Err(SessionError::UnexpectedArtifacts { .. })
        ));
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let temp = TempDir::new().unwrap();
        let taken = temp.path().join("b/taken.txt");
        fs::create_dir_all(taken.parent().unwrap()).unwrap();
        fs::write(&taken, "keep").unwrap();

        let mut plan = RelocationPlan::new();
        plan.write(temp.path().join("a/one.txt"), "1");
        plan.write(&taken, "2");
        plan.write(temp.path().join("c/three.txt"), "3");
        plan.ensure_dir(temp.path().join("env"));

        match plan.commit().unwrap_err() {
            SessionError::Collision { paths } => assert_eq!(paths, vec![taken.clone()]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!temp.path().join("a").exists());
        assert!(!temp.path().join("c").exists());
        assert!(!temp.path().join("env").exists());
        assert_eq!(fs::read_to_string(&taken).unwrap(), "keep");
    }

    #[test]
    fn test_commit_writes_everything() {
        let temp = TempDir::new().unwrap();
        let mut plan = RelocationPlan::new();
        plan.write(temp.path().join("a/one.txt"), "1");
        plan.write(temp.path().join("two.txt"), b"2".to_vec());
        plan.ensure_dir(temp.path().join("env/s1"));
        let written = plan.commit().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read_to_string(temp.path().join("a/one.txt")).unwrap(), "1");
        assert!(temp.path().join("env/s1").is_dir());
    }

    #[test]
    fn test_duplicate_destination_is_a_collision() {
        let temp = TempDir::new().unwrap();
        let mut plan = RelocationPlan::new();
        plan.write(temp.path().join("x"), "1");
        plan.write(temp.path().join("x"), "2");
        assert_eq!(plan.collisions(), vec![temp.path().join("x")]);
    }
}
