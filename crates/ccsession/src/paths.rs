use crate::error::{Result, SessionError};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Resolves every location under the Claude data directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    home_dir: Option<PathBuf>,
    claude_dir: Option<PathBuf>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    pub fn new() -> Self {
        let home_dir = dirs::home_dir();
        Self {
            home_dir,
            claude_dir: None,
        }
    }

    pub fn with_home<P: Into<PathBuf>>(mut self, home: P) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    pub fn with_claude_dir<P: Into<PathBuf>>(mut self, claude_dir: P) -> Self {
        self.claude_dir = Some(claude_dir.into());
        self
    }

    pub fn home_dir(&self) -> Result<&Path> {
        self.home_dir
            .as_deref()
            .ok_or(SessionError::NoHomeDirectory)
    }

    pub fn claude_dir(&self) -> Result<PathBuf> {
        if let Some(ref claude_dir) = self.claude_dir {
            return Ok(claude_dir.clone());
        }

        let home = self.home_dir()?;
        Ok(home.join(".claude"))
    }

    pub fn projects_dir(&self) -> Result<PathBuf> {
        Ok(self.claude_dir()?.join("projects"))
    }

    pub fn plans_dir(&self) -> Result<PathBuf> {
        Ok(self.claude_dir()?.join("plans"))
    }

    pub fn todos_dir(&self) -> Result<PathBuf> {
        Ok(self.claude_dir()?.join("todos"))
    }

    pub fn tasks_dir(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.claude_dir()?.join("tasks").join(session_id))
    }

    pub fn session_env_dir(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.claude_dir()?.join("session-env").join(session_id))
    }

    /// Project folder for a real filesystem path, e.g. `/Users/a/proj` ->
    /// `projects/-Users-a-proj`.
    pub fn project_dir(&self, project_path: &Path) -> Result<PathBuf> {
        Ok(self.projects_dir()?.join(encode_project_path(project_path)))
    }

    pub fn exists(&self) -> bool {
        self.claude_dir().map(|p| p.exists()).unwrap_or(false)
    }
}

/// Per-session locations inside a project folder.
pub fn transcript_file(project_dir: &Path, session_id: &str) -> PathBuf {
    project_dir.join(format!("{}.jsonl", session_id))
}

pub fn subagents_dir(project_dir: &Path, session_id: &str) -> PathBuf {
    project_dir.join(session_id).join("subagents")
}

pub fn tool_results_dir(project_dir: &Path, session_id: &str) -> PathBuf {
    project_dir.join(session_id).join("tool-results")
}

/// Claude Code replaces `/`, `.`, space and `~` with `-` when naming project
/// folders. The mapping is lossy, so there is no inverse; the real path comes
/// from the `cwd` of the session records.
pub fn encode_project_path(path: &Path) -> String {
    path.to_string_lossy().replace(['/', '.', ' ', '~'], "-")
}

/// Replace `path` with `bytes` through a temp file in the same directory.
/// An existing file keeps its permissions.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    if let Ok(existing) = fs::metadata(path) {
        tmp.as_file().set_permissions(existing.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

mod dirs {
    use super::*;

    pub fn home_dir() -> Option<PathBuf> {
        env::var_os("HOME")
            .or_else(|| env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
