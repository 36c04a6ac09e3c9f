//! Locating session transcripts and their agent files under `projects/`.
//!
//! Searches go through `rg` when it is installed, bounded by the configured
//! timeout, and fall back to walking the tree in-process.

use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::paths;
use regex::Regex;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// A main transcript found by id or prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLocation {
    pub session_id: String,
    pub path: PathBuf,
    pub project_dir: PathBuf,
}

/// An `agent-*.jsonl` file belonging to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFile {
    pub path: PathBuf,
    /// Lives under `<session>/subagents/` rather than beside the transcript.
    pub nested: bool,
}

impl AgentFile {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct SessionFinder<'a> {
    config: &'a Config,
}

impl<'a> SessionFinder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Resolve a full session id or a unique prefix. An exact id match wins
    /// over longer ids sharing the prefix.
    pub fn find(&self, id_or_prefix: &str) -> Result<SessionLocation> {
        validate_query(id_or_prefix)?;
        let projects = self.config.resolver().projects_dir()?;
        if !projects.is_dir() {
            return Err(SessionError::SessionNotFound(id_or_prefix.to_string()));
        }

        let glob = format!("{}*.jsonl", id_or_prefix);
        let found = match self.ripgrep(&["--files", "--glob", &glob], &projects)? {
            Some(found) => found,
            None => walk_files(&projects, &|name| {
                name.starts_with(id_or_prefix) && name.ends_with(".jsonl")
            })?,
        };

        let mut candidates: Vec<PathBuf> = found
            .into_iter()
            .filter(|p| is_main_transcript(p))
            .collect();
        candidates.sort();
        candidates.dedup();

        if let Some(exact) = candidates.iter().find(|p| stem(p) == id_or_prefix) {
            return Ok(location(exact.clone()));
        }
        match candidates.len() {
            0 => Err(SessionError::SessionNotFound(id_or_prefix.to_string())),
            1 => Ok(location(candidates.remove(0))),
            _ => Err(SessionError::Ambiguous {
                prefix: id_or_prefix.to_string(),
                matches: candidates.iter().map(|p| stem(p)).collect(),
            }),
        }
    }

    /// Every main transcript, `projects/*/*.jsonl` minus agent files,
    /// sorted by path.
    pub fn all_sessions(&self) -> Result<Vec<PathBuf>> {
        let projects = self.config.resolver().projects_dir()?;
        let mut sessions = Vec::new();
        for project in read_dir_sorted(&projects)? {
            if !project.is_dir() {
                continue;
            }
            for file in read_dir_sorted(&project)? {
                if file.is_file() && is_main_transcript(&file) {
                    sessions.push(file);
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Agent files owned by `session_id`: flat files in the project folder
    /// whose records carry the session id, and everything under the
    /// session's `subagents/` folder.
    pub fn agent_files(&self, project_dir: &Path, session_id: &str) -> Result<Vec<AgentFile>> {
        let pattern = format!(r#""sessionId":\s*"{}""#, regex::escape(session_id));
        let found = match self.ripgrep(
            &["--files-with-matches", &pattern, "--glob", "agent-*.jsonl"],
            project_dir,
        )? {
            Some(found) => found,
            None => {
                let matcher = Regex::new(&pattern)
                    .map_err(|e| SessionError::InvalidIdentity(e.to_string()))?;
                let mut matching = Vec::new();
                for path in walk_files(project_dir, &is_agent_name)? {
                    if file_matches(&path, &matcher)? {
                        matching.push(path);
                    }
                }
                matching
            }
        };

        let subagents = paths::subagents_dir(project_dir, session_id);
        let mut agents: Vec<AgentFile> = found
            .into_iter()
            .filter_map(|path| {
                let parent = path.parent()?;
                if parent == project_dir {
                    Some(AgentFile { path, nested: false })
                } else if parent == subagents {
                    Some(AgentFile { path, nested: true })
                } else {
                    None
                }
            })
            .collect();

        // Nested files belong to the session by location even without a
        // sessionId field.
        for path in read_dir_sorted(&subagents)? {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if path.is_file()
                && name.as_deref().is_some_and(is_agent_name)
                && !agents.iter().any(|a| a.path == path)
            {
                agents.push(AgentFile { path, nested: true });
            }
        }
        agents.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(session_id, count = agents.len(), "agent files");
        Ok(agents)
    }

    /// Run `rg` with `args` over `root`. `None` when ripgrep is disabled or
    /// not installed; a timeout counts as no matches.
    fn ripgrep(&self, args: &[&str], root: &Path) -> Result<Option<Vec<PathBuf>>> {
        if !self.config.use_ripgrep() {
            return Ok(None);
        }
        run_search("rg", args, root, self.config.search_timeout())
    }
}

/// Run an external file search that prints one path per line. Exit 1 and a
/// timeout both mean no matches; `None` asks the caller to walk the tree.
fn run_search(
    program: &str,
    args: &[&str],
    root: &Path,
    timeout: Duration,
) -> Result<Option<Vec<PathBuf>>> {
    let mut out = tempfile::tempfile()?;
    let mut command = Command::new(program);
    command
        .args(args)
        .arg(root)
        .stdin(Stdio::null())
        .stdout(out.try_clone()?)
        .stderr(Stdio::null());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(program, "search program not installed, walking the tree");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(
                program,
                root = %root.display(),
                ?timeout,
                "search timed out, treating as no matches"
            );
            return Ok(Some(Vec::new()));
        }
    };
    // 1 is rg's "nothing matched".
    match status.code() {
        Some(0) => {}
        Some(1) => return Ok(Some(Vec::new())),
        code => {
            tracing::warn!(program, ?code, "search failed, walking the tree");
            return Ok(None);
        }
    }

    let mut stdout = String::new();
    out.seek(SeekFrom::Start(0))?;
    out.read_to_string(&mut stdout)?;
    Ok(Some(
        stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect(),
    ))
}

fn validate_query(query: &str) -> Result<()> {
    let valid = !query.is_empty()
        && query
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidIdentity(format!(
            "not a session id or prefix: {:?}",
            query
        )))
    }
}

fn is_agent_name(name: &str) -> bool {
    name.starts_with("agent-") && name.ends_with(".jsonl")
}

fn is_main_transcript(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.ends_with(".jsonl") && !name.starts_with("agent-"),
        None => false,
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn location(path: PathBuf) -> SessionLocation {
    SessionLocation {
        session_id: stem(&path),
        project_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        path,
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

fn walk_files(root: &Path, keep: &dyn Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for path in read_dir_sorted(root)? {
        if path.is_dir() {
            found.extend(walk_files(&path, keep)?);
        } else if path.file_name().and_then(|n| n.to_str()).is_some_and(keep) {
            found.push(path);
        }
    }
    Ok(found)
}

fn file_matches(path: &Path, matcher: &Regex) -> Result<bool> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable agent file");
            return Ok(false);
        }
    };
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            tracing::warn!(path = %path.display(), "skipping agent file with unreadable line");
            return Ok(false);
        };
        if matcher.is_match(&line) {
            return Ok(true);
        }
    }
    Ok(false)
}
