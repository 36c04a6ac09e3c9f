use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Home directory not found")]
    NoHomeDirectory,

    /// A non-blank line failed to decode. Fatal for the whole file.
    #[error("JSON parse error in {} line {line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{reason}: {}", .path.display())]
    Structure { path: PathBuf, reason: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("{}", ambiguous_message(.prefix, .matches))]
    Ambiguous { prefix: String, matches: Vec<String> },

    #[error("{}", collision_message(.paths))]
    Collision { paths: Vec<PathBuf> },

    #[error("Verification failed for {}: {detail}", .path.display())]
    Verification { path: PathBuf, detail: String },

    #[error(
        "Backup already exists: {}\nRun 'ccsession restore {session_id}' first, \
         or remove the backup manually.",
        .backup.display()
    )]
    BackupExists { session_id: String, backup: PathBuf },

    #[error("No backup found for '{0}'")]
    BackupNotFound(String),

    #[error("{}", unexpected_message(.paths))]
    UnexpectedArtifacts { paths: Vec<PathBuf> },

    #[error("Session {0} is a native Claude session; pass --force to delete it")]
    NativeSession(String),

    #[error(
        "{error}\nRollback failed: {rollback}\nBackup preserved at: {}",
        .backup.display()
    )]
    RollbackFailed {
        error: String,
        rollback: String,
        backup: PathBuf,
    },

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("No cwd field found in session records")]
    MissingCwd,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SessionError {
    pub(crate) fn structure(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SessionError::Structure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

fn ambiguous_message(prefix: &str, matches: &[String]) -> String {
    let listed: Vec<&str> = matches.iter().take(10).map(String::as_str).collect();
    let more = matches.len().saturating_sub(10);
    let mut out = format!(
        "Session ID prefix '{}' is ambiguous. Matches {}:\n  {}",
        prefix,
        matches.len(),
        listed.join("\n  ")
    );
    if more > 0 {
        out.push_str(&format!("\n  ... and {} more", more));
    }
    out
}

fn collision_message(paths: &[PathBuf]) -> String {
    let shown: Vec<String> = paths.iter().take(5).map(|p| p.display().to_string()).collect();
    let mut out = format!(
        "{} destination file(s) already exist:\n  {}",
        paths.len(),
        shown.join("\n  ")
    );
    if paths.len() > 5 {
        out.push_str(&format!("\n  ... and {} more", paths.len() - 5));
    }
    out
}

fn unexpected_message(paths: &[PathBuf]) -> String {
    let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    format!(
        "Found {} unexpected artifact file(s):\n  {}",
        paths.len(),
        shown.join("\n  ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_lists_every_match() {
        let err = SessionError::Ambiguous {
            prefix: "ab".into(),
            matches: vec!["abc".into(), "abd".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'ab'"));
        assert!(msg.contains("abc"));
        assert!(msg.contains("abd"));
    }

    #[test]
    fn test_collision_truncates_long_lists() {
        let paths: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("/t/{i}"))).collect();
        let msg = SessionError::Collision { paths }.to_string();
        assert!(msg.starts_with("7 destination"));
        assert!(msg.contains("and 2 more"));
    }

    #[test]
    fn test_parse_error_carries_line() {
        let err = SessionError::Parse {
            path: PathBuf::from("/x/s.jsonl"),
            line: 4,
            message: "expected value".into(),
        };
        assert!(err.to_string().contains("line 4"));
    }

    #[test]
    fn test_rollback_failure_names_backup() {
        let err = SessionError::RollbackFailed {
            error: "permission denied".into(),
            rollback: "disk full".into(),
            backup: PathBuf::from("/s/deleted/x.json"),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("permission denied"));
        assert!(msg.contains("Rollback failed: disk full"));
        assert!(msg.ends_with("/s/deleted/x.json"));
    }
}
