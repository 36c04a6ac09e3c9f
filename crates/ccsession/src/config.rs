use crate::error::Result;
use crate::paths::PathResolver;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

const STATE_DIR_NAME: &str = ".claude-session-mcp";

/// Process-wide settings, built once and passed by reference to every
/// component.
///
/// ```rust
/// use ccsession::{Config, PathResolver};
///
/// let config = Config::new()
///     .with_resolver(PathResolver::new().with_claude_dir("/tmp/.claude"))
///     .with_state_dir("/tmp/state");
///
/// assert_eq!(
///     config.backup_dir().unwrap(),
///     std::path::PathBuf::from("/tmp/state/chain-backups")
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    resolver: PathResolver,
    state_dir: Option<PathBuf>,
    search_timeout: Duration,
    use_ripgrep: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            resolver: PathResolver::new(),
            state_dir: None,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            use_ripgrep: true,
        }
    }

    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_state_dir<P: Into<PathBuf>>(mut self, state_dir: P) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Disable the external `rg` search and always walk the project tree
    /// in-process.
    pub fn without_ripgrep(mut self) -> Self {
        self.use_ripgrep = false;
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn search_timeout(&self) -> Duration {
        self.search_timeout
    }

    pub fn use_ripgrep(&self) -> bool {
        self.use_ripgrep
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.state_dir {
            return Ok(dir.clone());
        }
        Ok(self.resolver.home_dir()?.join(STATE_DIR_NAME))
    }

    pub fn backup_dir(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("chain-backups"))
    }

    /// Archives of deleted sessions.
    pub fn deleted_dir(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("deleted"))
    }

    pub fn lineage_file(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("lineage.json"))
    }
}
