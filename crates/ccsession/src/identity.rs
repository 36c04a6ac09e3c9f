//! Identity derivation for cloned and restored sessions.
//!
//! Every derived identity has the shape `<base><suffix>` where the suffix
//! carries the first eight characters of the new session id. Deriving from
//! an already-derived identity strips the old suffix first, so clones of
//! clones stay flat:
//!
//! ```rust
//! use ccsession::identity::clone_agent_id;
//!
//! let once = clone_agent_id("ab12cd34", "019b51bd-0000-7000-8000-000000000000");
//! let twice = clone_agent_id(&once, "019c1234-0000-7000-8000-000000000000");
//! assert_eq!(once, "ab12cd34-clone-019b51bd");
//! assert_eq!(twice, "ab12cd34-clone-019c1234");
//! ```

use crate::error::{Result, SessionError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use uuid::Uuid;

const CLONE_MARKER: &str = "-clone-";

static AGENT_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^agent-((?:[a-z_]+-)?[a-f0-9]+(?:-clone-[a-f0-9]+)?)\.jsonl$")
        .expect("valid agent filename regex")
});

static TITLE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\(clone-[0-9a-fA-F]{8}\)$").expect("valid title suffix regex")
});

static SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex")
});

static TOOL_USE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid tool use id regex")
});

/// A fresh time-ordered (UUID v7) session id.
pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// First eight characters of a session id, used as the clone suffix.
pub fn session_prefix(session_id: &str) -> &str {
    match session_id.char_indices().nth(8) {
        Some((idx, _)) => &session_id[..idx],
        None => session_id,
    }
}

/// Claude Code mints v4 ids; anything else was minted by clone or restore.
pub fn is_native_session(session_id: &str) -> Result<bool> {
    Ok(parse_uuid(session_id)?.get_version_num() == 4)
}

/// When a v7 session id was minted. `None` for non-v7 ids.
pub fn restoration_timestamp(session_id: &str) -> Result<Option<DateTime<Utc>>> {
    let uuid = parse_uuid(session_id)?;
    if uuid.get_version_num() != 7 {
        return Ok(None);
    }
    let bytes = uuid.as_bytes();
    let millis = bytes[..6]
        .iter()
        .fold(0i64, |acc, b| (acc << 8) | i64::from(*b));
    Ok(DateTime::from_timestamp_millis(millis))
}

/// Lowercase words joined by `-`, as in `happy-orbiting-fox`.
pub fn is_slug(slug: &str) -> bool {
    SLUG.is_match(slug)
}

pub fn is_tool_use_id(id: &str) -> bool {
    TOOL_USE_ID.is_match(id)
}

/// A session id must be a UUID; it becomes part of file and directory names.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    parse_uuid(session_id).map(|_| ())
}

/// `<session_id>-agent-<id>.json` with an id that stays inside one file name.
pub fn is_todo_filename(filename: &str, session_id: &str) -> bool {
    filename
        .strip_prefix(session_id)
        .and_then(|rest| rest.strip_prefix("-agent-"))
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(is_tool_use_id)
}

fn parse_uuid(session_id: &str) -> Result<Uuid> {
    Uuid::parse_str(session_id)
        .map_err(|e| SessionError::InvalidIdentity(format!("{}: {}", session_id, e)))
}

/// Agent id or slug with any `-clone-<hex>` suffix removed.
pub fn base_id(id: &str) -> &str {
    match id.find(CLONE_MARKER) {
        Some(idx) => &id[..idx],
        None => id,
    }
}

pub fn clone_agent_id(old: &str, new_session_id: &str) -> String {
    format!("{}{}{}", base_id(old), CLONE_MARKER, session_prefix(new_session_id))
}

pub fn clone_slug(old: &str, new_session_id: &str) -> String {
    clone_agent_id(old, new_session_id)
}

pub fn base_title(title: &str) -> &str {
    match TITLE_SUFFIX.find(title) {
        Some(m) => &title[..m.start()],
        None => title,
    }
}

pub fn clone_title(old: &str, new_session_id: &str) -> String {
    format!("{} (clone-{})", base_title(old), session_prefix(new_session_id))
}

/// The agent id inside `agent-<id>.jsonl`, if the name follows the grammar.
pub fn agent_id_from_filename(filename: &str) -> Option<&str> {
    AGENT_FILENAME
        .captures(filename)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Todo files are `<session>-agent-<agent>.json`; only the session part
/// changes.
pub fn transform_todo_filename(
    filename: &str,
    old_session_id: &str,
    new_session_id: &str,
) -> Result<String> {
    match filename.strip_prefix(old_session_id) {
        Some(rest) => Ok(format!("{}{}", new_session_id, rest)),
        None => Err(SessionError::InvalidIdentity(format!(
            "todo file {} does not start with session id {}",
            filename, old_session_id
        ))),
    }
}

/// Text-level replacement namespaces, in the order they must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Slug,
    AgentId,
}

/// old -> new identities for one clone, restore or archive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMapping {
    pub old_session_id: String,
    pub new_session_id: String,
    pub agents: BTreeMap<String, String>,
    pub slugs: BTreeMap<String, String>,
    /// Rewrite `customTitle` with a clone suffix.
    pub retitle: bool,
}

impl IdentityMapping {
    /// Derive fresh identities for every agent id and slug under
    /// `new_session_id`.
    pub fn derive<'a>(
        old_session_id: &str,
        new_session_id: &str,
        agent_ids: impl IntoIterator<Item = &'a str>,
        slugs: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            old_session_id: old_session_id.to_string(),
            new_session_id: new_session_id.to_string(),
            agents: agent_ids
                .into_iter()
                .map(|a| (a.to_string(), clone_agent_id(a, new_session_id)))
                .collect(),
            slugs: slugs
                .into_iter()
                .map(|s| (s.to_string(), clone_slug(s, new_session_id)))
                .collect(),
            retitle: true,
        }
    }

    /// Keep every identity as-is (in-place restore).
    pub fn unchanged(session_id: &str) -> Self {
        Self {
            old_session_id: session_id.to_string(),
            new_session_id: session_id.to_string(),
            agents: BTreeMap::new(),
            slugs: BTreeMap::new(),
            retitle: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.old_session_id == self.new_session_id
            && self.agents.is_empty()
            && self.slugs.is_empty()
            && !self.retitle
    }

    pub fn new_agent_id(&self, old: &str) -> Option<&str> {
        self.agents.get(old).map(String::as_str)
    }

    /// `agent-<old>.jsonl` -> `agent-<new>.jsonl`. Fails on names outside the
    /// agent grammar or ids with no mapping; an identity mapping passes names
    /// through.
    pub fn agent_filename(&self, filename: &str) -> Result<String> {
        let old = agent_id_from_filename(filename).ok_or_else(|| {
            SessionError::InvalidIdentity(format!("not an agent filename: {}", filename))
        })?;
        if self.agents.is_empty() && self.old_session_id == self.new_session_id {
            return Ok(filename.to_string());
        }
        let new = self.new_agent_id(old).ok_or_else(|| {
            SessionError::InvalidIdentity(format!("agent id not in mapping: {}", old))
        })?;
        Ok(format!("agent-{}.jsonl", new))
    }

    pub fn todo_filename(&self, filename: &str) -> Result<String> {
        transform_todo_filename(filename, &self.old_session_id, &self.new_session_id)
    }

    pub fn passes(&self) -> [(Namespace, &BTreeMap<String, String>); 2] {
        [(Namespace::Slug, &self.slugs), (Namespace::AgentId, &self.agents)]
    }
}

/// Applies an [`IdentityMapping`] to records: field-level `sessionId` and
/// `customTitle` first, then literal text passes, slugs before agent ids.
///
/// Each pass scans the text once, left to right, matching the longest old
/// id at each position, so replacement values are never rescanned.
pub struct Rewriter<'a> {
    mapping: &'a IdentityMapping,
    passes: Vec<(Regex, &'a BTreeMap<String, String>)>,
}

impl<'a> Rewriter<'a> {
    pub fn new(mapping: &'a IdentityMapping) -> Result<Self> {
        let mut passes = Vec::new();
        for (namespace, entries) in mapping.passes() {
            let mut olds: Vec<&str> = entries
                .iter()
                .filter(|(old, new)| !old.is_empty() && old != new)
                .map(|(old, _)| old.as_str())
                .collect();
            if olds.is_empty() {
                continue;
            }
            olds.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
            let alternation = olds
                .iter()
                .map(|old| regex::escape(old))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = Regex::new(&alternation).map_err(|e| {
                SessionError::InvalidIdentity(format!("{:?} mapping: {}", namespace, e))
            })?;
            passes.push((pattern, entries));
        }
        Ok(Self { mapping, passes })
    }

    /// Structured rewrite of one decoded record.
    pub fn rewrite_value(&self, value: &mut Value) {
        let Some(object) = value.as_object_mut() else {
            return;
        };
        let is_title = object.get("type").and_then(Value::as_str) == Some("custom-title");
        if object.contains_key("sessionId") || is_title {
            object.insert(
                "sessionId".to_string(),
                Value::String(self.mapping.new_session_id.clone()),
            );
        }
        if is_title
            && self.mapping.retitle
            && let Some(title) = object.get("customTitle").and_then(Value::as_str)
        {
            let title = clone_title(title, &self.mapping.new_session_id);
            object.insert("customTitle".to_string(), Value::String(title));
        }
    }

    /// Literal find/replace over serialized text.
    pub fn rewrite_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pattern, entries) in &self.passes {
            let replaced = pattern.replace_all(&out, |caps: &regex::Captures<'_>| {
                let old = &caps[0];
                entries.get(old).cloned().unwrap_or_else(|| old.to_string())
            });
            out = replaced.into_owned();
        }
        out
    }

    /// Field rewrite, compact serialization, then the text passes.
    pub fn rewrite_record(&self, value: &Value) -> Result<String> {
        let mut value = value.clone();
        self.rewrite_value(&mut value);
        Ok(self.rewrite_text(&serde_json::to_string(&value)?))
    }
}
