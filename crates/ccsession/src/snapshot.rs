//! In-memory copy of everything a session owns, and the single write path
//! that lays a copy down under a (possibly new) identity.
//!
//! Clone captures a snapshot from disk; unarchive rebuilds one from an
//! archive. Both end in [`materialize`].

use crate::artifacts::{self, RelocationPlan, TaskFiles};
use crate::discovery::{SessionFinder, SessionLocation};
use crate::error::{Result, SessionError};
use crate::identity::{self, IdentityMapping, Rewriter, agent_id_from_filename};
use crate::paths::{self, PathResolver};
use crate::reader::TranscriptReader;
use crate::translate::PathTranslator;
use crate::types::Record;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// One JSONL file of the session, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFile {
    pub filename: String,
    pub nested: bool,
    pub records: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    /// Real project path, from the first `cwd` in the main transcript.
    pub project_path: PathBuf,
    pub version: Option<String>,
    pub main: Vec<Value>,
    pub agents: Vec<SessionFile>,
    pub plans: BTreeMap<String, String>,
    pub todos: BTreeMap<String, String>,
    pub tool_results: BTreeMap<String, String>,
    pub tasks: TaskFiles,
}

impl SessionSnapshot {
    /// Read a session and all of its artifacts. Task files are included;
    /// callers decide whether to carry them.
    pub fn capture(
        finder: &SessionFinder<'_>,
        resolver: &PathResolver,
        location: &SessionLocation,
    ) -> Result<Self> {
        let main_records = TranscriptReader::read_records(&location.path)?;
        let mut agents = Vec::new();
        for agent in finder.agent_files(&location.project_dir, &location.session_id)? {
            let records = TranscriptReader::read_records(&agent.path)?;
            agents.push(SessionFile {
                filename: agent.filename(),
                nested: agent.nested,
                records: records.into_iter().map(Record::into_value).collect(),
            });
        }

        let project_path = main_records
            .iter()
            .find_map(Record::cwd)
            .map(PathBuf::from)
            .ok_or(SessionError::MissingCwd)?;
        let version = main_records
            .iter()
            .find_map(Record::version)
            .map(str::to_string);

        let mut snapshot = Self {
            session_id: location.session_id.clone(),
            project_path,
            version,
            main: main_records.into_iter().map(Record::into_value).collect(),
            agents,
            plans: BTreeMap::new(),
            todos: artifacts::collect_todos(&resolver.todos_dir()?, &location.session_id)?,
            tool_results: artifacts::collect_tool_results(
                &location.project_dir,
                &location.session_id,
            )?,
            tasks: artifacts::collect_tasks(&resolver.tasks_dir(&location.session_id)?)?,
        };
        let slugs = snapshot.slugs();
        snapshot.plans = artifacts::collect_plan_files(
            &resolver.plans_dir()?,
            slugs.iter().map(String::as_str),
        )?;
        tracing::debug!(
            session_id = %snapshot.session_id,
            agents = snapshot.agents.len(),
            plans = snapshot.plans.len(),
            todos = snapshot.todos.len(),
            tool_results = snapshot.tool_results.len(),
            "session captured"
        );
        Ok(snapshot)
    }

    pub fn main_filename(&self) -> String {
        format!("{}.jsonl", self.session_id)
    }

    fn all_records(&self) -> impl Iterator<Item = &Value> {
        self.main
            .iter()
            .chain(self.agents.iter().flat_map(|a| a.records.iter()))
    }

    /// Every `slug` value across the main transcript and agent files. Values
    /// that are not slug-shaped never name a plan file and are ignored.
    pub fn slugs(&self) -> BTreeSet<String> {
        self.all_records()
            .filter_map(|r| r.get("slug").and_then(Value::as_str))
            .filter(|s| identity::is_slug(s))
            .map(str::to_string)
            .collect()
    }

    /// Agent ids from the agent filenames. Names outside the agent grammar
    /// are an error.
    pub fn agent_ids(&self) -> Result<Vec<String>> {
        self.agents
            .iter()
            .map(|a| {
                agent_id_from_filename(&a.filename)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        SessionError::InvalidIdentity(format!(
                            "not an agent filename: {}",
                            a.filename
                        ))
                    })
            })
            .collect()
    }

    /// Last `customTitle` set in the main transcript.
    pub fn custom_title(&self) -> Option<&str> {
        self.main
            .iter()
            .rev()
            .filter(|r| r.get("type").and_then(Value::as_str) == Some("custom-title"))
            .find_map(|r| r.get("customTitle").and_then(Value::as_str))
    }

    pub fn record_count(&self) -> usize {
        self.all_records().count()
    }

    /// Fresh identities for the session, its agents and its slugs.
    pub fn derive_mapping(&self, new_session_id: &str) -> Result<IdentityMapping> {
        let agent_ids = self.agent_ids()?;
        let slugs = self.slugs();
        Ok(IdentityMapping::derive(
            &self.session_id,
            new_session_id,
            agent_ids.iter().map(String::as_str),
            slugs.iter().map(String::as_str),
        ))
    }
}

/// Which artifact groups [`materialize`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Carry {
    pub plans: bool,
    pub tasks: bool,
}

#[derive(Debug, Clone)]
pub struct Materialized {
    pub session_id: String,
    pub project_dir: PathBuf,
    pub transcript: PathBuf,
    pub written: Vec<PathBuf>,
}

/// Rewrite and write a snapshot under `mapping` into the project folder of
/// `target_project`. Every destination is collision-checked before the
/// first write.
pub fn materialize(
    snapshot: &SessionSnapshot,
    mapping: &IdentityMapping,
    translator: Option<&PathTranslator>,
    resolver: &PathResolver,
    target_project: &Path,
    carry: Carry,
) -> Result<Materialized> {
    let rewriter = Rewriter::new(mapping)?;
    let new_id = &mapping.new_session_id;
    let project_dir = resolver.project_dir(target_project)?;
    let mut plan = RelocationPlan::new();

    if carry.plans {
        let plans_dir = resolver.plans_dir()?;
        for (slug, content) in &snapshot.plans {
            let new_slug = mapping.slugs.get(slug).unwrap_or(slug);
            plan.write(plans_dir.join(format!("{}.md", new_slug)), content.as_bytes());
        }
    }

    let results_dir = paths::tool_results_dir(&project_dir, new_id);
    for (id, content) in &snapshot.tool_results {
        plan.write(results_dir.join(format!("{}.txt", id)), content.as_bytes());
    }

    let todos_dir = resolver.todos_dir()?;
    for (name, content) in &snapshot.todos {
        plan.write(todos_dir.join(mapping.todo_filename(name)?), content.as_bytes());
    }

    if carry.tasks {
        let tasks_dir = resolver.tasks_dir(new_id)?;
        for (name, content) in snapshot.tasks.tasks.iter().chain(&snapshot.tasks.metadata) {
            plan.write(tasks_dir.join(name), content.as_bytes());
        }
    }

    plan.ensure_dir(resolver.session_env_dir(new_id)?);

    let transcript = paths::transcript_file(&project_dir, new_id);
    plan.write(&transcript, render(&snapshot.main, &rewriter, translator)?);

    let subagents = paths::subagents_dir(&project_dir, new_id);
    for agent in &snapshot.agents {
        let name = mapping.agent_filename(&agent.filename)?;
        let dest = if agent.nested {
            subagents.join(name)
        } else {
            project_dir.join(name)
        };
        plan.write(dest, render(&agent.records, &rewriter, translator)?);
    }

    let written = plan.commit()?;
    tracing::info!(
        from = %snapshot.session_id,
        to = %new_id,
        files = written.len(),
        project = %project_dir.display(),
        "session written"
    );
    Ok(Materialized {
        session_id: new_id.clone(),
        project_dir,
        transcript,
        written,
    })
}

/// Records as compact JSONL, paths translated before the identity passes.
fn render(
    records: &[Value],
    rewriter: &Rewriter<'_>,
    translator: Option<&PathTranslator>,
) -> Result<Vec<u8>> {
    let mut out = String::new();
    for record in records {
        let line = match translator {
            Some(translator) => {
                let mut record = record.clone();
                translator.translate_value(&mut record);
                rewriter.rewrite_record(&record)?
            }
            None => rewriter.rewrite_record(record)?,
        };
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            session_id: "s-old".to_string(),
            project_path: PathBuf::from("/Users/alex/proj"),
            version: Some("2.0.37".to_string()),
            main: vec![
                json!({
                    "type": "user",
                    "uuid": "u1",
                    "sessionId": "s-old",
                    "slug": "happy-orbiting-fox",
                    "cwd": "/Users/alex/proj"
                }),
                json!({"type": "custom-title", "customTitle": "First"}),
                json!({"type": "custom-title", "customTitle": "Second"}),
            ],
            agents: vec![SessionFile {
                filename: "agent-ab12cd34.jsonl".to_string(),
                nested: true,
                records: vec![
                    json!({"type": "user", "sessionId": "s-old", "slug": "quiet-river-otter"}),
                    json!({"type": "user", "sessionId": "s-old", "slug": "../../etc/passwd"}),
                ],
            }],
            plans: BTreeMap::new(),
            todos: BTreeMap::new(),
            tool_results: BTreeMap::new(),
            tasks: TaskFiles::default(),
        }
    }

    #[test]
    fn test_slugs_span_all_files() {
        let slugs: Vec<String> = snapshot().slugs().into_iter().collect();
        assert_eq!(slugs, vec!["happy-orbiting-fox", "quiet-river-otter"]);
    }

    #[test]
    fn test_last_custom_title_wins() {
        assert_eq!(snapshot().custom_title(), Some("Second"));
    }

    #[test]
    fn test_agent_ids_require_grammar() {
        let mut snap = snapshot();
        assert_eq!(snap.agent_ids().unwrap(), vec!["ab12cd34"]);
        snap.agents[0].filename = "agent-NOPE.jsonl".to_string();
        assert!(matches!(snap.agent_ids(), Err(SessionError::InvalidIdentity(_))));
    }

    #[test]
    fn test_render_translates_then_rewrites() {
        let snap = snapshot();
        let mapping = snap.derive_mapping("019b51bd-7a3c-7def-8123-456789abcdef").unwrap();
        let rewriter = Rewriter::new(&mapping).unwrap();
        let translator = PathTranslator::between("/Users/alex/proj", "/srv/proj").unwrap();
        let bytes = render(&snap.main[..1], &rewriter, Some(&translator)).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with('\n'));
        let value: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["cwd"], "/srv/proj");
        assert_eq!(value["slug"], "happy-orbiting-fox-clone-019b51bd");
        assert_eq!(value["sessionId"], "019b51bd-7a3c-7def-8123-456789abcdef");
    }
}
