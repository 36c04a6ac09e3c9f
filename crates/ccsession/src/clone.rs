use crate::artifacts;
use crate::config::Config;
use crate::discovery::SessionFinder;
use crate::error::Result;
use crate::identity;
use crate::lineage::{LineageEntry, LineageMethod, LineageRecord, LineageStore};
use crate::snapshot::{self, Carry, SessionSnapshot};
use crate::translate::PathTranslator;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Project the clone lands in; defaults to the source project.
    pub target_project: Option<PathBuf>,
    /// Rewrite paths under the source project to the target project.
    pub translate_paths: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            target_project: None,
            translate_paths: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloneOutcome {
    pub source_session_id: String,
    pub new_session_id: String,
    pub transcript: PathBuf,
    pub files_written: usize,
    pub agents: usize,
    pub paths_translated: bool,
    pub lineage: LineageEntry,
}

/// Copies a session under a fresh identity. Task state is not carried; the
/// clone starts with an empty task list.
pub struct SessionCloner<'a> {
    config: &'a Config,
}

impl<'a> SessionCloner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn clone_session(
        &self,
        id_or_prefix: &str,
        options: &CloneOptions,
    ) -> Result<CloneOutcome> {
        self.clone_as(id_or_prefix, options, identity::new_session_id())
    }

    fn clone_as(
        &self,
        id_or_prefix: &str,
        options: &CloneOptions,
        new_session_id: String,
    ) -> Result<CloneOutcome> {
        let resolver = self.config.resolver();
        let finder = SessionFinder::new(self.config);
        let location = finder.find(id_or_prefix)?;
        artifacts::validate_session_env_empty(&resolver.session_env_dir(&location.session_id)?)?;

        let snapshot = SessionSnapshot::capture(&finder, resolver, &location)?;
        let mapping = snapshot.derive_mapping(&new_session_id)?;

        let target = options
            .target_project
            .clone()
            .unwrap_or_else(|| snapshot.project_path.clone());
        let translator = if options.translate_paths {
            PathTranslator::between(&snapshot.project_path, &target)
        } else {
            None
        };

        let written = snapshot::materialize(
            &snapshot,
            &mapping,
            translator.as_ref(),
            resolver,
            &target,
            Carry {
                plans: true,
                tasks: false,
            },
        )?;

        let lineage = LineageStore::new(self.config.lineage_file()?).record(LineageRecord {
            child_session_id: new_session_id.clone(),
            parent_session_id: snapshot.session_id.clone(),
            method: LineageMethod::Clone,
            parent_project_path: snapshot.project_path.clone(),
            target_project_path: target,
            parent_machine_id: None,
            paths_translated: translator.is_some(),
            archive_path: None,
        })?;

        Ok(CloneOutcome {
            source_session_id: snapshot.session_id,
            new_session_id,
            transcript: written.transcript,
            files_written: written.written.len(),
            agents: snapshot.agents.len(),
            paths_translated: translator.is_some(),
            lineage,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::error::SessionError;
    use crate::paths;
    use crate::reader::TranscriptReader;
    use std::fs;
    use std::path::Path;

    #[test]
    fn test_clone_rewrites_every_identity() {
        let tree = setup_session();
        let outcome = SessionCloner::new(&tree.config)
            .clone_session("5f3c", &CloneOptions::default())
            .unwrap();
        let new = &outcome.new_session_id;
        let prefix = identity::session_prefix(new);
        assert!(!identity::is_native_session(new).unwrap());
        assert_eq!(outcome.agents, 2);
        assert!(!outcome.paths_translated);

        let project = tree.project_dir();
        let new_agent = format!("{AGENT}-clone-{prefix}");
        let new_slug = format!("{SLUG}-clone-{prefix}");
        let new_nested = format!("{NESTED_AGENT}-clone-{prefix}");

        let main = fs::read_to_string(paths::transcript_file(&project, new)).unwrap();
        assert!(!main.contains(SID));
        assert_eq!(main.matches(AGENT).count(), main.matches(&new_agent).count());
        assert_eq!(main.matches(SLUG).count(), main.matches(&new_slug).count());
        assert!(main.contains(&format!(r#""customTitle":"Auth Feature (clone-{prefix})""#)));

        let records =
            TranscriptReader::read_records(paths::transcript_file(&project, new)).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.session_id() == Some(new.as_str())));
        assert_eq!(records[0].uuid(), Some("u1"));
        assert_eq!(records[1].parent_uuid(), Some("u1"));

        let flat = fs::read_to_string(project.join(format!("agent-{new_agent}.jsonl"))).unwrap();
        assert!(flat.contains(&new_slug));
        let nested = paths::subagents_dir(&project, new).join(format!("agent-{new_nested}.jsonl"));
        assert!(nested.exists());

        let claude = tree.claude();
        assert_eq!(
            fs::read_to_string(claude.join("plans").join(format!("{new_slug}.md"))).unwrap(),
            "# Plan"
        );
        assert!(claude.join("todos").join(format!("{new}-agent-{SID}.json")).exists());
        assert!(paths::tool_results_dir(&project, new).join("toolu_01.txt").exists());
        assert!(claude.join("session-env").join(new).is_dir());
        assert!(!claude.join("tasks").join(new).exists());

        // Source untouched.
        assert!(paths::transcript_file(&project, SID).exists());
        assert!(claude.join("plans").join(format!("{SLUG}.md")).exists());

        assert_eq!(outcome.lineage.parent_session_id, SID);
        assert_eq!(outcome.lineage.method, crate::lineage::LineageMethod::Clone);
    }

    const FIRST: &str = "019b51bd-7a3c-7def-8123-456789abcdef";
    const SECOND: &str = "019c1234-0000-7000-8000-000000000000";

    #[test]
    fn test_clone_of_clone_stays_flat() {
        let tree = setup_session();
        let cloner = SessionCloner::new(&tree.config);
        let options = CloneOptions::default();
        let first = cloner.clone_as(SID, &options, FIRST.to_string()).unwrap();
        let second = cloner.clone_as(FIRST, &options, SECOND.to_string()).unwrap();
        let main = fs::read_to_string(&second.transcript).unwrap();
        assert!(main.contains(&format!(r#""slug":"{SLUG}-clone-019c1234""#)));
        assert!(main.contains(&format!("agent-{AGENT}-clone-019c1234.jsonl")));
        assert!(main.contains("(clone-019c1234)"));
        assert!(!main.contains("019b51bd"));

        let store = LineageStore::new(tree.config.lineage_file().unwrap());
        assert_eq!(
            store.ancestry(&second.new_session_id).unwrap(),
            vec![SID.to_string(), first.new_session_id.clone(), second.new_session_id.clone()]
        );
    }

    #[test]
    fn test_clone_collision_writes_nothing() {
        let tree = setup_session();
        let cloner = SessionCloner::new(&tree.config);
        let options = CloneOptions::default();
        cloner.clone_as(SID, &options, FIRST.to_string()).unwrap();
        // Same eight-character prefix, so every derived name is taken.
        let again = "019b51bd-ffff-7fff-8fff-ffffffffffff";
        match cloner.clone_as(SID, &options, again.to_string()) {
            Err(SessionError::Collision { paths }) => assert!(!paths.is_empty()),
            other => panic!("expected a collision, got {other:?}"),
        }
        let project = tree.project_dir();
        assert!(!paths::transcript_file(&project, again).exists());
        assert!(!paths::tool_results_dir(&project, again).exists());
        assert!(!tree.claude().join("session-env").join(again).exists());
        let store = LineageStore::new(tree.config.lineage_file().unwrap());
        assert!(store.entry(again).unwrap().is_none());
    }

    #[test]
    fn test_clone_translates_paths() {
        let tree = setup_session();
        let options = CloneOptions {
            target_project: Some(PathBuf::from("/home/sam/proj")),
            translate_paths: true,
        };
        let outcome = SessionCloner::new(&tree.config)
            .clone_session(SID, &options)
            .unwrap();
        assert!(outcome.paths_translated);
        assert!(outcome.transcript.starts_with(
            tree.config.resolver().project_dir(Path::new("/home/sam/proj")).unwrap()
        ));
        let records = TranscriptReader::read_records(&outcome.transcript).unwrap();
        assert_eq!(records[0].cwd(), Some("/home/sam/proj"));
        assert_eq!(
            records[1].value()["message"]["content"][0]["input"]["file_path"],
            "/home/sam/proj/src/lib.rs"
        );
        assert!(outcome.lineage.paths_translated);
    }

    #[test]
    fn test_clone_refuses_non_empty_session_env() {
        let tree = setup_session();
        let env = tree.claude().join("session-env").join(SID);
        fs::create_dir_all(&env).unwrap();
        fs::write(env.join("vars"), "X=1").unwrap();
        assert!(matches!(
            SessionCloner::new(&tree.config).clone_session(SID, &CloneOptions::default()),
            Err(SessionError::UnexpectedArtifacts { .. })
        ));
    }

    #[test]
    fn test_clone_requires_cwd() {
        let tree = setup_session();
        let main = paths::transcript_file(&tree.project_dir(), SID);
        let record = format!(r#"{{"type":"user","uuid":"u1","sessionId":"{SID}"}}"#);
        fs::write(&main, record + "\n").unwrap();
        assert!(matches!(
            SessionCloner::new(&tree.config).clone_session(SID, &CloneOptions::default()),
            Err(SessionError::MissingCwd)
        ));
    }
}
