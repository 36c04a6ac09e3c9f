use crate::error::{Result, SessionError};
use crate::index::{ChainIndex, ChainWalk, ParentMap, WalkOutcome};
use crate::paths;
use crate::reader::TranscriptReader;
use crate::types::{Record, Transcript};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Health of one transcript's active chain.
///
/// Ordered from best to worst so a bulk scan can take the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChainStatus {
    Healthy,
    Fixable,
    Unfixable,
    Error,
}

impl ChainStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            ChainStatus::Healthy => 0,
            ChainStatus::Fixable => 1,
            ChainStatus::Unfixable => 2,
            ChainStatus::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainStatus::Healthy => "healthy",
            ChainStatus::Fixable => "fixable",
            ChainStatus::Unfixable => "unfixable",
            ChainStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nearest earlier addressable record an orphan can be re-parented onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewireTarget {
    pub uuid: String,
    pub line: usize,
    pub label: String,
}

/// A record whose `parentUuid` is not in its own file's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub line: usize,
    pub label: String,
    pub uuid: Option<String>,
    pub old_parent: String,
    pub rewire: Option<RewireTarget>,
    /// Agent file holding a record with uuid `old_parent`, if one was found.
    pub source_agent: Option<String>,
    pub on_active_chain: bool,
}

/// A compaction segment that the healthy chain never reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleSegment {
    pub root_line: usize,
    pub root_uuid: String,
    /// Upper bound: the line before the next boundary, or the last line.
    pub deepest_line: usize,
}

#[derive(Debug)]
pub struct IntegrityReport {
    pub path: PathBuf,
    pub session_id: String,
    pub status: ChainStatus,
    /// Set when `status` is [`ChainStatus::Error`].
    pub failure: Option<SessionError>,
    pub total_records: usize,
    pub total_uuids: usize,
    pub orphans: Vec<Orphan>,
    pub chain_steps: usize,
    /// Parent uuid at which the unpatched walk stopped.
    pub chain_break: Option<String>,
    pub tail_line: Option<usize>,
    /// Steps of the simulated walk, when it reaches a root.
    pub patched_steps: Option<usize>,
    pub stale_segments: Vec<StaleSegment>,
    pub duplicate_uuids: BTreeMap<String, usize>,
}

impl IntegrityReport {
    fn failed(path: &Path, error: SessionError) -> Self {
        Self {
            path: path.to_path_buf(),
            session_id: session_id_of(path),
            status: ChainStatus::Error,
            failure: Some(error),
            total_records: 0,
            total_uuids: 0,
            orphans: Vec::new(),
            chain_steps: 0,
            chain_break: None,
            tail_line: None,
            patched_steps: None,
            stale_segments: Vec::new(),
            duplicate_uuids: BTreeMap::new(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    /// `(line, new parent uuid)` for every orphan that has a rewire target.
    pub fn rewires(&self) -> Vec<(usize, String)> {
        self.orphans
            .iter()
            .filter_map(|o| o.rewire.as_ref().map(|t| (o.line, t.uuid.clone())))
            .collect()
    }

    pub fn prompt_suggestion_count(&self) -> usize {
        self.orphans
            .iter()
            .filter(|o| {
                o.source_agent
                    .as_deref()
                    .is_some_and(|a| a.contains("prompt_suggestion"))
            })
            .count()
    }

    pub fn other_agent_count(&self) -> usize {
        self.orphans
            .iter()
            .filter(|o| {
                o.source_agent
                    .as_deref()
                    .is_some_and(|a| !a.contains("prompt_suggestion"))
            })
            .count()
    }

    pub fn duplicate_uuid_orphan_count(&self) -> usize {
        self.orphans
            .iter()
            .filter(|o| self.duplicate_uuids.contains_key(&o.old_parent))
            .count()
    }

    pub fn unattributed_count(&self) -> usize {
        self.orphans
            .iter()
            .filter(|o| {
                o.source_agent.is_none() && !self.duplicate_uuids.contains_key(&o.old_parent)
            })
            .count()
    }

    /// Human summary of orphan causes, e.g. `2 prompt_suggestion, 1 unattributed`.
    pub fn cause_summary(&self) -> String {
        let counts = [
            (self.duplicate_uuid_orphan_count(), "duplicate_uuid"),
            (self.prompt_suggestion_count(), "prompt_suggestion"),
            (self.other_agent_count(), "other agent"),
            (self.unattributed_count(), "unattributed"),
        ];
        counts
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, cause)| format!("{} {}", n, cause))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct ChainAnalyzer;

impl ChainAnalyzer {
    /// Classify a transcript. Never fails: read and structure problems come
    /// back as a report with [`ChainStatus::Error`].
    pub fn analyze<P: AsRef<Path>>(path: P) -> IntegrityReport {
        let path = path.as_ref();
        match Self::try_analyze(path) {
            Ok(report) => {
                tracing::debug!(
                    path = %path.display(),
                    status = %report.status,
                    orphans = report.orphans.len(),
                    "analyzed session"
                );
                report
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "analysis failed");
                IntegrityReport::failed(path, e)
            }
        }
    }

    fn try_analyze(path: &Path) -> Result<IntegrityReport> {
        let transcript = TranscriptReader::read(path)?;
        if transcript.is_empty() {
            return Err(SessionError::structure(path, "empty file"));
        }

        let index = ChainIndex::build(&transcript);
        let mut orphans = find_orphans(&transcript, &index);

        let dangling: HashSet<String> = orphans.iter().map(|o| o.old_parent.clone()).collect();
        let attribution = attribute_orphans(path, &transcript.session_id, &dangling);
        for orphan in &mut orphans {
            orphan.source_agent = attribution.get(&orphan.old_parent).cloned();
        }

        let (tail_position, tail_uuid) = find_tail(&transcript)
            .ok_or_else(|| SessionError::structure(path, "no records with uuid"))?;

        let parents = ParentMap::build(&transcript, &index);
        let walk = ChainWalk::from_tail(tail_uuid, &parents);
        for orphan in &mut orphans {
            orphan.on_active_chain = orphan
                .uuid
                .as_ref()
                .is_some_and(|u| walk.visited.contains(u));
        }

        let mut report = IntegrityReport {
            path: path.to_path_buf(),
            session_id: transcript.session_id.clone(),
            status: ChainStatus::Healthy,
            failure: None,
            total_records: transcript.record_count(),
            total_uuids: index.len(),
            orphans,
            chain_steps: walk.steps,
            chain_break: None,
            tail_line: Some(tail_position + 1),
            patched_steps: None,
            stale_segments: Vec::new(),
            duplicate_uuids: index.duplicates().clone(),
        };

        if walk.reached_root() {
            report.stale_segments = find_stale_segments(&transcript, &index, &walk.visited);
            return Ok(report);
        }

        report.chain_break = match walk.outcome {
            WalkOutcome::Broken { at } | WalkOutcome::Cycle { at } => Some(at),
            WalkOutcome::Root => None,
        };

        let overrides: Vec<(String, String)> = report
            .orphans
            .iter()
            .filter_map(|o| match (&o.uuid, &o.rewire) {
                (Some(uuid), Some(target)) => Some((uuid.clone(), target.uuid.clone())),
                _ => None,
            })
            .collect();
        let patched = ChainWalk::from_tail(tail_uuid, &parents.with_override(&overrides));
        if patched.reached_root() {
            report.status = ChainStatus::Fixable;
            report.patched_steps = Some(patched.steps);
        } else {
            report.status = ChainStatus::Unfixable;
        }
        Ok(report)
    }
}

fn session_id_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn find_orphans(transcript: &Transcript, index: &ChainIndex) -> Vec<Orphan> {
    let mut orphans = Vec::new();
    for (position, line) in transcript.lines.iter().enumerate() {
        let Some(record) = line.record() else {
            continue;
        };
        let Some(parent) = record.parent_uuid() else {
            continue;
        };
        if index.contains(parent) {
            continue;
        }
        orphans.push(Orphan {
            line: record.line_number(),
            label: record.label(),
            uuid: record.uuid().map(str::to_string),
            old_parent: parent.to_string(),
            rewire: rewire_target(transcript, index, position),
            source_agent: None,
            on_active_chain: false,
        });
    }
    orphans
}

/// Scan backward from `position` for the nearest record whose uuid is
/// addressable.
fn rewire_target(
    transcript: &Transcript,
    index: &ChainIndex,
    position: usize,
) -> Option<RewireTarget> {
    transcript.lines[..position]
        .iter()
        .rev()
        .filter_map(|line| line.record())
        .find_map(|record: &Record| {
            let uuid = record.uuid()?;
            index.contains(uuid).then(|| RewireTarget {
                uuid: uuid.to_string(),
                line: record.line_number(),
                label: record.label(),
            })
        })
}

/// Last record bearing a uuid, as `(position, uuid)`.
fn find_tail(transcript: &Transcript) -> Option<(usize, &str)> {
    transcript
        .lines
        .iter()
        .enumerate()
        .rev()
        .find_map(|(position, line)| line.record()?.uuid().map(|u| (position, u)))
}

fn find_stale_segments(
    transcript: &Transcript,
    index: &ChainIndex,
    chain: &HashSet<String>,
) -> Vec<StaleSegment> {
    let chain_min = chain.iter().filter_map(|u| index.resolve(u)).min().unwrap_or(0);

    let boundaries: Vec<(usize, &str)> = transcript
        .lines
        .iter()
        .enumerate()
        .filter_map(|(position, line)| {
            let record = line.record()?;
            if !record.is_compact_boundary() {
                return None;
            }
            record.uuid().map(|u| (position, u))
        })
        .collect();

    let mut segments = Vec::new();
    for (i, &(position, uuid)) in boundaries.iter().enumerate() {
        if chain.contains(uuid) || position <= chain_min {
            continue;
        }
        let deepest_line = match boundaries.get(i + 1) {
            Some(&(next, _)) => next,
            None => transcript.lines.len(),
        };
        segments.push(StaleSegment {
            root_line: position + 1,
            root_uuid: uuid.to_string(),
            deepest_line,
        });
    }
    segments
}

/// Map each dangling parent uuid to the agent file that defines it.
///
/// Candidates are searched nested `subagents/` files first, then flat clone
/// agents for this session, then every flat agent file in the project.
fn attribute_orphans(
    path: &Path,
    session_id: &str,
    dangling: &HashSet<String>,
) -> HashMap<String, String> {
    let mut attribution = HashMap::new();
    if dangling.is_empty() {
        return attribution;
    }
    let Some(project_dir) = path.parent() else {
        return attribution;
    };

    let prefix: String = session_id.chars().take(8).collect();
    let clone_marker = format!("-clone-{}", prefix);
    let mut candidates = agent_files_in(&paths::subagents_dir(project_dir, session_id));
    let flat = agent_files_in(project_dir);
    candidates.extend(flat.iter().filter(|p| file_name(p).contains(&clone_marker)).cloned());
    candidates.extend(flat);

    let mut remaining: HashSet<&str> = dangling.iter().map(String::as_str).collect();
    for candidate in candidates {
        if remaining.is_empty() {
            break;
        }
        let file = match fs::File::open(&candidate) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(
                    path = %candidate.display(),
                    error = %e,
                    "skipping unreadable agent file"
                );
                continue;
            }
        };
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            let Ok(value) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if let Some(uuid) = value.get("uuid").and_then(Value::as_str)
                && remaining.remove(uuid)
            {
                attribution.insert(uuid.to_string(), file_name(&candidate));
                if remaining.is_empty() {
                    break;
                }
            }
        }
    }
    attribution
}

fn agent_files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = file_name(p);
            p.is_file() && name.starts_with("agent-") && name.ends_with(".jsonl")
        })
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SID: &str = "5f3c9a10-1111-4222-8333-444455556666";

    fn setup_session(lines: &[&str]) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("projects/-p");
        fs::create_dir_all(&project).unwrap();
        let path = project.join(format!("{}.jsonl", SID));
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&path, content).unwrap();
        (temp, path)
    }

    #[test]
    fn test_orphan_off_active_chain_is_healthy() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1"}"#,
            r#"{"type":"assistant","uuid":"r2","parentUuid":"r1"}"#,
            r#"{"type":"system","subtype":"turn_duration","uuid":"r3","parentUuid":"X"}"#,
            r#"{"type":"user","uuid":"r4","parentUuid":"r2"}"#,
            r#"{"type":"assistant","uuid":"r5","parentUuid":"r4"}"#,
        ]);
        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(report.status, ChainStatus::Healthy);
        assert_eq!(report.orphans.len(), 1);
        let orphan = &report.orphans[0];
        assert_eq!(orphan.line, 3);
        assert_eq!(orphan.label, "system/turn_duration");
        assert!(!orphan.on_active_chain);
        assert_eq!(orphan.source_agent, None);
        assert_eq!(report.chain_steps, 4);
        assert_eq!(report.tail_line, Some(5));
    }

    #[test]
    fn test_orphan_on_chain_is_fixable() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1"}"#,
            r#"{"type":"assistant","uuid":"r2","parentUuid":"r1"}"#,
            r#"{"type":"system","uuid":"r3","parentUuid":"X"}"#,
            r#"{"type":"user","uuid":"r4","parentUuid":"r2"}"#,
            r#"{"type":"assistant","uuid":"r5","parentUuid":"r3"}"#,
        ]);
        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(report.status, ChainStatus::Fixable);
        assert_eq!(report.chain_break.as_deref(), Some("X"));
        let target = report.orphans[0].rewire.as_ref().unwrap();
        assert_eq!(target.uuid, "r2");
        assert_eq!(target.line, 2);
        assert!(report.orphans[0].on_active_chain);
        assert_eq!(report.patched_steps, Some(4));
        assert_eq!(report.rewires(), vec![(3, "r2".to_string())]);
    }

    #[test]
    fn test_first_record_orphan_is_unfixable() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1","parentUuid":"X"}"#,
            r#"{"type":"assistant","uuid":"r2","parentUuid":"r1"}"#,
        ]);
        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(report.status, ChainStatus::Unfixable);
        assert!(report.orphans[0].rewire.is_none());
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_rewire_skips_blank_and_unaddressable_lines() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1"}"#,
            r#"{"type":"summary","summary":"s"}"#,
            "",
            r#"{"type":"assistant","uuid":"r3","parentUuid":"X"}"#,
        ]);
        let report = ChainAnalyzer::analyze(&path);
        let target = report.orphans[0].rewire.as_ref().unwrap();
        assert_eq!(target.line, 1);
        assert_eq!(report.orphans[0].line, 4);
    }

    #[test]
    fn test_duplicate_uuids_become_orphans() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1"}"#,
            r#"{"type":"system","uuid":"dup","parentUuid":"r1"}"#,
            r#"{"type":"assistant","uuid":"r2","parentUuid":"r1"}"#,
            r#"{"type":"system","uuid":"dup","parentUuid":"r2"}"#,
            r#"{"type":"user","uuid":"r3","parentUuid":"dup"}"#,
        ]);
        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(report.duplicate_uuids.get("dup"), Some(&2));
        assert_eq!(report.status, ChainStatus::Fixable);
        assert_eq!(report.duplicate_uuid_orphan_count(), 1);
        assert_eq!(report.orphans[0].rewire.as_ref().unwrap().uuid, "r2");
        assert_eq!(report.cause_summary(), "1 duplicate_uuid");
    }

    #[test]
    fn test_attribution_prefers_nested_subagents() {
        let (temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1"}"#,
            r#"{"type":"system","uuid":"r2","parentUuid":"agent-uuid"}"#,
            r#"{"type":"system","uuid":"r3","parentUuid":"flat-uuid"}"#,
        ]);
        let project = temp.path().join("projects/-p");
        let nested = paths::subagents_dir(&project, SID);
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            nested.join("agent-aprompt_suggestion-1a2b3c.jsonl"),
            "{\"uuid\":\"agent-uuid\"}\n",
        )
        .unwrap();
        fs::write(project.join("agent-9f8e7d.jsonl"), "{\"uuid\":\"flat-uuid\"}\n").unwrap();

        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(
            report.orphans[0].source_agent.as_deref(),
            Some("agent-aprompt_suggestion-1a2b3c.jsonl")
        );
        assert_eq!(report.orphans[1].source_agent.as_deref(), Some("agent-9f8e7d.jsonl"));
        assert_eq!(report.prompt_suggestion_count(), 1);
        assert_eq!(report.other_agent_count(), 1);
        assert_eq!(report.unattributed_count(), 0);
    }

    #[test]
    fn test_cycle_is_not_healthy() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"a","parentUuid":"b"}"#,
            r#"{"type":"user","uuid":"b","parentUuid":"a"}"#,
        ]);
        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(report.status, ChainStatus::Unfixable);
        assert_eq!(report.chain_break.as_deref(), Some("b"));
    }

    #[test]
    fn test_stale_segment_is_diagnostic_only() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1"}"#,
            r#"{"type":"system","subtype":"compact_boundary","uuid":"cb1"}"#,
            r#"{"type":"user","uuid":"r3","parentUuid":"cb1"}"#,
            r#"{"type":"assistant","uuid":"r4","parentUuid":"r1"}"#,
        ]);
        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(report.status, ChainStatus::Healthy);
        assert_eq!(
            report.stale_segments,
            vec![StaleSegment {
                root_line: 2,
                root_uuid: "cb1".into(),
                deepest_line: 4,
            }]
        );
    }

    #[test]
    fn test_error_cases() {
        let (_temp, path) = setup_session(&[r#"{"type":"summary"}"#]);
        let report = ChainAnalyzer::analyze(&path);
        assert_eq!(report.status, ChainStatus::Error);
        assert!(matches!(report.failure, Some(SessionError::Structure { .. })));

        let (_temp, path) = setup_session(&[r#"{"uuid":"a"}"#, "{oops"]);
        let report = ChainAnalyzer::analyze(&path);
        assert!(matches!(report.failure, Some(SessionError::Parse { line: 2, .. })));
        assert_eq!(report.exit_code(), 3);

        let temp = TempDir::new().unwrap();
        let empty = temp.path().join("e.jsonl");
        fs::write(&empty, "").unwrap();
        assert_eq!(ChainAnalyzer::analyze(&empty).status, ChainStatus::Error);
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let (_temp, path) = setup_session(&[
            r#"{"type":"user","uuid":"r1"}"#,
            r#"{"type":"system","uuid":"r2","parentUuid":"X"}"#,
            r#"{"type":"system","uuid":"r3","parentUuid":"Y"}"#,
            r#"{"type":"user","uuid":"r4","parentUuid":"r3"}"#,
        ]);
        let first = ChainAnalyzer::analyze(&path);
        let second = ChainAnalyzer::analyze(&path);
        assert_eq!(first.status, second.status);
        assert_eq!(first.orphans, second.orphans);
    }

    #[test]
    fn test_status_ordering() {
        let worst = [ChainStatus::Fixable, ChainStatus::Healthy, ChainStatus::Unfixable]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, ChainStatus::Unfixable);
        assert!(ChainStatus::Error > ChainStatus::Unfixable);
    }
}
