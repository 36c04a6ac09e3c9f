use crate::types::Transcript;
use std::collections::{BTreeMap, HashMap, HashSet};

/// `uuid -> position` over a transcript's addressable records.
///
/// Positions are 0-based indices into [`Transcript::lines`]. A uuid that
/// appears on more than one line is left out and reported through
/// [`ChainIndex::duplicates`].
#[derive(Debug, Clone, Default)]
pub struct ChainIndex {
    positions: HashMap<String, usize>,
    duplicates: BTreeMap<String, usize>,
}

impl ChainIndex {
    pub fn build(transcript: &Transcript) -> Self {
        let mut seen: HashMap<&str, (usize, usize)> = HashMap::new();
        for (position, line) in transcript.lines.iter().enumerate() {
            if let Some(uuid) = line.record().and_then(|r| r.uuid()) {
                seen.entry(uuid)
                    .and_modify(|(_, count)| *count += 1)
                    .or_insert((position, 1));
            }
        }

        let mut positions = HashMap::with_capacity(seen.len());
        let mut duplicates = BTreeMap::new();
        for (uuid, (position, count)) in seen {
            if count > 1 {
                duplicates.insert(uuid.to_string(), count);
            } else {
                positions.insert(uuid.to_string(), position);
            }
        }
        Self {
            positions,
            duplicates,
        }
    }

    pub fn resolve(&self, uuid: &str) -> Option<usize> {
        self.positions.get(uuid).copied()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.positions.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Uuids seen on more than one line, with their occurrence count.
    pub fn duplicates(&self) -> &BTreeMap<String, usize> {
        &self.duplicates
    }
}

/// `uuid -> parent_uuid` for every addressable record, with optional
/// overrides used to simulate a rewire before touching the file.
#[derive(Debug, Clone, Default)]
pub struct ParentMap {
    parents: HashMap<String, Option<String>>,
}

impl ParentMap {
    pub fn build(transcript: &Transcript, index: &ChainIndex) -> Self {
        let mut parents = HashMap::with_capacity(index.len());
        for record in transcript.records() {
            if let Some(uuid) = record.uuid()
                && index.contains(uuid)
            {
                parents.insert(
                    uuid.to_string(),
                    record.parent_uuid().map(str::to_string),
                );
            }
        }
        Self { parents }
    }

    /// A copy with each `(uuid, parent)` override applied.
    pub fn with_override(&self, overrides: &[(String, String)]) -> Self {
        let mut patched = self.clone();
        for (uuid, parent) in overrides {
            patched.parents.insert(uuid.clone(), Some(parent.clone()));
        }
        patched
    }

    /// `None` if `uuid` is unknown, `Some(None)` for a root.
    pub fn parent_of(&self, uuid: &str) -> Option<Option<&str>> {
        self.parents.get(uuid).map(|p| p.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Reached a record with no parent.
    Root,
    /// `at` is a parent uuid missing from the index.
    Broken { at: String },
    /// `at` was visited twice.
    Cycle { at: String },
}

#[derive(Debug, Clone)]
pub struct ChainWalk {
    /// Records walked through before stopping.
    pub steps: usize,
    pub outcome: WalkOutcome,
    pub visited: HashSet<String>,
}

impl ChainWalk {
    pub fn reached_root(&self) -> bool {
        self.outcome == WalkOutcome::Root
    }

    /// Walk parent pointers from `tail` until a root, a missing uuid, or a
    /// revisit. The walk never takes more than `parents.len() + 1` steps.
    pub fn from_tail(tail: &str, parents: &ParentMap) -> Self {
        let limit = parents.parents.len() + 1;
        let mut visited = HashSet::new();
        let mut current = tail.to_string();
        let mut steps = 0;

        loop {
            if !visited.insert(current.clone()) {
                return Self {
                    steps,
                    outcome: WalkOutcome::Cycle { at: current },
                    visited,
                };
            }
            let next = match parents.parent_of(&current) {
                None => {
                    visited.remove(&current);
                    return Self {
                        steps,
                        outcome: WalkOutcome::Broken { at: current },
                        visited,
                    };
                }
                Some(None) => {
                    return Self {
                        steps: steps + 1,
                        outcome: WalkOutcome::Root,
                        visited,
                    };
                }
                Some(Some(parent)) => parent.to_string(),
            };
            steps += 1;
            if steps > limit {
                return Self {
                    steps,
                    outcome: WalkOutcome::Cycle { at: next },
                    visited,
                };
            }
            current = next;
        }
    }
}
