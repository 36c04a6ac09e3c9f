use serde_json::Value;
use std::path::{Component, Path, PathBuf};

/// Record fields that hold filesystem paths.
const PATH_FIELDS: &[&str] = &["cwd", "file_path", "filePath", "notebook_path", "path"];

/// Rewrites absolute paths under one project root to the same relative
/// location under another. Purely lexical; nothing on disk is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    from: PathBuf,
    to: PathBuf,
}

impl PathTranslator {
    /// `None` when both roots are the same after normalization.
    pub fn between<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Option<Self> {
        let from = normalize(from.as_ref());
        let to = normalize(to.as_ref());
        (from != to).then_some(Self { from, to })
    }

    pub fn from_root(&self) -> &Path {
        &self.from
    }

    pub fn to_root(&self) -> &Path {
        &self.to
    }

    /// Translate one path string, or `None` if it is not under the source
    /// root.
    pub fn translate_path(&self, raw: &str) -> Option<String> {
        let path = Path::new(raw);
        if !path.is_absolute() {
            return None;
        }
        let relative = normalize(path).strip_prefix(&self.from).ok()?.to_path_buf();
        let translated = if relative.as_os_str().is_empty() {
            self.to.clone()
        } else {
            self.to.join(relative)
        };
        Some(translated.to_string_lossy().into_owned())
    }

    /// Rewrite every path field in `value`, at any depth. Returns how many
    /// strings changed.
    pub fn translate_value(&self, value: &mut Value) -> usize {
        match value {
            Value::Object(map) => {
                let mut changed = 0;
                for (key, field) in map.iter_mut() {
                    if PATH_FIELDS.contains(&key.as_str()) {
                        changed += self.translate_field(field);
                    } else {
                        changed += self.translate_value(field);
                    }
                }
                changed
            }
            Value::Array(items) => items.iter_mut().map(|v| self.translate_value(v)).sum(),
            _ => 0,
        }
    }

    fn translate_field(&self, field: &mut Value) -> usize {
        match field {
            Value::String(s) => match self.translate_path(s) {
                Some(t) if t != *s => {
                    *s = t;
                    1
                }
                _ => 0,
            },
            Value::Array(items) => items.iter_mut().map(|v| self.translate_field(v)).sum(),
            other => self.translate_value(other),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
