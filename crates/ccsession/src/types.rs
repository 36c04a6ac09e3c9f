use serde_json::Value;
use std::path::PathBuf;

/// Record discriminator, decoded once from the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKind {
    User,
    Assistant,
    System,
    Summary,
    Progress,
    CustomTitle,
    FileHistorySnapshot,
    Other(String),
}

impl RecordKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "user" => RecordKind::User,
            "assistant" => RecordKind::Assistant,
            "system" => RecordKind::System,
            "summary" => RecordKind::Summary,
            "progress" => RecordKind::Progress,
            "custom-title" => RecordKind::CustomTitle,
            "file-history-snapshot" => RecordKind::FileHistorySnapshot,
            other => RecordKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::User => "user",
            RecordKind::Assistant => "assistant",
            RecordKind::System => "system",
            RecordKind::Summary => "summary",
            RecordKind::Progress => "progress",
            RecordKind::CustomTitle => "custom-title",
            RecordKind::FileHistorySnapshot => "file-history-snapshot",
            RecordKind::Other(tag) => tag,
        }
    }
}

/// One decoded JSONL line. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct Record {
    line_number: usize,
    kind: RecordKind,
    subtype: Option<String>,
    uuid: Option<String>,
    parent_uuid: Option<String>,
    session_id: Option<String>,
    slug: Option<String>,
    cwd: Option<String>,
    version: Option<String>,
    custom_title: Option<String>,
    raw_text: String,
    value: Value,
}

impl Record {
    /// Decode one non-blank line. Anything that is not a JSON object is an
    /// error; unknown fields and record types are carried through untouched.
    pub fn decode(line_number: usize, raw_text: &str) -> std::result::Result<Self, String> {
        let value: Value = serde_json::from_str(raw_text).map_err(|e| e.to_string())?;
        Self::from_value(line_number, raw_text.to_string(), value)
    }

    pub(crate) fn from_value(
        line_number: usize,
        raw_text: String,
        value: Value,
    ) -> std::result::Result<Self, String> {
        if !value.is_object() {
            return Err("expected a JSON object".to_string());
        }
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            line_number,
            kind: RecordKind::from_tag(value.get("type").and_then(Value::as_str).unwrap_or("?")),
            subtype: non_empty(field("subtype")),
            uuid: non_empty(field("uuid")),
            parent_uuid: non_empty(field("parentUuid")),
            session_id: non_empty(field("sessionId")),
            slug: non_empty(field("slug")),
            cwd: non_empty(field("cwd")),
            version: non_empty(field("version")),
            custom_title: field("customTitle"),
            raw_text,
            value,
        })
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }

    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn parent_uuid(&self) -> Option<&str> {
        self.parent_uuid.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn custom_title(&self) -> Option<&str> {
        match self.kind {
            RecordKind::CustomTitle => self.custom_title.as_deref(),
            _ => None,
        }
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// `type` or `type/subtype`, as shown in diagnostics.
    pub fn label(&self) -> String {
        match self.subtype() {
            Some(subtype) => format!("{}/{}", self.kind.as_str(), subtype),
            None => self.kind.as_str().to_string(),
        }
    }

    pub fn is_compact_boundary(&self) -> bool {
        self.kind == RecordKind::System && self.subtype() == Some("compact_boundary")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// A physical line of a transcript.
#[derive(Debug, Clone)]
pub enum Line {
    Blank { line_number: usize },
    Record(Record),
}

impl Line {
    pub fn line_number(&self) -> usize {
        match self {
            Line::Blank { line_number } => *line_number,
            Line::Record(record) => record.line_number(),
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Line::Blank { .. } => None,
            Line::Record(record) => Some(record),
        }
    }
}

/// An ordered, gap-free view of one JSONL file. `lines[i]` is physical line
/// `i + 1`.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub path: PathBuf,
    pub session_id: String,
    pub lines: Vec<Line>,
}

impl Transcript {
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &Record> {
        self.lines.iter().filter_map(Line::record)
    }

    pub fn record_count(&self) -> usize {
        self.records().count()
    }

    /// Record at a 0-based position, if that line is not blank.
    pub fn record_at(&self, position: usize) -> Option<&Record> {
        self.lines.get(position).and_then(Line::record)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_extracts_header() {
        let raw = concat!(
            r#"{"type":"user","uuid":"u1","parentUuid":"p0","sessionId":"s1","#,
            r#""slug":"happy-orbiting-fox","cwd":"/p"}"#,
        );
        let rec = Record::decode(3, raw).unwrap();
        assert_eq!(rec.line_number(), 3);
        assert_eq!(rec.kind(), &RecordKind::User);
        assert_eq!(rec.uuid(), Some("u1"));
        assert_eq!(rec.parent_uuid(), Some("p0"));
        assert_eq!(rec.session_id(), Some("s1"));
        assert_eq!(rec.slug(), Some("happy-orbiting-fox"));
        assert_eq!(rec.cwd(), Some("/p"));
        assert_eq!(rec.raw_text(), raw);
    }

    #[test]
    fn test_null_and_empty_parent_are_roots() {
        let a = Record::decode(1, r#"{"type":"user","uuid":"a","parentUuid":null}"#).unwrap();
        let b = Record::decode(2, r#"{"type":"user","uuid":"b","parentUuid":""}"#).unwrap();
        assert!(a.parent_uuid().is_none());
        assert!(b.parent_uuid().is_none());
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let rec = Record::decode(1, r#"{"type":"queue-operation"}"#).unwrap();
        assert_eq!(rec.kind(), &RecordKind::Other("queue-operation".into()));
        assert_eq!(rec.label(), "queue-operation");
    }

    #[test]
    fn test_label_with_subtype() {
        let rec =
            Record::decode(1, r#"{"type":"system","subtype":"compact_boundary","uuid":"x"}"#)
                .unwrap();
        assert_eq!(rec.label(), "system/compact_boundary");
        assert!(rec.is_compact_boundary());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Record::decode(1, "42").is_err());
        assert!(Record::decode(1, "{not json").is_err());
    }

    #[test]
    fn test_mistyped_header_field_does_not_fail_decode() {
        let rec = Record::decode(1, r#"{"type":"user","uuid":7}"#).unwrap();
        assert!(rec.uuid().is_none());
    }

    #[test]
    fn test_custom_title_only_on_title_records() {
        let title =
            Record::decode(1, r#"{"type":"custom-title","customTitle":"Auth"}"#).unwrap();
        let user = Record::decode(2, r#"{"type":"user","customTitle":"Auth"}"#).unwrap();
        assert_eq!(title.custom_title(), Some("Auth"));
        assert_eq!(user.custom_title(), None);
    }
}
