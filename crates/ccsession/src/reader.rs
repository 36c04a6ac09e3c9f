use crate::error::{Result, SessionError};
use crate::types::{Line, Record, Transcript};
use std::path::Path;

pub struct TranscriptReader;

impl TranscriptReader {
    /// Parse a session file into a line-exact [`Transcript`].
    ///
    /// Blank lines are kept as [`Line::Blank`] so every line number matches
    /// the physical file. A line that fails to decode voids the whole file
    /// and is reported as [`SessionError::Parse`].
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Transcript> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SessionError::structure(path, "file not found"));
        }

        let content = std::fs::read_to_string(path)?;
        let session_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SessionError::structure(path, "unusable file name"))?
            .to_string();

        let lines = parse_lines(path, &content)?;
        Ok(Transcript {
            path: path.to_path_buf(),
            session_id,
            lines,
        })
    }

    /// Like [`TranscriptReader::read`] but drops blank lines, for consumers
    /// that only need the records (cloning, archiving, attribution).
    pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
        let transcript = Self::read(path)?;
        Ok(transcript
            .lines
            .into_iter()
            .filter_map(|line| match line {
                Line::Record(record) => Some(record),
                Line::Blank { .. } => None,
            })
            .collect())
    }
}

fn parse_lines(path: &Path, content: &str) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    for (idx, raw) in physical_lines(content).into_iter().enumerate() {
        let line_number = idx + 1;
        let text = strip_terminator(raw);
        if text.trim().is_empty() {
            lines.push(Line::Blank { line_number });
            continue;
        }
        let record = Record::decode(line_number, text).map_err(|message| SessionError::Parse {
            path: path.to_path_buf(),
            line: line_number,
            message,
        })?;
        lines.push(Line::Record(record));
    }
    Ok(lines)
}

/// Split into physical lines, each keeping its own terminator. A final line
/// without a trailing newline is still a line; an empty file has none.
pub(crate) fn physical_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

pub(crate) fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// The terminator `line` ended with (`"\r\n"`, `"\n"` or nothing).
pub(crate) fn terminator(line: &str) -> &str {
    &line[strip_terminator(line).len()..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_preserves_line_numbers_across_blanks() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "s1.jsonl",
            concat!(
                "{\"type\":\"user\",\"uuid\":\"a\"}\n\n   \n",
                "{\"type\":\"assistant\",\"uuid\":\"b\",\"parentUuid\":\"a\"}\n",
            ),
        );
        let t = TranscriptReader::read(&path).unwrap();
        assert_eq!(t.session_id, "s1");
        assert_eq!(t.lines.len(), 4);
        assert!(matches!(t.lines[1], Line::Blank { line_number: 2 }));
        assert!(matches!(t.lines[2], Line::Blank { line_number: 3 }));
        assert_eq!(t.lines[3].line_number(), 4);
        assert_eq!(t.record_count(), 2);
    }

    #[test]
    fn test_final_line_without_newline() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "s.jsonl", "{\"uuid\":\"a\"}\n{\"uuid\":\"b\"}");
        let t = TranscriptReader::read(&path).unwrap();
        assert_eq!(t.lines.len(), 2);
        assert_eq!(t.record_at(1).unwrap().uuid(), Some("b"));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "s.jsonl", "{\"uuid\":\"a\"}\n\n{broken\n");
        let err = TranscriptReader::read(&path).unwrap_err();
        match err {
            SessionError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file_is_structural() {
        let dir = TempDir::new().unwrap();
        let err = TranscriptReader::read(dir.path().join("none.jsonl")).unwrap_err();
        assert!(matches!(err, SessionError::Structure { .. }));
    }

    #[test]
    fn test_empty_file_has_no_lines() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "s.jsonl", "");
        assert!(TranscriptReader::read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_records_skips_blanks() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "s.jsonl", "{\"uuid\":\"a\"}\n\n{\"uuid\":\"b\"}\n");
        let records = TranscriptReader::read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].line_number(), 3);
    }

    #[test]
    fn test_terminators() {
        assert_eq!(physical_lines("a\nb\r\nc"), vec!["a\n", "b\r\n", "c"]);
        assert_eq!(terminator("a\n"), "\n");
        assert_eq!(terminator("b\r\n"), "\r\n");
        assert_eq!(terminator("c"), "");
        assert!(physical_lines("").is_empty());
    }
}
