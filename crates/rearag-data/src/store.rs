//! JSONL persistence for questions and traces

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use rearag_ai::Message;

use crate::error::{Error, Result};

/// Ground-truth answers: a single string or a list of acceptable strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroundTruth {
    One(String),
    Many(Vec<String>),
}

impl GroundTruth {
    pub fn answers(&self) -> &[String] {
        match self {
            GroundTruth::One(a) => std::slice::from_ref(a),
            GroundTruth::Many(list) => list,
        }
    }
}

/// Record identifier. Numbers in input files are read as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct RecordId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for RecordId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => RecordId(s),
            RawId::Number(n) => RecordId(n.to_string()),
        }
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<usize> for RecordId {
    fn from(index: usize) -> Self {
        RecordId(index.to_string())
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One input question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    #[serde(default)]
    pub id: Option<RecordId>,
    pub question: String,
    pub answer: GroundTruth,
}

/// One persisted trace. `conversation` is `None` when construction gave up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: RecordId,
    pub question: String,
    pub answer: GroundTruth,
    pub conversation: Option<Vec<Message>>,
}

/// Read every non-empty line of a JSONL file
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Read a JSONL file, skipping lines that do not decode (a torn write from
/// an interrupted build) with a warning
pub fn read_jsonl_lossy<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = idx + 1, "skipping unreadable line: {}", e);
            }
        }
    }
    Ok(records)
}

/// Append records to a JSONL file, creating it and its directory if needed.
/// A file left without a final newline gets one first, so a torn line never
/// swallows the next record.
pub fn append_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    let mut file = File::options()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    let torn = ends_mid_line(&mut file).map_err(|e| Error::io(path, e))?;

    let mut writer = BufWriter::new(file);
    if torn {
        tracing::warn!(path = %path.display(), "terminating torn final line before append");
        writeln!(writer).map_err(|e| Error::io(path, e))?;
    }
    for record in records {
        let line = serde_json::to_string(record).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            line: 0,
            source,
        })?;
        writeln!(writer, "{}", line).map_err(|e| Error::io(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Whether a non-empty file's last byte is something other than a newline
fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Write a value as pretty-printed JSON
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        line: 0,
        source,
    })?;
    fs::write(path, text).map_err(|e| Error::io(path, e))
}

/// Ids of every record already in a trace file. A missing file is empty.
///
/// Records whose construction gave up count as completed too, so a resumed
/// build does not retry them. A torn final line from an interrupted write is
/// skipped with a warning.
pub fn load_completed_ids(path: &Path) -> Result<HashSet<RecordId>> {
    #[derive(Deserialize)]
    struct IdOnly {
        id: RecordId,
    }

    if !path.exists() {
        return Ok(HashSet::new());
    }
    let records: Vec<IdOnly> = read_jsonl_lossy(path)?;
    Ok(records.into_iter().map(|r| r.id).collect())
}

/// Expand input patterns into file paths, in pattern order
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let entries = glob::glob(pattern).map_err(|e| Error::Pattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        let mut matched: Vec<PathBuf> = entries.filter_map(|e| e.ok()).collect();
        if matched.is_empty() {
            // Not a glob, or nothing matched: let the read report it
            matched.push(PathBuf::from(pattern));
        }
        matched.sort();
        paths.extend(matched);
    }
    Ok(paths)
}

/// Load questions from input files, keep the first `n_sample` (all when 0),
/// and give every record without an id its position as id
pub fn load_questions(patterns: &[String], n_sample: usize) -> Result<Vec<QuestionRecord>> {
    let mut records = Vec::new();
    for path in expand_inputs(patterns)? {
        let mut batch: Vec<QuestionRecord> = read_jsonl(&path)?;
        tracing::debug!(path = %path.display(), count = batch.len(), "loaded input file");
        records.append(&mut batch);
    }
    if n_sample > 0 {
        records.truncate(n_sample);
    }
    for (idx, record) in records.iter_mut().enumerate() {
        if record.id.is_none() {
            record.id = Some(RecordId::from(idx));
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_append_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("traces.jsonl");
        let rec = TraceRecord {
            id: "7".into(),
            question: "q".into(),
            answer: GroundTruth::One("a".into()),
            conversation: None,
        };
        append_jsonl(&path, &[rec.clone()]).unwrap();
        append_jsonl(&path, &[rec.clone()]).unwrap();
        let back: Vec<TraceRecord> = read_jsonl(&path).unwrap();
        assert_eq!(back, vec![rec.clone(), rec]);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#""conversation":null"#));
    }

    #[test]
    fn test_read_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.jsonl", "{\"id\": \"1\"}\n\nnot json\n");
        let err = read_jsonl::<serde_json::Value>(&path).unwrap_err();
        assert!(matches!(err, Error::Json { line: 3, .. }), "got {err:?}");
    }

    #[test]
    fn test_completed_ids_include_null_conversations() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "t.jsonl",
            "{\"id\":\"0\",\"question\":\"q\",\"answer\":\"a\",\"conversation\":null}\n{\"id\":3,\"question\":\"q\",\"answer\":[\"a\"],\"conversation\":[]}\n",
        );
        let ids = load_completed_ids(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&RecordId::from("0")));
        assert!(ids.contains(&RecordId::from(3usize)));

        assert!(load_completed_ids(&dir.path().join("missing.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn test_completed_ids_skip_torn_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "t.jsonl", "{\"id\":\"0\",\"conversation\":null}\n{\"id\":\"1\",\"quest");
        let ids = load_completed_ids(&path).unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_append_after_torn_line_stays_readable() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "traces.jsonl",
            "{\"id\":\"0\",\"question\":\"q\",\"answer\":\"a\",\"conversation\":null}\n{\"id\":\"1\",\"quest",
        );
        let rec = TraceRecord {
            id: "2".into(),
            question: "q".into(),
            answer: GroundTruth::One("a".into()),
            conversation: None,
        };
        append_jsonl(&path, &[rec.clone()]).unwrap();

        let ids = load_completed_ids(&path).unwrap();
        assert_eq!(ids, HashSet::from([RecordId::from("0"), RecordId::from("2")]));

        let back: Vec<TraceRecord> = read_jsonl_lossy(&path).unwrap();
        let back_ids: Vec<_> = back.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(back_ids, vec!["0", "2"]);
        assert_eq!(back[1], rec);

        assert!(fs::read_to_string(&path).unwrap().ends_with("null}\n"));
    }

    #[test]
    fn test_load_questions_assigns_ids_and_samples() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.jsonl", "{\"question\":\"q0\",\"answer\":\"a0\"}\n{\"id\":\"x\",\"question\":\"q1\",\"answer\":\"a1\"}\n");
        write(&dir, "b.jsonl", "{\"question\":\"q2\",\"answer\":[\"a2\",\"b2\"]}\n");
        let pattern = dir.path().join("*.jsonl").display().to_string();

        let all = load_questions(&[pattern.clone()], 0).unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.clone().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["0", "x", "2"]);
        assert_eq!(all[2].answer.answers().len(), 2);

        let two = load_questions(&[pattern], 2).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let dir = TempDir::new().unwrap();
        let pattern = dir.path().join("nope.jsonl").display().to_string();
        assert!(matches!(load_questions(&[pattern], 0), Err(Error::Io { .. })));
    }
}
