//! Lazy document/query sequences from gzip-compressed line-delimited JSON
//! (C2). Malformed lines fail with `InputFormat`; unknown fields are
//! ignored.

use crate::error::{Result, SearchError};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub pmid: u64,
    pub title: String,
    pub abstract_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub query_id: String,
    pub query_text: String,
    pub documents_pmid: Vec<String>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    pmid: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
}

#[derive(Deserialize)]
struct RawQuestion {
    #[serde(default)]
    query_id: Option<Value>,
    #[serde(default)]
    query_text: Option<String>,
    #[serde(default)]
    documents_pmid: Option<Vec<Value>>,
}

fn value_to_u64(path: &Path, line: usize, field: &str, value: Option<Value>) -> Result<u64> {
    match value {
        Some(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64().unwrap()),
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map_err(|_| SearchError::input_format(path, line, format!("`{field}` not integer-coercible"))),
        _ => Err(SearchError::input_format(path, line, format!("missing or non-integer `{field}`"))),
    }
}

fn value_to_id_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads `{pmid, title, abstract}` records, gzip-compressed, one JSON object
/// per line. Non-restartable: consumes the underlying reader as it iterates.
pub struct CollectionReader {
    lines: BufReader<GzDecoder<File>>,
    path: PathBuf,
    line_no: usize,
    buf: String,
}

impl CollectionReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| SearchError::storage(&path, e))?;
        Ok(Self {
            lines: BufReader::new(GzDecoder::new(file)),
            path,
            line_no: 0,
            buf: String::new(),
        })
    }
}

impl Iterator for CollectionReader {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        let n = match self.lines.read_line(&mut self.buf) {
            Ok(n) => n,
            Err(e) => return Some(Err(SearchError::storage(&self.path, e))),
        };
        if n == 0 {
            return None;
        }
        self.line_no += 1;
        let trimmed = self.buf.trim();
        if trimmed.is_empty() {
            return self.next();
        }

        let raw: RawDocument = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                return Some(Err(SearchError::input_format(
                    &self.path,
                    self.line_no,
                    e.to_string(),
                )))
            }
        };

        let pmid = match value_to_u64(&self.path, self.line_no, "pmid", raw.pmid) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let title = match raw.title {
            Some(t) => t,
            None => {
                return Some(Err(SearchError::input_format(
                    &self.path,
                    self.line_no,
                    "missing `title`",
                )))
            }
        };
        let abstract_text = match raw.abstract_text {
            Some(t) => t,
            None => {
                return Some(Err(SearchError::input_format(
                    &self.path,
                    self.line_no,
                    "missing `abstract`",
                )))
            }
        };

        Some(Ok(Document {
            pmid,
            title,
            abstract_text,
        }))
    }
}

/// Reads `{query_id, query_text, documents_pmid}` records, plain-text, one
/// JSON object per line.
pub struct QuestionsReader {
    lines: BufReader<File>,
    path: PathBuf,
    line_no: usize,
    buf: String,
}

impl QuestionsReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| SearchError::storage(&path, e))?;
        Ok(Self {
            lines: BufReader::new(file),
            path,
            line_no: 0,
            buf: String::new(),
        })
    }
}

impl Iterator for QuestionsReader {
    type Item = Result<Question>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        let n = match self.lines.read_line(&mut self.buf) {
            Ok(n) => n,
            Err(e) => return Some(Err(SearchError::storage(&self.path, e))),
        };
        if n == 0 {
            return None;
        }
        self.line_no += 1;
        let trimmed = self.buf.trim();
        if trimmed.is_empty() {
            return self.next();
        }

        let raw: RawQuestion = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                return Some(Err(SearchError::input_format(
                    &self.path,
                    self.line_no,
                    e.to_string(),
                )))
            }
        };

        let query_id = match raw.query_id {
            Some(v) => value_to_id_string(&v),
            None => {
                return Some(Err(SearchError::input_format(
                    &self.path,
                    self.line_no,
                    "missing `query_id`",
                )))
            }
        };
        let query_text = match raw.query_text {
            Some(t) => t,
            None => {
                return Some(Err(SearchError::input_format(
                    &self.path,
                    self.line_no,
                    "missing `query_text`",
                )))
            }
        };
        let documents_pmid = raw
            .documents_pmid
            .unwrap_or_default()
            .iter()
            .map(value_to_id_string)
            .collect();

        Some(Ok(Question {
            query_id,
            query_text,
            documents_pmid,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_gz(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let file = File::create(&path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        for line in lines {
            writeln!(enc, "{line}").unwrap();
        }
        enc.finish().unwrap();
        path
    }

    #[test]
    fn reads_documents() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(
            &dir,
            "collection.jsonl.gz",
            &[
                r#"{"pmid": 1, "title": "cat dog", "abstract": "cat", "extra": "ignored"}"#,
                r#"{"pmid": "2", "title": "dog", "abstract": "bird cat"}"#,
            ],
        );
        let docs: Result<Vec<Document>> = CollectionReader::open(&path).unwrap().collect();
        let docs = docs.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].pmid, 1);
        assert_eq!(docs[1].pmid, 2);
    }

    #[test]
    fn malformed_line_is_input_format_error() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "collection.jsonl.gz", &["not json"]);
        let docs: Result<Vec<Document>> = CollectionReader::open(&path).unwrap().collect();
        assert!(matches!(docs, Err(SearchError::InputFormat { .. })));
    }

    #[test]
    fn missing_pmid_is_input_format_error() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "collection.jsonl.gz", &[r#"{"title": "t", "abstract": "a"}"#]);
        let docs: Result<Vec<Document>> = CollectionReader::open(&path).unwrap().collect();
        assert!(matches!(docs, Err(SearchError::InputFormat { .. })));
    }
}
