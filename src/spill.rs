//! Block spiller (C4): decides when to spill the accumulator and writes one
//! run per spill — a sorted-by-term stream of length-prefixed bincode
//! records, the same length-prefix-plus-payload framing this codebase's
//! manifest log already uses for its record stream.

use crate::accumulator::PostingsAccumulator;
use crate::config::IndexerConfig;
use crate::error::{Result, SearchError};
use crate::postings::{PostingEntry, PostingsList};
use crate::types::DocId;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Reads `/proc/meminfo`'s `MemAvailable` line. Best-effort: platforms
/// without it (anything non-Linux) fall back to `None`, and the effective
/// threshold becomes the user setting alone.
fn free_memory_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// The effective memory threshold: the minimum of the user setting and 70%
/// of free physical RAM at startup. If no setting is supplied, the free-RAM
/// cap alone applies; if free RAM cannot be determined, the user setting
/// alone applies.
pub fn effective_memory_threshold(config: &IndexerConfig) -> usize {
    let user_bytes = config.memory_threshold_mb.map(|mb| mb * 1_000_000);
    let free_cap = free_memory_bytes().map(|b| (b as f64 * 0.7) as usize);
    match (user_bytes, free_cap) {
        (Some(u), Some(f)) => u.min(f),
        (Some(u), None) => u,
        (None, Some(f)) => f,
        (None, None) => usize::MAX,
    }
}

pub struct BlockSpiller {
    dir: PathBuf,
    next_run_index: usize,
    posting_threshold: Option<usize>,
    memory_threshold: usize,
}

impl BlockSpiller {
    pub fn new(dir: impl AsRef<Path>, config: &IndexerConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            next_run_index: 0,
            posting_threshold: config.posting_threshold,
            memory_threshold: effective_memory_threshold(config),
        }
    }

    pub fn memory_threshold(&self) -> usize {
        self.memory_threshold
    }

    /// Spill when EITHER the document-count trigger fires OR the doubled
    /// size estimate exceeds the memory threshold. The factor-of-two guard
    /// reserves headroom for the allocator against estimation error.
    pub fn should_spill(&self, accumulator: &PostingsAccumulator) -> bool {
        if let Some(threshold) = self.posting_threshold {
            if accumulator.documents_since_last_spill() >= threshold {
                return true;
            }
        }
        2 * accumulator.estimated_bytes() > self.memory_threshold
    }

    /// Writes one run: `run_<k>`, one `(term, postings)` record per term,
    /// sorted ascending, then clears the accumulator. Returns the run's
    /// path. Fails the whole build with `Storage` on any write error.
    pub fn spill(&mut self, accumulator: &mut PostingsAccumulator) -> Result<PathBuf> {
        let entries = accumulator.drain_sorted();
        let path = self.dir.join(format!("run_{}", self.next_run_index));
        self.next_run_index += 1;
        write_run(&path, entries)?;
        Ok(path)
    }

    pub fn run_count(&self) -> usize {
        self.next_run_index
    }
}

fn write_run(path: &Path, entries: Vec<(String, BTreeMap<DocId, PostingEntry>)>) -> Result<()> {
    let file = File::create(path).map_err(|e| SearchError::storage(path, e))?;
    let mut writer = BufWriter::new(file);
    for (term, docs) in entries {
        let list = PostingsList::from_sorted(docs);
        write_record(&mut writer, &term, &list).map_err(|e| SearchError::storage(path, e))?;
    }
    writer.flush().map_err(|e| SearchError::storage(path, e))?;
    Ok(())
}

fn write_record(writer: &mut impl Write, term: &str, list: &PostingsList) -> std::io::Result<()> {
    let term_bytes = term.as_bytes();
    let payload = list
        .to_bytes()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(term_bytes.len() as u32).to_le_bytes())?;
    writer.write_all(term_bytes)?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Sequential cursor over one run file's sorted `(term, postings)` records.
pub struct RunCursor {
    reader: BufReader<File>,
    path: PathBuf,
    pub current: Option<(String, PostingsList)>,
}

impl RunCursor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| SearchError::storage(&path, e))?;
        let mut cursor = Self {
            reader: BufReader::new(file),
            path,
            current: None,
        };
        cursor.advance()?;
        Ok(cursor)
    }

    /// Reads the next record, retrying transient I/O errors up to three
    /// times with exponential backoff per spec.md §7's merger retry policy.
    pub fn advance(&mut self) -> Result<()> {
        let mut attempt = 0;
        loop {
            match read_record(&mut self.reader) {
                Ok(record) => {
                    self.current = record;
                    return Ok(());
                }
                Err(e) if attempt < 3 && e.kind() != std::io::ErrorKind::UnexpectedEof => {
                    attempt += 1;
                    std::thread::sleep(std::time::Duration::from_millis(10 * (1 << attempt)));
                }
                Err(e) => return Err(SearchError::storage(&self.path, e)),
            }
        }
    }
}

fn read_record(reader: &mut impl Read) -> std::io::Result<Option<(String, PostingsList)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let term_len = u32::from_le_bytes(len_buf) as usize;
    let mut term_buf = vec![0u8; term_len];
    reader.read_exact(&mut term_buf)?;
    let term = String::from_utf8(term_buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    reader.read_exact(&mut len_buf)?;
    let payload_len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;
    let list = PostingsList::from_bytes(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some((term, list)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Token;
    use tempfile::TempDir;

    fn tokens(words: &[&str]) -> Vec<Token> {
        words
            .iter()
            .enumerate()
            .map(|(i, w)| Token {
                text: w.to_string(),
                position: i as u32,
            })
            .collect()
    }

    #[test]
    fn spill_and_read_back_run() {
        use crate::config::RankingSchema;
        let dir = TempDir::new().unwrap();
        let mut acc = PostingsAccumulator::new();
        let ranking = RankingSchema::Bm25 { k1: 1.2, b: 0.75 };
        acc.add_document(1, &tokens(&["cat", "dog"]), &ranking, usize::MAX).unwrap();
        acc.add_document(2, &tokens(&["dog", "bird"]), &ranking, usize::MAX).unwrap();

        let config = IndexerConfig {
            posting_threshold: Some(100),
            memory_threshold_mb: Some(256),
        };
        let mut spiller = BlockSpiller::new(dir.path(), &config);
        let run_path = spiller.spill(&mut acc).unwrap();
        assert!(acc.is_empty());

        let mut cursor = RunCursor::open(&run_path).unwrap();
        let mut terms = Vec::new();
        while let Some((term, _)) = cursor.current.clone() {
            terms.push(term);
            cursor.advance().unwrap();
        }
        assert_eq!(terms, vec!["bird", "cat", "dog"]);
    }

    #[test]
    fn posting_threshold_triggers_spill() {
        let config = IndexerConfig {
            posting_threshold: Some(1),
            memory_threshold_mb: Some(256),
        };
        let dir = TempDir::new().unwrap();
        let spiller = BlockSpiller::new(dir.path(), &config);
        let mut acc = PostingsAccumulator::new();
        use crate::config::RankingSchema;
        let ranking = RankingSchema::Bm25 { k1: 1.2, b: 0.75 };
        acc.add_document(1, &tokens(&["cat"]), &ranking, usize::MAX).unwrap();
        assert!(spiller.should_spill(&acc));
    }
}
