//! K-way merger (C5): merges runs into a vocabulary plus one or more
//! partitioned postings files.
//!
//! Grounded on this codebase's streaming LSM merge iterator: a min-heap of
//! per-source cursors, popped one at a time and refilled from whichever
//! source produced the minimum. The one behavioral difference from that
//! prior art is the "no-duplicates" guard (§4.5 step 4): unlike an LSM
//! merge, which can cut an SSTable at any key, a partition here may only be
//! cut once every run's current term has moved past the term just emitted,
//! because a term's postings must never be split across partitions.

use crate::error::{Result, SearchError};
use crate::postings::PostingsList;
use crate::spill::RunCursor;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

struct HeapItem {
    term: String,
    source_id: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.term == other.term && self.source_id == other.source_id
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term.cmp(&other.term).then(self.source_id.cmp(&other.source_id))
    }
}

/// A term's vocabulary-file entry: document frequency and which partition
/// holds its postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabEntry {
    pub df: u32,
    pub partition_id: u32,
}

pub struct MergeOutcome {
    pub vocabulary: Vec<(String, VocabEntry)>,
    pub partition_paths: Vec<PathBuf>,
}

/// Merges a set of run files (and an optional in-memory tail, the unspilled
/// accumulator contents treated as one more run) into sorted partition
/// files plus an in-memory vocabulary ready to be written out by the index
/// writer.
pub struct KWayMerger {
    output_dir: PathBuf,
    memory_threshold: usize,
}

impl KWayMerger {
    pub fn new(output_dir: impl AsRef<Path>, memory_threshold: usize) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            memory_threshold,
        }
    }

    /// `tail` holds `(term, postings)` pairs sorted ascending by term — the
    /// final, unspilled accumulator contents, if any.
    pub fn merge(&self, run_paths: &[PathBuf], tail: Vec<(String, PostingsList)>) -> Result<MergeOutcome> {
        if run_paths.is_empty() {
            return self.write_tail_only(tail);
        }

        let mut cursors: Vec<RunCursor> = run_paths.iter().map(RunCursor::open).collect::<Result<_>>()?;
        let tail_cursor = TailCursor::new(tail);
        let tail_source_id = cursors.len();

        let mut heap = BinaryHeap::new();
        for (i, cursor) in cursors.iter().enumerate() {
            if let Some((term, _)) = &cursor.current {
                heap.push(Reverse(HeapItem {
                    term: term.clone(),
                    source_id: i,
                }));
            }
        }
        let mut tail = tail_cursor;
        if let Some((term, _)) = tail.current() {
            heap.push(Reverse(HeapItem {
                term: term.to_string(),
                source_id: tail_source_id,
            }));
        }

        let mut vocabulary = Vec::new();
        let mut partition_paths = Vec::new();
        let mut partition_id: u32 = 0;
        let mut buffer: Vec<(String, PostingsList)> = Vec::new();
        let mut buffer_bytes = 0usize;

        loop {
            let min_term = match heap.peek() {
                Some(Reverse(h)) => h.term.clone(),
                None => break,
            };
            let mut merged: Option<PostingsList> = None;
            let mut df = 0u32;

            // Drain every heap entry currently equal to the minimum term,
            // unioning their postings and advancing each source.
            while let Some(Reverse(top)) = heap.peek() {
                if top.term != min_term {
                    break;
                }
                let Reverse(top) = heap.pop().unwrap();
                let list = if top.source_id == tail_source_id {
                    let (_, list) = tail.take_current().expect("heap entry implies current record");
                    tail.advance();
                    list
                } else {
                    let cursor = &mut cursors[top.source_id];
                    let (_, list) = cursor.current.take().expect("heap entry implies current record");
                    cursor.advance()?;
                    list
                };
                df += list.doc_count() as u32;
                merged = Some(match merged {
                    Some(acc) => acc.merge(list),
                    None => list,
                });

                let refill_term = if top.source_id == tail_source_id {
                    tail.current().map(|(t, _)| t.to_string())
                } else {
                    cursors[top.source_id].current.as_ref().map(|(t, _)| t.clone())
                };
                if let Some(t) = refill_term {
                    heap.push(Reverse(HeapItem {
                        term: t,
                        source_id: top.source_id,
                    }));
                }
            }

            let merged = merged.expect("at least one source contributed");
            buffer_bytes += merged.estimated_bytes();
            buffer.push((min_term.clone(), merged));
            vocabulary.push((
                min_term.clone(),
                VocabEntry {
                    df,
                    partition_id,
                },
            ));

            // No-duplicates guard: only cut a partition once no remaining
            // cursor currently holds the term we just emitted.
            let term_still_pending = heap.peek().map(|Reverse(h)| h.term == min_term).unwrap_or(false);
            if buffer_bytes > self.memory_threshold && !term_still_pending {
                let path = self.flush_partition(partition_id, std::mem::take(&mut buffer))?;
                partition_paths.push(path);
                partition_id += 1;
                buffer_bytes = 0;
            }
        }

        if !buffer.is_empty() {
            let path = self.flush_partition(partition_id, buffer)?;
            partition_paths.push(path);
        }

        for path in run_paths {
            let _ = fs::remove_file(path);
        }

        // Single-partition index: callers treat a lone partition file as
        // holding every term, with `partition_id` implicitly 0.
        if partition_paths.len() <= 1 {
            for (_, entry) in vocabulary.iter_mut() {
                entry.partition_id = 0;
            }
        }

        Ok(MergeOutcome {
            vocabulary,
            partition_paths,
        })
    }

    fn write_tail_only(&self, tail: Vec<(String, PostingsList)>) -> Result<MergeOutcome> {
        if tail.is_empty() {
            return Ok(MergeOutcome {
                vocabulary: Vec::new(),
                partition_paths: Vec::new(),
            });
        }
        let vocabulary = tail
            .iter()
            .map(|(term, list)| {
                (
                    term.clone(),
                    VocabEntry {
                        df: list.doc_count() as u32,
                        partition_id: 0,
                    },
                )
            })
            .collect();
        let path = self.flush_partition(0, tail)?;
        Ok(MergeOutcome {
            vocabulary,
            partition_paths: vec![path],
        })
    }

    fn flush_partition(&self, partition_id: u32, entries: Vec<(String, PostingsList)>) -> Result<PathBuf> {
        let final_path = self.output_dir.join(format!("postings_{partition_id}"));
        let tmp_path = self.output_dir.join(format!("postings_{partition_id}.tmp"));
        {
            let file = File::create(&tmp_path).map_err(|e| SearchError::storage(&tmp_path, e))?;
            let mut writer = BufWriter::new(file);
            for (term, list) in entries {
                write_record(&mut writer, &term, &list).map_err(|e| SearchError::storage(&tmp_path, e))?;
            }
            writer.flush().map_err(|e| SearchError::storage(&tmp_path, e))?;
            writer
                .into_inner()
                .map_err(|e| SearchError::storage(&tmp_path, e.into_error()))?
                .sync_all()
                .map_err(|e| SearchError::storage(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, &final_path).map_err(|e| SearchError::storage(&final_path, e))?;
        Ok(final_path)
    }
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

/// Cursor over the final, unspilled accumulator tail, treated as one more
/// run per spec.md §4.5.
struct TailCursor {
    entries: std::vec::IntoIter<(String, PostingsList)>,
    current: Option<(String, PostingsList)>,
}

impl TailCursor {
    fn new(entries: Vec<(String, PostingsList)>) -> Self {
        let mut iter = entries.into_iter();
        let current = iter.next();
        Self { entries: iter, current }
    }

    fn current(&self) -> Option<(&str, &PostingsList)> {
        self.current.as_ref().map(|(t, l)| (t.as_str(), l))
    }

    fn take_current(&mut self) -> Option<(String, PostingsList)> {
        self.current.take()
    }

    fn advance(&mut self) {
        self.current = self.entries.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::PostingsAccumulator;
    use crate::config::RankingSchema;
    use crate::spill::BlockSpiller;
    use crate::config::IndexerConfig;
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
    fn s3_merge_two_runs_matches_single_run() {
        let dir = TempDir::new().unwrap();
        let ranking = RankingSchema::Bm25 { k1: 1.2, b: 0.75 };

        // Two runs, one document each.
        let config = IndexerConfig { posting_threshold: Some(1), memory_threshold_mb: Some(256) };
        let mut spiller = BlockSpiller::new(dir.path(), &config);
        let mut acc = PostingsAccumulator::new();
        acc.add_document(1, &tokens(&["cat", "dog"]), &ranking, usize::MAX).unwrap();
        let run0 = spiller.spill(&mut acc).unwrap();
        acc.add_document(2, &tokens(&["dog", "bird", "cat"]), &ranking, usize::MAX).unwrap();
        let run1 = spiller.spill(&mut acc).unwrap();

        let merger = KWayMerger::new(dir.path(), usize::MAX);
        let outcome = merger.merge(&[run0, run1], Vec::new()).unwrap();

        let mut terms: Vec<&str> = outcome.vocabulary.iter().map(|(t, _)| t.as_str()).collect();
        terms.sort();
        assert_eq!(terms, vec!["bird", "cat", "dog"]);
        assert_eq!(outcome.partition_paths.len(), 1);

        let bird = outcome.vocabulary.iter().find(|(t, _)| t == "bird").unwrap();
        assert_eq!(bird.1.df, 1);
        let cat = outcome.vocabulary.iter().find(|(t, _)| t == "cat").unwrap();
        assert_eq!(cat.1.df, 2);

        // Runs deleted after a successful merge.
        assert!(!dir.path().join("run_0").exists());
        assert!(!dir.path().join("run_1").exists());
    }

    #[test]
    fn no_spill_writes_tail_as_sole_partition() {
        let dir = TempDir::new().unwrap();
        let ranking = RankingSchema::Bm25 { k1: 1.2, b: 0.75 };
        let mut acc = PostingsAccumulator::new();
        acc.add_document(1, &tokens(&["cat", "dog"]), &ranking, usize::MAX).unwrap();
        let tail: Vec<(String, PostingsList)> = acc
            .drain_sorted()
            .into_iter()
            .map(|(term, docs)| (term, PostingsList::from_sorted(docs)))
            .collect();

        let merger = KWayMerger::new(dir.path(), usize::MAX);
        let outcome = merger.merge(&[], tail).unwrap();
        assert_eq!(outcome.partition_paths.len(), 1);
        assert_eq!(outcome.vocabulary.len(), 2);
    }
}
