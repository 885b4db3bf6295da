//! Index writer (ties C3-C6 together for a full build) and index loader (C7).
//!
//! On-disk layout, one directory:
//! - `vocabulary`: sorted `(term, df, partition_id)` records.
//! - `postings_<p>`: sorted `(term, postings-list)` records, one file per
//!   partition.
//! - `document_count`: textual decimal `N` — inside the index directory,
//!   never the process's working directory (see spec.md §9's flagged bug).
//! - `tokenizer_config`: the tokenizer configuration used at ingest, as
//!   JSON, so a mismatched searcher invocation can be diagnosed instead of
//!   silently producing different token sequences.

use crate::accumulator::PostingsAccumulator;
use crate::config::{IndexerConfig, RankingConfig, RankingSchema, TokenizerConfig};
use crate::error::{Result, SearchError};
use crate::merge::{KWayMerger, VocabEntry};
use crate::postings::PostingsList;
use crate::spill::BlockSpiller;
use crate::tokenizer::Token;
use crate::types::DocId;
use crate::weighting::rewrite_partition_bm25;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

pub struct IndexStats {
    pub document_count: u64,
    pub vocabulary_size: usize,
    pub partition_count: usize,
    pub runs_spilled: usize,
}

/// Drives a full index build: tokenized documents in, a complete on-disk
/// index directory out.
pub struct IndexBuilder {
    dir: PathBuf,
    accumulator: PostingsAccumulator,
    spiller: BlockSpiller,
    run_paths: Vec<PathBuf>,
    doc_lengths: HashMap<DocId, u32>,
    total_tokens: u64,
    document_count: u64,
    tokenizer_config: TokenizerConfig,
    ranking_config: RankingConfig,
}

impl IndexBuilder {
    pub fn create(
        dir: impl AsRef<Path>,
        tokenizer_config: TokenizerConfig,
        ranking_config: RankingConfig,
        indexer_config: IndexerConfig,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| SearchError::storage(&dir, e))?;
        let spiller = BlockSpiller::new(&dir, &indexer_config);
        Ok(Self {
            dir,
            accumulator: PostingsAccumulator::new(),
            spiller,
            run_paths: Vec::new(),
            doc_lengths: HashMap::new(),
            total_tokens: 0,
            document_count: 0,
            tokenizer_config,
            ranking_config,
        })
    }

    /// Accumulates one document's tokens, then spills a run if the
    /// configured thresholds are crossed as of *this* document — §4.4 counts
    /// `documents_since_last_spill` against the document just accumulated,
    /// not the epoch before it.
    pub fn add_document(&mut self, doc_id: DocId, tokens: &[Token]) -> Result<()> {
        let memory_threshold = self.spiller.memory_threshold();
        self.accumulator
            .add_document(doc_id, tokens, &self.ranking_config.schema, memory_threshold)?;

        self.doc_lengths.insert(doc_id, tokens.len() as u32);
        self.total_tokens += tokens.len() as u64;
        self.document_count += 1;

        if self.spiller.should_spill(&self.accumulator) {
            let path = self.spiller.spill(&mut self.accumulator)?;
            tracing::debug!(run = %path.display(), "spilled block");
            self.run_paths.push(path);
        }

        Ok(())
    }

    /// Merges any remaining runs (or writes the unspilled tail directly,
    /// §4.5, if no spill ever occurred), runs the BM25 second pass if
    /// configured, and writes the final index directory.
    pub fn finish(mut self) -> Result<IndexStats> {
        let tail: Vec<(String, PostingsList)> = self
            .accumulator
            .drain_sorted()
            .into_iter()
            .map(|(term, docs)| (term, PostingsList::from_sorted(docs)))
            .collect();

        let memory_threshold = self.spiller.memory_threshold();
        let merger = KWayMerger::new(&self.dir, memory_threshold);
        let outcome = merger.merge(&self.run_paths, tail)?;

        if let RankingSchema::Bm25 { k1, b } = self.ranking_config.schema {
            let avdl = if self.document_count == 0 {
                1.0
            } else {
                self.total_tokens as f64 / self.document_count as f64
            };
            let vocab_df: HashMap<String, u32> = outcome
                .vocabulary
                .iter()
                .map(|(term, entry)| (term.clone(), entry.df))
                .collect();
            for path in &outcome.partition_paths {
                rewrite_partition_bm25(
                    path,
                    self.document_count,
                    avdl,
                    &self.doc_lengths,
                    &vocab_df,
                    k1,
                    b,
                )?;
            }
            tracing::info!(avdl, "BM25 second pass complete");
        }

        write_vocabulary(&self.dir, &outcome.vocabulary)?;
        write_document_count(&self.dir, self.document_count)?;
        write_tokenizer_config(&self.dir, &self.tokenizer_config)?;
        write_ranking_config(&self.dir, &self.ranking_config)?;

        let stats = IndexStats {
            document_count: self.document_count,
            vocabulary_size: outcome.vocabulary.len(),
            partition_count: outcome.partition_paths.len().max(1),
            runs_spilled: self.run_paths.len(),
        };
        tracing::info!(
            documents = stats.document_count,
            vocabulary = stats.vocabulary_size,
            partitions = stats.partition_count,
            runs = stats.runs_spilled,
            "index build complete"
        );
        Ok(stats)
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp).map_err(|e| SearchError::storage(&tmp, e))?;
        file.write_all(contents).map_err(|e| SearchError::storage(&tmp, e))?;
        file.sync_all().map_err(|e| SearchError::storage(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| SearchError::storage(path, e))?;
    Ok(())
}

fn write_vocabulary(dir: &Path, vocabulary: &[(String, VocabEntry)]) -> Result<()> {
    let mut sorted = vocabulary.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut buf = Vec::new();
    for (term, entry) in &sorted {
        let term_bytes = term.as_bytes();
        buf.extend_from_slice(&(term_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(term_bytes);
        buf.extend_from_slice(&entry.df.to_le_bytes());
        buf.extend_from_slice(&entry.partition_id.to_le_bytes());
    }
    atomic_write(&dir.join("vocabulary"), &buf)
}

fn write_document_count(dir: &Path, n: u64) -> Result<()> {
    atomic_write(&dir.join("document_count"), n.to_string().as_bytes())
}

fn write_tokenizer_config(dir: &Path, config: &TokenizerConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config)?;
    atomic_write(&dir.join("tokenizer_config"), &json)
}

fn write_ranking_config(dir: &Path, config: &RankingConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config)?;
    atomic_write(&dir.join("ranking_config"), &json)
}

impl From<serde_json::Error> for SearchError {
    fn from(e: serde_json::Error) -> Self {
        SearchError::Storage {
            path: PathBuf::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        }
    }
}

/// Reads the vocabulary into memory as `term -> (df, partition_id)` and
/// opens postings partitions lazily, one per first query term resident in
/// them, keeping each open for the remainder of the query.
pub struct IndexLoader {
    dir: PathBuf,
    vocabulary: HashMap<String, VocabEntry>,
    n: u64,
    tokenizer_config: TokenizerConfig,
    ranking_config: RankingConfig,
    partitions: RefCell<HashMap<u32, HashMap<String, PostingsList>>>,
}

impl IndexLoader {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let vocab_path = dir.join("vocabulary");
        if !vocab_path.exists() {
            return Err(SearchError::NotFound(dir));
        }

        let vocabulary = read_vocabulary(&vocab_path)?;
        let n = read_document_count(&dir.join("document_count"))?;
        let tokenizer_config = read_json(&dir.join("tokenizer_config"))?;
        let ranking_config = read_json(&dir.join("ranking_config"))?;

        Ok(Self {
            dir,
            vocabulary,
            n,
            tokenizer_config,
            ranking_config,
            partitions: RefCell::new(HashMap::new()),
        })
    }

    pub fn document_count(&self) -> u64 {
        self.n
    }

    pub fn tokenizer_config(&self) -> &TokenizerConfig {
        &self.tokenizer_config
    }

    pub fn ranking_config(&self) -> &RankingConfig {
        &self.ranking_config
    }

    pub fn vocabulary_entry(&self, term: &str) -> Option<VocabEntry> {
        self.vocabulary.get(term).copied()
    }

    /// Looks up a term's postings list, loading (and caching) its partition
    /// file on first access.
    pub fn postings_for(&self, term: &str) -> Result<Option<PostingsList>> {
        let entry = match self.vocabulary.get(term) {
            Some(e) => *e,
            None => return Ok(None),
        };

        if !self.partitions.borrow().contains_key(&entry.partition_id) {
            let path = self.dir.join(format!("postings_{}", entry.partition_id));
            let loaded = load_partition(&path)?;
            self.partitions.borrow_mut().insert(entry.partition_id, loaded);
        }

        Ok(self
            .partitions
            .borrow()
            .get(&entry.partition_id)
            .and_then(|p| p.get(term))
            .cloned())
    }
}

fn load_partition(path: &Path) -> Result<HashMap<String, PostingsList>> {
    let file = File::open(path).map_err(|e| SearchError::storage(path, e))?;
    let mut reader = BufReader::new(file);
    let mut map = HashMap::new();
    while let Some((term, list)) = read_record(&mut reader).map_err(|e| SearchError::storage(path, e))? {
        map.insert(term, list);
    }
    Ok(map)
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

fn read_vocabulary(path: &Path) -> Result<HashMap<String, VocabEntry>> {
    let file = File::open(path).map_err(|e| SearchError::storage(path, e))?;
    let mut reader = BufReader::new(file);
    let mut map = HashMap::new();
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(SearchError::storage(path, e)),
        }
        let term_len = u32::from_le_bytes(len_buf) as usize;
        let mut term_buf = vec![0u8; term_len];
        reader.read_exact(&mut term_buf).map_err(|e| SearchError::storage(path, e))?;
        let term = String::from_utf8(term_buf)
            .map_err(|e| SearchError::Storage {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;

        let mut df_buf = [0u8; 4];
        reader.read_exact(&mut df_buf).map_err(|e| SearchError::storage(path, e))?;
        let df = u32::from_le_bytes(df_buf);

        let mut pid_buf = [0u8; 4];
        reader.read_exact(&mut pid_buf).map_err(|e| SearchError::storage(path, e))?;
        let partition_id = u32::from_le_bytes(pid_buf);

        map.insert(term, VocabEntry { df, partition_id });
    }
    Ok(map)
}

fn read_document_count(path: &Path) -> Result<u64> {
    let text = fs::read_to_string(path).map_err(|e| SearchError::storage(path, e))?;
    text.trim()
        .parse()
        .map_err(|_| SearchError::input_format(path, 1, "document_count is not a decimal integer"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| SearchError::storage(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| SearchError::Storage {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexerConfig, RankingConfig, SmartCode, TokenizerConfig};
    use crate::tokenizer::Tokenizer;
    use tempfile::TempDir;

    fn build_s2_index(dir: &Path, ranking: RankingConfig, indexer: IndexerConfig) -> IndexStats {
        let tokenizer = Tokenizer::new(TokenizerConfig::default(), Default::default());
        let mut builder = IndexBuilder::create(dir, TokenizerConfig::default(), ranking, indexer).unwrap();
        let doc1 = tokenizer.tokenize("cat dog cat");
        builder.add_document(1, &doc1).unwrap();
        let doc2 = tokenizer.tokenize("dog bird cat");
        builder.add_document(2, &doc2).unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn p1_p2_p3_build_then_roundtrip() {
        let dir = TempDir::new().unwrap();
        let stats = build_s2_index(
            dir.path(),
            RankingConfig::tfidf(SmartCode::LncLtc),
            IndexerConfig::default(),
        );
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.vocabulary_size, 3);

        let loader = IndexLoader::open(dir.path()).unwrap();
        assert_eq!(loader.document_count(), 2);
        let cat = loader.vocabulary_entry("cat").unwrap();
        assert_eq!(cat.df, 2); // P1
        let bird = loader.vocabulary_entry("bird").unwrap();
        assert_eq!(bird.df, 1);

        // P2: every term lives in exactly one partition.
        for term in ["cat", "dog", "bird"] {
            let entry = loader.vocabulary_entry(term).unwrap();
            assert!(loader.postings_for(term).unwrap().is_some());
            assert_eq!(entry.partition_id, 0);
        }
    }

    #[test]
    fn s3_posting_threshold_one_spills_each_document_immediately() {
        let dir = TempDir::new().unwrap();
        let indexer = IndexerConfig {
            posting_threshold: Some(1),
            memory_threshold_mb: Some(256),
        };
        let stats = build_s2_index(dir.path(), RankingConfig::bm25_default(), indexer);
        assert_eq!(stats.runs_spilled, 2);
    }

    #[test]
    fn p4_threshold_monotonicity_same_content_different_run_count() {
        let dir_a = TempDir::new().unwrap();
        let stats_a = build_s2_index(dir_a.path(), RankingConfig::bm25_default(), IndexerConfig::default());

        let dir_b = TempDir::new().unwrap();
        let stats_b = build_s2_index(dir_b.path(), RankingConfig::bm25_default(), IndexerConfig::for_testing());

        assert_ne!(stats_a.runs_spilled, stats_b.runs_spilled);

        let loader_a = IndexLoader::open(dir_a.path()).unwrap();
        let loader_b = IndexLoader::open(dir_b.path()).unwrap();
        assert_eq!(loader_a.document_count(), loader_b.document_count());
        for term in ["cat", "dog", "bird"] {
            let a = loader_a.postings_for(term).unwrap().unwrap();
            let b = loader_b.postings_for(term).unwrap().unwrap();
            assert_eq!(a.doc_count(), b.doc_count());
            for doc_id in a.doc_ids() {
                assert_eq!(a.weight_of(doc_id), b.weight_of(doc_id));
            }
        }
    }

    #[test]
    fn s5_bm25_zero_idf_for_universal_term() {
        let dir = TempDir::new().unwrap();
        build_s2_index(dir.path(), RankingConfig::bm25(1.2, 0.75), IndexerConfig::default());
        let loader = IndexLoader::open(dir.path()).unwrap();
        // "cat" appears in both documents -> df == N -> zero weight.
        let cat = loader.postings_for("cat").unwrap().unwrap();
        for doc_id in cat.doc_ids() {
            assert_eq!(cat.weight_of(doc_id), Some(0.0));
        }
    }

    #[test]
    fn missing_index_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let result = IndexLoader::open(&missing);
        assert!(matches!(result, Err(SearchError::NotFound(_))));
    }
}
