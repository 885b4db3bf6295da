//! Tokenizer, ranking and indexer configuration.
//!
//! Struct-of-options with `Default` plus named preset constructors, the same
//! shape configuration has taken throughout this codebase's history: a
//! caller can build a config field-by-field or reach for a preset that
//! matches a known workload.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which stemmer to apply as the last step of the tokenizer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StemmerKind {
    /// No stemming: surviving tokens are passed through unchanged.
    None,
    Porter,
    SnowballEnglish,
}

/// Tokenizer pipeline configuration. Persisted alongside the index so the
/// searcher cannot accidentally diverge from what the indexer used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Tokens shorter than this (in characters) are dropped. `None` disables
    /// the length filter.
    pub min_length: Option<usize>,
    /// Path to a newline-delimited stopword file.
    pub stopwords_path: Option<PathBuf>,
    /// CRC32 digest of the stopword file's bytes, filled in by
    /// `Tokenizer::from_config` and persisted alongside the index (§6, §7).
    /// A searcher whose stopword file no longer hashes to this value has
    /// diverged from the indexer and is rejected with `Configuration`,
    /// rather than silently producing a different token stream.
    pub stopwords_digest: Option<u32>,
    pub stemmer: StemmerKind,
    pub case_folding: bool,
    pub allow_numbers: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_length: None,
            stopwords_path: None,
            stopwords_digest: None,
            stemmer: StemmerKind::None,
            case_folding: true,
            allow_numbers: false,
        }
    }
}

impl TokenizerConfig {
    /// The configuration this engine's corpus was tuned against: short
    /// tokens and bare numbers dropped, case-folded, no stemming by default.
    pub fn pubmed_default() -> Self {
        Self {
            min_length: Some(3),
            stopwords_path: None,
            stopwords_digest: None,
            stemmer: StemmerKind::None,
            case_folding: true,
            allow_numbers: false,
        }
    }
}

/// Tokenizer fields a caller may explicitly override, merged over a base
/// `TokenizerConfig`. Replaces any notion of a global "was this flag
/// CLI-supplied" recorder: the driver builds this explicitly from whatever
/// flags the caller actually passed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialTokenizerConfig {
    pub min_length: Option<usize>,
    pub stopwords_path: Option<PathBuf>,
    pub stemmer: Option<StemmerKind>,
    pub case_folding: Option<bool>,
    pub allow_numbers: Option<bool>,
}

/// Merge rule: CLI overrides persisted, persisted overrides built-in
/// default. Encoded once, here, rather than scattered across callers.
///
/// A CLI-supplied `stopwords_path` invalidates any inherited digest — it
/// names a different file, so the old digest no longer means anything.
/// `Tokenizer::from_config` recomputes it from whatever file is now in
/// effect.
pub fn merge_tokenizer_config(base: TokenizerConfig, over: PartialTokenizerConfig) -> TokenizerConfig {
    let path_overridden = over.stopwords_path.is_some();
    TokenizerConfig {
        min_length: over.min_length.or(base.min_length),
        stopwords_path: over.stopwords_path.or(base.stopwords_path),
        stopwords_digest: if path_overridden { None } else { base.stopwords_digest },
        stemmer: over.stemmer.unwrap_or(base.stemmer),
        case_folding: over.case_folding.unwrap_or(base.case_folding),
        allow_numbers: over.allow_numbers.unwrap_or(base.allow_numbers),
    }
}

/// The SMART weighting variant for TF-IDF, document-side · query-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmartCode {
    /// log-tf, no-idf, cosine-norm (doc) · log-tf, idf, cosine-norm (query).
    LncLtc,
    /// log-tf, no-idf, cosine-norm (doc) · raw-tf, prob-idf, cosine-norm (query).
    LncNpc,
}

/// Which weighting scheme to precompute into postings, and its parameters.
/// A tagged variant replacing the source's reflective ranker class lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RankingSchema {
    TfIdf { smart: SmartCode },
    Bm25 { k1: f32, b: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub schema: RankingSchema,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            schema: RankingSchema::TfIdf {
                smart: SmartCode::LncLtc,
            },
        }
    }
}

impl RankingConfig {
    pub fn tfidf(smart: SmartCode) -> Self {
        Self {
            schema: RankingSchema::TfIdf { smart },
        }
    }

    /// Okapi BM25 with the usual textbook defaults.
    pub fn bm25_default() -> Self {
        Self {
            schema: RankingSchema::Bm25 { k1: 1.2, b: 0.75 },
        }
    }

    pub fn bm25(k1: f32, b: f32) -> Self {
        Self {
            schema: RankingSchema::Bm25 { k1, b },
        }
    }
}

/// Indexer thresholds controlling block spilling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Spill after this many documents since the last spill. `None` disables
    /// the document-count trigger; the memory trigger still applies.
    pub posting_threshold: Option<usize>,
    /// User-supplied ceiling on accumulator memory, in megabytes. The
    /// effective threshold is the minimum of this and 70% of free RAM at
    /// startup.
    pub memory_threshold_mb: Option<usize>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            posting_threshold: None,
            memory_threshold_mb: Some(256),
        }
    }
}

impl IndexerConfig {
    /// Spill aggressively; useful for exercising the merge path in tests.
    pub fn for_testing() -> Self {
        Self {
            posting_threshold: Some(1),
            memory_threshold_mb: Some(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_override_then_base() {
        let base = TokenizerConfig::pubmed_default();
        let over = PartialTokenizerConfig {
            case_folding: Some(false),
            ..Default::default()
        };
        let merged = merge_tokenizer_config(base.clone(), over);
        assert!(!merged.case_folding);
        assert_eq!(merged.min_length, base.min_length);
    }

    #[test]
    fn ranking_presets() {
        assert_eq!(
            RankingConfig::bm25_default().schema,
            RankingSchema::Bm25 { k1: 1.2, b: 0.75 }
        );
    }
}
