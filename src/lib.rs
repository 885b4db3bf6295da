//! biomed-search: a disk-backed SPIMI full-text search engine for
//! biomedical abstracts.
//!
//! ## Core pipeline
//! - Indexing: collection reader → tokenizer → postings accumulator →
//!   (threshold trigger) → block spiller → k-way merger → weighting pass →
//!   on-disk index.
//! - Retrieval: query text → tokenizer → index loader → ranker → evaluator.

pub mod accumulator;
pub mod config;
pub mod eval;
pub mod index;
pub mod merge;
pub mod postings;
pub mod ranker;
pub mod reader;
pub mod spill;
pub mod tokenizer;
pub mod types;
pub mod weighting;

mod error;

pub use config::{IndexerConfig, RankingConfig, RankingSchema, SmartCode, StemmerKind, TokenizerConfig};
pub use error::{Result, SearchError};
pub use index::{IndexBuilder, IndexLoader, IndexStats};
pub use ranker::{Ranker, ScoredDoc};
pub use reader::{CollectionReader, Document, Question, QuestionsReader};
pub use tokenizer::Tokenizer;
