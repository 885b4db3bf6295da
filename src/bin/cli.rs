//! Thin operational surface over the library: two modes, index-build and
//! search. Argument grouping itself is out of scope for the core — this is
//! just enough plumbing to drive it end to end.

use biomed_search::{
    CollectionReader, IndexBuilder, IndexLoader, IndexerConfig, Question, QuestionsReader,
    RankingConfig, SmartCode, Tokenizer, TokenizerConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "biomed-search-cli", version, about = "Disk-backed biomedical abstract search engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an on-disk index from a gzip-compressed collection.
    IndexBuild {
        /// Path to the gzip-compressed, line-delimited JSON collection.
        collection: PathBuf,
        /// Directory the index is written into.
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value = "tfidf")]
        schema: SchemaArg,
        #[arg(long, default_value_t = 1.2)]
        k1: f32,
        #[arg(long, default_value_t = 0.75)]
        b: f32,
        #[arg(long)]
        posting_threshold: Option<usize>,
        #[arg(long)]
        memory_threshold_mb: Option<usize>,
    },
    /// Answer queries against a built index, writing ranked results and
    /// evaluation metrics.
    Search {
        /// Index directory produced by `index-build`.
        index: PathBuf,
        /// Path to the plain-text, line-delimited JSON questions file.
        questions: PathBuf,
        /// Output file for per-query ranked results.
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaArg {
    Tfidf,
    Bm25,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::IndexBuild {
            collection,
            output,
            schema,
            k1,
            b,
            posting_threshold,
            memory_threshold_mb,
        } => {
            let ranking = match schema {
                SchemaArg::Tfidf => RankingConfig::tfidf(SmartCode::LncLtc),
                SchemaArg::Bm25 => RankingConfig::bm25(k1, b),
            };
            let indexer = IndexerConfig {
                posting_threshold,
                memory_threshold_mb: memory_threshold_mb.or(Some(256)),
            };
            run_index_build(&collection, &output, ranking, indexer)?;
        }
        Command::Search {
            index,
            questions,
            output,
            top_k,
        } => {
            run_search(&index, &questions, &output, top_k)?;
        }
    }
    Ok(())
}

fn run_index_build(
    collection: &PathBuf,
    output: &PathBuf,
    ranking: RankingConfig,
    indexer: IndexerConfig,
) -> anyhow::Result<()> {
    let tokenizer = Tokenizer::from_config(TokenizerConfig::pubmed_default())?;
    let mut builder = IndexBuilder::create(output, tokenizer.config().clone(), ranking, indexer)?;

    for doc in CollectionReader::open(collection)? {
        let doc = doc?;
        let text = format!("{} {}", doc.title, doc.abstract_text);
        let tokens = tokenizer.tokenize(&text);
        builder.add_document(doc.pmid, &tokens)?;
    }

    let stats = builder.finish()?;
    tracing::info!(
        documents = stats.document_count,
        vocabulary = stats.vocabulary_size,
        partitions = stats.partition_count,
        "index build finished"
    );
    Ok(())
}

fn run_search(index: &PathBuf, questions: &PathBuf, output: &PathBuf, top_k: usize) -> anyhow::Result<()> {
    let loader = IndexLoader::open(index)?;
    let tokenizer = Tokenizer::from_config(loader.tokenizer_config().clone())?;
    let ranker = biomed_search::Ranker::new(&loader, &tokenizer);

    let mut out = std::fs::File::create(output)?;
    for question in QuestionsReader::open(questions)? {
        let question: Question = question?;
        let ranked = ranker.search(&question.query_text, top_k)?;

        let relevant: HashSet<u64> = question
            .documents_pmid
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        let ranked_ids: Vec<u64> = ranked.iter().map(|r| r.doc_id).collect();
        let metrics = biomed_search::eval::evaluate(&ranked_ids, &relevant);

        let line = serde_json::json!({
            "query_id": question.query_id,
            "ranked": ranked.iter().map(|r| serde_json::json!({"doc_id": r.doc_id, "score": r.score})).collect::<Vec<_>>(),
            "precision": metrics.precision,
            "recall": metrics.recall,
            "average_precision": metrics.average_precision,
            "f_measure": metrics.f_measure,
        });
        writeln!(out, "{line}")?;
    }
    Ok(())
}
