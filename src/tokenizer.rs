//! Deterministic text → token sequence, shared bit-for-bit between indexer
//! and searcher (C1).
//!
//! Pipeline per raw token, split on any non-word character:
//! 1. drop if shorter than `min_length`
//! 2. drop if entirely numeric and numbers are disallowed
//! 3. case-fold
//! 4. drop if a stopword
//! 5. stem
//!
//! Dropped tokens do not consume a position: `position` is the ordinal of
//! the *surviving* token, not the raw split ordinal. This is exactly what
//! the proximity boost computes its windows over, and indexer/searcher must
//! agree on it bit-for-bit.

use crate::config::{StemmerKind, TokenizerConfig};
use crate::error::{Result, SearchError};
use crate::types::Position;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: Position,
}

/// Loads a newline-delimited stopword file. Blank lines and `#`-prefixed
/// comments are ignored.
pub fn load_stopwords(path: &Path) -> Result<HashSet<String>> {
    let contents = fs::read_to_string(path).map_err(|e| SearchError::storage(path, e))?;
    Ok(contents
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_lowercase())
        .collect())
}

/// CRC32 digest of a stopword file's raw bytes, used to detect a searcher
/// whose stopword file has drifted from what the indexer used (§6, §7).
pub fn compute_stopwords_digest(path: &Path) -> Result<u32> {
    let bytes = fs::read(path).map_err(|e| SearchError::storage(path, e))?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes);
    Ok(hasher.finalize())
}

/// The in-scope tokenization contract: configuration plus a resolved
/// stopword set and stemmer instance.
pub struct Tokenizer {
    config: TokenizerConfig,
    stopwords: HashSet<String>,
    stemmer: Option<Stemmer>,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig, stopwords: HashSet<String>) -> Self {
        let stemmer = match config.stemmer {
            StemmerKind::None => None,
            StemmerKind::Porter => Some(Stemmer::create(Algorithm::English)),
            StemmerKind::SnowballEnglish => Some(Stemmer::create(Algorithm::English)),
        };
        Self {
            config,
            stopwords,
            stemmer,
        }
    }

    /// Builds a tokenizer from config alone, loading the stopword file (if
    /// any) from disk. This is the loading step spec.md explicitly keeps out
    /// of the tokenizer's in-scope contract; the contract itself — the
    /// `tokenize` pipeline below — is in scope.
    ///
    /// If `config.stopwords_digest` is already set (a persisted index's
    /// config, loaded back for search), the freshly computed digest must
    /// match it — otherwise the stopword file has changed since the index
    /// was built and the searcher would silently tokenize differently than
    /// the indexer did.
    pub fn from_config(mut config: TokenizerConfig) -> Result<Self> {
        let (stopwords, digest) = match &config.stopwords_path {
            Some(path) => (load_stopwords(path)?, Some(compute_stopwords_digest(path)?)),
            None => (HashSet::new(), None),
        };

        if let (Some(expected), Some(actual)) = (config.stopwords_digest, digest) {
            if expected != actual {
                return Err(SearchError::Configuration(format!(
                    "stopword file {:?} has digest {actual:08x}, but the index was built against digest {expected:08x}; searcher and indexer have diverged",
                    config.stopwords_path
                )));
            }
        }
        config.stopwords_digest = digest;

        Ok(Self::new(config, stopwords))
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut position: Position = 0;
        text.split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|raw| !raw.is_empty())
            .filter_map(|raw| self.apply_pipeline(raw))
            .map(|text| {
                let tok = Token {
                    text,
                    position,
                };
                position += 1;
                tok
            })
            .collect()
    }

    fn apply_pipeline(&self, raw: &str) -> Option<String> {
        if let Some(min_len) = self.config.min_length {
            if raw.chars().count() < min_len {
                return None;
            }
        }

        let is_numeric = !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit());
        if is_numeric && !self.config.allow_numbers {
            return None;
        }

        let folded = if self.config.case_folding {
            raw.to_lowercase()
        } else {
            raw.to_string()
        };

        if self.stopwords.contains(&folded) {
            return None;
        }

        let stemmed = match &self.stemmer {
            Some(stemmer) => stemmer.stem(&folded).into_owned(),
            None => folded,
        };

        Some(stemmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;

    fn tokenizer(stopwords: &[&str]) -> Tokenizer {
        let config = TokenizerConfig {
            min_length: Some(3),
            stopwords_path: None,
            stopwords_digest: None,
            stemmer: StemmerKind::None,
            case_folding: true,
            allow_numbers: false,
        };
        Tokenizer::new(config, stopwords.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn s1_tokenizer_scenario() {
        let tok = tokenizer(&["in"]);
        let tokens = tok.tokenize("Heart-attack risks in 2020 patients");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        let positions: Vec<Position> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(texts, vec!["heart", "attack", "risks", "patients"]);
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn numeric_tokens_dropped_by_default() {
        let tok = tokenizer(&[]);
        let tokens = tok.tokenize("room 404 error");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["room", "error"]);
    }

    #[test]
    fn allow_numbers_keeps_numeric_tokens() {
        let config = TokenizerConfig {
            min_length: None,
            stopwords_path: None,
            stopwords_digest: None,
            stemmer: StemmerKind::None,
            case_folding: true,
            allow_numbers: true,
        };
        let tok = Tokenizer::new(config, HashSet::new());
        let tokens = tok.tokenize("year 2020");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["year", "2020"]);
    }

    #[test]
    fn determinism_across_runs() {
        let tok = tokenizer(&["in"]);
        let a = tok.tokenize("Heart-attack risks in 2020 patients");
        let b = tok.tokenize("Heart-attack risks in 2020 patients");
        assert_eq!(a, b);
    }

    #[test]
    fn from_config_fills_in_stopwords_digest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stopwords.txt");
        std::fs::write(&path, "in\nthe\n").unwrap();

        let config = TokenizerConfig {
            stopwords_path: Some(path),
            ..TokenizerConfig::default()
        };
        let tok = Tokenizer::from_config(config).unwrap();
        assert!(tok.config().stopwords_digest.is_some());
    }

    #[test]
    fn changed_stopwords_file_is_rejected_as_configuration_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stopwords.txt");
        std::fs::write(&path, "in\nthe\n").unwrap();

        let built = Tokenizer::from_config(TokenizerConfig {
            stopwords_path: Some(path.clone()),
            ..TokenizerConfig::default()
        })
        .unwrap();
        let persisted = built.config().clone();

        std::fs::write(&path, "in\nthe\nand\n").unwrap();

        let result = Tokenizer::from_config(persisted);
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }
}
