//! In-memory postings accumulator (C3): `term -> doc_id -> {weight, positions}`
//! plus a parallel `term -> df` vocabulary, reified as one owning structure
//! per spec.md §9's "mutually recursive index ↔ postings" redesign note —
//! there is no separate pair of maps that could drift out of sync.

use crate::config::{RankingSchema, SmartCode};
use crate::error::{Result, SearchError};
use crate::postings::PostingEntry;
use crate::tokenizer::Token;
use crate::types::DocId;
use std::collections::{BTreeMap, HashMap};

/// Rough per-entry overhead (map bucket + Vec header + String) used by
/// `estimated_bytes`. Conservative on purpose: the block spiller doubles
/// this estimate before comparing against the memory threshold, so erring
/// high here only triggers spills a little earlier than strictly necessary.
const BYTES_PER_POSTING: usize = 48;
const BYTES_PER_POSITION: usize = 4;
const BYTES_PER_VOCAB_ENTRY: usize = 56;

/// Estimates the in-memory footprint of one document's postings in
/// isolation, using the same per-entry cost model as `estimated_bytes`, so
/// the two stay comparable against the same threshold.
fn estimate_document_bytes(tokens: &[Token]) -> usize {
    let mut per_term: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *per_term.entry(token.text.as_str()).or_insert(0) += 1;
    }
    per_term
        .into_iter()
        .map(|(term, tf)| term.len() + BYTES_PER_VOCAB_ENTRY + BYTES_PER_POSTING + tf * BYTES_PER_POSITION)
        .sum()
}

pub struct PostingsAccumulator {
    postings: HashMap<String, BTreeMap<DocId, PostingEntry>>,
    vocab: HashMap<String, u32>,
    documents_since_last_spill: usize,
}

impl Default for PostingsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl PostingsAccumulator {
    pub fn new() -> Self {
        Self {
            postings: HashMap::new(),
            vocab: HashMap::new(),
            documents_since_last_spill: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn documents_since_last_spill(&self) -> usize {
        self.documents_since_last_spill
    }

    /// Consumes one document's token stream, then — for `tfidf` only —
    /// applies per-document cosine normalization (§4.6) in place, since
    /// every quantity it needs is local to this document.
    ///
    /// `memory_threshold` is the same effective threshold the block spiller
    /// compares its doubled running estimate against (§4.4, §7). A single
    /// document whose own doubled estimate alone exceeds it can never be
    /// accumulated within budget no matter how aggressively the accumulator
    /// spills around it, so it is rejected up front rather than merged in.
    pub fn add_document(
        &mut self,
        doc_id: DocId,
        tokens: &[Token],
        ranking: &RankingSchema,
        memory_threshold: usize,
    ) -> Result<()> {
        let document_bytes = estimate_document_bytes(tokens);
        if 2 * document_bytes > memory_threshold {
            return Err(SearchError::Resource(format!(
                "document {doc_id} alone needs an estimated {document_bytes} bytes, too large to index within the configured memory budget"
            )));
        }

        for token in tokens {
            let entry_map = self.postings.entry(token.text.clone()).or_default();
            match entry_map.get_mut(&doc_id) {
                Some(entry) => {
                    entry.weight += 1.0;
                    entry.positions.push(token.position);
                }
                None => {
                    entry_map.insert(
                        doc_id,
                        PostingEntry {
                            weight: 1.0,
                            positions: vec![token.position],
                        },
                    );
                    *self.vocab.entry(token.text.clone()).or_insert(0) += 1;
                }
            }
        }

        self.documents_since_last_spill += 1;

        if let RankingSchema::TfIdf { smart: SmartCode::LncLtc | SmartCode::LncNpc } = ranking {
            self.normalize_document_tfidf(doc_id);
        }

        Ok(())
    }

    /// `lnc` document-side weighting: `l = 1 + log10(tf)`, no idf, then
    /// cosine-normalize across every term touched by this document.
    fn normalize_document_tfidf(&mut self, doc_id: DocId) {
        let mut l_values: Vec<(String, f64)> = Vec::new();
        for (term, docs) in self.postings.iter() {
            if let Some(entry) = docs.get(&doc_id) {
                let l = 1.0 + entry.weight.log10();
                l_values.push((term.clone(), l));
            }
        }
        let norm = (l_values.iter().map(|(_, l)| l * l).sum::<f64>()).sqrt();
        if norm == 0.0 {
            return;
        }
        for (term, l) in l_values {
            if let Some(entry) = self
                .postings
                .get_mut(&term)
                .and_then(|docs| docs.get_mut(&doc_id))
            {
                entry.weight = l / norm;
            }
        }
    }

    /// Conservative upper bound on the in-memory size of `postings`.
    pub fn estimated_bytes(&self) -> usize {
        let mut total = 0usize;
        for (term, docs) in &self.postings {
            total += term.len() + BYTES_PER_VOCAB_ENTRY;
            for entry in docs.values() {
                total += BYTES_PER_POSTING + entry.positions.len() * BYTES_PER_POSITION;
            }
        }
        total
    }

    /// Drains the accumulator, returning its contents sorted ascending by
    /// term — the shape a run file or the final (unspilled) partition both
    /// need — and resets all bookkeeping.
    pub fn drain_sorted(&mut self) -> Vec<(String, BTreeMap<DocId, PostingEntry>)> {
        self.documents_since_last_spill = 0;
        self.vocab.clear();
        let mut drained: Vec<(String, BTreeMap<DocId, PostingEntry>)> = self.postings.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    pub fn document_frequency(&self, term: &str) -> u32 {
        self.vocab.get(term).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Token;

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
    fn s2_tiny_index_tfidf_norm() {
        let mut acc = PostingsAccumulator::new();
        let ranking = RankingSchema::TfIdf { smart: SmartCode::LncLtc };
        acc.add_document(1, &tokens(&["cat", "dog", "cat"]), &ranking, usize::MAX).unwrap();
        acc.add_document(2, &tokens(&["dog", "bird", "cat"]), &ranking, usize::MAX).unwrap();

        assert_eq!(acc.document_frequency("cat"), 2);
        assert_eq!(acc.document_frequency("dog"), 2);
        assert_eq!(acc.document_frequency("bird"), 1);

        let drained = acc.drain_sorted();
        let cat = drained.iter().find(|(t, _)| t == "cat").unwrap();
        let doc1_weight = cat.1.get(&1).unwrap().weight;
        // doc 1: cat tf=2, dog tf=1 -> l(cat)=1+log10(2), l(dog)=1
        let l_cat = 1.0 + 2f64.log10();
        let l_dog = 1.0;
        let norm = (l_cat * l_cat + l_dog * l_dog).sqrt();
        assert!((doc1_weight - l_cat / norm).abs() < 1e-9);
    }

    #[test]
    fn p6_cosine_norm_is_unit_length() {
        let mut acc = PostingsAccumulator::new();
        let ranking = RankingSchema::TfIdf { smart: SmartCode::LncLtc };
        acc.add_document(1, &tokens(&["cat", "dog", "cat", "bird", "bird", "bird"]), &ranking, usize::MAX)
            .unwrap();
        let drained = acc.drain_sorted();
        let sum_sq: f64 = drained
            .iter()
            .filter_map(|(_, docs)| docs.get(&1))
            .map(|e| e.weight * e.weight)
            .sum();
        assert!((sum_sq - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bm25_schema_leaves_raw_tf() {
        let mut acc = PostingsAccumulator::new();
        let ranking = RankingSchema::Bm25 { k1: 1.2, b: 0.75 };
        acc.add_document(1, &tokens(&["cat", "cat", "dog"]), &ranking, usize::MAX).unwrap();
        let drained = acc.drain_sorted();
        let cat = drained.iter().find(|(t, _)| t == "cat").unwrap();
        assert_eq!(cat.1.get(&1).unwrap().weight, 2.0);
    }

    #[test]
    fn oversized_single_document_is_rejected_against_configured_threshold() {
        let mut acc = PostingsAccumulator::new();
        let ranking = RankingSchema::Bm25 { k1: 1.2, b: 0.75 };
        let words = vec!["cat"; 1000];
        let result = acc.add_document(1, &tokens(&words), &ranking, 16);
        assert!(matches!(result, Err(SearchError::Resource(_))));
        assert!(acc.is_empty(), "rejected document must not be merged in");
    }

    #[test]
    fn document_within_threshold_is_accepted() {
        let mut acc = PostingsAccumulator::new();
        let ranking = RankingSchema::Bm25 { k1: 1.2, b: 0.75 };
        acc.add_document(1, &tokens(&["cat", "dog"]), &ranking, 1_000_000).unwrap();
        assert!(!acc.is_empty());
    }
}
