//! Ranker (C8): term-at-a-time scoring, proximity boost, top-k selection.

use crate::config::{RankingSchema, SmartCode};
use crate::index::IndexLoader;
use crate::tokenizer::Tokenizer;
use crate::types::{DocId, Position};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

const MAX_BOOST: f64 = 2.0;
const LAMBDA: f64 = 0.007;

pub struct Ranker<'a> {
    index: &'a IndexLoader,
    tokenizer: &'a Tokenizer,
}

impl<'a> Ranker<'a> {
    pub fn new(index: &'a IndexLoader, tokenizer: &'a Tokenizer) -> Self {
        Self { index, tokenizer }
    }

    pub fn search(&self, query_text: &str, top_k: usize) -> crate::error::Result<Vec<ScoredDoc>> {
        let n = self.index.document_count();

        // Tokenize with the stored configuration, drop terms absent from
        // the vocabulary, and count raw query-side term frequency.
        let mut query_tf: HashMap<String, f64> = HashMap::new();
        for token in self.tokenizer.tokenize(query_text) {
            if self.index.vocabulary_entry(&token.text).is_some() {
                *query_tf.entry(token.text).or_insert(0.0) += 1.0;
            }
        }
        let query_terms: Vec<String> = query_tf.keys().cloned().collect();
        let num_distinct_terms = query_terms.len();
        if num_distinct_terms == 0 {
            return Ok(Vec::new());
        }

        let query_weights = self.query_weights(&query_tf, n);

        let mut scores: HashMap<DocId, f64> = HashMap::new();
        let mut match_count: HashMap<DocId, usize> = HashMap::new();
        // doc -> term_index -> ascending positions, for the proximity boost.
        let mut doc_positions: HashMap<DocId, Vec<Vec<Position>>> = HashMap::new();

        for (term_idx, term) in query_terms.iter().enumerate() {
            let q_t = query_weights[term];
            let list = match self.index.postings_for(term)? {
                Some(l) => l,
                None => continue,
            };
            for (doc_id, weight, positions) in list.iter() {
                *scores.entry(doc_id).or_insert(0.0) += q_t * weight;
                *match_count.entry(doc_id).or_insert(0) += 1;
                let slots = doc_positions
                    .entry(doc_id)
                    .or_insert_with(|| vec![Vec::new(); num_distinct_terms]);
                slots[term_idx] = positions.to_vec();
            }
        }

        for (doc_id, count) in &match_count {
            if *count == num_distinct_terms {
                if let Some(positions) = doc_positions.get(doc_id) {
                    let window = minimum_window(positions);
                    if let Some(w) = window {
                        let boost = proximity_boost(w, num_distinct_terms);
                        if let Some(score) = scores.get_mut(doc_id) {
                            *score *= boost;
                        }
                    }
                }
            }
        }

        let mut ranked: Vec<ScoredDoc> = scores
            .into_iter()
            .map(|(doc_id, score)| ScoredDoc { doc_id, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    fn query_weights(&self, query_tf: &HashMap<String, f64>, n: u64) -> HashMap<String, f64> {
        let schema = self.index.ranking_config().schema;
        let mut weights = HashMap::new();

        match schema {
            RankingSchema::TfIdf { smart } => {
                for (term, tf) in query_tf {
                    let df = self.index.vocabulary_entry(term).map(|e| e.df).unwrap_or(1).max(1);
                    let w = match smart {
                        SmartCode::LncLtc => {
                            let l = 1.0 + tf.log10();
                            let t = (n as f64 / df as f64).log10();
                            l * t
                        }
                        SmartCode::LncNpc => {
                            let ratio = (n as f64 - df as f64) / df as f64;
                            let t = if ratio >= 1.0 { ratio.log10() } else { 1e-10 };
                            tf * t
                        }
                    };
                    weights.insert(term.clone(), w);
                }
                let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for w in weights.values_mut() {
                        *w /= norm;
                    }
                }
            }
            RankingSchema::Bm25 { k1, .. } => {
                // b is taken to be 0 on the query side.
                for (term, tf) in query_tf {
                    let df = self.index.vocabulary_entry(term).map(|e| e.df).unwrap_or(1).max(1);
                    let idf = (n as f64 / df as f64).log10();
                    let k1 = k1 as f64;
                    let w = idf * ((k1 + 1.0) * tf) / (k1 + tf);
                    weights.insert(term.clone(), w);
                }
            }
        }
        weights
    }
}

/// Linear-time sliding window over the merged, sorted `(position, term)`
/// event stream, replacing the exponential enumerate-all-tuples approach:
/// the smallest window (max - min) containing at least one occurrence of
/// every term list is found with two pointers over the merged stream, not
/// by trying every combination of positions.
fn minimum_window(per_term_positions: &[Vec<Position>]) -> Option<u32> {
    let k = per_term_positions.len();
    if per_term_positions.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut events: Vec<(Position, usize)> = Vec::new();
    for (term_idx, positions) in per_term_positions.iter().enumerate() {
        for &p in positions {
            events.push((p, term_idx));
        }
    }
    events.sort_by_key(|(p, _)| *p);

    let mut counts = vec![0usize; k];
    let mut distinct = 0usize;
    let mut left = 0usize;
    let mut best: Option<u32> = None;

    for right in 0..events.len() {
        let (_, term) = events[right];
        if counts[term] == 0 {
            distinct += 1;
        }
        counts[term] += 1;

        while distinct == k {
            let window = events[right].0 - events[left].0;
            best = Some(best.map_or(window, |b| b.min(window)));

            let (_, left_term) = events[left];
            counts[left_term] -= 1;
            if counts[left_term] == 0 {
                distinct -= 1;
            }
            left += 1;
        }
    }

    best
}

fn proximity_boost(window: u32, k: usize) -> f64 {
    if window as usize == k {
        MAX_BOOST
    } else {
        (MAX_BOOST * (-LAMBDA * window as f64).exp()).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p9_boost_is_bounded() {
        for w in [0u32, 1, 2, 5, 10, 100, 1000] {
            let b = proximity_boost(w, 2);
            assert!((1.0..=MAX_BOOST).contains(&b), "boost {b} out of [1, {MAX_BOOST}] for window {w}");
        }
    }

    #[test]
    fn boost_is_max_when_window_equals_k() {
        assert_eq!(proximity_boost(3, 3), MAX_BOOST);
    }

    #[test]
    fn minimum_window_matches_brute_force_small_case() {
        // term 0 at [0, 10], term 1 at [1, 20] -> best window uses 0 and 1 -> window 1
        let positions = vec![vec![0, 10], vec![1, 20]];
        assert_eq!(minimum_window(&positions), Some(1));
    }

    #[test]
    fn minimum_window_none_when_a_term_never_matched() {
        let positions = vec![vec![0, 1], vec![]];
        assert_eq!(minimum_window(&positions), None);
    }

    #[test]
    fn s4_adjacent_terms_yield_smaller_window_than_distant() {
        // doc 1: "cat"@0 "dog"@1 -> window 1; doc 2: "dog"@0 ... "cat"@2 -> window 2
        let doc1 = vec![vec![0], vec![1]];
        let doc2 = vec![vec![2], vec![0]];
        let w1 = minimum_window(&doc1).unwrap();
        let w2 = minimum_window(&doc2).unwrap();
        assert!(w1 <= w2);
    }
}
