//! Evaluator (C9): precision@k, recall, average precision, F-measure
//! against a relevance judgement set. Per-query only; no macro-averaging in
//! the core.

use crate::types::DocId;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalResult {
    pub precision: f64,
    pub recall: f64,
    pub average_precision: f64,
    pub f_measure: f64,
}

/// Evaluates a ranked list (already truncated to the cutoff `k`) against a
/// relevance judgement set.
pub fn evaluate(ranked: &[DocId], relevant: &HashSet<DocId>) -> EvalResult {
    let mut tp = 0usize;
    let mut precision_at_relevant_ranks = Vec::new();

    for (i, doc_id) in ranked.iter().enumerate() {
        if relevant.contains(doc_id) {
            tp += 1;
            precision_at_relevant_ranks.push(tp as f64 / (i + 1) as f64);
        }
    }

    let retrieved = ranked.len();
    let fp = retrieved - tp;
    let precision = if tp + fp == 0 { 0.0 } else { tp as f64 / (tp + fp) as f64 };
    let recall = if relevant.is_empty() { 0.0 } else { tp as f64 / relevant.len() as f64 };
    let average_precision = if relevant.is_empty() {
        0.0
    } else {
        precision_at_relevant_ranks.iter().sum::<f64>() / relevant.len() as f64
    };
    let f_measure = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    EvalResult {
        precision,
        recall,
        average_precision,
        f_measure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_evaluation_scenario() {
        let ranked = vec![1, 3, 2, 4];
        let relevant: HashSet<DocId> = [2, 3].into_iter().collect();
        let result = evaluate(&ranked, &relevant);

        assert_eq!(result.precision, 0.5);
        assert_eq!(result.recall, 1.0);
        assert!((result.average_precision - 0.5833333333333334).abs() < 1e-9);
        assert!((result.f_measure - 0.6666666666666666).abs() < 1e-9);
    }

    #[test]
    fn no_relevant_documents_yields_zero_recall_and_ap() {
        let ranked = vec![1, 2, 3];
        let relevant: HashSet<DocId> = HashSet::new();
        let result = evaluate(&ranked, &relevant);
        assert_eq!(result.recall, 0.0);
        assert_eq!(result.average_precision, 0.0);
    }

    #[test]
    fn empty_ranked_list_yields_zero_precision() {
        let ranked: Vec<DocId> = Vec::new();
        let relevant: HashSet<DocId> = [1].into_iter().collect();
        let result = evaluate(&ranked, &relevant);
        assert_eq!(result.precision, 0.0);
        assert_eq!(result.f_measure, 0.0);
    }
}
