//! Weighting pass (C6), BM25 half: a second pass over merged partitions
//! once corpus statistics (`N`, `avdl`, per-document length) are known.
//! Rewrites raw tf in place; each partition file is replaced atomically
//! (write to temp, rename) so a crash mid-rewrite never leaves a
//! half-written partition masquerading as the final one.
//!
//! The TF-IDF half of the weighting pass runs earlier, inside the
//! accumulator at per-document granularity (see `accumulator::normalize_document_tfidf`),
//! because every quantity it needs is local to one document.

use crate::error::{Result, SearchError};
use crate::postings::PostingsList;
use crate::types::DocId;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// `w = log10(N/df) · ((k1+1)·tf) / (k1·((1-b) + b·dl(d)/avdl) + tf)`
pub fn bm25_weight(n: u64, df: u32, tf: f64, dl: u32, avdl: f64, k1: f32, b: f32) -> f64 {
    let idf = (n as f64 / df as f64).log10();
    let k1 = k1 as f64;
    let b = b as f64;
    let norm = (1.0 - b) + b * (dl as f64 / avdl);
    idf * ((k1 + 1.0) * tf) / (k1 * norm + tf)
}

/// Rewrites every posting's raw tf into its BM25 weight, in place, for one
/// partition file. `vocab_df` and `doc_lengths` must already reflect the
/// fully merged corpus.
pub fn rewrite_partition_bm25(
    path: &Path,
    n: u64,
    avdl: f64,
    doc_lengths: &HashMap<DocId, u32>,
    vocab_df: &HashMap<String, u32>,
    k1: f32,
    b: f32,
) -> Result<()> {
    let file = File::open(path).map_err(|e| SearchError::storage(path, e))?;
    let mut reader = BufReader::new(file);
    let mut rewritten = Vec::new();

    while let Some((term, list)) = read_record(&mut reader).map_err(|e| SearchError::storage(path, e))? {
        let df = *vocab_df
            .get(&term)
            .ok_or_else(|| SearchError::Storage {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("term `{term}` missing from vocabulary"),
                ),
            })?;
        let mut list = list;
        let doc_ids: Vec<DocId> = list.doc_ids().collect();
        for (i, doc_id) in doc_ids.into_iter().enumerate() {
            let tf = list.weight_of(doc_id).expect("doc_id came from this list");
            let dl = *doc_lengths.get(&doc_id).unwrap_or(&1);
            let w = bm25_weight(n, df, tf, dl, avdl, k1, b);
            list.set_weight(i, w);
        }
        rewritten.push((term, list));
    }

    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path).map_err(|e| SearchError::storage(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        for (term, list) in &rewritten {
            write_record(&mut writer, term, list).map_err(|e| SearchError::storage(&tmp_path, e))?;
        }
        writer.flush().map_err(|e| SearchError::storage(&tmp_path, e))?;
        writer
            .into_inner()
            .map_err(|e| SearchError::storage(&tmp_path, e.into_error()))?
            .sync_all()
            .map_err(|e| SearchError::storage(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| SearchError::storage(path, e))?;
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

fn read_record(reader: &mut impl std::io::Read) -> std::io::Result<Option<(String, PostingsList)>> {
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

    #[test]
    fn s5_zero_idf_term_does_not_crash() {
        // df == N -> log10(N/df) == 0, weight must be exactly zero, not NaN.
        let w = bm25_weight(2, 2, 2.0, 2, 1.5, 1.2, 0.75);
        assert_eq!(w, 0.0);
    }

    #[test]
    fn p7_rewrite_is_idempotent_is_not_assumed() {
        // A single rewrite from raw tf produces a finite, well-defined weight.
        let w = bm25_weight(10, 3, 4.0, 5, 4.0, 1.2, 0.75);
        assert!(w.is_finite());
        assert!(w > 0.0);
    }
}
