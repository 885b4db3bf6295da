//! On-disk postings-list representation: a `RoaringBitmap` of doc-ids with
//! parallel per-doc weight/position arrays, mirroring this codebase's
//! existing text-index posting representation. Doc-ids iterate in ascending
//! order by construction, which is exactly the order the k-way merge and
//! the round-trip invariant need — no separate sort step is required at
//! query or merge time.

use crate::error::Result;
use crate::types::{DocId, Position};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One document's contribution to a term's postings list. `weight` holds
/// raw term frequency until the weighting pass runs, then the final stored
/// weight (normalized TF-IDF or BM25).
#[derive(Debug, Clone, PartialEq)]
pub struct PostingEntry {
    pub weight: f64,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Default)]
pub struct PostingsList {
    doc_ids: RoaringBitmap,
    weights: Vec<f64>,
    positions: Vec<Vec<Position>>,
}

impl Serialize for PostingsList {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let ids: Vec<u32> = self.doc_ids.iter().collect();
        let mut state = serializer.serialize_struct("PostingsList", 3)?;
        state.serialize_field("doc_ids", &ids)?;
        state.serialize_field("weights", &self.weights)?;
        state.serialize_field("positions", &self.positions)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for PostingsList {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            doc_ids: Vec<u32>,
            weights: Vec<f64>,
            positions: Vec<Vec<Position>>,
        }
        let helper = Helper::deserialize(deserializer)?;
        Ok(PostingsList {
            doc_ids: RoaringBitmap::from_sorted_iter(helper.doc_ids).map_err(serde::de::Error::custom)?,
            weights: helper.weights,
            positions: helper.positions,
        })
    }
}

impl PostingsList {
    /// Builds a postings list from a doc-id-sorted map, the natural output
    /// of the in-memory accumulator (§4.3) once flushed for a single term.
    pub fn from_sorted(entries: BTreeMap<DocId, PostingEntry>) -> Self {
        let mut doc_ids = RoaringBitmap::new();
        let mut weights = Vec::with_capacity(entries.len());
        let mut positions = Vec::with_capacity(entries.len());
        for (doc_id, entry) in entries {
            doc_ids.insert(doc_id as u32);
            weights.push(entry.weight);
            positions.push(entry.positions);
        }
        Self {
            doc_ids,
            weights,
            positions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_ids.len()
    }

    /// Conservative size estimate used by the merger to decide partition
    /// cuts: a fixed per-doc overhead plus the positions actually stored.
    pub fn estimated_bytes(&self) -> usize {
        let per_doc = 16usize * self.weights.len();
        let per_position = 4usize * self.positions.iter().map(|p| p.len()).sum::<usize>();
        per_doc + per_position
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.doc_ids.iter().map(|id| id as DocId)
    }

    /// Iterates `(doc_id, weight, positions)` triples in ascending doc-id
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (DocId, f64, &[Position])> {
        self.doc_ids
            .iter()
            .map(|id| id as DocId)
            .zip(self.weights.iter().copied())
            .zip(self.positions.iter())
            .map(|((doc_id, weight), positions)| (doc_id, weight, positions.as_slice()))
    }

    pub fn weight_of(&self, doc_id: DocId) -> Option<f64> {
        let rank = self.doc_ids.rank(doc_id as u32);
        if rank == 0 || !self.doc_ids.contains(doc_id as u32) {
            return None;
        }
        self.weights.get(rank as usize - 1).copied()
    }

    pub fn positions_of(&self, doc_id: DocId) -> Option<&[Position]> {
        let rank = self.doc_ids.rank(doc_id as u32);
        if rank == 0 || !self.doc_ids.contains(doc_id as u32) {
            return None;
        }
        self.positions.get(rank as usize - 1).map(|v| v.as_slice())
    }

    pub fn set_weight(&mut self, index: usize, weight: f64) {
        self.weights[index] = weight;
    }

    /// Unions two postings lists for the same term. The doc-id sets must be
    /// disjoint — a `(term, doc_id)` pair can only ever have been produced
    /// by a single accumulator epoch, so this never needs to resolve a
    /// collision.
    pub fn merge(mut self, other: PostingsList) -> Self {
        if self.doc_ids.is_empty() {
            return other;
        }
        if other.doc_ids.is_empty() {
            return self;
        }
        let mut merged_ids = RoaringBitmap::new();
        let mut merged_weights = Vec::with_capacity(self.weights.len() + other.weights.len());
        let mut merged_positions = Vec::with_capacity(self.positions.len() + other.positions.len());

        let mut left = self.doc_ids.iter().zip(self.weights.drain(..)).zip(self.positions.drain(..));
        let mut right = other.doc_ids.iter().zip(other.weights.iter().copied()).zip(other.positions.iter().cloned());

        let mut l = left.next();
        let mut r = right.next();
        loop {
            match (&l, &r) {
                (Some(((lid, lw), lp)), Some(((rid, rw), rp))) => {
                    if lid < rid {
                        merged_ids.insert(*lid);
                        merged_weights.push(*lw);
                        merged_positions.push(lp.clone());
                        l = left.next();
                    } else {
                        merged_ids.insert(*rid);
                        merged_weights.push(*rw);
                        merged_positions.push(rp.clone());
                        r = right.next();
                    }
                }
                (Some(((lid, lw), lp)), None) => {
                    merged_ids.insert(*lid);
                    merged_weights.push(*lw);
                    merged_positions.push(lp.clone());
                    l = left.next();
                }
                (None, Some(((rid, rw), rp))) => {
                    merged_ids.insert(*rid);
                    merged_weights.push(*rw);
                    merged_positions.push(rp.clone());
                    r = right.next();
                }
                (None, None) => break,
            }
        }

        PostingsList {
            doc_ids: merged_ids,
            weights: merged_weights,
            positions: merged_positions,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(weight: f64, positions: Vec<Position>) -> PostingEntry {
        PostingEntry { weight, positions }
    }

    #[test]
    fn merge_is_sorted_union_of_disjoint_docs() {
        let mut a = BTreeMap::new();
        a.insert(1u64, entry(2.0, vec![0, 3]));
        a.insert(3u64, entry(1.0, vec![5]));
        let left = PostingsList::from_sorted(a);

        let mut b = BTreeMap::new();
        b.insert(2u64, entry(1.0, vec![1]));
        let right = PostingsList::from_sorted(b);

        let merged = left.merge(right);
        let ids: Vec<DocId> = merged.doc_ids().collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(merged.weight_of(2), Some(1.0));
    }

    #[test]
    fn roundtrip_bytes() {
        let mut a = BTreeMap::new();
        a.insert(7u64, entry(3.0, vec![0, 1, 2]));
        let list = PostingsList::from_sorted(a);
        let bytes = list.to_bytes().unwrap();
        let back = PostingsList::from_bytes(&bytes).unwrap();
        assert_eq!(back.doc_count(), 1);
        assert_eq!(back.weight_of(7), Some(3.0));
        assert_eq!(back.positions_of(7), Some(&[0, 1, 2][..]));
    }
}
