//! Shared id types threaded through accumulation, merging, and retrieval.

/// Dictionary-assigned term id (stable for the lifetime of one index build).
pub type TermId = u32;

/// Corpus-assigned document id (e.g. a PubMed id).
pub type DocId = u64;

/// 0-based ordinal of a surviving token within `title + " " + abstract`.
pub type Position = u32;
