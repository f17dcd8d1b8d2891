//! Record fingerprinting and dedup checks
//!
//! A fingerprint is a SHA-256 digest over the normalized title and validity
//! window, scoped by source id. The result sink is the authoritative index of
//! fingerprints already persisted for each source.

use crate::extract::text::normalize_key;
use crate::extract::CandidateRecord;
use crate::storage::{ResultSink, StorageResult};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Separates hashed fields so adjacent values cannot run together
const FIELD_SEPARATOR: u8 = 0x1f;

/// Computes the stable dedup token for a record
///
/// Only normalized semantic fields enter the hash: case and incidental
/// whitespace in the title do not change the token.
pub fn fingerprint(record: &CandidateRecord, source_id: &str) -> String {
    let title = record.title.as_deref().map(normalize_key).unwrap_or_default();
    let start = record.valid_from.map(|d| d.to_string()).unwrap_or_default();
    let end = record.valid_until.map(|d| d.to_string()).unwrap_or_default();

    let mut hasher = Sha256::new();
    for field in [source_id, title.as_str(), start.as_str(), end.as_str()] {
        hasher.update(field.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }
    hex::encode(hasher.finalize())
}

/// Dedup checks backed by a result sink
#[derive(Clone)]
pub struct Deduplicator {
    sink: Arc<dyn ResultSink>,
}

impl Deduplicator {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self { sink }
    }

    /// Returns true if `token` has never been sunk for `source_id`
    pub async fn is_new(&self, source_id: &str, token: &str) -> StorageResult<bool> {
        Ok(!self.sink.exists_fingerprint(source_id, token).await?)
    }

    /// Keeps the records that are new for this source, paired with their tokens
    ///
    /// Repeats within the batch count as seen after their first occurrence.
    ///
    /// # Returns
    ///
    /// * `Ok((fresh, seen))` - New records in input order, and the number of
    ///   records already known
    /// * `Err(StorageError)` - The existence check failed
    pub async fn partition(
        &self,
        source_id: &str,
        records: Vec<CandidateRecord>,
    ) -> StorageResult<(Vec<(String, CandidateRecord)>, usize)> {
        let mut batch = HashSet::new();
        let mut fresh = Vec::new();
        let mut seen = 0;

        for record in records {
            let token = fingerprint(&record, source_id);
            if !batch.insert(token.clone()) || !self.is_new(source_id, &token).await? {
                seen += 1;
                continue;
            }
            fresh.push((token, record));
        }

        Ok((fresh, seen))
    }
}
