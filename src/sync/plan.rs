//! The diff between a bucket listing and the index, as immutable data.

use std::collections::BTreeMap;

use crate::{
    models::{image::ObjectRecord, object::ObjectMeta},
    naming,
};

/// Partition of `bucket keys ∪ index keys` into three disjoint sets.
/// Thumbnail keys never enter the bucket side.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// In the bucket, not yet indexed.
    pub to_insert: Vec<ObjectMeta>,
    /// In both; paired with the current record so untouched fields survive.
    pub to_update: Vec<(ObjectMeta, ObjectRecord)>,
    /// Indexed but gone from the bucket.
    pub to_delete: Vec<String>,
}

impl SyncPlan {
    pub fn compute(listing: Vec<ObjectMeta>, indexed: Vec<ObjectRecord>) -> Self {
        let bucket: BTreeMap<String, ObjectMeta> = listing
            .into_iter()
            .filter(|entry| !naming::is_thumbnail_key(&entry.key))
            .map(|entry| (entry.key.clone(), entry))
            .collect();
        let mut indexed: BTreeMap<String, ObjectRecord> = indexed
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();

        let mut plan = SyncPlan::default();
        for (key, entry) in bucket {
            match indexed.remove(&key) {
                Some(record) => plan.to_update.push((entry, record)),
                None => plan.to_insert.push(entry),
            }
        }
        plan.to_delete = indexed.into_keys().collect();
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}
