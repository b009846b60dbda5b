//! Storage gateway: the sink for completed sample trees.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;

use crate::Tree;

/// One completed batch, handed over by value.
#[derive(Debug)]
pub struct PutInput {
    pub from: OffsetDateTime,
    pub until: OffsetDateTime,
    pub label_key: String,
    pub tree: Tree,
}

/// Timing and accounting for one accepted batch. This is the body of a
/// successful ingest response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutReport {
    #[serde(rename = "labelKey")]
    pub label_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub until: OffsetDateTime,
    #[serde(rename = "bucketStart", with = "time::serde::rfc3339")]
    pub bucket_start: OffsetDateTime,
    pub samples: u64,
    pub nodes: usize,
    #[serde(rename = "newBucket")]
    pub new_bucket: bool,
    #[serde(rename = "mergeMicros")]
    pub merge_micros: u64,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("time range ends at {until} before it starts at {from}")]
    InvalidRange {
        from: OffsetDateTime,
        until: OffsetDateTime,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub trait Storage: Send + Sync {
    fn put(&self, input: PutInput) -> Result<PutReport, StorageError>;
}

type Segment = BTreeMap<i64, Tree>;

/// In-process storage: per label key, one merged tree per time bucket. A
/// batch is attributed to the bucket containing its `from` time.
#[derive(Debug)]
pub struct MemoryStorage {
    resolution_secs: i64,
    segments: Mutex<HashMap<String, Segment>>,
}

impl MemoryStorage {
    pub fn new(resolution_secs: u64) -> Self {
        Self {
            resolution_secs: i64::try_from(resolution_secs.max(1)).unwrap_or(i64::MAX),
            segments: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_of(&self, t: OffsetDateTime) -> i64 {
        t.unix_timestamp().div_euclid(self.resolution_secs) * self.resolution_secs
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Segment>>, StorageError> {
        self.segments
            .lock()
            .map_err(|_| StorageError::Unavailable("segment lock poisoned".to_string()))
    }

    /// Merged tree of every bucket overlapping `[from, until]`.
    pub fn get(
        &self,
        label_key: &str,
        from: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<Option<Tree>, StorageError> {
        let segments = self.lock()?;
        let Some(segment) = segments.get(label_key) else {
            return Ok(None);
        };
        let (first, last) = (self.bucket_of(from), self.bucket_of(until));
        if last < first {
            return Ok(None);
        }
        let mut out: Option<Tree> = None;
        for tree in segment.range(first..=last).map(|(_, t)| t) {
            out.get_or_insert_with(Tree::new).merge(tree.clone());
        }
        Ok(out)
    }

    /// Label keys with stored data, sorted.
    pub fn label_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn bucket_count(&self, label_key: &str) -> Result<usize, StorageError> {
        Ok(self.lock()?.get(label_key).map_or(0, BTreeMap::len))
    }
}

impl Storage for MemoryStorage {
    fn put(&self, input: PutInput) -> Result<PutReport, StorageError> {
        let PutInput {
            from,
            until,
            label_key,
            tree,
        } = input;
        if until < from {
            return Err(StorageError::InvalidRange { from, until });
        }
        let bucket = self.bucket_of(from);
        let bucket_start = OffsetDateTime::from_unix_timestamp(bucket)
            .map_err(|e| StorageError::Unavailable(format!("bucket {bucket} out of range: {e}")))?;
        let samples = tree.total();
        let nodes = tree.node_count();
        tracing::debug!(label_key = %label_key, bucket, samples, "inserting into bucket");

        let started = Instant::now();
        let mut segments = self.lock()?;
        let segment = segments.entry(label_key.clone()).or_default();
        let new_bucket = !segment.contains_key(&bucket);
        segment.entry(bucket).or_default().merge(tree);
        drop(segments);
        let merge_micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

        Ok(PutReport {
            label_key,
            from,
            until,
            bucket_start,
            samples,
            nodes,
            new_bucket,
            merge_micros,
        })
    }
}
