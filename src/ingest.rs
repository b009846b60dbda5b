//! The ingestion pipeline: decode a body, aggregate it into a [`Tree`] and
//! hand the tree to storage.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    DecodeError, IngestParams, PutInput, PutReport, Sample, SamplingMultiplier, StackpileResult,
    Storage, Tree,
};

/// A fully aggregated request body.
#[derive(Debug, Default)]
pub struct Batch {
    pub tree: Tree,
    /// Number of decoded pairs, including zero-count ones.
    pub pairs: u64,
}

/// Folds decoded samples into a fresh tree, scaling every count by
/// `multiplier`. The first decode error aborts the whole batch.
pub fn build_tree<I>(samples: I, multiplier: SamplingMultiplier) -> Result<Batch, DecodeError>
where
    I: IntoIterator<Item = Result<Sample, DecodeError>>,
{
    let mut batch = Batch::default();
    for sample in samples {
        let Sample { key, count } = sample?;
        batch.tree.insert(&key, multiplier.apply(count));
        batch.pairs += 1;
    }
    Ok(batch)
}

/// Runs `f` and logs how long it took under `name`.
pub fn profile<T>(name: &str, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    tracing::debug!(hook = name, elapsed_us, "profile");
    out
}

#[derive(Clone)]
pub struct Ingester {
    multiplier: SamplingMultiplier,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Ingester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingester")
            .field("multiplier", &self.multiplier)
            .finish_non_exhaustive()
    }
}

impl Ingester {
    pub fn new(multiplier: SamplingMultiplier, storage: Arc<dyn Storage>) -> Self {
        Self {
            multiplier,
            storage,
        }
    }

    pub fn multiplier(&self) -> SamplingMultiplier {
        self.multiplier
    }

    /// Decodes `body` in the format chosen by `params` and submits the
    /// resulting tree exactly once. Nothing is submitted when decoding fails.
    /// Decoding and submission are timed together under `put-<from>`.
    pub fn ingest<R: BufRead>(&self, params: &IngestParams, body: R) -> StackpileResult<PutReport> {
        let hook = format!("put-{}", params.from.unix_timestamp());
        profile(&hook, || self.decode_and_put(params, body))
    }

    fn decode_and_put<R: BufRead>(
        &self,
        params: &IngestParams,
        body: R,
    ) -> StackpileResult<PutReport> {
        let batch = build_tree(params.format.decoder(body), self.multiplier)?;
        tracing::debug!(
            pairs = batch.pairs,
            samples = batch.tree.total(),
            format = params.format.as_str(),
            "decoded body"
        );

        let input = PutInput {
            from: params.from,
            until: params.until,
            label_key: params.label_key.clone(),
            tree: batch.tree,
        };
        Ok(self.storage.put(input)?)
    }
}
