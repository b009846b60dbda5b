//! Offline folding of a profile file (`stackpile fold ...`).

use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{Batch, FoldedStack, Format, SamplingMultiplier, StackpileResult, build_tree};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldSummary {
    pub path: String,
    pub format: Format,
    pub multiplier: u64,
    pub pairs: u64,
    pub samples: u64,
    pub nodes: usize,
    pub stacks: Vec<FoldedStack>,
}

/// Decodes `path` with the same decoders the server uses.
pub fn fold_file(
    path: &Path,
    format: Format,
    multiplier: SamplingMultiplier,
) -> StackpileResult<Batch> {
    let reader = BufReader::new(File::open(path)?);
    Ok(build_tree(format.decoder(reader), multiplier)?)
}

pub fn fold_command(
    path: &Path,
    format: Format,
    multiplier: SamplingMultiplier,
) -> StackpileResult<FoldSummary> {
    let batch = fold_file(path, format, multiplier)?;
    Ok(FoldSummary {
        path: path.display().to_string(),
        format,
        multiplier: multiplier.get(),
        pairs: batch.pairs,
        samples: batch.tree.total(),
        nodes: batch.tree.node_count(),
        stacks: batch.tree.folded(),
    })
}
