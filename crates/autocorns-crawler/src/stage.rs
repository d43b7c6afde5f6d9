//! One crawl stage end to end: checkpoint in, records and errors out

use std::io::Write;

use tracing::info;

use autocorns_core::{ndjson, CheckpointStore, WorkItem};

use crate::caller::ContractCaller;
use crate::kinds::FetchKind;
use crate::pipeline::{FetchPipeline, FetchReport};
use crate::Result;

/// Where a stage reads and writes its state
pub struct StageIo<'a, R, E> {
    pub checkpoint: Option<&'a CheckpointStore>,
    /// Rewrite the checkpoint with this run's records
    pub update_checkpoint: bool,
    /// NDJSON sink for carried and fetched records
    pub records: R,
    /// NDJSON sink for error records
    pub errors: E,
}

/// Run `K` over `items` and write its outputs
///
/// The checkpoint is only read when given and only rewritten when
/// `update_checkpoint` is set.
pub async fn run_stage<K, C, R, E>(
    pipeline: &FetchPipeline<C>,
    items: Vec<WorkItem>,
    io: StageIo<'_, R, E>,
) -> Result<FetchReport>
where
    K: FetchKind,
    C: ContractCaller,
    R: Write,
    E: Write,
{
    let existing = match io.checkpoint {
        Some(store) => store.load()?.records,
        None => Vec::new(),
    };

    let report = pipeline.run::<K>(items, existing).await?;

    ndjson::write_lines(io.records, &report.records)?;
    if io.update_checkpoint {
        if let Some(store) = io.checkpoint {
            store.save(&report.records)?;
        }
    }
    ndjson::write_lines(io.errors, &report.errors)?;

    info!(
        kind = %K::KIND,
        block = report.block_number,
        carried = report.carried,
        fetched = report.fetched,
        errors = report.errors.len(),
        "Crawl finished"
    );
    Ok(report)
}
