//! Checkpointed fetch pipeline for one data kind
//!
//! ```text
//! checkpoint -> validity -> freshness -> supersession -> leak -> skip known
//!                                                                   |
//!        carried records + fetched records <- extract <- fetch <----+
//! ```

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};
use alloy_rpc_types::BlockId;
use alloy_sol_types::SolCall;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::info;

use autocorns_core::checkpoint::{filter_fresh, filter_superseded, filter_validity, leak, skip_known};
use autocorns_core::{CheckpointRecord, ErrorRecord, FetchOutcome, WorkItem};

use crate::abi::IERC721Enumerable;
use crate::caller::ContractCaller;
use crate::config::{CrawlerConfig, FetchMode};
use crate::error::{CallError, Error};
use crate::kinds::{encode, extract, FetchKind};
use crate::metrics::{record_item, OUTCOME_FAILURE, OUTCOME_SKIPPED, OUTCOME_SUCCESS};
use crate::multicall::{BatchCaller, Multicall};
use crate::pool::PoolCaller;
use crate::Result;

/// Result of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Block the run read at
    pub block_number: u64,
    /// Carried checkpoint records followed by newly fetched records
    pub records: Vec<CheckpointRecord>,
    pub errors: Vec<ErrorRecord>,
    pub carried: usize,
    pub fetched: usize,
}

pub struct FetchPipeline<C> {
    caller: C,
    config: CrawlerConfig,
    progress: bool,
}

impl<C: ContractCaller> FetchPipeline<C> {
    pub fn new(caller: C, config: CrawlerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            caller,
            config,
            progress: false,
        })
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Configured block, or the chain head
    pub async fn block_number(&self) -> Result<u64> {
        match self.config.block_number {
            Some(block) => Ok(block),
            None => Ok(self.caller.block_number().await?),
        }
    }

    /// Fetch `items`, reusing whatever `checkpoint` still covers
    pub async fn run<K: FetchKind>(
        &self,
        items: Vec<WorkItem>,
        checkpoint: Vec<CheckpointRecord>,
    ) -> Result<FetchReport> {
        let block_number = self.block_number().await?;
        let requested = items.len();

        let carried = self.reusable::<K>(checkpoint, &items, block_number);
        let pending = skip_known(items, &carried);

        info!(
            kind = %K::KIND,
            block = block_number,
            requested,
            reused = carried.len(),
            pending = pending.len(),
            mode = ?self.config.fetch_mode,
            "Starting fetch"
        );

        let outcomes = self.fetch::<K>(&pending, block_number).await?;
        let (fetched, errors) = FetchOutcome::partition(outcomes);

        info!(
            kind = %K::KIND,
            fetched = fetched.len(),
            errors = errors.len(),
            "Fetch complete"
        );

        let carried_count = carried.len();
        let fetched_count = fetched.len();
        let mut records = carried;
        records.extend(fetched);

        Ok(FetchReport {
            block_number,
            records,
            errors,
            carried: carried_count,
            fetched: fetched_count,
        })
    }

    /// Checkpoint records that can stand in for a fresh fetch
    fn reusable<K: FetchKind>(
        &self,
        checkpoint: Vec<CheckpointRecord>,
        items: &[WorkItem],
        block_number: u64,
    ) -> Vec<CheckpointRecord> {
        let records = filter_validity(checkpoint, |r| r.kind() == K::KIND && r.payload.is_complete());
        let records = if K::EXPIRES {
            filter_fresh(records, block_number.saturating_sub(self.config.cache_liveness))
        } else {
            records
        };
        let records = filter_superseded(records, items);

        let mut rng: Box<dyn RngCore> = match self.config.leak_seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(rand::thread_rng()),
        };
        leak(records, self.config.leak_rate, &mut *rng)
    }

    /// Fetch every item with no checkpoint involvement
    ///
    /// Outcomes keep item order. Items the kind drops produce no outcome.
    pub async fn fetch<K: FetchKind>(
        &self,
        items: &[WorkItem],
        block_number: u64,
    ) -> Result<Vec<FetchOutcome>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let target = K::target(&self.config)?;

        let mut slots: Vec<Option<FetchOutcome>> = (0..items.len()).map(|_| None).collect();
        let mut groups: BTreeMap<u64, Vec<(usize, Bytes)>> = BTreeMap::new();

        for (index, item) in items.iter().enumerate() {
            match encode::<K>(item, block_number) {
                Ok(input) => groups
                    .entry(K::call_block(item, block_number))
                    .or_default()
                    .push((index, input)),
                Err(failure) => slots[index] = Some(failure),
            }
        }

        for (call_block, group) in groups {
            let (indices, inputs): (Vec<usize>, Vec<Bytes>) = group.into_iter().unzip();
            let replies = self.call_group(target, inputs, call_block).await;
            for (index, reply) in indices.into_iter().zip(replies) {
                slots[index] = extract::<K>(&items[index], block_number, reply);
            }
        }

        let mut outcomes = Vec::with_capacity(items.len());
        for slot in slots {
            match slot {
                Some(outcome) => {
                    let label = if outcome.is_success() {
                        OUTCOME_SUCCESS
                    } else {
                        OUTCOME_FAILURE
                    };
                    record_item(K::KIND, label);
                    outcomes.push(outcome);
                }
                None => record_item(K::KIND, OUTCOME_SKIPPED),
            }
        }

        Ok(outcomes)
    }

    async fn call_group(
        &self,
        target: Address,
        inputs: Vec<Bytes>,
        call_block: u64,
    ) -> Vec<std::result::Result<Bytes, String>> {
        let block = BlockId::number(call_block);
        match self.config.fetch_mode {
            FetchMode::Multicall => {
                let aggregator = Multicall::new(&self.caller, self.config.multicall);
                BatchCaller::new(aggregator, self.config.chunk_size, self.config.retry.clone())
                    .with_progress(self.progress)
                    .call_all(target, inputs, block)
                    .await
                    .into_iter()
                    .map(|r| r.map_err(|e| e.to_string()))
                    .collect()
            }
            FetchMode::Pool => PoolCaller::new(
                &self.caller,
                self.config.num_workers,
                self.config.timeout(),
                self.config.retry.clone(),
            )
            .with_progress(self.progress)
            .call_all(target, inputs, block)
            .await
            .into_iter()
            .map(|r| r.map_err(|e| e.to_string()))
            .collect(),
        }
    }

    /// Number of tokens minted by the ERC721 collection at `contract`
    pub async fn total_supply(&self, contract: Address, block_number: u64) -> Result<u64> {
        let input = IERC721Enumerable::totalSupplyCall {}.abi_encode();
        let output = self
            .config
            .retry
            .run("totalSupply", || {
                self.caller
                    .call(contract, input.clone().into(), BlockId::number(block_number))
            })
            .await?;
        let supply: U256 = IERC721Enumerable::totalSupplyCall::abi_decode_returns(&output).map_err(CallError::from)?;
        u64::try_from(supply).map_err(|_| Error::OutOfRange(format!("totalSupply {}", supply)))
    }
}
