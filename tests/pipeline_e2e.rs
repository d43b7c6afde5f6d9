//! End-to-end fetch pipeline tests against an in-memory chain
//!
//! The mock node decodes Multicall2 `tryAggregate` calls the way the deployed
//! contract would, so these runs cover chunking, per-call reverts, checkpoint
//! resume and result ordering without a network.

use std::collections::HashSet;
use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, U256};
use alloy_rpc_types::BlockId;
use alloy_sol_types::{SolCall, SolValue};

use autocorns_core::{CheckpointStore, Payload, RecordKind, WorkItem};
use autocorns_crawler::abi::{IMulticall2, IUnicorns};
use autocorns_crawler::kinds::{Dna, MythicBodyParts};
use autocorns_crawler::{CallError, ContractCaller, CrawlerConfig, FetchMode, FetchPipeline};

/// Answers getDNA with `token_id * 1000` and reverts for listed tokens
struct MockChain {
    head: u64,
    multicall: Address,
    reverting: HashSet<u64>,
    /// Sizes of the aggregated calls received, in order
    chunks: Mutex<Vec<usize>>,
    direct_calls: Mutex<usize>,
}

impl MockChain {
    fn new(head: u64, multicall: Address, reverting: &[u64]) -> Self {
        Self {
            head,
            multicall,
            reverting: reverting.iter().copied().collect(),
            chunks: Mutex::new(Vec::new()),
            direct_calls: Mutex::new(0),
        }
    }

    fn answer(&self, input: &[u8]) -> Option<Bytes> {
        if let Ok(call) = IUnicorns::getDNACall::abi_decode(input) {
            let token_id = call.tokenId.to::<u64>();
            if self.reverting.contains(&token_id) {
                return None;
            }
            return Some((call.tokenId * U256::from(1000)).abi_encode().into());
        }
        let call = IUnicorns::getUnicornBodyPartsCall::abi_decode(input).ok()?;
        let count = (call.dna % U256::from(7)).to::<u8>();
        let one = U256::from(1);
        Some((one, one, one, one, one, one, U256::from(count)).abi_encode_params().into())
    }
}

impl ContractCaller for MockChain {
    async fn call(&self, to: Address, input: Bytes, _block: BlockId) -> Result<Bytes, CallError> {
        if to != self.multicall {
            *self.direct_calls.lock().unwrap() += 1;
            return Ok(self.answer(&input).unwrap_or_default());
        }

        let aggregate = IMulticall2::tryAggregateCall::abi_decode(&input)?;
        assert!(!aggregate.requireSuccess, "batches must not require success");
        self.chunks.lock().unwrap().push(aggregate.calls.len());

        let results: Vec<IMulticall2::CallResult> = aggregate
            .calls
            .iter()
            .map(|call| match self.answer(&call.callData) {
                Some(data) => IMulticall2::CallResult {
                    success: true,
                    returnData: data,
                },
                None => IMulticall2::CallResult {
                    success: false,
                    returnData: Bytes::new(),
                },
            })
            .collect();
        Ok((results,).abi_encode_params().into())
    }

    async fn block_number(&self) -> Result<u64, CallError> {
        Ok(self.head)
    }
}

fn multicall_config(chunk_size: usize) -> CrawlerConfig {
    let mut config = CrawlerConfig::polygon();
    config.chunk_size = chunk_size;
    config.leak_rate = 0.0;
    config
}

#[tokio::test]
async fn test_revert_only_affects_its_own_item() {
    let config = multicall_config(2);
    let chain = MockChain::new(5_000, config.multicall, &[102]);
    let pipeline = FetchPipeline::new(&chain, config).unwrap();

    let report = pipeline
        .run::<Dna>(WorkItem::range(101, 103).unwrap(), Vec::new())
        .await
        .unwrap();

    assert_eq!(report.block_number, 5_000);
    assert_eq!(
        report.records.iter().map(|r| r.token_id).collect::<Vec<_>>(),
        vec![101, 103]
    );
    assert_eq!(report.records[0].payload, Payload::Dna { dna: "101000".into() });
    assert_eq!(report.records[1].payload, Payload::Dna { dna: "103000".into() });

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].token_id, 102);
    assert_eq!(report.errors[0].kind, RecordKind::Dna);
    assert!(report.errors[0].error.starts_with("Failed to retrieve dna"));

    assert_eq!(*chain.chunks.lock().unwrap(), vec![2, 1]);
    assert_eq!(*chain.direct_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_resume_from_checkpoint_fetches_only_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("dnas.ndjson"));

    let config = multicall_config(2);
    let first = MockChain::new(5_000, config.multicall, &[102]);
    let report = FetchPipeline::new(&first, config.clone())
        .unwrap()
        .run::<Dna>(WorkItem::range(101, 103).unwrap(), store.load().unwrap().records)
        .await
        .unwrap();
    store.save(&report.records).unwrap();

    // Token 102 recovers on the next run
    let second = MockChain::new(5_010, config.multicall, &[]);
    let report = FetchPipeline::new(&second, config)
        .unwrap()
        .run::<Dna>(WorkItem::range(101, 103).unwrap(), store.load().unwrap().records)
        .await
        .unwrap();

    assert_eq!(report.carried, 2);
    assert_eq!(report.fetched, 1);
    assert!(report.errors.is_empty());
    assert_eq!(*second.chunks.lock().unwrap(), vec![1]);

    let blocks: Vec<(u64, u64)> = report
        .records
        .iter()
        .map(|r| (r.token_id, r.block_number))
        .collect();
    assert_eq!(blocks, vec![(101, 5_000), (103, 5_000), (102, 5_010)]);
}

#[tokio::test]
async fn test_pool_mode_matches_multicall_mode() {
    let mut config = multicall_config(2);
    config.fetch_mode = FetchMode::Pool;
    config.num_workers = 4;
    let chain = MockChain::new(5_000, config.multicall, &[]);
    let pipeline = FetchPipeline::new(&chain, config).unwrap();

    let report = pipeline
        .run::<Dna>(WorkItem::range(1, 10).unwrap(), Vec::new())
        .await
        .unwrap();

    assert_eq!(
        report.records.iter().map(|r| r.token_id).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<u64>>()
    );
    assert!(chain.chunks.lock().unwrap().is_empty());
    assert_eq!(*chain.direct_calls.lock().unwrap(), 10);
}

#[tokio::test]
async fn test_dna_output_feeds_body_part_counts() {
    let config = multicall_config(10);
    let chain = MockChain::new(5_000, config.multicall, &[]);
    let pipeline = FetchPipeline::new(&chain, config).unwrap();

    let dnas = pipeline
        .run::<Dna>(WorkItem::range(1, 3).unwrap(), Vec::new())
        .await
        .unwrap();
    let items: Vec<WorkItem> = dnas.records.iter().filter_map(WorkItem::from_record).collect();

    let parts = pipeline.run::<MythicBodyParts>(items, Vec::new()).await.unwrap();
    let counts: Vec<(u64, u64)> = parts
        .records
        .iter()
        .map(|r| match &r.payload {
            Payload::MythicBodyParts {
                num_mythic_body_parts,
                ..
            } => (r.token_id, *num_mythic_body_parts),
            other => panic!("unexpected payload {:?}", other),
        })
        .collect();
    // 1000 % 7 = 6, 2000 % 7 = 5, 3000 % 7 = 4
    assert_eq!(counts, vec![(1, 6), (2, 5), (3, 4)]);
}
