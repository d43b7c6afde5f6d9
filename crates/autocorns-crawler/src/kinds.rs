//! Per-kind call encoding and field extraction
//!
//! Each data kind names its contract function through the `sol!` bindings and
//! turns the decoded, named return fields into a checkpoint payload. Anything
//! that goes wrong for one item becomes an error record for that item only.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;

use autocorns_core::rarity::parse_token_uri;
use autocorns_core::{CheckpointRecord, ErrorRecord, FetchOutcome, Payload, RecordKind, WorkItem};

use crate::abi::{IShadowcorns, IUnicorns};
use crate::config::CrawlerConfig;
use crate::error::ConfigError;

pub trait FetchKind {
    type Call: SolCall;

    const KIND: RecordKind;

    /// Whether checkpointed records age out after the cache liveness window
    const EXPIRES: bool = false;

    fn target(config: &CrawlerConfig) -> Result<Address, ConfigError>;

    fn encode(item: &WorkItem) -> Result<Self::Call, String>;

    /// Build the payload from decoded return fields
    ///
    /// `Ok(None)` drops the item without a record or an error.
    fn payload(
        item: &WorkItem,
        ret: <Self::Call as SolCall>::Return,
    ) -> Result<Option<Payload>, String>;

    /// Block to read the item at
    fn call_block(_item: &WorkItem, block: u64) -> u64 {
        block
    }
}

pub struct Dna;

impl FetchKind for Dna {
    type Call = IUnicorns::getDNACall;
    const KIND: RecordKind = RecordKind::Dna;
    const EXPIRES: bool = true;

    fn target(config: &CrawlerConfig) -> Result<Address, ConfigError> {
        config.unicorns_address()
    }

    fn encode(item: &WorkItem) -> Result<Self::Call, String> {
        Ok(IUnicorns::getDNACall {
            tokenId: U256::from(item.token_id),
        })
    }

    fn payload(_item: &WorkItem, dna: U256) -> Result<Option<Payload>, String> {
        Ok(Some(Payload::Dna {
            dna: dna.to_string(),
        }))
    }
}

pub struct Metadata;

impl FetchKind for Metadata {
    type Call = IUnicorns::getUnicornMetadataCall;
    const KIND: RecordKind = RecordKind::Metadata;

    fn target(config: &CrawlerConfig) -> Result<Address, ConfigError> {
        config.unicorns_address()
    }

    fn encode(item: &WorkItem) -> Result<Self::Call, String> {
        Ok(IUnicorns::getUnicornMetadataCall {
            tokenId: U256::from(item.token_id),
        })
    }

    fn payload(
        _item: &WorkItem,
        ret: IUnicorns::getUnicornMetadataReturn,
    ) -> Result<Option<Payload>, String> {
        Ok(Some(Payload::Metadata {
            lifecycle_stage: to_u64(ret.lifecycleStage, "lifecycleStage")?,
            class_number: to_u64(ret.unicornClass, "unicornClass")?,
        }))
    }
}

/// Number of mythic body parts for a DNA, read at the block the DNA was read at
pub struct MythicBodyParts;

impl FetchKind for MythicBodyParts {
    type Call = IUnicorns::getUnicornBodyPartsCall;
    const KIND: RecordKind = RecordKind::MythicBodyParts;

    fn target(config: &CrawlerConfig) -> Result<Address, ConfigError> {
        config.unicorns_address()
    }

    fn encode(item: &WorkItem) -> Result<Self::Call, String> {
        let dna = item.dna.as_deref().ok_or("work item has no DNA")?;
        Ok(IUnicorns::getUnicornBodyPartsCall {
            dna: parse_uint(dna)?,
        })
    }

    fn payload(
        item: &WorkItem,
        ret: IUnicorns::getUnicornBodyPartsReturn,
    ) -> Result<Option<Payload>, String> {
        Ok(Some(Payload::MythicBodyParts {
            dna: item.dna.clone().unwrap_or_default(),
            num_mythic_body_parts: u64::from(ret.mythicCount),
        }))
    }

    fn call_block(item: &WorkItem, block: u64) -> u64 {
        item.block_number.unwrap_or(block)
    }
}

/// DNA migration report; with a prior live DNA on the item, also a consistency check
pub struct DnaReport;

impl FetchKind for DnaReport {
    type Call = IUnicorns::dnaReportCall;
    const KIND: RecordKind = RecordKind::DnaReport;

    fn target(config: &CrawlerConfig) -> Result<Address, ConfigError> {
        config.unicorns_address()
    }

    fn encode(item: &WorkItem) -> Result<Self::Call, String> {
        Ok(IUnicorns::dnaReportCall {
            tokenId: U256::from(item.token_id),
        })
    }

    fn payload(item: &WorkItem, ret: IUnicorns::dnaReportReturn) -> Result<Option<Payload>, String> {
        if ret.predictive.is_zero() && item.live_before.is_none() {
            return Ok(None);
        }

        let live = ret.live.to_string();
        let cached = ret.cached.to_string();
        let consistent = item
            .live_before
            .as_ref()
            .map(|before| !ret.predictive.is_zero() && live == cached && &cached == before);

        Ok(Some(Payload::DnaReport {
            predictive: ret.predictive.to_string(),
            live,
            canonical: ret.canonical.to_string(),
            cached,
            live_before: item.live_before.clone(),
            consistent,
        }))
    }
}

/// Shadowcorn token URI with its embedded metadata
pub struct Shadowcorn;

impl FetchKind for Shadowcorn {
    type Call = IShadowcorns::tokenURICall;
    const KIND: RecordKind = RecordKind::Shadowcorn;

    fn target(config: &CrawlerConfig) -> Result<Address, ConfigError> {
        config.shadowcorns_address()
    }

    fn encode(item: &WorkItem) -> Result<Self::Call, String> {
        Ok(IShadowcorns::tokenURICall {
            tokenId: U256::from(item.token_id),
        })
    }

    fn payload(_item: &WorkItem, uri: String) -> Result<Option<Payload>, String> {
        let metadata = parse_token_uri(&uri).map_err(|e| e.to_string())?;
        Ok(Some(Payload::Shadowcorn { uri, metadata }))
    }
}

/// Turn one call result into an outcome for `item`
///
/// Returns `None` when the kind drops the item.
pub fn extract<K: FetchKind>(
    item: &WorkItem,
    block: u64,
    reply: Result<Bytes, String>,
) -> Option<FetchOutcome> {
    let block_number = K::call_block(item, block);
    let failure = |reason: String| {
        Some(FetchOutcome::Failure(ErrorRecord::new(
            item.token_id,
            block_number,
            K::KIND,
            format!("Failed to retrieve {}: {}", K::KIND, reason),
        )))
    };

    let data = match reply {
        Ok(data) => data,
        Err(reason) => return failure(reason),
    };
    let ret = match K::Call::abi_decode_returns(&data) {
        Ok(ret) => ret,
        Err(e) => return failure(format!("could not decode return data: {}", e)),
    };

    match K::payload(item, ret) {
        Ok(Some(payload)) if payload.is_complete() => Some(FetchOutcome::Success(
            CheckpointRecord::new(item.token_id, block_number, payload),
        )),
        Ok(Some(_)) => failure("contract returned placeholder data".to_string()),
        Ok(None) => None,
        Err(reason) => failure(reason),
    }
}

/// Encode the call for `item`, or an error record when its arguments are unusable
pub fn encode<K: FetchKind>(item: &WorkItem, block: u64) -> Result<Bytes, FetchOutcome> {
    K::encode(item).map(|call| call.abi_encode().into()).map_err(|reason| {
        FetchOutcome::Failure(ErrorRecord::new(
            item.token_id,
            K::call_block(item, block),
            K::KIND,
            format!("Failed to retrieve {}: {}", K::KIND, reason),
        ))
    })
}

fn to_u64(value: U256, field: &str) -> Result<u64, String> {
    u64::try_from(value).map_err(|_| format!("{} out of range: {}", field, value))
}

fn parse_uint(value: &str) -> Result<U256, String> {
    value
        .trim()
        .parse::<U256>()
        .map_err(|e| format!("invalid uint256 {:?}: {}", value, e))
}
