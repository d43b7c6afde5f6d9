//! autocorns-crawler: On-chain crawlers for Crypto Unicorns data
//!
//! A crawl for one data kind runs through a [`FetchPipeline`]:
//! - checkpointed records that are still valid are carried forward
//! - the remaining work items are encoded per kind ([`kinds`])
//! - calls go out either as Multicall2 `tryAggregate` chunks ([`multicall`])
//!   or one per item through a bounded worker pool ([`pool`])
//! - replies are decoded with named ABI fields into records or error records
//!
//! Transient RPC failures are retried under a [`RetryPolicy`]. A failure
//! that cannot be retried away becomes an error record for the affected
//! items, never an abort of the whole run.

pub mod abi;
pub mod caller;
pub mod config;
mod error;
pub mod kinds;
pub mod metrics;
pub mod multicall;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod stage;

pub use caller::{ContractCaller, RpcCaller};
pub use config::{CrawlerConfig, FetchMode};
pub use error::{CallError, ConfigError, Error};
pub use kinds::FetchKind;
pub use multicall::{Aggregator, BatchCaller, CallFailure, Multicall};
pub use pipeline::{FetchPipeline, FetchReport};
pub use pool::{PoolCaller, PoolFailure};
pub use retry::RetryPolicy;
pub use stage::{run_stage, StageIo};

pub type Result<T> = std::result::Result<T, Error>;
