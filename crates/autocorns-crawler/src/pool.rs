//! Worker-pool fetch style: one `eth_call` per item
//!
//! At most `workers` calls are in flight. The whole batch shares one
//! deadline; items still pending when it passes are reported as timed out
//! and their in-flight calls are dropped.

use std::fmt;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use alloy_rpc_types::BlockId;
use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::warn;

use crate::caller::ContractCaller;
use crate::error::CallError;
use crate::multicall::progress_bar;
use crate::retry::RetryPolicy;

#[derive(Debug)]
pub enum PoolFailure {
    Call(CallError),
    TimedOut,
}

impl fmt::Display for PoolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolFailure::Call(e) => write!(f, "{}", e),
            PoolFailure::TimedOut => write!(f, "timed out waiting for response"),
        }
    }
}

pub struct PoolCaller<C> {
    caller: C,
    workers: usize,
    timeout: Duration,
    retry: RetryPolicy,
    progress: bool,
}

impl<C: ContractCaller> PoolCaller<C> {
    pub fn new(caller: C, workers: usize, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            caller,
            workers: workers.max(1),
            timeout,
            retry,
            progress: false,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Call `target` once per input; output order matches input order
    pub async fn call_all(
        &self,
        target: Address,
        inputs: Vec<Bytes>,
        block: BlockId,
    ) -> Vec<Result<Bytes, PoolFailure>> {
        let total = inputs.len();
        let deadline = Instant::now() + self.timeout;
        let pb = progress_bar(total, self.progress);

        let mut slots: Vec<Option<Result<Bytes, PoolFailure>>> = (0..total).map(|_| None).collect();

        let caller = &self.caller;
        let retry = &self.retry;
        let mut responses = stream::iter(inputs.into_iter().enumerate().map(|(index, input)| async move {
            let result = retry
                .run("eth_call", || caller.call(target, input.clone(), block))
                .await;
            (index, result)
        }))
        .buffer_unordered(self.workers);

        let mut completed = 0usize;
        loop {
            match timeout_at(deadline, responses.next()).await {
                Ok(Some((index, result))) => {
                    slots[index] = Some(result.map_err(PoolFailure::Call));
                    completed += 1;
                    pb.inc(1);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        completed,
                        pending = total - completed,
                        timeout_secs = self.timeout.as_secs_f64(),
                        "Worker pool deadline passed, abandoning pending calls"
                    );
                    break;
                }
            }
        }
        drop(responses);
        pb.finish_and_clear();

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(PoolFailure::TimedOut)))
            .collect()
    }
}
