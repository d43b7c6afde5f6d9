//! Batch RPC caller over Multicall2 `tryAggregate`
//!
//! Inputs are split into fixed-size chunks, each chunk goes out as one
//! non-strict aggregated call, and per-call replies are mapped back to input
//! positions. A revert only affects its own position. A chunk that cannot be
//! completed marks each of its positions as failed and the run moves on.

use std::fmt;
use std::future::Future;

use alloy_primitives::{Address, Bytes};
use alloy_rpc_types::BlockId;
use alloy_sol_types::SolCall;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use crate::abi::IMulticall2;
use crate::caller::ContractCaller;
use crate::error::CallError;
use crate::metrics::{record_chunk, OUTCOME_FAILURE, OUTCOME_SUCCESS};
use crate::retry::RetryPolicy;

/// Issues aggregated calls
pub trait Aggregator: Send + Sync {
    fn try_aggregate(
        &self,
        calls: Vec<IMulticall2::Call>,
        block: BlockId,
    ) -> impl Future<Output = Result<Vec<IMulticall2::CallResult>, CallError>> + Send;
}

/// [`Aggregator`] calling a deployed Multicall2 contract
pub struct Multicall<C> {
    caller: C,
    address: Address,
}

impl<C: ContractCaller> Multicall<C> {
    pub fn new(caller: C, address: Address) -> Self {
        Self { caller, address }
    }
}

impl<C: ContractCaller> Aggregator for Multicall<C> {
    async fn try_aggregate(
        &self,
        calls: Vec<IMulticall2::Call>,
        block: BlockId,
    ) -> Result<Vec<IMulticall2::CallResult>, CallError> {
        let expected = calls.len();
        let input = IMulticall2::tryAggregateCall {
            requireSuccess: false,
            calls,
        }
        .abi_encode();

        let output = self.caller.call(self.address, input.into(), block).await?;
        let results = IMulticall2::tryAggregateCall::abi_decode_returns(&output)?;

        if results.len() != expected {
            return Err(CallError::LengthMismatch {
                expected,
                got: results.len(),
            });
        }
        Ok(results)
    }
}

/// Why one position of a batch has no return data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The call reverted; carries the revert data
    Reverted(Bytes),
    /// The whole chunk failed permanently or ran out of retries
    ChunkFailed(String),
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Reverted(data) if data.is_empty() => write!(f, "execution reverted"),
            CallFailure::Reverted(data) => write!(f, "execution reverted: {}", data),
            CallFailure::ChunkFailed(reason) => write!(f, "batch call failed: {}", reason),
        }
    }
}

pub struct BatchCaller<A> {
    aggregator: A,
    chunk_size: usize,
    retry: RetryPolicy,
    progress: bool,
}

impl<A: Aggregator> BatchCaller<A> {
    pub fn new(aggregator: A, chunk_size: usize, retry: RetryPolicy) -> Self {
        Self {
            aggregator,
            chunk_size: chunk_size.max(1),
            retry,
            progress: false,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Call `target` once per input, all at `block`
    ///
    /// The output has one entry per input, in input order.
    pub async fn call_all(
        &self,
        target: Address,
        inputs: Vec<Bytes>,
        block: BlockId,
    ) -> Vec<Result<Bytes, CallFailure>> {
        let pb = progress_bar(inputs.len(), self.progress);
        let mut results = Vec::with_capacity(inputs.len());

        for (index, chunk) in inputs.chunks(self.chunk_size).enumerate() {
            let calls: Vec<IMulticall2::Call> = chunk
                .iter()
                .map(|data| IMulticall2::Call {
                    target,
                    callData: data.clone(),
                })
                .collect();

            let reply = self
                .retry
                .run("tryAggregate", || self.aggregator.try_aggregate(calls.clone(), block))
                .await
                .and_then(|replies| {
                    if replies.len() == chunk.len() {
                        Ok(replies)
                    } else {
                        Err(CallError::LengthMismatch {
                            expected: chunk.len(),
                            got: replies.len(),
                        })
                    }
                });

            match reply {
                Ok(replies) => {
                    debug!(chunk = index, size = chunk.len(), "Chunk complete");
                    record_chunk(OUTCOME_SUCCESS, chunk.len());
                    results.extend(replies.into_iter().map(|r| {
                        if r.success {
                            Ok(r.returnData)
                        } else {
                            Err(CallFailure::Reverted(r.returnData))
                        }
                    }));
                }
                Err(e) => {
                    warn!(chunk = index, size = chunk.len(), error = %e, "Chunk failed, marking items as errors");
                    record_chunk(OUTCOME_FAILURE, chunk.len());
                    let reason = e.to_string();
                    results.extend(chunk.iter().map(|_| Err(CallFailure::ChunkFailed(reason.clone()))));
                }
            }

            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        results
    }
}

/// Progress bar in the workspace style, hidden when `visible` is false
pub(crate) fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta})") {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_transport::TransportErrorKind;
    use std::sync::Mutex;

    /// Replies to each call with its own input, reverting inputs listed in `revert`
    struct EchoAggregator {
        revert: Vec<Bytes>,
        chunks: Mutex<Vec<usize>>,
        fail_first: Mutex<u32>,
        permanent: bool,
        /// Leave the first call of each chunk out of the reply
        drop_first: bool,
    }

    impl EchoAggregator {
        fn new(revert: Vec<Bytes>) -> Self {
            Self {
                revert,
                chunks: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
                permanent: false,
                drop_first: false,
            }
        }
    }

    impl Aggregator for EchoAggregator {
        async fn try_aggregate(
            &self,
            calls: Vec<IMulticall2::Call>,
            _block: BlockId,
        ) -> Result<Vec<IMulticall2::CallResult>, CallError> {
            {
                let mut remaining = self.fail_first.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CallError::Rpc(TransportErrorKind::custom_str("connection reset")));
                }
            }
            if self.permanent {
                return Err(CallError::LengthMismatch { expected: calls.len(), got: 0 });
            }
            self.chunks.lock().unwrap().push(calls.len());
            let skip = usize::from(self.drop_first);
            Ok(calls
                .into_iter()
                .skip(skip)
                .map(|call| IMulticall2::CallResult {
                    success: !self.revert.contains(&call.callData),
                    returnData: call.callData,
                })
                .collect())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
        }
    }

    fn inputs(n: u8) -> Vec<Bytes> {
        (0..n).map(|i| Bytes::from(vec![i])).collect()
    }

    #[tokio::test]
    async fn test_output_matches_input_for_all_chunk_sizes() {
        for chunk_size in 1..=8 {
            let caller = BatchCaller::new(EchoAggregator::new(vec![]), chunk_size, fast_retry());
            let input = inputs(7);
            let output = caller.call_all(Address::ZERO, input.clone(), BlockId::latest()).await;
            assert_eq!(output.len(), input.len());
            for (i, o) in input.iter().zip(output) {
                assert_eq!(&o.unwrap(), i);
            }
        }
    }

    #[tokio::test]
    async fn test_revert_only_affects_its_position() {
        let input = inputs(3);
        let aggregator = EchoAggregator::new(vec![input[1].clone()]);
        let caller = BatchCaller::new(aggregator, 2, fast_retry());

        let output = caller.call_all(Address::ZERO, input.clone(), BlockId::latest()).await;
        assert_eq!(output[0].as_ref().unwrap(), &input[0]);
        assert!(matches!(output[1], Err(CallFailure::Reverted(_))));
        assert_eq!(output[2].as_ref().unwrap(), &input[2]);
        assert_eq!(*caller.aggregator.chunks.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_transient_chunk_failure_is_retried() {
        let aggregator = EchoAggregator::new(vec![]);
        *aggregator.fail_first.lock().unwrap() = 2;
        let caller = BatchCaller::new(aggregator, 10, fast_retry());

        let output = caller.call_all(Address::ZERO, inputs(4), BlockId::latest()).await;
        assert!(output.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_failed_chunk_marks_every_item() {
        let mut aggregator = EchoAggregator::new(vec![]);
        aggregator.permanent = true;
        let caller = BatchCaller::new(aggregator, 2, fast_retry());

        let output = caller.call_all(Address::ZERO, inputs(3), BlockId::latest()).await;
        assert_eq!(output.len(), 3);
        assert!(output.iter().all(|r| matches!(r, Err(CallFailure::ChunkFailed(_)))));
    }

    #[tokio::test]
    async fn test_short_reply_fails_its_chunk_without_shifting() {
        let mut aggregator = EchoAggregator::new(vec![]);
        aggregator.drop_first = true;
        let caller = BatchCaller::new(aggregator, 2, fast_retry());

        let output = caller.call_all(Address::ZERO, inputs(3), BlockId::latest()).await;
        assert_eq!(output.len(), 3);
        assert!(output.iter().all(|r| matches!(r, Err(CallFailure::ChunkFailed(_)))));
        assert_eq!(*caller.aggregator.chunks.lock().unwrap(), vec![2, 1]);
    }
}
