//! Raw contract calls at a fixed block

use std::future::Future;

use alloy_primitives::{Address, Bytes};
use alloy_provider::Provider;
use alloy_rpc_types::{BlockId, TransactionRequest};

use crate::error::CallError;

/// Something that can run `eth_call`
///
/// Implemented over an alloy provider for real runs and by in-memory mocks in
/// tests.
pub trait ContractCaller: Send + Sync {
    fn call(
        &self,
        to: Address,
        input: Bytes,
        block: BlockId,
    ) -> impl Future<Output = Result<Bytes, CallError>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64, CallError>> + Send;
}

impl<T: ContractCaller> ContractCaller for &T {
    fn call(
        &self,
        to: Address,
        input: Bytes,
        block: BlockId,
    ) -> impl Future<Output = Result<Bytes, CallError>> + Send {
        (**self).call(to, input, block)
    }

    fn block_number(&self) -> impl Future<Output = Result<u64, CallError>> + Send {
        (**self).block_number()
    }
}

/// [`ContractCaller`] backed by a JSON-RPC provider
pub struct RpcCaller<P> {
    provider: P,
}

impl<P: Provider> RpcCaller<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: Provider> ContractCaller for RpcCaller<P> {
    async fn call(&self, to: Address, input: Bytes, block: BlockId) -> Result<Bytes, CallError> {
        let tx = TransactionRequest::default().to(to).input(input.into());
        Ok(self.provider.call(tx).block(block).await?)
    }

    async fn block_number(&self) -> Result<u64, CallError> {
        Ok(self.provider.get_block_number().await?)
    }
}
