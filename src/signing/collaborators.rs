//! Transaction-builder and fee-estimator contracts
//!
//! Both collaborators live outside this crate; the orchestrator only sees
//! the structures below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SignerResult;
use crate::types::{Account, LogicalTransaction};

/// Spent output referenced by the transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    /// Owning address, when the builder knows it
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    #[serde(with = "crate::serde_bytes::hex_vec")]
    pub script_pubkey: Vec<u8>,
    pub value: u64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub is_change: bool,
}

/// Concrete transaction structure handed to the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// Fee figures and the resolved inputs/outputs they apply to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
}

fn non_empty(address: &Option<String>) -> Option<String> {
    address.as_deref().filter(|a| !a.is_empty()).map(str::to_string)
}

impl FeeEstimate {
    /// Addresses of the spent inputs, absent and empty ones skipped
    pub fn senders(&self) -> Vec<String> {
        self.inputs.iter().filter_map(|i| non_empty(&i.address)).collect()
    }

    /// Addresses of the non-change outputs, absent and empty ones skipped
    pub fn recipients(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|o| !o.is_change)
            .filter_map(|o| non_empty(&o.address))
            .collect()
    }

    /// Total value leaving the account, change excluded; `None` on overflow
    pub fn sent_amount(&self) -> Option<u64> {
        self.outputs
            .iter()
            .filter(|o| !o.is_change)
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }
}

/// Turns a logical transfer into concrete inputs and outputs
#[async_trait]
pub trait TransactionBuilder: Send + Sync {
    async fn build(
        &self,
        account: &Account,
        transaction: &LogicalTransaction,
    ) -> SignerResult<TxInfo>;
}

/// Resolves the fee and the addresses involved in a transfer
#[async_trait]
pub trait FeeEstimator: Send + Sync {
    async fn estimate(
        &self,
        account: &Account,
        transaction: &LogicalTransaction,
    ) -> SignerResult<FeeEstimate>;
}
