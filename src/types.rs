//! Shared types for the signer core
//!
//! All data structures that cross module boundaries are defined here
//! for consistent serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Schemes
// =============================================================================

/// Address-encoding family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressScheme {
    /// Pay-to-pubkey-hash
    Legacy,
    /// P2SH-wrapped segwit v0
    Segwit,
    /// Bech32 witness v0 program
    NativeSegwit,
}

impl AddressScheme {
    pub const ALL: [AddressScheme; 3] = [
        AddressScheme::Legacy,
        AddressScheme::Segwit,
        AddressScheme::NativeSegwit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressScheme::Legacy => "legacy",
            AddressScheme::Segwit => "segwit",
            AddressScheme::NativeSegwit => "native_segwit",
        }
    }
}

impl fmt::Display for AddressScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an account derives its addresses.
///
/// Taproot is a signing-context tag only: it has no address encoding here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationMode {
    Legacy,
    Segwit,
    NativeSegwit,
    Taproot,
}

impl DerivationMode {
    /// Whether the device must sign with segwit digests
    pub fn is_segwit(&self) -> bool {
        !matches!(self, DerivationMode::Legacy)
    }
}

// =============================================================================
// Accounts & addresses
// =============================================================================

/// UTXO account as seen by the signing protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub currency_id: String,
    /// Account-level extended public key (base58check)
    pub xpub: String,
    pub derivation_mode: DerivationMode,
    /// Hardened account path the xpub was exported from, e.g. `84'/0'/0'`
    pub derivation_path: String,
}

/// Address derived at `(account, index)` below an extended key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub scheme: AddressScheme,
    pub xpub: String,
    pub account: u32,
    pub index: u32,
}

// =============================================================================
// Signing request / result
// =============================================================================

/// Logical transfer requested by the caller
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalTransaction {
    pub recipient: String,
    /// Amount in the coin's smallest unit
    pub amount: u64,
    #[serde(default)]
    pub use_all_amount: bool,
    /// Explicit lock time; left unset unless the caller needs one
    #[serde(default)]
    pub lock_time: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Out,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Out => "OUT",
        }
    }
}

/// Provisional operation produced by a successful signing run.
///
/// `hash` stays empty and block fields stay `None` until broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOperationDraft {
    pub id: String,
    pub hash: String,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub value: u64,
    pub fee: u64,
    pub senders: Vec<String>,
    pub recipients: Vec<String>,
    pub account_id: String,
    pub block_hash: Option<String>,
    pub block_height: Option<u64>,
    pub date: DateTime<Utc>,
}

/// `{accountId}-{hash}-{type}`
pub fn encode_operation_id(account_id: &str, hash: &str, operation_type: OperationType) -> String {
    format!("{}-{}-{}", account_id, hash, operation_type.as_str())
}

// =============================================================================
// Events
// =============================================================================

/// Progress reported by the device while it streams inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamingProgress {
    /// Fraction in `0.0..=1.0`
    pub progress: f64,
    pub index: u32,
    pub total: u32,
}

/// Ordered events emitted by one signing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignOperationEvent {
    DeviceSignatureRequested,
    DeviceSignatureGranted,
    DeviceStreaming {
        progress: f64,
        index: u32,
        total: u32,
    },
    Signed {
        operation: SignedOperationDraft,
        #[serde(with = "crate::serde_bytes::hex_vec")]
        signature: Vec<u8>,
    },
}

impl SignOperationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SignOperationEvent::DeviceSignatureRequested => "device-signature-requested",
            SignOperationEvent::DeviceSignatureGranted => "device-signature-granted",
            SignOperationEvent::DeviceStreaming { .. } => "device-streaming",
            SignOperationEvent::Signed { .. } => "signed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SignOperationEvent::Signed { .. })
    }
}

impl From<StreamingProgress> for SignOperationEvent {
    fn from(p: StreamingProgress) -> Self {
        SignOperationEvent::DeviceStreaming {
            progress: p.progress,
            index: p.index,
            total: p.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tags() {
        let json = serde_json::to_string(&SignOperationEvent::DeviceSignatureRequested).unwrap();
        assert_eq!(json, r#"{"type":"device-signature-requested"}"#);

        let streaming: SignOperationEvent = StreamingProgress {
            progress: 0.5,
            index: 1,
            total: 2,
        }
        .into();
        let json = serde_json::to_string(&streaming).unwrap();
        assert!(json.contains(r#""type":"device-streaming""#));
        assert!(json.contains(r#""total":2"#));
    }

    #[test]
    fn test_derivation_mode_flags() {
        assert!(!DerivationMode::Legacy.is_segwit());
        assert!(DerivationMode::Segwit.is_segwit());
        assert!(DerivationMode::NativeSegwit.is_segwit());
        assert!(DerivationMode::Taproot.is_segwit());
    }

    #[test]
    fn test_operation_id() {
        assert_eq!(
            encode_operation_id("js:2:bitcoin:xpub:native_segwit", "", OperationType::Out),
            "js:2:bitcoin:xpub:native_segwit--OUT"
        );
    }
}
