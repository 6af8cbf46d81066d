//! Unified error types for the signer core
//!
//! Every failure that can reach a caller, whether from key derivation,
//! address handling, profile lookup or the signing protocol, is carried by
//! [`SignerError`] so it can be reported as a single terminal item.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for all signer operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl SignerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors
    pub fn derivation(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Derivation, msg)
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAddress, msg)
    }

    pub fn invalid_network_parameter(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidNetworkParameter, msg)
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Device, msg)
    }

    pub fn build(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Build, msg)
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    /// Re-tag an error coming back from a collaborator.
    ///
    /// Errors already carrying `code` pass through untouched; anything else is
    /// wrapped with `context` as message and the original rendering kept in
    /// `details`.
    pub fn classify(self, code: ErrorCode, context: &str) -> Self {
        if self.code == code {
            self
        } else {
            let original = self.to_string();
            Self::new(code, context).with_details(original)
        }
    }
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for SignerError {}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed extended key, invalid derivation index, invalid curve point
    Derivation,
    /// Unrecognized address syntax for the configured network
    InvalidAddress,
    /// Missing profile, or a signature-hash type that is not a valid code
    InvalidNetworkParameter,
    /// Transport or session failure reported by the signing device
    Device,
    /// Failure from the transaction builder or the fee estimator
    Build,
    /// Malformed configuration or JSON input
    ParseError,
    Internal,
}

/// Result type alias for signer operations
pub type SignerResult<T> = Result<T, SignerError>;

// Conversions from common error types

impl From<serde_json::Error> for SignerError {
    fn from(e: serde_json::Error) -> Self {
        SignerError::new(ErrorCode::ParseError, e.to_string())
    }
}

impl From<bitcoin::secp256k1::Error> for SignerError {
    fn from(e: bitcoin::secp256k1::Error) -> Self {
        SignerError::new(ErrorCode::Derivation, format!("Secp256k1 error: {}", e))
    }
}

impl From<bech32::Error> for SignerError {
    fn from(e: bech32::Error) -> Self {
        SignerError::new(ErrorCode::InvalidAddress, format!("Bech32 error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = SignerError::device("Device disconnected")
            .with_details("transport closed while streaming input 3");

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"device\""));
        assert!(json.contains("Device disconnected"));
    }

    #[test]
    fn test_display_includes_details() {
        let err = SignerError::build("no utxo").with_details("balance 0");
        assert_eq!(err.to_string(), "[Build] no utxo (balance 0)");
    }

    #[test]
    fn test_classify_keeps_matching_code() {
        let err = SignerError::device("locked");
        assert_eq!(err.clone().classify(ErrorCode::Device, "device failed"), err);
    }

    #[test]
    fn test_classify_wraps_foreign_code() {
        let err = SignerError::internal("timeout").classify(ErrorCode::Build, "fee estimation failed");
        assert_eq!(err.code, ErrorCode::Build);
        assert_eq!(err.message, "fee estimation failed");
        assert_eq!(err.details.as_deref(), Some("[Internal] timeout"));
    }
}
