//! Profile Overrides
//!
//! Lets a deployment adjust the tunable part of the built-in table from a
//! JSON document keyed by currency id:
//!
//! ```json
//! { "dogecoin": { "dustThreshold": 500000, "dustPolicy": "FIXED" },
//!   "bitcoin_cash": { "sigHash": 65 } }
//! ```
//!
//! Version bytes and per-coin rules are not overridable.

use super::{validate_sig_hash_type, CoinProfileTable, DustPolicy};
use crate::error::{SignerError, SignerResult};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Overridable fields of one profile
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileOverride {
    /// Kept raw so a non-numeric value is reported as a network-parameter error
    pub sig_hash: Option<serde_json::Value>,
    pub dust_threshold: Option<u64>,
    pub dust_policy: Option<DustPolicy>,
}

impl ProfileOverride {
    fn sig_hash_code(&self, currency_id: &str) -> SignerResult<Option<u32>> {
        let Some(raw) = &self.sig_hash else {
            return Ok(None);
        };
        let code = raw
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                SignerError::invalid_network_parameter(format!(
                    "sigHash for {} must be a numeric code",
                    currency_id
                ))
                .with_details(raw.to_string())
            })?;
        validate_sig_hash_type(code).map(Some)
    }
}

/// Parse an overrides document
pub fn parse_overrides(json: &str) -> SignerResult<BTreeMap<String, ProfileOverride>> {
    Ok(serde_json::from_str(json)?)
}

impl CoinProfileTable {
    /// Apply overrides; the table is left untouched if any entry is invalid
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, ProfileOverride>,
    ) -> SignerResult<()> {
        let mut updated = self.clone();

        for (currency_id, ov) in overrides {
            let sig_hash = ov.sig_hash_code(currency_id)?;
            let profile = updated.profile_mut(currency_id).ok_or_else(|| {
                SignerError::parse_error(format!("override for unknown currency {}", currency_id))
            })?;

            if let Some(code) = sig_hash {
                profile.sig_hash_type = code;
            }
            if let Some(threshold) = ov.dust_threshold {
                profile.dust_threshold = threshold;
            }
            if let Some(policy) = ov.dust_policy {
                profile.dust_policy = policy;
            }
        }

        *self = updated;
        Ok(())
    }

    /// Built-in table with a JSON overrides document applied
    pub fn from_overrides_json(json: &str) -> SignerResult<Self> {
        let mut table = Self::builtin();
        table.apply_overrides(&parse_overrides(json)?)?;
        Ok(table)
    }
}
