//! Coin Profiles
//!
//! Static per-currency parameters consulted by address encoding and by the
//! signing orchestrator. Everything coin-specific lives in this table so the
//! signing flow itself never branches on a currency id.

mod overrides;

pub use overrides::*;

use crate::error::{SignerError, SignerResult};
use crate::types::LogicalTransaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Contributes coin-specific signing-context tags
pub type AdditionalsFn = fn(&LogicalTransaction) -> Vec<String>;

/// How the dust threshold is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DustPolicy {
    /// Threshold scales with the fee rate per kilobyte
    PerKbyte,
    /// Threshold is an absolute amount
    Fixed,
}

/// Lock time applied when the request does not carry one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeRule {
    /// Current unix time minus a fixed offset in seconds
    NowMinusSeconds(u32),
}

impl LockTimeRule {
    pub fn apply(&self, now_unix: u32) -> u32 {
        match self {
            LockTimeRule::NowMinusSeconds(offset) => now_unix.saturating_sub(*offset),
        }
    }
}

/// Komodo pays interest only on UTXOs whose spending tx sets a recent lock time.
// TODO: confirm the 777 s offset against komodod's komodo_interest rules before
// reusing this rule for any other asset chain.
pub const KOMODO_REWARD_LOCK_TIME_OFFSET: u32 = 777;

pub const DEFAULT_DUST_THRESHOLD: u64 = 3000;

/// Per-currency parameters
#[derive(Debug, Clone)]
pub struct CoinProfile {
    pub currency_id: &'static str,
    pub sig_hash_type: u32,
    /// Base58 version prefix of pay-to-pubkey-hash addresses
    pub pub_key_hash: &'static [u8],
    /// Base58 version prefix of pay-to-script-hash addresses
    pub script_hash: &'static [u8],
    pub bech32_hrp: Option<&'static str>,
    /// Leading characters of legacy addresses on this network
    pub legacy_prefixes: &'static [&'static str],
    /// Leading characters of script-hash (wrapped segwit) addresses
    pub segwit_prefixes: &'static [&'static str],
    pub dust_threshold: u64,
    pub dust_policy: DustPolicy,
    pub has_expiry_height: bool,
    pub has_extra_data: bool,
    pub has_timestamp: bool,
    pub lock_time_override: Option<LockTimeRule>,
    pub additionals: Option<AdditionalsFn>,
}

impl CoinProfile {
    fn base(
        currency_id: &'static str,
        pub_key_hash: &'static [u8],
        script_hash: &'static [u8],
        legacy_prefixes: &'static [&'static str],
        segwit_prefixes: &'static [&'static str],
    ) -> Self {
        Self {
            currency_id,
            sig_hash_type: SIGHASH_ALL,
            pub_key_hash,
            script_hash,
            bech32_hrp: None,
            legacy_prefixes,
            segwit_prefixes,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            dust_policy: DustPolicy::PerKbyte,
            has_expiry_height: false,
            has_extra_data: false,
            has_timestamp: false,
            lock_time_override: None,
            additionals: None,
        }
    }

    /// Transactions of this coin carry a timestamp field
    pub fn uses_timestamped_transaction(&self) -> bool {
        self.has_timestamp
    }

    /// Coin-specific tags for the device, empty when the coin has none
    pub fn additional_tags(&self, transaction: &LogicalTransaction) -> Vec<String> {
        self.additionals.map(|f| f(transaction)).unwrap_or_default()
    }
}

// =============================================================================
// Signature-hash codes
// =============================================================================

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Check that `code` is a signature-hash type a device can sign with.
///
/// The base type (`code & 0x1f`) must be ALL, NONE or SINGLE and the other
/// bits may only be FORKID and ANYONECANPAY.
pub fn validate_sig_hash_type(code: u32) -> SignerResult<u32> {
    let base = code & 0x1f;
    let flags = code & !0x1f;
    let base_ok = matches!(base, SIGHASH_ALL | SIGHASH_NONE | SIGHASH_SINGLE);
    let flags_ok = flags & !(SIGHASH_FORKID | SIGHASH_ANYONECANPAY) == 0;

    if base_ok && flags_ok {
        Ok(code)
    } else {
        Err(SignerError::invalid_network_parameter(format!(
            "sigHashType 0x{:x} is not a valid signature-hash code",
            code
        )))
    }
}

// =============================================================================
// Built-in table
// =============================================================================

fn zcash_additionals(_: &LogicalTransaction) -> Vec<String> {
    vec!["sapling".to_string()]
}

fn bitcoin_cash_additionals(_: &LogicalTransaction) -> Vec<String> {
    vec!["abc".to_string()]
}

fn bitcoin_gold_additionals(_: &LogicalTransaction) -> Vec<String> {
    vec!["gold".to_string()]
}

fn builtin_profiles() -> Vec<CoinProfile> {
    vec![
        CoinProfile {
            bech32_hrp: Some("bc"),
            ..CoinProfile::base("bitcoin", &[0x00], &[0x05], &["1"], &["3"])
        },
        CoinProfile {
            bech32_hrp: Some("tb"),
            ..CoinProfile::base("bitcoin_testnet", &[0x6f], &[0xc4], &["m", "n"], &["2"])
        },
        CoinProfile {
            bech32_hrp: Some("ltc"),
            ..CoinProfile::base("litecoin", &[0x30], &[0x32], &["L"], &["M"])
        },
        CoinProfile {
            dust_threshold: 1_000_000,
            dust_policy: DustPolicy::Fixed,
            ..CoinProfile::base("dogecoin", &[0x1e], &[0x16], &["D"], &["A", "9"])
        },
        CoinProfile::base("dash", &[0x4c], &[0x10], &["X"], &["7"]),
        CoinProfile {
            lock_time_override: Some(LockTimeRule::NowMinusSeconds(
                KOMODO_REWARD_LOCK_TIME_OFFSET,
            )),
            ..CoinProfile::base("komodo", &[0x3c], &[0x55], &["R"], &["b"])
        },
        CoinProfile {
            bech32_hrp: Some("pc"),
            has_timestamp: true,
            ..CoinProfile::base("peercoin", &[0x37], &[0x75], &["P"], &["p"])
        },
        CoinProfile {
            has_expiry_height: true,
            has_extra_data: true,
            additionals: Some(zcash_additionals as AdditionalsFn),
            ..CoinProfile::base("zcash", &[0x1c, 0xb8], &[0x1c, 0xbd], &["t1"], &["t3"])
        },
        CoinProfile {
            sig_hash_type: SIGHASH_ALL | SIGHASH_FORKID,
            additionals: Some(bitcoin_cash_additionals as AdditionalsFn),
            ..CoinProfile::base("bitcoin_cash", &[0x00], &[0x05], &["1"], &["3"])
        },
        CoinProfile {
            sig_hash_type: SIGHASH_ALL | SIGHASH_FORKID,
            bech32_hrp: Some("btg"),
            additionals: Some(bitcoin_gold_additionals as AdditionalsFn),
            ..CoinProfile::base("bitcoin_gold", &[0x26], &[0x17], &["G"], &["A"])
        },
    ]
}

/// Lookup table of coin profiles keyed by currency id
#[derive(Debug, Clone)]
pub struct CoinProfileTable {
    profiles: HashMap<String, CoinProfile>,
}

impl CoinProfileTable {
    pub fn builtin() -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.currency_id.to_string(), p))
            .collect();
        Self { profiles }
    }

    pub fn profile_for(&self, currency_id: &str) -> SignerResult<&CoinProfile> {
        self.profiles.get(currency_id).ok_or_else(|| {
            SignerError::invalid_network_parameter(format!(
                "no network parameters for currency {}",
                currency_id
            ))
        })
    }

    pub fn insert(&mut self, profile: CoinProfile) {
        self.profiles.insert(profile.currency_id.to_string(), profile);
    }

    pub fn currency_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn profile_mut(&mut self, currency_id: &str) -> Option<&mut CoinProfile> {
        self.profiles.get_mut(currency_id)
    }
}

impl Default for CoinProfileTable {
    fn default() -> Self {
        Self::builtin()
    }
}

static BUILTIN_PROFILES: OnceLock<CoinProfileTable> = OnceLock::new();

/// Get the process-wide built-in profile table
pub fn builtin_profiles_table() -> &'static CoinProfileTable {
    BUILTIN_PROFILES.get_or_init(CoinProfileTable::builtin)
}

/// Look a currency up in the built-in table
pub fn profile_for(currency_id: &str) -> SignerResult<&'static CoinProfile> {
    builtin_profiles_table().profile_for(currency_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_builtin_lookup() {
        let btc = profile_for("bitcoin").unwrap();
        assert_eq!(btc.pub_key_hash, &[0x00]);
        assert_eq!(btc.script_hash, &[0x05]);
        assert_eq!(btc.bech32_hrp, Some("bc"));
        assert_eq!(btc.dust_threshold, 3000);
        assert_eq!(btc.dust_policy, DustPolicy::PerKbyte);
        assert!(!btc.uses_timestamped_transaction());
    }

    #[test]
    fn test_unknown_currency() {
        let err = profile_for("ethereum").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNetworkParameter);
    }

    #[test]
    fn test_per_coin_rules_are_data() {
        let komodo = profile_for("komodo").unwrap();
        assert_eq!(
            komodo.lock_time_override,
            Some(LockTimeRule::NowMinusSeconds(777))
        );

        let zcash = profile_for("zcash").unwrap();
        assert!(zcash.has_expiry_height && zcash.has_extra_data);
        assert_eq!(
            zcash.additional_tags(&LogicalTransaction::default()),
            vec!["sapling".to_string()]
        );

        assert!(profile_for("peercoin").unwrap().has_timestamp);
        assert_eq!(profile_for("dogecoin").unwrap().dust_policy, DustPolicy::Fixed);
        assert!(profile_for("bitcoin").unwrap().additional_tags(&LogicalTransaction::default()).is_empty());
    }

    #[test]
    fn test_lock_time_rule() {
        assert_eq!(LockTimeRule::NowMinusSeconds(777).apply(1_700_000_000), 1_699_999_223);
        assert_eq!(LockTimeRule::NowMinusSeconds(777).apply(100), 0);
    }

    #[test]
    fn test_sig_hash_validation() {
        assert_eq!(validate_sig_hash_type(0x01).unwrap(), 0x01);
        assert_eq!(validate_sig_hash_type(0x41).unwrap(), 0x41);
        assert_eq!(validate_sig_hash_type(0x83).unwrap(), 0x83);
        assert!(validate_sig_hash_type(0x00).is_err());
        assert!(validate_sig_hash_type(0x04).is_err());
        assert!(validate_sig_hash_type(0x21).is_err());
        assert!(validate_sig_hash_type(0x101).is_err());
    }

    #[test]
    fn test_builtin_sig_hashes_are_valid() {
        let table = builtin_profiles_table();
        for id in table.currency_ids() {
            let profile = table.profile_for(id).unwrap();
            assert!(validate_sig_hash_type(profile.sig_hash_type).is_ok(), "{}", id);
        }
    }
}
