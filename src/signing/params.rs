//! Per-coin signing parameters
//!
//! Everything the device needs besides the transaction itself, derived from
//! the coin profile, the account's derivation mode and the request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SignerResult;
use crate::networks::{validate_sig_hash_type, CoinProfile};
use crate::types::{Account, DerivationMode, LogicalTransaction};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Unix seconds, clamped to the `u32` range used by lock times
    fn now_unix(&self) -> u32 {
        self.now().timestamp().clamp(0, i64::from(u32::MAX)) as u32
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Default expiry height sent for coins that require the field
pub const DEFAULT_EXPIRY_HEIGHT: [u8; 4] = [0, 0, 0, 0];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningParameters {
    pub lock_time: Option<u32>,
    pub sig_hash_type: u32,
    pub segwit: bool,
    pub has_timestamp: bool,
    /// Unix time captured when signing starts, for timestamped coins only
    pub initial_timestamp: Option<u32>,
    pub additionals: Vec<String>,
    #[serde(with = "crate::serde_bytes::hex4_option")]
    pub expiry_height: Option<[u8; 4]>,
    pub has_extra_data: bool,
}

pub fn compute_signing_parameters(
    profile: &CoinProfile,
    account: &Account,
    transaction: &LogicalTransaction,
    clock: &dyn Clock,
) -> SignerResult<SigningParameters> {
    let sig_hash_type = validate_sig_hash_type(profile.sig_hash_type)?;

    let lock_time = transaction.lock_time.or_else(|| {
        profile
            .lock_time_override
            .map(|rule| rule.apply(clock.now_unix()))
    });

    let has_timestamp = profile.uses_timestamped_transaction();
    let initial_timestamp = has_timestamp.then(|| clock.now_unix());

    let mut additionals = vec![account.currency_id.clone()];
    match account.derivation_mode {
        DerivationMode::NativeSegwit => additionals.push("bech32".to_string()),
        DerivationMode::Taproot => additionals.push("bech32m".to_string()),
        DerivationMode::Legacy | DerivationMode::Segwit => {}
    }
    additionals.extend(profile.additional_tags(transaction));

    Ok(SigningParameters {
        lock_time,
        sig_hash_type,
        segwit: account.derivation_mode.is_segwit(),
        has_timestamp,
        initial_timestamp,
        additionals,
        expiry_height: profile.has_expiry_height.then_some(DEFAULT_EXPIRY_HEIGHT),
        has_extra_data: profile.has_extra_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::networks::{profile_for, CoinProfileTable};
    use chrono::TimeZone;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(self.0, 0).single().unwrap()
        }
    }

    fn account(currency_id: &str, derivation_mode: DerivationMode) -> Account {
        Account {
            id: format!("js:2:{}:xpub:{:?}", currency_id, derivation_mode),
            currency_id: currency_id.to_string(),
            xpub: "xpub".to_string(),
            derivation_mode,
            derivation_path: "84'/0'/0'".to_string(),
        }
    }

    #[test]
    fn test_bitcoin_native_segwit() {
        let params = compute_signing_parameters(
            profile_for("bitcoin").unwrap(),
            &account("bitcoin", DerivationMode::NativeSegwit),
            &LogicalTransaction::default(),
            &FixedClock(1_700_000_000),
        )
        .unwrap();

        assert_eq!(params.lock_time, None);
        assert_eq!(params.sig_hash_type, 0x01);
        assert!(params.segwit);
        assert!(!params.has_timestamp);
        assert_eq!(params.initial_timestamp, None);
        assert_eq!(params.additionals, vec!["bitcoin", "bech32"]);
        assert_eq!(params.expiry_height, None);
        assert!(!params.has_extra_data);
    }

    #[test]
    fn test_komodo_lock_time_override() {
        let clock = FixedClock(1_700_000_000);
        let params = compute_signing_parameters(
            profile_for("komodo").unwrap(),
            &account("komodo", DerivationMode::Legacy),
            &LogicalTransaction::default(),
            &clock,
        )
        .unwrap();
        assert_eq!(params.lock_time, Some(1_700_000_000 - 777));
        assert!(!params.segwit);

        // explicit request lock time wins over the rule
        let explicit = LogicalTransaction {
            lock_time: Some(42),
            ..Default::default()
        };
        let params = compute_signing_parameters(
            profile_for("komodo").unwrap(),
            &account("komodo", DerivationMode::Legacy),
            &explicit,
            &clock,
        )
        .unwrap();
        assert_eq!(params.lock_time, Some(42));
    }

    #[test]
    fn test_zcash_and_peercoin_fields() {
        let clock = FixedClock(1_650_000_000);

        let zec = compute_signing_parameters(
            profile_for("zcash").unwrap(),
            &account("zcash", DerivationMode::Legacy),
            &LogicalTransaction::default(),
            &clock,
        )
        .unwrap();
        assert_eq!(zec.expiry_height, Some([0, 0, 0, 0]));
        assert!(zec.has_extra_data);
        assert_eq!(zec.additionals, vec!["zcash", "sapling"]);

        let ppc = compute_signing_parameters(
            profile_for("peercoin").unwrap(),
            &account("peercoin", DerivationMode::Segwit),
            &LogicalTransaction::default(),
            &clock,
        )
        .unwrap();
        assert!(ppc.has_timestamp);
        assert_eq!(ppc.initial_timestamp, Some(1_650_000_000));
        assert_eq!(ppc.lock_time, None);
    }

    #[test]
    fn test_taproot_tag_and_fork_id() {
        let params = compute_signing_parameters(
            profile_for("bitcoin_cash").unwrap(),
            &account("bitcoin_cash", DerivationMode::Taproot),
            &LogicalTransaction::default(),
            &SystemClock,
        )
        .unwrap();
        assert_eq!(params.sig_hash_type, 0x41);
        assert_eq!(params.additionals, vec!["bitcoin_cash", "bech32m", "abc"]);
    }

    #[test]
    fn test_invalid_sig_hash_rejected() {
        let mut table = CoinProfileTable::builtin();
        let mut broken = table.profile_for("bitcoin").unwrap().clone();
        broken.sig_hash_type = 0x00;
        table.insert(broken);

        let err = compute_signing_parameters(
            table.profile_for("bitcoin").unwrap(),
            &account("bitcoin", DerivationMode::Legacy),
            &LogicalTransaction::default(),
            &SystemClock,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNetworkParameter);
    }

    #[test]
    fn test_serialized_shape() {
        let params = compute_signing_parameters(
            profile_for("zcash").unwrap(),
            &account("zcash", DerivationMode::Legacy),
            &LogicalTransaction::default(),
            &FixedClock(0),
        )
        .unwrap();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["expiryHeight"], "00000000");
        assert_eq!(json["sigHashType"], 1);
    }
}
