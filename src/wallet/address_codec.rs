//! Address Codec
//!
//! One case per [`AddressScheme`]:
//!
//! | scheme | payload | encoding |
//! |---|---|---|
//! | legacy | `hash160(pk)` | base58check, pubkey-hash prefix |
//! | segwit | `hash160(0x00 0x14 ‖ hash160(pk))` | base58check, script-hash prefix |
//! | native segwit | v0 program `hash160(pk)` | bech32, profile hrp |
//!
//! Taproot outputs are not recognized here.

use bech32::{FromBase32, ToBase32, Variant};
use bitcoin::base58;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_PUSHBYTES_0, OP_PUSHNUM_1,
};
use bitcoin::ScriptBuf;

use crate::error::{SignerError, SignerResult};
use crate::networks::CoinProfile;
use crate::types::{Address, AddressScheme};
use crate::wallet::derivation_cache::DerivationCache;
use crate::wallet::xpub::{ChildKeyDeriver, Secp256k1Deriver};

const HASH160_LEN: usize = 20;

fn hash160(data: &[u8]) -> [u8; HASH160_LEN] {
    hash160::Hash::hash(data).to_byte_array()
}

fn base58_with_prefix(prefix: &[u8], payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(prefix.len() + payload.len());
    data.extend_from_slice(prefix);
    data.extend_from_slice(payload);
    base58::encode_check(&data)
}

/// P2WPKH witness program: `OP_0 <20-byte key hash>`
fn p2wpkh_program(key_hash: &[u8; HASH160_LEN]) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + HASH160_LEN);
    script.push(OP_PUSHBYTES_0.to_u8());
    script.push(HASH160_LEN as u8);
    script.extend_from_slice(key_hash);
    script
}

/// Encode a compressed public key as an address of `scheme` on `profile`'s network
pub fn encode(scheme: AddressScheme, public_key: &[u8; 33], profile: &CoinProfile) -> SignerResult<String> {
    let key_hash = hash160(public_key);

    match scheme {
        AddressScheme::Legacy => Ok(base58_with_prefix(profile.pub_key_hash, &key_hash)),
        AddressScheme::Segwit => {
            let redeem_script = p2wpkh_program(&key_hash);
            Ok(base58_with_prefix(profile.script_hash, &hash160(&redeem_script)))
        }
        AddressScheme::NativeSegwit => {
            let hrp = profile.bech32_hrp.ok_or_else(|| {
                SignerError::invalid_address(format!(
                    "{} has no native segwit addresses",
                    profile.currency_id
                ))
            })?;
            let mut data = vec![bech32::u5::try_from_u8(0)?];
            data.extend(key_hash.to_base32());
            Ok(bech32::encode(hrp, data, Variant::Bech32)?)
        }
    }
}

/// Accepts anything that decodes as base58check or bech32, on any network.
///
/// Weaker than [`AddressCodec::validate`]: it does not look at version bytes
/// or human-readable parts.
pub fn is_parsable_address(address: &str) -> bool {
    base58::decode_check(address).is_ok() || bech32::decode(address).is_ok()
}

/// Address operations bound to one coin profile.
///
/// The address level of the cache is keyed by scheme, xpub and path only, so
/// a cache shared between codecs of different networks must only ever see
/// network-specific extended keys.
pub struct AddressCodec<'a, D: ChildKeyDeriver = Secp256k1Deriver> {
    profile: &'a CoinProfile,
    cache: &'a DerivationCache<D>,
}

impl<'a, D: ChildKeyDeriver> AddressCodec<'a, D> {
    pub fn new(profile: &'a CoinProfile, cache: &'a DerivationCache<D>) -> Self {
        Self { profile, cache }
    }

    pub fn profile(&self) -> &CoinProfile {
        self.profile
    }

    /// Address record at `xpub / account / index`
    pub fn address(
        &self,
        scheme: AddressScheme,
        xpub: &str,
        account: u32,
        index: u32,
    ) -> SignerResult<Address> {
        let address = self
            .cache
            .address_or_insert_with(scheme, xpub, account, index, |pk| {
                encode(scheme, pk, self.profile)
            })?;

        Ok(Address {
            address,
            scheme,
            xpub: xpub.to_string(),
            account,
            index,
        })
    }

    /// Scheme implied by the leading characters of `address`
    pub fn infer_scheme(&self, address: &str) -> SignerResult<AddressScheme> {
        if let Some(hrp) = self.profile.bech32_hrp {
            let separator = format!("{}1", hrp);
            if address.to_lowercase().starts_with(&separator) {
                return Ok(AddressScheme::NativeSegwit);
            }
        }
        if self.profile.segwit_prefixes.iter().any(|p| address.starts_with(p)) {
            return Ok(AddressScheme::Segwit);
        }
        if self.profile.legacy_prefixes.iter().any(|p| address.starts_with(p)) {
            return Ok(AddressScheme::Legacy);
        }

        Err(SignerError::invalid_address(format!(
            "unrecognized {} address format",
            self.profile.currency_id
        )))
    }

    /// Locking script paying to `address`
    pub fn to_output_script(&self, address: &str) -> SignerResult<ScriptBuf> {
        if let Some(hrp) = self.profile.bech32_hrp {
            if address.to_lowercase().starts_with(&format!("{}1", hrp)) {
                return self.witness_output_script(address, hrp);
            }
        }

        let data = base58::decode_check(address)
            .map_err(|e| SignerError::invalid_address("base58check decoding failed").with_details(e.to_string()))?;

        let script = if let Some(hash) = strip_hash_payload(&data, self.profile.pub_key_hash) {
            let mut script = Vec::with_capacity(25);
            script.push(OP_DUP.to_u8());
            script.push(OP_HASH160.to_u8());
            script.push(HASH160_LEN as u8);
            script.extend_from_slice(hash);
            script.push(OP_EQUALVERIFY.to_u8());
            script.push(OP_CHECKSIG.to_u8());
            script
        } else if let Some(hash) = strip_hash_payload(&data, self.profile.script_hash) {
            let mut script = Vec::with_capacity(23);
            script.push(OP_HASH160.to_u8());
            script.push(HASH160_LEN as u8);
            script.extend_from_slice(hash);
            script.push(OP_EQUAL.to_u8());
            script
        } else {
            return Err(SignerError::invalid_address(format!(
                "address is not a {} pubkey-hash or script-hash address",
                self.profile.currency_id
            )));
        };

        Ok(ScriptBuf::from_bytes(script))
    }

    fn witness_output_script(&self, address: &str, hrp: &str) -> SignerResult<ScriptBuf> {
        let (decoded_hrp, data, variant) = bech32::decode(address)?;
        if decoded_hrp != hrp {
            return Err(SignerError::invalid_address(format!(
                "expected human-readable part {}, got {}",
                hrp, decoded_hrp
            )));
        }
        let (version, program) = data
            .split_first()
            .ok_or_else(|| SignerError::invalid_address("empty witness program"))?;
        let version = version.to_u8();
        let program = Vec::<u8>::from_base32(program)?;

        let well_formed = match version {
            0 => variant == Variant::Bech32 && matches!(program.len(), 20 | 32),
            1..=16 => variant == Variant::Bech32m && (2..=40).contains(&program.len()),
            _ => false,
        };
        if !well_formed {
            return Err(SignerError::invalid_address(format!(
                "invalid witness v{} program of {} bytes ({:?})",
                version,
                program.len(),
                variant
            )));
        }

        let mut script = Vec::with_capacity(2 + program.len());
        script.push(if version == 0 {
            OP_PUSHBYTES_0.to_u8()
        } else {
            OP_PUSHNUM_1.to_u8() + version - 1
        });
        script.push(program.len() as u8);
        script.extend_from_slice(&program);
        Ok(ScriptBuf::from_bytes(script))
    }

    /// Strict check: base58check payload must carry this network's
    /// pubkey-hash or script-hash prefix.
    pub fn validate(&self, address: &str) -> bool {
        let Ok(data) = base58::decode_check(address) else {
            return false;
        };
        [self.profile.pub_key_hash, self.profile.script_hash]
            .iter()
            .any(|prefix| data.len() > prefix.len() && data.starts_with(prefix))
    }

    /// Taproot outputs are never recognized
    pub fn is_taproot(&self, _address: &str) -> bool {
        false
    }
}

fn strip_hash_payload<'d>(data: &'d [u8], prefix: &[u8]) -> Option<&'d [u8]> {
    data.strip_prefix(prefix)
        .filter(|payload| payload.len() == HASH160_LEN)
}
