//! Extended Public Keys
//!
//! Parsing of base58check extended keys and public-only (non-hardened)
//! child derivation. No private key material ever passes through here.

use bitcoin::base58;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{PublicKey, Scalar, Secp256k1, VerifyOnly};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::str::FromStr;

use crate::error::SignerError;

type HmacSha512 = Hmac<Sha512>;

/// Index offset for hardened children (2^31)
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Serialized extended key length without the checksum
pub const EXTENDED_KEY_LEN: usize = 78;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XpubError {
    #[error("base58check decoding failed: {0}")]
    Base58(String),
    #[error("extended key payload must be 78 bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid compressed public key")]
    InvalidPublicKey,
    #[error("hardened index {0} cannot be derived from a public key")]
    HardenedIndex(u32),
    #[error("chain code rejected as HMAC key")]
    InvalidChainCode,
    #[error("derived tweak is not a valid scalar")]
    InvalidTweak,
    #[error("derived child is the point at infinity")]
    PointAtInfinity,
}

impl From<XpubError> for SignerError {
    fn from(e: XpubError) -> Self {
        SignerError::derivation(e.to_string())
    }
}

/// The elliptic-curve step of child derivation.
///
/// Given a parent compressed public key and chain code, returns the child's
/// compressed public key and chain code at a non-hardened `index`.
pub trait ChildKeyDeriver: Send + Sync {
    fn derive_child(
        &self,
        parent_public_key: &[u8; 33],
        parent_chain_code: &[u8; 32],
        index: u32,
    ) -> Result<([u8; 33], [u8; 32]), XpubError>;
}

/// BIP32 CKDpub over secp256k1
pub struct Secp256k1Deriver {
    secp: Secp256k1<VerifyOnly>,
}

impl Secp256k1Deriver {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for Secp256k1Deriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildKeyDeriver for Secp256k1Deriver {
    fn derive_child(
        &self,
        parent_public_key: &[u8; 33],
        parent_chain_code: &[u8; 32],
        index: u32,
    ) -> Result<([u8; 33], [u8; 32]), XpubError> {
        if index >= HARDENED_OFFSET {
            return Err(XpubError::HardenedIndex(index));
        }

        // I = HMAC-SHA512(key = chain code, data = serP(K) || ser32(i))
        let mut mac = HmacSha512::new_from_slice(parent_chain_code)
            .map_err(|_| XpubError::InvalidChainCode)?;
        mac.update(parent_public_key);
        mac.update(&index.to_be_bytes());
        let i = mac.finalize().into_bytes();

        let mut il = [0u8; 32];
        let mut ir = [0u8; 32];
        il.copy_from_slice(&i[..32]);
        ir.copy_from_slice(&i[32..]);

        let tweak = Scalar::from_be_bytes(il).map_err(|_| XpubError::InvalidTweak)?;
        let parent = PublicKey::from_slice(parent_public_key)
            .map_err(|_| XpubError::InvalidPublicKey)?;
        let child = parent
            .add_exp_tweak(&self.secp, &tweak)
            .map_err(|_| XpubError::PointAtInfinity)?;

        Ok((child.serialize(), ir))
    }
}

/// Parsed extended public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    pub version: [u8; 4],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_index: u32,
    pub chain_code: [u8; 32],
    pub public_key: [u8; 33],
}

impl ExtendedPublicKey {
    /// Decode a base58check extended key.
    ///
    /// Layout: version(4) depth(1) fingerprint(4) child(4) chain code(32)
    /// key(33). The version is kept but not interpreted, so xpub/ypub/zpub
    /// and their testnet forms all parse.
    pub fn parse(encoded: &str) -> Result<Self, XpubError> {
        let data = base58::decode_check(encoded.trim())
            .map_err(|e| XpubError::Base58(e.to_string()))?;
        if data.len() != EXTENDED_KEY_LEN {
            return Err(XpubError::InvalidLength(data.len()));
        }

        let mut version = [0u8; 4];
        let mut parent_fingerprint = [0u8; 4];
        let mut index_bytes = [0u8; 4];
        let mut chain_code = [0u8; 32];
        let mut public_key = [0u8; 33];
        version.copy_from_slice(&data[0..4]);
        parent_fingerprint.copy_from_slice(&data[5..9]);
        index_bytes.copy_from_slice(&data[9..13]);
        chain_code.copy_from_slice(&data[13..45]);
        public_key.copy_from_slice(&data[45..78]);

        PublicKey::from_slice(&public_key).map_err(|_| XpubError::InvalidPublicKey)?;

        Ok(Self {
            version,
            depth: data[4],
            parent_fingerprint,
            child_index: u32::from_be_bytes(index_bytes),
            chain_code,
            public_key,
        })
    }

    /// Derive the non-hardened child at `index`, one level deeper
    pub fn derive_child<D: ChildKeyDeriver + ?Sized>(
        &self,
        deriver: &D,
        index: u32,
    ) -> Result<Self, XpubError> {
        let (public_key, chain_code) =
            deriver.derive_child(&self.public_key, &self.chain_code, index)?;

        Ok(Self {
            version: self.version,
            depth: self.depth.wrapping_add(1),
            parent_fingerprint: self.fingerprint(),
            child_index: index,
            chain_code,
            public_key,
        })
    }

    /// First 4 bytes of hash160 of the public key
    pub fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160::Hash::hash(&self.public_key).to_byte_array();
        let mut fp = [0u8; 4];
        fp.copy_from_slice(&hash[..4]);
        fp
    }

    /// Re-encode as base58check
    pub fn to_base58(&self) -> String {
        let mut data = Vec::with_capacity(EXTENDED_KEY_LEN);
        data.extend_from_slice(&self.version);
        data.push(self.depth);
        data.extend_from_slice(&self.parent_fingerprint);
        data.extend_from_slice(&self.child_index.to_be_bytes());
        data.extend_from_slice(&self.chain_code);
        data.extend_from_slice(&self.public_key);
        base58::encode_check(&data)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

impl FromStr for ExtendedPublicKey {
    type Err = XpubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP84 test vector, account 0'
    const ZPUB: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";

    #[test]
    fn test_parse_metadata() {
        let key = ExtendedPublicKey::parse(ZPUB).unwrap();
        assert_eq!(key.depth, 3);
        assert_eq!(key.child_index, HARDENED_OFFSET);
        assert_eq!(key.version, [0x04, 0xb2, 0x47, 0x46]);
        assert_eq!(key.to_base58(), ZPUB);
    }

    #[test]
    fn test_derive_path_vector() {
        let deriver = Secp256k1Deriver::new();
        let key = ExtendedPublicKey::parse(ZPUB).unwrap();

        let account = key.derive_child(&deriver, 0).unwrap();
        let leaf = account.derive_child(&deriver, 0).unwrap();

        assert_eq!(account.depth, 4);
        assert_eq!(account.parent_fingerprint, key.fingerprint());
        assert_eq!(leaf.depth, 5);
        assert_eq!(
            leaf.public_key_hex(),
            "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c"
        );

        let second = account.derive_child(&deriver, 1).unwrap();
        assert_eq!(
            second.public_key_hex(),
            "03e775fd51f0dfb8cd865d9ff1cca2a158cf651fe997fdc9fee9c1d3b5e995ea77"
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut tampered = ZPUB.to_string();
        tampered.pop();
        tampered.push('t');
        assert!(matches!(
            ExtendedPublicKey::parse(&tampered),
            Err(XpubError::Base58(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let short = base58::encode_check(&[0x04, 0x88, 0xb2, 0x1e, 0x00]);
        assert_eq!(
            ExtendedPublicKey::parse(&short),
            Err(XpubError::InvalidLength(5))
        );
    }

    #[test]
    fn test_invalid_point() {
        let mut data = base58::decode_check(ZPUB).unwrap();
        data[45] = 0x05;
        let encoded = base58::encode_check(&data);
        assert_eq!(
            ExtendedPublicKey::parse(&encoded),
            Err(XpubError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_hardened_index_rejected() {
        let deriver = Secp256k1Deriver::new();
        let key = ExtendedPublicKey::parse(ZPUB).unwrap();
        assert_eq!(
            key.derive_child(&deriver, HARDENED_OFFSET),
            Err(XpubError::HardenedIndex(HARDENED_OFFSET))
        );
    }

    #[test]
    fn test_error_maps_to_derivation_code() {
        let err: SignerError = XpubError::PointAtInfinity.into();
        assert_eq!(err.code, crate::error::ErrorCode::Derivation);
    }
}
