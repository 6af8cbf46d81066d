//! Derivation Cache
//!
//! Memoizes parsed roots, account-level keys, leaf public keys and encoded
//! addresses under string composite keys:
//!
//! | key | value |
//! |---|---|
//! | `{xpub}` | parsed root |
//! | `{xpub}-{account}` | account-level key |
//! | `{xpub}-{account}-{index}` | leaf public key |
//! | `{scheme}-{xpub}-{account}-{index}` | address |
//!
//! Entries are never evicted: memory grows with the number of distinct
//! paths requested over the life of the cache. Construct one cache per
//! process (or per wallet session) and share it by reference.

use std::sync::Arc;

use crate::error::SignerResult;
use crate::types::AddressScheme;
use crate::utils::Cache;
use crate::wallet::xpub::{ChildKeyDeriver, ExtendedPublicKey, Secp256k1Deriver};

/// Entry counts per cache level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub roots: usize,
    pub accounts: usize,
    pub public_keys: usize,
    pub addresses: usize,
}

pub struct DerivationCache<D: ChildKeyDeriver = Secp256k1Deriver> {
    deriver: D,
    roots: Cache<Arc<ExtendedPublicKey>>,
    accounts: Cache<Arc<ExtendedPublicKey>>,
    public_keys: Cache<[u8; 33]>,
    addresses: Cache<String>,
}

impl DerivationCache<Secp256k1Deriver> {
    pub fn new() -> Self {
        Self::with_deriver(Secp256k1Deriver::new())
    }
}

impl Default for DerivationCache<Secp256k1Deriver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ChildKeyDeriver> DerivationCache<D> {
    pub fn with_deriver(deriver: D) -> Self {
        Self {
            deriver,
            roots: Cache::new(),
            accounts: Cache::new(),
            public_keys: Cache::new(),
            addresses: Cache::new(),
        }
    }

    pub fn deriver(&self) -> &D {
        &self.deriver
    }

    /// Parsed extended key, decoded once per distinct string
    pub fn root(&self, xpub: &str) -> SignerResult<Arc<ExtendedPublicKey>> {
        self.roots.get_or_try_insert_with(xpub, || {
            Ok(Arc::new(ExtendedPublicKey::parse(xpub)?))
        })
    }

    /// Account-level key: `xpub / account`
    pub fn account_key(&self, xpub: &str, account: u32) -> SignerResult<Arc<ExtendedPublicKey>> {
        let key = format!("{}-{}", xpub, account);
        self.accounts.get_or_try_insert_with(&key, || {
            let root = self.root(xpub)?;
            Ok(Arc::new(root.derive_child(&self.deriver, account)?))
        })
    }

    /// Compressed public key at `xpub / account / index`
    pub fn public_key_at(&self, xpub: &str, account: u32, index: u32) -> SignerResult<[u8; 33]> {
        let key = format!("{}-{}-{}", xpub, account, index);
        self.public_keys.get_or_try_insert_with(&key, || {
            let account_key = self.account_key(xpub, account)?;
            Ok(account_key.derive_child(&self.deriver, index)?.public_key)
        })
    }

    /// Cached address for `(scheme, xpub, account, index)`; `encode` runs on
    /// a miss only, with the leaf public key.
    pub fn address_or_insert_with(
        &self,
        scheme: AddressScheme,
        xpub: &str,
        account: u32,
        index: u32,
        encode: impl FnOnce(&[u8; 33]) -> SignerResult<String>,
    ) -> SignerResult<String> {
        let key = format!("{}-{}-{}-{}", scheme, xpub, account, index);
        self.addresses.get_or_try_insert_with(&key, || {
            let public_key = self.public_key_at(xpub, account, index)?;
            encode(&public_key)
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            roots: self.roots.len(),
            accounts: self.accounts.len(),
            public_keys: self.public_keys.len(),
            addresses: self.addresses.len(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::wallet::xpub::XpubError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const ZPUB: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";

    /// Counts calls into the elliptic-curve primitive
    #[derive(Default)]
    pub(crate) struct CountingDeriver {
        inner: Secp256k1Deriver,
        pub(crate) calls: AtomicUsize,
    }

    impl ChildKeyDeriver for CountingDeriver {
        fn derive_child(
            &self,
            parent_public_key: &[u8; 33],
            parent_chain_code: &[u8; 32],
            index: u32,
        ) -> Result<([u8; 33], [u8; 32]), XpubError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.derive_child(parent_public_key, parent_chain_code, index)
        }
    }

    #[test]
    fn test_public_key_at_is_deterministic() {
        let cache = DerivationCache::new();
        let first = cache.public_key_at(ZPUB, 0, 0).unwrap();
        let second = cache.public_key_at(ZPUB, 0, 0).unwrap();
        assert_eq!(first, second);

        let fresh = DerivationCache::new().public_key_at(ZPUB, 0, 0).unwrap();
        assert_eq!(first, fresh);
        assert_eq!(
            hex::encode(first),
            "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c"
        );
    }

    #[test]
    fn test_account_level_is_shared_between_indices() {
        let cache = DerivationCache::with_deriver(CountingDeriver::default());

        cache.public_key_at(ZPUB, 0, 0).unwrap();
        assert_eq!(cache.deriver().calls.load(Ordering::SeqCst), 2);

        // account key is reused: one more derivation for the new leaf
        cache.public_key_at(ZPUB, 0, 1).unwrap();
        assert_eq!(cache.deriver().calls.load(Ordering::SeqCst), 3);

        cache.public_key_at(ZPUB, 0, 1).unwrap();
        assert_eq!(cache.deriver().calls.load(Ordering::SeqCst), 3);

        assert_eq!(
            cache.stats(),
            CacheStats {
                roots: 1,
                accounts: 1,
                public_keys: 2,
                addresses: 0
            }
        );
    }

    #[test]
    fn test_address_encoder_runs_once() {
        let cache = DerivationCache::with_deriver(CountingDeriver::default());
        let encodes = AtomicUsize::new(0);
        let encode = |pk: &[u8; 33]| {
            encodes.fetch_add(1, Ordering::SeqCst);
            Ok(hex::encode(pk))
        };

        let a = cache
            .address_or_insert_with(AddressScheme::Legacy, ZPUB, 0, 0, encode)
            .unwrap();
        let b = cache
            .address_or_insert_with(AddressScheme::Legacy, ZPUB, 0, 0, encode)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(encodes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.deriver().calls.load(Ordering::SeqCst), 2);

        // other scheme: new address entry, same leaf key
        cache
            .address_or_insert_with(AddressScheme::Segwit, ZPUB, 0, 0, encode)
            .unwrap();
        assert_eq!(encodes.load(Ordering::SeqCst), 2);
        assert_eq!(cache.deriver().calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().addresses, 2);
    }

    #[test]
    fn test_invalid_xpub_is_not_cached() {
        let cache = DerivationCache::new();
        let err = cache.public_key_at("xpub-not-base58", 0, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::Derivation);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_concurrent_readers_agree() {
        let cache = Arc::new(DerivationCache::with_deriver(CountingDeriver::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.public_key_at(ZPUB, 0, 5).unwrap())
            })
            .collect();
        let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.deriver().calls.load(Ordering::SeqCst), 2);
    }
}
