//! Wallet Module
//!
//! Public-only key derivation from extended keys, the derivation cache, and
//! address encoding, inference and validation.

mod xpub;
mod derivation_cache;
pub mod address_codec;

pub use xpub::*;
pub use derivation_cache::*;
pub use address_codec::{encode as encode_address, is_parsable_address, AddressCodec};

use crate::error::SignerResult;
use crate::networks::CoinProfile;
use crate::types::{Address, AddressScheme};

/// Derive the address records for `indices` below `xpub / account`
pub fn derive_addresses<D: ChildKeyDeriver>(
    cache: &DerivationCache<D>,
    profile: &CoinProfile,
    scheme: AddressScheme,
    xpub: &str,
    account: u32,
    indices: impl IntoIterator<Item = u32>,
) -> SignerResult<Vec<Address>> {
    let codec = AddressCodec::new(profile, cache);
    indices
        .into_iter()
        .map(|index| codec.address(scheme, xpub, account, index))
        .collect()
}
