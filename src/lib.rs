//! UTXO Signer Core
//!
//! Public-key derivation, address handling and device-signing orchestration
//! for UTXO-based coins.
//!
//! # Architecture
//!
//! This crate provides:
//! - **wallet**: extended public keys, the derivation cache, address codec
//! - **networks**: per-currency coin profiles and their JSON overrides
//! - **signing**: the signing-device protocol driven as an event stream
//! - **utils**: redacting logs and the append-only cache store
//!
//! No private key material is handled here: keys stay on the signing device.
//!
//! # Example
//!
//! ```rust,ignore
//! use utxo_signer::{networks, wallet, AddressScheme};
//!
//! let cache = wallet::DerivationCache::new();
//! let codec = wallet::AddressCodec::new(networks::profile_for("bitcoin")?, &cache);
//! let address = codec.address(AddressScheme::NativeSegwit, xpub, 0, 0)?;
//! println!("{}", address.address);
//! ```

pub mod error;
pub mod networks;
pub mod serde_bytes;
pub mod signing;
pub mod types;
pub mod utils;
pub mod wallet;

pub use error::{ErrorCode, SignerError, SignerResult};
pub use types::*;

pub use networks::{profile_for, CoinProfile, CoinProfileTable};
pub use signing::{
    OrchestratorConfig, SignOperationStream, SigningDevice, SigningOrchestrator,
};
pub use wallet::{AddressCodec, DerivationCache, ExtendedPublicKey};
