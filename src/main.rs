use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use utxo_signer::networks::{builtin_profiles_table, CoinProfileTable};
use utxo_signer::utils::logging;
use utxo_signer::wallet::{is_parsable_address, AddressCodec, DerivationCache};
use utxo_signer::{log_debug, Address, AddressScheme};

#[derive(Parser)]
#[command(name = "utxo-signer", version, about = "Derive and check UTXO addresses from extended public keys")]
struct Cli {
    /// JSON file overriding sigHash, dustThreshold or dustPolicy per currency
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    /// Print debug logs to stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Derive addresses for a range of indices
    Derive {
        #[arg(long)]
        xpub: String,
        #[arg(long, default_value = "bitcoin")]
        currency: String,
        #[arg(long, value_enum, default_value_t = SchemeArg::NativeSegwit)]
        scheme: SchemeArg,
        #[arg(long, default_value_t = 0)]
        account: u32,
        #[arg(long, default_value_t = 0)]
        start: u32,
        #[arg(long, default_value_t = 1)]
        count: u32,
        #[arg(long)]
        json: bool,
    },
    /// Print the address scheme implied by an address
    Infer {
        address: String,
        #[arg(long, default_value = "bitcoin")]
        currency: String,
    },
    /// Check an address strictly against a network and loosely against any
    Validate {
        address: String,
        #[arg(long, default_value = "bitcoin")]
        currency: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    Legacy,
    Segwit,
    NativeSegwit,
}

impl From<SchemeArg> for AddressScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Legacy => AddressScheme::Legacy,
            SchemeArg::Segwit => AddressScheme::Segwit,
            SchemeArg::NativeSegwit => AddressScheme::NativeSegwit,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DerivedEntry {
    #[serde(flatten)]
    address: Address,
    #[serde(with = "utxo_signer::serde_bytes::hex33")]
    public_key: [u8; 33],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport<'a> {
    address: &'a str,
    currency: &'a str,
    valid: bool,
    parsable: bool,
}

fn load_profiles(path: Option<&PathBuf>) -> Result<CoinProfileTable, Box<dyn Error>> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(CoinProfileTable::from_overrides_json(&json)?)
        }
        None => Ok(builtin_profiles_table().clone()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if cli.debug {
        logging::enable_debug();
    }

    let profiles = load_profiles(cli.profiles.as_ref())?;
    let cache = DerivationCache::new();

    match cli.command {
        Command::Derive {
            xpub,
            currency,
            scheme,
            account,
            start,
            count,
            json,
        } => {
            let profile = profiles.profile_for(&currency)?;
            let codec = AddressCodec::new(profile, &cache);
            let scheme = AddressScheme::from(scheme);

            let mut entries = Vec::with_capacity(count as usize);
            for index in start..start.saturating_add(count) {
                entries.push(DerivedEntry {
                    address: codec.address(scheme, &xpub, account, index)?,
                    public_key: cache.public_key_at(&xpub, account, index)?,
                });
            }
            log_debug!("cli", "derived addresses", xpub = xpub, count = entries.len());

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!(
                        "{}/{}\t{}\t{}",
                        entry.address.account,
                        entry.address.index,
                        entry.address.address,
                        hex::encode(entry.public_key)
                    );
                }
            }
        }
        Command::Infer { address, currency } => {
            let profile = profiles.profile_for(&currency)?;
            let scheme = AddressCodec::new(profile, &cache).infer_scheme(&address)?;
            println!("{}", scheme);
        }
        Command::Validate {
            address,
            currency,
            json,
        } => {
            let profile = profiles.profile_for(&currency)?;
            let report = ValidationReport {
                address: &address,
                currency: &currency,
                valid: AddressCodec::new(profile, &cache).validate(&address),
                parsable: is_parsable_address(&address),
            };

            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("valid: {}", report.valid);
                println!("parsable: {}", report.parsable);
            }
        }
    }

    Ok(())
}
