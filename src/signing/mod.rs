//! Device Signing
//!
//! Orchestrates a signing run against an external signing device:
//! 1. Acquire the device exclusively
//! 2. Build the transaction and resolve fees through collaborators
//! 3. Compute the coin's signing parameters
//! 4. Let the device sign while relaying its progress as events
//! 5. Release the device and emit the signed operation draft

pub mod collaborators;
pub mod device;
pub mod orchestrator;
pub mod params;

pub use collaborators::*;
pub use device::{ProgressSink, SigningDevice};
pub use orchestrator::*;
pub use params::*;
