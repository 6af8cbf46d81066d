//! Signing-device contract
//!
//! The device holds the private keys and signs input by input. It reports
//! user confirmation and streaming progress through a [`ProgressSink`], which
//! turns those callbacks into ordered events on the caller's stream.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::error::SignerResult;
use crate::signing::collaborators::TxInfo;
use crate::signing::params::SigningParameters;
use crate::types::{Account, SignOperationEvent, StreamingProgress};
use crate::{log_debug, log_warn};

pub(crate) type EventSender = mpsc::UnboundedSender<SignerResult<SignOperationEvent>>;

#[async_trait]
pub trait SigningDevice: Send + Sync {
    type Session: Send + Sync;

    /// Open an exclusive session on the device
    async fn acquire(&self, device_id: &str) -> SignerResult<Self::Session>;

    /// Close a session; must not fail
    async fn release(&self, session: Self::Session, device_id: &str);

    /// Sign every input of `tx_info`, reporting through `progress`, and
    /// return the signed transaction bytes
    async fn sign_account_tx(
        &self,
        session: &Self::Session,
        account: &Account,
        tx_info: &TxInfo,
        params: &SigningParameters,
        progress: &ProgressSink<'_>,
    ) -> SignerResult<Vec<u8>>;
}

/// Callback side of the event stream, handed to the device for one call.
///
/// `granted` is emitted at most once and streaming updates are only relayed
/// after it. Sends to a consumer that stopped listening are dropped.
pub struct ProgressSink<'a> {
    events: &'a EventSender,
    granted: AtomicBool,
}

impl<'a> ProgressSink<'a> {
    pub(crate) fn new(events: &'a EventSender) -> Self {
        Self {
            events,
            granted: AtomicBool::new(false),
        }
    }

    /// The user confirmed the transaction on the device
    pub fn signature_granted(&self) {
        if self.granted.swap(true, Ordering::SeqCst) {
            log_debug!("signing", "duplicate grant ignored");
            return;
        }
        self.send(SignOperationEvent::DeviceSignatureGranted);
    }

    /// The device finished one input (or chunk) of `total`
    pub fn streaming(&self, progress: StreamingProgress) {
        if !self.is_granted() {
            log_warn!(
                "signing",
                "streaming progress before grant dropped",
                index = progress.index,
                total = progress.total
            );
            return;
        }
        self.send(progress.into());
    }

    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn send(&self, event: SignOperationEvent) {
        let kind = event.kind();
        if self.events.send(Ok(event)).is_err() {
            log_debug!("signing", "consumer gone, event dropped", kind = kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(index: u32) -> StreamingProgress {
        StreamingProgress {
            progress: f64::from(index + 1) / 2.0,
            index,
            total: 2,
        }
    }

    #[test]
    fn test_grant_then_streaming() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ProgressSink::new(&tx);

        sink.streaming(progress(0));
        sink.signature_granted();
        sink.signature_granted();
        sink.streaming(progress(0));
        sink.streaming(progress(1));
        drop(sink);
        drop(tx);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.unwrap().kind());
        }
        assert_eq!(
            kinds,
            vec!["device-signature-granted", "device-streaming", "device-streaming"]
        );
    }

    #[test]
    fn test_closed_consumer_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = ProgressSink::new(&tx);
        sink.signature_granted();
        sink.streaming(progress(0));
        assert!(sink.is_granted());
    }
}
