//! Signing Orchestrator
//!
//! Drives one signing run per [`SigningOrchestrator::sign_transaction`] call:
//!
//! ```text
//! Idle → DeviceAcquired → TxBuilt → FeesResolved → Signing → Signed
//!      → DeviceReleased → Completed
//! ```
//!
//! Any step after acquisition may fail; the run then goes through
//! `DeviceReleased` to `Failed`. A panic anywhere in the run becomes a
//! terminal `Internal` error. The device is released exactly once per
//! acquired session, before the terminal item reaches the consumer, and is
//! held by at most one run at a time.

use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Mutex};

use crate::error::{ErrorCode, SignerError, SignerResult};
use crate::networks::{builtin_profiles_table, CoinProfileTable};
use crate::signing::collaborators::{FeeEstimator, TransactionBuilder};
use crate::signing::device::{EventSender, ProgressSink, SigningDevice};
use crate::signing::params::{compute_signing_parameters, Clock, SystemClock};
use crate::types::{
    encode_operation_id, Account, LogicalTransaction, OperationType, SignOperationEvent,
    SignedOperationDraft,
};
use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Identifier passed to the device on acquire and release
    pub device_id: String,
}

impl OrchestratorConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    DeviceAcquired,
    TxBuilt,
    FeesResolved,
    Signing,
    Signed,
    DeviceReleased,
    Completed,
    Failed,
}

impl fmt::Display for SigningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn enter(state: SigningState, account_id: &str) {
    log_debug!("signing", "state transition", state = state, account = account_id);
}

/// The consumer dropped the stream; `next` is the step that will not start
fn consumer_gone(events: &EventSender, next: SigningState, account_id: &str) -> bool {
    let gone = events.is_closed();
    if gone {
        log_debug!("signing", "consumer gone, stopping", before = next, account = account_id);
    }
    gone
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct SigningOrchestrator<D, B, F> {
    device: Arc<D>,
    builder: Arc<B>,
    estimator: Arc<F>,
    profiles: Arc<CoinProfileTable>,
    clock: Arc<dyn Clock>,
    config: Arc<OrchestratorConfig>,
    device_lock: Arc<Mutex<()>>,
}

impl<D, B, F> Clone for SigningOrchestrator<D, B, F> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            builder: Arc::clone(&self.builder),
            estimator: Arc::clone(&self.estimator),
            profiles: Arc::clone(&self.profiles),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
            device_lock: Arc::clone(&self.device_lock),
        }
    }
}

impl<D, B, F> SigningOrchestrator<D, B, F>
where
    D: SigningDevice + 'static,
    B: TransactionBuilder + 'static,
    F: FeeEstimator + 'static,
{
    /// Orchestrator over the built-in profile table and the system clock
    pub fn new(device: D, builder: B, estimator: F, config: OrchestratorConfig) -> Self {
        Self {
            device: Arc::new(device),
            builder: Arc::new(builder),
            estimator: Arc::new(estimator),
            profiles: Arc::new(builtin_profiles_table().clone()),
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            device_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_profiles(mut self, profiles: Arc<CoinProfileTable>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Start a signing run.
    ///
    /// Nothing happens until the stream is first polled, which must be from
    /// within a tokio runtime. The stream yields `requested`, `granted`,
    /// any number of `streaming` events, then exactly one terminal item:
    /// `Ok(Signed)` or `Err`. Dropping the stream never interrupts a device
    /// call already in progress, but no later step starts: a run waiting for
    /// the device never acquires it, and an acquired device is released
    /// without being asked to sign.
    pub fn sign_transaction(
        &self,
        account: Account,
        request: LogicalTransaction,
    ) -> SignOperationStream {
        let (events, receiver) = mpsc::unbounded_channel();
        let this = self.clone();
        let run = async move { this.run(account, request, events).await }.boxed();

        SignOperationStream {
            run: Some(run),
            events: receiver,
            finished: false,
        }
    }

    async fn run(self, account: Account, request: LogicalTransaction, events: EventSender) {
        let outcome = AssertUnwindSafe(self.drive(&account, &request, &events))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                log_error!("signing", "signing run panicked", account = account.id, panic = message);
                Some(Err(SignerError::internal("signing run panicked").with_details(message)))
            });

        match outcome {
            Some(Ok(signed)) => {
                enter(SigningState::Completed, &account.id);
                log_info!("signing", "signing run completed", account = account.id);
                let _ = events.send(Ok(signed));
            }
            Some(Err(e)) => {
                enter(SigningState::Failed, &account.id);
                log_warn!("signing", "signing run failed", account = account.id, error = e);
                let _ = events.send(Err(e));
            }
            None => {
                log_info!("signing", "signing run abandoned by its consumer", account = account.id);
            }
        }
    }

    /// Lock, acquire, sign, release. `None` when the consumer went away
    /// before the device was asked to sign.
    async fn drive(
        &self,
        account: &Account,
        request: &LogicalTransaction,
        events: &EventSender,
    ) -> Option<SignerResult<SignOperationEvent>> {
        let device_id = self.config.device_id.as_str();
        log_info!(
            "signing",
            "signing run started",
            account = account.id,
            currency = account.currency_id,
            recipient = request.recipient
        );
        enter(SigningState::Idle, &account.id);

        let guard = self.device_lock.lock().await;
        if consumer_gone(events, SigningState::DeviceAcquired, &account.id) {
            return None;
        }
        let session = match self.device.acquire(device_id).await {
            Ok(session) => session,
            Err(e) => {
                let e = e.classify(ErrorCode::Device, "device acquisition failed");
                log_warn!("signing", "device acquisition failed", account = account.id, error = e);
                return Some(Err(e));
            }
        };
        enter(SigningState::DeviceAcquired, &account.id);

        let outcome = AssertUnwindSafe(self.sign_with_session(&session, account, request, events))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                log_error!("signing", "signing run panicked", account = account.id, panic = message);
                Err(SignerError::internal("signing run panicked").with_details(message))
            });

        if let Err(payload) = AssertUnwindSafe(self.device.release(session, device_id))
            .catch_unwind()
            .await
        {
            log_error!(
                "signing",
                "device release panicked",
                account = account.id,
                panic = panic_message(payload.as_ref())
            );
        }
        enter(SigningState::DeviceReleased, &account.id);
        drop(guard);

        outcome.transpose()
    }

    /// Steps between acquire and release; returns the `Signed` event, or
    /// `None` once the consumer is gone
    async fn sign_with_session(
        &self,
        session: &D::Session,
        account: &Account,
        request: &LogicalTransaction,
        events: &EventSender,
    ) -> SignerResult<Option<SignOperationEvent>> {
        if consumer_gone(events, SigningState::TxBuilt, &account.id) {
            return Ok(None);
        }
        let tx_info = self
            .builder
            .build(account, request)
            .await
            .map_err(|e| e.classify(ErrorCode::Build, "transaction build failed"))?;
        enter(SigningState::TxBuilt, &account.id);

        if consumer_gone(events, SigningState::FeesResolved, &account.id) {
            return Ok(None);
        }
        let estimate = self
            .estimator
            .estimate(account, request)
            .await
            .map_err(|e| e.classify(ErrorCode::Build, "fee estimation failed"))?;
        let senders = estimate.senders();
        let recipients = estimate.recipients();
        enter(SigningState::FeesResolved, &account.id);

        let profile = self.profiles.profile_for(&account.currency_id)?;
        let params = compute_signing_parameters(profile, account, request, self.clock.as_ref())?;
        log_debug!(
            "signing",
            "signing parameters",
            account = account.id,
            sig_hash_type = params.sig_hash_type,
            segwit = params.segwit,
            additionals = params.additionals.join(",")
        );

        if consumer_gone(events, SigningState::Signing, &account.id) {
            return Ok(None);
        }
        enter(SigningState::Signing, &account.id);
        let _ = events.send(Ok(SignOperationEvent::DeviceSignatureRequested));
        let sink = ProgressSink::new(events);
        let signature = self
            .device
            .sign_account_tx(session, account, &tx_info, &params, &sink)
            .await
            .map_err(|e| e.classify(ErrorCode::Device, "device signing failed"))?;
        if !sink.is_granted() {
            log_warn!("signing", "device signed without reporting a grant", account = account.id);
        }
        enter(SigningState::Signed, &account.id);

        let amount = if request.use_all_amount {
            estimate
                .sent_amount()
                .ok_or_else(|| SignerError::build("output total overflows u64"))?
        } else {
            request.amount
        };
        let value = amount
            .checked_add(estimate.fee)
            .ok_or_else(|| SignerError::build("amount plus fee overflows u64"))?;

        let operation = SignedOperationDraft {
            id: encode_operation_id(&account.id, "", OperationType::Out),
            hash: String::new(),
            operation_type: OperationType::Out,
            value,
            fee: estimate.fee,
            senders,
            recipients,
            account_id: account.id.clone(),
            block_hash: None,
            block_height: None,
            date: self.clock.now(),
        };
        log_debug!(
            "signing",
            "operation drafted",
            id = operation.id,
            value = operation.value,
            fee = operation.fee,
            signature = hex::encode(&signature)
        );

        Ok(Some(SignOperationEvent::Signed {
            operation,
            signature,
        }))
    }
}

/// Events of one signing run; ends after its terminal item
pub struct SignOperationStream {
    run: Option<BoxFuture<'static, ()>>,
    events: mpsc::UnboundedReceiver<SignerResult<SignOperationEvent>>,
    finished: bool,
}

impl Stream for SignOperationStream {
    type Item = SignerResult<SignOperationEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(run) = this.run.take() {
            tokio::spawn(run);
        }

        match this.events.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                let terminal = match &item {
                    Ok(event) => event.is_terminal(),
                    Err(_) => true,
                };
                if terminal {
                    this.finished = true;
                    this.events.close();
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
