//! Client transactions (RFC 3261 §17.1).
//!
//! A [`ClientTransaction`] is created by
//! [`ListeningPoint::new_client_transaction`] and does nothing until one of
//! the execute methods sends the request. The wait then resolves exactly
//! once, with the final response or a [`UacError`]:
//!
//! - a final response completes it (2xx, or the first non-2xx);
//! - Timer B/F reports [`UacError::TransactionTimeout`];
//! - a failed write reports [`UacError::IoException`];
//! - the optional request deadline reports [`UacError::RequestTimeout`].
//!
//! Provisional responses do not resolve the wait; they are passed to the
//! progress callback of [`ClientTransaction::execute_with_progress`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use sipstack_sip_core::{CSeq, HeaderAccess, Method, Request, Response, TypedHeader};
use sipstack_sip_transport::Connection;

use super::timer::{spawn_oneshot, spawn_retransmit, Backoff, TimerHandle, TimerSettings};
use super::{TransactionKey, TransactionState};
use crate::dialog::{Dialog, DialogId, DialogState, MAX_FORWARDS};
use crate::errors::{Error, Result, UacError};
use crate::events::ResponseEvent;
use crate::stack::{Hop, ListeningPoint};

type Outcome = std::result::Result<ResponseEvent, UacError>;

struct Waiter {
    outcome: oneshot::Receiver<Outcome>,
    progress: mpsc::UnboundedReceiver<ResponseEvent>,
}

struct ClientInner {
    state: TransactionState,
    connection: Option<Connection>,
    backoff: Option<Arc<Backoff>>,
    /// Timer A or E
    retransmit: Option<TimerHandle>,
    /// Timer B or F
    timeout: Option<TimerHandle>,
    /// Timer D or K
    linger: Option<TimerHandle>,
    dialog: Option<DialogId>,
}

impl ClientInner {
    fn stop_timers(&mut self) {
        self.retransmit = None;
        self.timeout = None;
        self.linger = None;
    }
}

/// An outbound request and the state machine that tracks its responses
pub struct ClientTransaction {
    key: TransactionKey,
    invite: bool,
    request: Request,
    request_bytes: Bytes,
    hop: Hop,
    /// Fixed when the transaction is created, not when it is executed
    deadline: Option<Instant>,
    timers: TimerSettings,
    listening_point: Arc<ListeningPoint>,
    inner: Mutex<ClientInner>,
    outcome: parking_lot::Mutex<Option<oneshot::Sender<Outcome>>>,
    progress: mpsc::UnboundedSender<ResponseEvent>,
    waiter: parking_lot::Mutex<Option<Waiter>>,
}

impl ClientTransaction {
    pub(crate) fn new(
        key: TransactionKey,
        request: Request,
        hop: Hop,
        deadline: Option<Duration>,
        timers: TimerSettings,
        listening_point: Arc<ListeningPoint>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        ClientTransaction {
            key,
            invite: request.method == Method::Invite,
            request_bytes: request.to_bytes(),
            request,
            hop,
            deadline: deadline.map(|after| Instant::now() + after),
            timers,
            listening_point,
            inner: Mutex::new(ClientInner {
                state: TransactionState::Initial,
                connection: None,
                backoff: None,
                retransmit: None,
                timeout: None,
                linger: None,
                dialog: None,
            }),
            outcome: parking_lot::Mutex::new(Some(outcome_tx)),
            progress: progress_tx,
            waiter: parking_lot::Mutex::new(Some(Waiter {
                outcome: outcome_rx,
                progress: progress_rx,
            })),
        }
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// The request as sent, branch included
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn is_invite(&self) -> bool {
        self.invite
    }

    pub fn hop(&self) -> &Hop {
        &self.hop
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    /// Id of the dialog the responses created or matched, if any
    pub async fn dialog_id(&self) -> Option<DialogId> {
        self.inner.lock().await.dialog.clone()
    }

    /// Sends the request and waits for the final response
    pub async fn execute(self: &Arc<Self>) -> std::result::Result<ResponseEvent, UacError> {
        self.execute_with_progress(|_| {}).await
    }

    /// Like [`execute`](Self::execute), passing each provisional response to
    /// `on_progress` as it arrives.
    ///
    /// A transaction runs once; a second call fails with
    /// [`UacError::InvalidState`].
    pub async fn execute_with_progress<F>(
        self: &Arc<Self>,
        mut on_progress: F,
    ) -> std::result::Result<ResponseEvent, UacError>
    where
        F: FnMut(ResponseEvent) + Send,
    {
        let Some(Waiter {
            mut outcome,
            mut progress,
        }) = self.waiter.lock().take()
        else {
            return Err(UacError::InvalidState);
        };
        self.start().await?;

        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                Some(event) = progress.recv() => on_progress(event),
                result = &mut outcome => {
                    // the sender lives as long as the transaction
                    return result.unwrap_or_else(|_| Err(UacError::io("transaction dropped")));
                }
                _ = &mut expiry => {
                    warn!(id = %self.key, "request deadline expired");
                    self.fail(UacError::RequestTimeout).await;
                    return Err(UacError::RequestTimeout);
                }
            }
        }
    }

    /// Callback form of [`execute_with_progress`](Self::execute_with_progress):
    /// provisional and final responses go to `on_response`, a failure to
    /// `on_failure`.
    pub fn send_request<R, F>(self: &Arc<Self>, on_response: R, on_failure: F) -> JoinHandle<()>
    where
        R: Fn(ResponseEvent) + Send + Sync + 'static,
        F: FnOnce(UacError) + Send + 'static,
    {
        let transaction = self.clone();
        tokio::spawn(async move {
            let result = transaction.execute_with_progress(|event| on_response(event)).await;
            match result {
                Ok(event) => on_response(event),
                Err(err) => on_failure(err),
            }
        })
    }

    async fn start(self: &Arc<Self>) -> std::result::Result<(), UacError> {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Initial {
            return Err(UacError::InvalidState);
        }
        let connection = match self.listening_point.connect(&self.hop).await {
            Ok(connection) => connection,
            Err(err) => {
                self.terminate_locked(&mut inner);
                return Err(UacError::io(err));
            }
        };
        trace!(id = %self.key, hop = %self.hop, message = %String::from_utf8_lossy(&self.request_bytes), "sending request");
        if let Err(err) = connection.send(&self.request_bytes).await {
            self.terminate_locked(&mut inner);
            return Err(UacError::io(err));
        }
        let reliable = connection.is_reliable();
        inner.connection = Some(connection);
        inner.state = if self.invite {
            TransactionState::Calling
        } else {
            TransactionState::Trying
        };
        debug!(id = %self.key, state = %inner.state, "client transaction started");

        let weak = Arc::downgrade(self);
        if !reliable {
            let backoff = Arc::new(if self.invite {
                self.timers.timer_a()
            } else {
                self.timers.capped()
            });
            let name = if self.invite { "A" } else { "E" };
            inner.retransmit = Some(spawn_retransmit(name, backoff.clone(), weak.clone(), |tx| async move {
                tx.on_retransmit().await
            }));
            inner.backoff = Some(backoff);
        }
        let name = if self.invite { "B" } else { "F" };
        inner.timeout = Some(spawn_oneshot(name, self.timers.absolute(), weak, |tx| async move {
            tx.on_timeout().await
        }));
        Ok(())
    }

    /// Applies an inbound response to the state machine
    pub(crate) async fn process_response(self: &Arc<Self>, response: Response) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, TransactionState::Initial | TransactionState::Terminated) {
            debug!(id = %self.key, state = %inner.state, "ignoring response");
            return;
        }
        let dialog = match self.update_dialog(&mut inner, &response) {
            Ok(dialog) => dialog,
            Err(err) => {
                warn!(id = %self.key, status = response.status_code(), error = %err, "dropping response");
                return;
            }
        };
        let event = ResponseEvent {
            response,
            dialog,
            transaction_id: self.key.clone(),
        };
        if self.invite {
            self.on_invite_response(&mut inner, event).await;
        } else {
            self.on_non_invite_response(&mut inner, event);
        }
    }

    async fn on_invite_response(self: &Arc<Self>, inner: &mut ClientInner, event: ResponseEvent) {
        let code = event.response.status_code();
        match (inner.state, code) {
            (TransactionState::Calling | TransactionState::Proceeding, 100..=199) => {
                if inner.state == TransactionState::Calling {
                    inner.state = TransactionState::Proceeding;
                    inner.retransmit = None;
                    debug!(id = %self.key, status = code, "client transaction proceeding");
                }
                let _ = self.progress.send(event);
            }
            (TransactionState::Calling | TransactionState::Proceeding, 200..=299) => {
                self.terminate_locked(inner);
                self.resolve(Ok(event));
            }
            (TransactionState::Calling | TransactionState::Proceeding, _) => {
                inner.state = TransactionState::Completed;
                inner.retransmit = None;
                inner.timeout = None;
                debug!(id = %self.key, status = code, "client transaction completed");
                if let Err(err) = self.send_ack(inner, &event.response).await {
                    self.terminate_locked(inner);
                    self.resolve(Err(err));
                    return;
                }
                self.resolve(Ok(event));

                let wait = self.timers.timer_d(self.hop_is_reliable());
                if wait.is_zero() {
                    self.terminate_locked(inner);
                } else {
                    inner.linger = Some(spawn_oneshot("D", wait, Arc::downgrade(self), |tx| async move {
                        tx.on_linger().await
                    }));
                }
            }
            (TransactionState::Completed, _) if code >= 300 => {
                trace!(id = %self.key, status = code, "final response retransmitted");
                if self.send_ack(inner, &event.response).await.is_err() {
                    self.terminate_locked(inner);
                }
            }
            (state, _) => {
                debug!(id = %self.key, state = %state, status = code, "ignoring response");
            }
        }
    }

    fn on_non_invite_response(self: &Arc<Self>, inner: &mut ClientInner, event: ResponseEvent) {
        let code = event.response.status_code();
        match inner.state {
            TransactionState::Trying | TransactionState::Proceeding if code < 200 => {
                if inner.state == TransactionState::Trying {
                    inner.state = TransactionState::Proceeding;
                    if let Some(backoff) = &inner.backoff {
                        backoff.pin(self.timers.t2);
                    }
                    debug!(id = %self.key, status = code, "client transaction proceeding");
                }
                let _ = self.progress.send(event);
            }
            TransactionState::Trying | TransactionState::Proceeding => {
                inner.state = TransactionState::Completed;
                inner.retransmit = None;
                inner.timeout = None;
                debug!(id = %self.key, status = code, "client transaction completed");
                self.resolve(Ok(event));

                let wait = self.timers.timer_k(self.hop_is_reliable());
                if wait.is_zero() {
                    self.terminate_locked(inner);
                } else {
                    inner.linger = Some(spawn_oneshot("K", wait, Arc::downgrade(self), |tx| async move {
                        tx.on_linger().await
                    }));
                }
            }
            state => {
                trace!(id = %self.key, state = %state, status = code, "absorbing response");
            }
        }
    }

    /// Creates, updates or removes the dialog this response refers to
    fn update_dialog(&self, inner: &mut ClientInner, response: &Response) -> Result<Option<Arc<Dialog>>> {
        let Some(stack) = self.listening_point.stack() else {
            return Ok(None);
        };
        let Some(id) = DialogId::for_uac(response) else {
            return Ok(None);
        };
        let key = id.to_string();
        let code = response.status_code();
        let method = &self.request.method;
        let tagged = response.to().map_or(false, |to| to.has_tag());

        if method.is_dialog_forming() && tagged && (100..300).contains(&code) {
            if code >= 200 && response.contact().is_none() {
                stack.remove_dialog(&id);
                return Err(Error::MissingContact);
            }
            let dialog = match stack.dialogs.get(&key) {
                Some(dialog) => dialog,
                None => {
                    let dialog = Arc::new(Dialog::new_uac(&self.request, response, self.listening_point.clone())?);
                    let (dialog, created) = stack.dialogs.find_or_insert_with(&key, || dialog);
                    if created {
                        debug!(dialog = %id, "dialog created");
                    }
                    dialog
                }
            };
            if code >= 200 {
                dialog.confirm(response.contact());
            }
            inner.dialog = Some(id);
            return Ok(Some(dialog));
        }

        let existing = stack.dialogs.get(&key);
        match existing {
            Some(dialog) if code == 481 => {
                debug!(dialog = %id, "peer reports no such dialog");
                stack.remove_dialog(dialog.id());
                Ok(None)
            }
            Some(dialog) if code >= 300 && method.is_dialog_forming() && dialog.state() == DialogState::Early => {
                stack.remove_dialog(dialog.id());
                Ok(None)
            }
            Some(dialog) if *method == Method::Bye && (200..300).contains(&code) => {
                Ok(stack.remove_dialog(dialog.id()))
            }
            other => Ok(other),
        }
    }

    /// ACK for a non-2xx final response, sent over the request's connection
    async fn send_ack(&self, inner: &ClientInner, response: &Response) -> std::result::Result<(), UacError> {
        let Some(connection) = &inner.connection else {
            return Ok(());
        };
        let ack = self.build_ack(response);
        connection.send(&ack.to_bytes()).await.map_err(|err| {
            warn!(id = %self.key, error = %err, "failed to send ACK");
            UacError::io(err)
        })
    }

    fn build_ack(&self, response: &Response) -> Request {
        let mut ack = Request::new(Method::Ack, self.request.uri.clone());
        if let Some(via) = self.request.via() {
            ack.set_header(TypedHeader::Via(via.clone()));
        }
        let routes: Vec<_> = self.request.routes().into_iter().cloned().collect();
        if !routes.is_empty() {
            ack.set_header(TypedHeader::Route(routes));
        }
        ack.set_max_forwards(MAX_FORWARDS);
        if let Some(from) = self.request.from() {
            ack.set_header(TypedHeader::From(from.clone()));
        }
        if let Some(to) = response.to() {
            ack.set_header(TypedHeader::To(to.clone()));
        }
        if let Some(call_id) = self.request.call_id() {
            ack.set_header(TypedHeader::CallId(call_id.to_string()));
        }
        let seq = self.request.cseq().map_or(1, |cseq| cseq.seq);
        ack.set_header(TypedHeader::CSeq(CSeq::new(seq, Method::Ack)));
        ack
    }

    fn hop_is_reliable(&self) -> bool {
        self.listening_point.is_reliable()
    }

    /// Timer A/E: resend while the state still expects it
    async fn on_retransmit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let active = if self.invite {
            inner.state == TransactionState::Calling
        } else {
            matches!(inner.state, TransactionState::Trying | TransactionState::Proceeding)
        };
        if !active {
            return false;
        }
        let Some(connection) = inner.connection.clone() else {
            return false;
        };
        debug!(id = %self.key, state = %inner.state, "retransmitting request");
        match connection.send(&self.request_bytes).await {
            Ok(()) => true,
            Err(err) => {
                warn!(id = %self.key, error = %err, "retransmission failed");
                self.terminate_locked(&mut inner);
                self.resolve(Err(UacError::io(err)));
                false
            }
        }
    }

    /// Timer B/F
    async fn on_timeout(&self) {
        let mut inner = self.inner.lock().await;
        if matches!(
            inner.state,
            TransactionState::Calling | TransactionState::Trying | TransactionState::Proceeding
        ) {
            warn!(id = %self.key, state = %inner.state, "client transaction timed out");
            self.terminate_locked(&mut inner);
            self.resolve(Err(UacError::TransactionTimeout));
        }
    }

    /// Timer D/K
    async fn on_linger(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == TransactionState::Completed {
            self.terminate_locked(&mut inner);
        }
    }

    async fn fail(&self, err: UacError) {
        let mut inner = self.inner.lock().await;
        self.terminate_locked(&mut inner);
        self.resolve(Err(err));
    }

    /// Fails a pending wait when the stack stops
    pub(crate) async fn shutdown(&self) {
        self.fail(UacError::io("stack stopped")).await;
    }

    /// Deregisters, then enters Terminated and cancels every timer
    fn terminate_locked(&self, inner: &mut ClientInner) {
        if inner.state == TransactionState::Terminated {
            return;
        }
        if let Some(stack) = self.listening_point.stack() {
            stack.client_transactions.remove(self.key.as_str());
        }
        inner.state = TransactionState::Terminated;
        inner.stop_timers();
        debug!(id = %self.key, "client transaction terminated");
    }

    /// Resolves the wait; later calls are no-ops
    fn resolve(&self, outcome: Outcome) {
        if let Some(sender) = self.outcome.lock().take() {
            let _ = sender.send(outcome);
        }
    }
}

impl fmt::Debug for ClientTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTransaction")
            .field("key", &self.key)
            .field("method", &self.request.method)
            .field("hop", &self.hop)
            .finish()
    }
}
