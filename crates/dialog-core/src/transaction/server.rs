//! Server transactions (RFC 3261 §17.2).
//!
//! A server transaction is created on the first sighting of a request
//! branch. Only that first sighting reaches the application; a
//! retransmission replays the cached provisional (Proceeding) or final
//! (Completed) response instead.
//!
//! Non-INVITE requests pass through an in-dialog filter on first sight.
//! ACK, BYE, INFO and NOTIFY need a matching dialog (a miss is answered
//! with 481, except for ACK which is never answered), and a CSeq lower than
//! the dialog's last remote sequence is answered with 500.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use sipstack_sip_core::util::generate_tag;
use sipstack_sip_core::{HeaderAccess, Method, Request, Response, StatusCode, TypedHeader};
use sipstack_sip_transport::Connection;

use super::timer::{spawn_oneshot, spawn_retransmit, TimerHandle, TimerSettings};
use super::{TransactionKey, TransactionState};
use crate::dialog::{Dialog, DialogId, DialogState};
use crate::errors::{Error, Result};
use crate::events::RequestEvent;
use crate::stack::ListeningPoint;

struct ServerInner {
    state: TransactionState,
    provisional: Option<Bytes>,
    final_response: Option<Bytes>,
    /// Timer G
    retransmit: Option<TimerHandle>,
    /// Timer H
    timeout: Option<TimerHandle>,
    /// Timer I or J
    linger: Option<TimerHandle>,
}

impl ServerInner {
    fn stop_timers(&mut self) {
        self.retransmit = None;
        self.timeout = None;
        self.linger = None;
    }
}

/// An inbound request and the state machine answering it
pub struct ServerTransaction {
    key: TransactionKey,
    invite: bool,
    request: Request,
    /// To tag for responses when the request carried none
    local_tag: String,
    connection: Connection,
    timers: TimerSettings,
    listening_point: Arc<ListeningPoint>,
    inner: Mutex<ServerInner>,
}

impl ServerTransaction {
    pub(crate) fn new(
        key: TransactionKey,
        request: Request,
        connection: Connection,
        timers: TimerSettings,
        listening_point: Arc<ListeningPoint>,
    ) -> Self {
        let local_tag = request
            .to()
            .filter(|to| to.has_tag())
            .map(|to| to.tag().to_string())
            .unwrap_or_else(generate_tag);
        ServerTransaction {
            key,
            invite: request.method == Method::Invite,
            request,
            local_tag,
            connection,
            timers,
            listening_point,
            inner: Mutex::new(ServerInner {
                state: TransactionState::Initial,
                provisional: None,
                final_response: None,
                retransmit: None,
                timeout: None,
                linger: None,
            }),
        }
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// The request that created the transaction
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn is_invite(&self) -> bool {
        self.invite
    }

    pub fn listening_point(&self) -> &Arc<ListeningPoint> {
        &self.listening_point
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    /// Response to the original request. Every status except 100 carries
    /// the same To tag, so all responses of one transaction agree on the dialog.
    pub fn create_response(&self, status: StatusCode) -> Response {
        let mut response = self.request.create_response(status);
        if status != StatusCode::Trying {
            if let Some(to) = response.to_mut() {
                if !to.has_tag() {
                    to.set_tag(self.local_tag.clone());
                }
            }
        }
        if let Some(user_agent) = self.listening_point.user_agent() {
            response.set_user_agent(user_agent);
        }
        response
    }

    /// Sends a response and advances the state machine.
    ///
    /// Dialog-forming requests get the listening point's global Contact when
    /// the response has none. A tagged 101-299 answer to a dialog-forming
    /// request creates the dialog, a 2xx confirms it and a non-2xx final
    /// removes an early one.
    pub async fn send_response(self: &Arc<Self>, mut response: Response) -> Result<()> {
        if self.request.method.is_dialog_forming() && response.contact().is_none() {
            if let Some(contact) = self.listening_point.contact() {
                response.set_header(TypedHeader::Contact(vec![contact.clone()]));
            }
        }
        response.check_headers()?;
        let mut inner = self.inner.lock().await;
        self.respond_locked(&mut inner, response).await
    }

    async fn respond_locked(self: &Arc<Self>, inner: &mut ServerInner, response: Response) -> Result<()> {
        let code = response.status_code();
        let allowed = match (self.invite, inner.state) {
            (true, state) => state == TransactionState::Proceeding,
            (false, state) => matches!(
                state,
                TransactionState::Initial | TransactionState::Trying | TransactionState::Proceeding
            ),
        };
        if !allowed {
            return Err(Error::InvalidTransactionState(inner.state.to_string()));
        }

        self.update_dialog(&response)?;
        let bytes = response.to_bytes();
        trace!(id = %self.key, message = %String::from_utf8_lossy(&bytes), "sending response");
        self.transmit_locked(inner, &bytes).await?;

        if code < 200 {
            inner.provisional = Some(bytes);
            if inner.state != TransactionState::Proceeding {
                inner.state = TransactionState::Proceeding;
                debug!(id = %self.key, status = code, "server transaction proceeding");
            }
            return Ok(());
        }

        inner.final_response = Some(bytes);
        let reliable = self.connection.is_reliable();
        let weak = Arc::downgrade(self);
        if self.invite && code < 300 {
            // the TU retransmits 2xx to INVITE, not the transaction
            self.terminate_locked(inner);
        } else if self.invite {
            inner.state = TransactionState::Completed;
            debug!(id = %self.key, status = code, "server transaction completed");
            if !reliable {
                inner.retransmit = Some(spawn_retransmit(
                    "G",
                    Arc::new(self.timers.capped()),
                    weak.clone(),
                    |tx| async move { tx.on_retransmit().await },
                ));
            }
            inner.timeout = Some(spawn_oneshot("H", self.timers.timer_h(), weak, |tx| async move {
                tx.on_timeout().await
            }));
        } else {
            inner.state = TransactionState::Completed;
            debug!(id = %self.key, status = code, "server transaction completed");
            let wait = self.timers.timer_j(reliable);
            if wait.is_zero() {
                self.terminate_locked(inner);
            } else {
                inner.linger = Some(spawn_oneshot("J", wait, weak, |tx| async move {
                    tx.on_linger().await
                }));
            }
        }
        Ok(())
    }

    fn update_dialog(&self, response: &Response) -> Result<()> {
        if !self.request.method.is_dialog_forming() {
            return Ok(());
        }
        let Some(stack) = self.listening_point.stack() else {
            return Ok(());
        };
        let Some(id) = DialogId::for_uas(response) else {
            return Ok(());
        };
        let key = id.to_string();
        let code = response.status_code();
        let tagged = response.to().map_or(false, |to| to.has_tag());

        if tagged && (101..300).contains(&code) {
            let dialog = match stack.dialogs.get(&key) {
                Some(dialog) => dialog,
                None => {
                    let dialog = Arc::new(Dialog::new_uas(&self.request, response, self.listening_point.clone())?);
                    let (dialog, created) = stack.dialogs.find_or_insert_with(&key, || dialog);
                    if created {
                        debug!(dialog = %id, "dialog created");
                    }
                    dialog
                }
            };
            if code >= 200 {
                dialog.confirm(None);
            }
        } else if code >= 300 {
            if let Some(dialog) = stack.dialogs.get(&key) {
                if dialog.state() == DialogState::Early {
                    stack.remove_dialog(&id);
                }
            }
        }
        Ok(())
    }

    /// Applies an inbound request, first sighting or retransmission
    pub(crate) async fn process_request(self: &Arc<Self>, request: Request) {
        let mut inner = self.inner.lock().await;
        if self.invite {
            self.on_invite_request(&mut inner, request).await;
        } else {
            self.on_request(&mut inner, request).await;
        }
    }

    async fn on_invite_request(self: &Arc<Self>, inner: &mut ServerInner, request: Request) {
        match (inner.state, &request.method) {
            (TransactionState::Initial, Method::Invite) => {
                inner.state = TransactionState::Proceeding;
                debug!(id = %self.key, "server transaction proceeding");
                let dialog = self.lookup_dialog(&request);
                if let Some(dialog) = &dialog {
                    let seq = request.cseq().map_or(0, |cseq| cseq.seq);
                    if let Err(err) = dialog.check_remote_seq(seq) {
                        debug!(id = %self.key, error = %err, "re-INVITE rejected");
                        let response = self.create_response(StatusCode::ServerInternalError);
                        let _ = self.respond_locked(inner, response).await;
                        return;
                    }
                }
                self.notify(request, dialog);
            }
            (TransactionState::Proceeding, Method::Invite) => {
                if let Some(bytes) = inner.provisional.clone() {
                    trace!(id = %self.key, "replaying provisional response");
                    let _ = self.transmit_locked(inner, &bytes).await;
                }
            }
            (TransactionState::Completed, Method::Invite) => {
                if let Some(bytes) = inner.final_response.clone() {
                    trace!(id = %self.key, "replaying final response");
                    let _ = self.transmit_locked(inner, &bytes).await;
                }
            }
            (TransactionState::Completed, Method::Ack) => {
                inner.state = TransactionState::Confirmed;
                inner.retransmit = None;
                inner.timeout = None;
                debug!(id = %self.key, "server transaction confirmed");
                let wait = self.timers.timer_i(self.connection.is_reliable());
                if wait.is_zero() {
                    self.terminate_locked(inner);
                } else {
                    inner.linger = Some(spawn_oneshot("I", wait, Arc::downgrade(self), |tx| async move {
                        tx.on_linger().await
                    }));
                }
            }
            (state, method) => {
                trace!(id = %self.key, state = %state, method = %method, "absorbing request");
            }
        }
    }

    async fn on_request(self: &Arc<Self>, inner: &mut ServerInner, request: Request) {
        match inner.state {
            TransactionState::Initial => {
                let dialog = match self.filter_dialog(inner, &request).await {
                    Ok(dialog) => dialog,
                    Err(err) => {
                        debug!(id = %self.key, method = %request.method, error = %err, "request rejected");
                        return;
                    }
                };
                // a filter response moved the transaction on already
                if inner.state != TransactionState::Initial {
                    return;
                }
                inner.state = TransactionState::Trying;
                debug!(id = %self.key, method = %request.method, "server transaction trying");
                let is_ack = request.method == Method::Ack;
                self.notify(request, dialog);
                if is_ack {
                    // nothing is ever sent for an ACK
                    self.terminate_locked(inner);
                }
            }
            TransactionState::Proceeding => {
                if let Some(bytes) = inner.provisional.clone() {
                    trace!(id = %self.key, "replaying provisional response");
                    let _ = self.transmit_locked(inner, &bytes).await;
                }
            }
            TransactionState::Completed => {
                if let Some(bytes) = inner.final_response.clone() {
                    trace!(id = %self.key, "replaying final response");
                    let _ = self.transmit_locked(inner, &bytes).await;
                }
            }
            state => {
                trace!(id = %self.key, state = %state, "absorbing request");
            }
        }
    }

    /// Matches a first-sight non-INVITE request against its dialog
    async fn filter_dialog(self: &Arc<Self>, inner: &mut ServerInner, request: &Request) -> Result<Option<Arc<Dialog>>> {
        let Some(stack) = self.listening_point.stack() else {
            return Ok(None);
        };
        let Some(dialog) = self.lookup_dialog(request) else {
            if !matches!(request.method, Method::Ack | Method::Bye | Method::Info | Method::Notify) {
                return Ok(None);
            }
            let id = DialogId::for_uas(request).map(|id| id.to_string()).unwrap_or_default();
            if request.method == Method::Ack {
                self.terminate_locked(inner);
            } else {
                let response = self.create_response(StatusCode::CallOrTransactionDoesNotExist);
                self.respond_locked(inner, response).await?;
            }
            return Err(Error::DialogNotFound(id));
        };

        let seq = request.cseq().map_or(0, |cseq| cseq.seq);
        if let Err(err) = dialog.check_remote_seq(seq) {
            if request.method == Method::Ack {
                self.terminate_locked(inner);
            } else {
                let response = self.create_response(StatusCode::ServerInternalError);
                self.respond_locked(inner, response).await?;
            }
            return Err(err);
        }
        if request.method == Method::Bye {
            stack.remove_dialog(dialog.id());
        }
        Ok(Some(dialog))
    }

    fn lookup_dialog(&self, request: &Request) -> Option<Arc<Dialog>> {
        let stack = self.listening_point.stack()?;
        let id = DialogId::for_uas(request)?;
        stack.dialogs.get(&id.to_string())
    }

    fn notify(self: &Arc<Self>, request: Request, dialog: Option<Arc<Dialog>>) {
        if let Some(stack) = self.listening_point.stack() {
            stack.notify(RequestEvent {
                request,
                dialog,
                transaction: self.clone(),
            });
        }
    }

    async fn transmit_locked(&self, inner: &mut ServerInner, bytes: &Bytes) -> Result<()> {
        if let Err(err) = self.connection.send(bytes).await {
            warn!(id = %self.key, remote = %self.connection.remote_addr(), error = %err, "failed to send response");
            self.terminate_locked(inner);
            return Err(err.into());
        }
        Ok(())
    }

    /// Timer G: resend the final response until the ACK arrives
    async fn on_retransmit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != TransactionState::Completed {
            return false;
        }
        let Some(bytes) = inner.final_response.clone() else {
            return false;
        };
        debug!(id = %self.key, "retransmitting final response");
        self.transmit_locked(&mut inner, &bytes).await.is_ok()
    }

    /// Timer H
    async fn on_timeout(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == TransactionState::Completed {
            warn!(id = %self.key, "no ACK received");
            self.terminate_locked(&mut inner);
        }
    }

    /// Timer I/J
    async fn on_linger(&self) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, TransactionState::Completed | TransactionState::Confirmed) {
            self.terminate_locked(&mut inner);
        }
    }

    pub(crate) async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.terminate_locked(&mut inner);
    }

    /// Deregisters, then enters Terminated and cancels every timer
    fn terminate_locked(&self, inner: &mut ServerInner) {
        if inner.state == TransactionState::Terminated {
            return;
        }
        if let Some(stack) = self.listening_point.stack() {
            stack.server_transactions.remove(self.key.as_str());
        }
        inner.state = TransactionState::Terminated;
        inner.stop_timers();
        debug!(id = %self.key, "server transaction terminated");
    }
}

impl fmt::Debug for ServerTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTransaction")
            .field("key", &self.key)
            .field("method", &self.request.method)
            .field("remote", &self.connection.remote_addr())
            .finish()
    }
}
