//! A local address the stack listens and sends on.
//!
//! Each listening point binds one transport, runs one event loop over its
//! transport events and is the factory for outbound client transactions
//! and stateless sends.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use sipstack_sip_core::util::{generate_branch, generate_call_id, generate_tag};
use sipstack_sip_core::{
    Address, CSeq, HeaderAccess, HeaderName, Method, Request, Response, SipUri, TypedHeader, Via,
};
use sipstack_sip_transport::{bind_transport, Connection, Transport, TransportKind};

use super::hop::Hop;
use super::{inbound, StackInner};
use crate::config::ListeningPointConfig;
use crate::dialog::MAX_FORWARDS;
use crate::errors::{Error, Result};
use crate::transaction::{ClientTransaction, TransactionKey};

pub struct ListeningPoint {
    ip: String,
    port: AtomicU16,
    kind: TransportKind,
    contact: Option<Address>,
    stack: Weak<StackInner>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ListeningPoint {
    pub(crate) fn new(
        config: &ListeningPointConfig,
        contact: Option<Address>,
        stack: Weak<StackInner>,
    ) -> Self {
        ListeningPoint {
            ip: config.ip.clone(),
            port: AtomicU16::new(config.port),
            kind: config.transport,
            contact,
            stack,
            transport: RwLock::new(None),
            event_loop: Mutex::new(None),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// The bound port once started, the configured one before
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Acquire)
    }

    pub fn transport(&self) -> TransportKind {
        self.kind
    }

    pub fn is_reliable(&self) -> bool {
        self.kind.is_reliable()
    }

    /// Global Contact applied to dialog-forming messages that lack one
    pub fn contact(&self) -> Option<&Address> {
        self.contact.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.transport.read().is_some()
    }

    /// `ip:port`
    pub fn sent_by(&self) -> String {
        format!("{}:{}", self.ip, self.port())
    }

    /// `SIP/2.0/<transport> ip:port;rport`, without a branch
    pub fn create_via(&self) -> Via {
        let mut via = Via::new(self.kind.as_str(), self.ip.clone(), Some(self.port()));
        via.set_rport(None);
        via
    }

    pub(crate) fn stack(&self) -> Option<Arc<StackInner>> {
        self.stack.upgrade()
    }

    pub(crate) fn user_agent(&self) -> Option<String> {
        self.stack()?.config.user_agent.clone()
    }

    /// Builds an out-of-dialog request: fresh From tag and Call-ID, CSeq 1,
    /// Max-Forwards 70, this listening point's Via and the configured User-Agent.
    pub fn new_request(
        &self,
        method: Method,
        uri: SipUri,
        from: Address,
        to: Address,
        content: Option<(String, Bytes)>,
    ) -> Request {
        let mut request = Request::new(method.clone(), uri);
        request.set_header(TypedHeader::Via(self.create_via()));
        request.set_max_forwards(MAX_FORWARDS);
        request.set_header(TypedHeader::From(from.with_tag(generate_tag())));
        request.set_header(TypedHeader::To(to));
        request.set_header(TypedHeader::CallId(generate_call_id()));
        request.set_header(TypedHeader::CSeq(CSeq::new(1, method)));
        if let Some(user_agent) = self.user_agent() {
            request.set_user_agent(user_agent);
        }
        if let Some((content_type, body)) = content {
            request.set_content(content_type, body);
        }
        request
    }

    /// Client transaction bounded by the stack's configured request timeout
    pub fn new_client_transaction(self: &Arc<Self>, request: Request) -> Result<Arc<ClientTransaction>> {
        let deadline = self
            .stack()
            .and_then(|stack| stack.config.request_deadline());
        self.new_client_transaction_with_timeout(request, deadline)
    }

    /// Prepares `request` and registers a client transaction for it.
    ///
    /// A missing Via is added and a missing branch generated. An explicit
    /// branch that is already in use fails with
    /// [`Error::DuplicateTransaction`]. Nothing is sent until the
    /// transaction is executed, but `deadline` starts counting now.
    pub fn new_client_transaction_with_timeout(
        self: &Arc<Self>,
        mut request: Request,
        deadline: Option<Duration>,
    ) -> Result<Arc<ClientTransaction>> {
        let stack = self.stack().ok_or(Error::ListeningPointNotStarted)?;

        if request.via().is_none() {
            request.set_header(TypedHeader::Via(self.create_via()));
        }
        if request.branch().is_none() {
            if let Some(via) = request.via_mut() {
                via.set_branch(generate_branch());
            }
        }
        if request.method.is_dialog_forming() && request.contact().is_none() {
            if let Some(contact) = &self.contact {
                request.set_header(TypedHeader::Contact(vec![contact.clone()]));
            }
        }
        request.check_headers()?;

        let hop = Hop::for_request(&request)?;
        self.check_transport(&hop.transport)?;
        let key = TransactionKey::from_message(&request).ok_or(Error::Sip(
            sipstack_sip_core::Error::MissingMandatoryHeader(HeaderName::Via),
        ))?;

        let transaction = Arc::new(ClientTransaction::new(
            key.clone(),
            request,
            hop,
            deadline,
            stack.config.timers,
            self.clone(),
        ));
        if !stack
            .client_transactions
            .insert_new(key.as_str(), transaction.clone())
        {
            return Err(Error::DuplicateTransaction(key.to_string()));
        }
        debug!(
            id = %key,
            method = %transaction.request().method,
            hop = %transaction.hop(),
            "client transaction created"
        );
        Ok(transaction)
    }

    /// Sends a request to its next hop outside any transaction
    pub async fn send_request(&self, request: &Request) -> Result<()> {
        let hop = Hop::for_request(request)?;
        self.send_to(&hop, request.to_bytes()).await
    }

    /// Sends a response to its top Via outside any transaction
    pub async fn send_response(&self, response: &Response) -> Result<()> {
        let hop = Hop::for_response(response)?;
        self.send_to(&hop, response.to_bytes()).await
    }

    async fn send_to(&self, hop: &Hop, bytes: Bytes) -> Result<()> {
        let connection = self.connect(hop).await?;
        trace!(hop = %hop, message = %String::from_utf8_lossy(&bytes), "sending");
        connection.send(&bytes).await?;
        Ok(())
    }

    /// Connection toward `hop` on this listening point's transport
    pub(crate) async fn connect(&self, hop: &Hop) -> Result<Connection> {
        self.check_transport(&hop.transport)?;
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(Error::ListeningPointNotStarted)?;
        let addr = hop.resolve().await?;
        Ok(transport.connection(addr).await?)
    }

    fn check_transport(&self, transport: &str) -> Result<()> {
        if self.kind.as_str().eq_ignore_ascii_case(transport) {
            Ok(())
        } else {
            Err(Error::TransportMismatch {
                expected: self.kind,
                found: transport.to_string(),
            })
        }
    }

    /// Binds the transport and starts the event loop. Port 0 is replaced by
    /// the port the kernel picked.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<()> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| Error::Config(format!("invalid listening address {}", self.ip)))?;
        let (transport, events) = bind_transport(self.kind, SocketAddr::new(ip, self.port()), None).await?;
        let local = transport.local_addr()?;
        self.port.store(local.port(), Ordering::Release);
        *self.transport.write() = Some(transport);

        let handle = tokio::spawn(inbound::run(Arc::downgrade(self), events));
        if let Some(previous) = self.event_loop.lock().replace(handle) {
            previous.abort();
        }
        info!(transport = %self.kind, addr = %local, "listening point started");
        Ok(())
    }

    pub(crate) async fn stop(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            if let Err(err) = transport.close().await {
                warn!(transport = %self.kind, error = %err, "closing transport failed");
            }
            info!(transport = %self.kind, addr = %self.sent_by(), "listening point stopped");
        }
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for ListeningPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListeningPoint")
            .field("transport", &self.kind)
            .field("sent_by", &self.sent_by())
            .field("contact", &self.contact.as_ref().map(ToString::to_string))
            .field("started", &self.is_started())
            .finish()
    }
}
