//! Inbound message routing: transport events in, transaction transitions out.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use sipstack_sip_core::{parse_message, HeaderAccess, HeaderName, Message};
use sipstack_sip_transport::{Connection, TransportEvent};

use super::ListeningPoint;
use crate::errors::{Error, Result};
use crate::transaction::{ServerTransaction, TransactionKey};

/// Event loop of one listening point. Per-message failures are logged and
/// never end the loop.
pub(crate) async fn run(listening_point: Weak<ListeningPoint>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(lp) = listening_point.upgrade() else {
            break;
        };
        match event {
            TransportEvent::PacketReceived {
                packet,
                source,
                destination,
                connection,
            } => {
                if let Err(err) = process_packet(&lp, packet, source, destination, connection).await {
                    warn!(source = %source, error = %err, "dropping inbound message");
                }
            }
            TransportEvent::Connected { remote } => {
                debug!(remote = %remote, "connection established");
            }
            TransportEvent::Disconnected { remote } => {
                debug!(remote = %remote, "connection closed");
            }
            TransportEvent::Error { error } => {
                error!(transport = %lp.transport(), error = %error, "transport error");
            }
            TransportEvent::Closed => {
                debug!(transport = %lp.transport(), "transport closed");
                break;
            }
        }
    }
}

/// Parses one packet and hands it to the interceptor or to its transaction
pub(crate) async fn process_packet(
    lp: &Arc<ListeningPoint>,
    packet: Bytes,
    source: SocketAddr,
    destination: SocketAddr,
    connection: Connection,
) -> Result<()> {
    let stack = lp.stack().ok_or(Error::ListeningPointNotStarted)?;
    trace!(source = %source, message = %String::from_utf8_lossy(&packet), "received");

    let mut message = parse_message(&packet)?;
    let via_transport = message
        .as_access()
        .via()
        .map(|via| via.transport.clone())
        .ok_or(Error::Sip(sipstack_sip_core::Error::MissingMandatoryHeader(HeaderName::Via)))?;
    if !via_transport.eq_ignore_ascii_case(lp.transport().as_str()) {
        return Err(Error::ViaTransportMismatch {
            via: via_transport,
            connection: lp.transport(),
        });
    }
    message.as_access_mut().set_addresses(source, destination);

    if let Some(interceptor) = stack.interceptor.clone() {
        tokio::spawn(async move {
            match message {
                Message::Request(request) => interceptor.on_request(request).await,
                Message::Response(response) => interceptor.on_response(response).await,
            }
        });
        return Ok(());
    }

    match message {
        Message::Request(mut request) => {
            if stack.listener.is_none() {
                return Err(Error::NoEventListener);
            }
            if let Some(via) = request.via_mut() {
                if via.rport().is_some() {
                    via.set_rport(Some(source.port()));
                    via.set_received(source.ip().to_string());
                }
            }
            let key = transaction_key(&request)?;
            let (transaction, created) = stack.server_transactions.find_or_insert_with(key.as_str(), || {
                Arc::new(ServerTransaction::new(
                    key.clone(),
                    request.clone(),
                    connection,
                    stack.config.timers,
                    lp.clone(),
                ))
            });
            if created {
                debug!(id = %key, method = %request.method, source = %source, "server transaction created");
            }
            transaction.process_request(request).await;
        }
        Message::Response(response) => {
            let key = transaction_key(&response)?;
            let transaction = stack
                .client_transactions
                .get(key.as_str())
                .ok_or_else(|| Error::TransactionNotFound(key.to_string()))?;
            transaction.process_response(response).await;
        }
    }
    Ok(())
}

fn transaction_key(message: &impl HeaderAccess) -> Result<TransactionKey> {
    TransactionKey::from_message(message).ok_or(Error::Sip(
        sipstack_sip_core::Error::MissingMandatoryHeader(HeaderName::Via),
    ))
}
