use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use sipstack_sip_core::util::generate_branch;
use sipstack_sip_core::{
    Address, CSeq, HeaderAccess, HeaderName, Method, Request, Response, SipUri, TypedHeader,
};

use super::DialogId;
use crate::errors::{Error, Result};
use crate::stack::ListeningPoint;

/// Max-Forwards written on requests built by the stack
pub const MAX_FORWARDS: u32 = 70;

/// Lifecycle of a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogState {
    Early,
    Confirmed,
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogState::Early => "Early",
            DialogState::Confirmed => "Confirmed",
            DialogState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct DialogInner {
    state: DialogState,
    remote_target: SipUri,
    local_seq: Option<u32>,
    remote_seq: Option<u32>,
}

/// A SIP dialog, shared between the stack registry and event consumers
pub struct Dialog {
    id: DialogId,
    is_uac: bool,
    local_uri: SipUri,
    remote_uri: SipUri,
    /// Route headers for in-dialog requests, in sending order
    route_set: Vec<Address>,
    listening_point: Arc<ListeningPoint>,
    inner: Mutex<DialogInner>,
}

fn missing(name: HeaderName) -> Error {
    Error::Sip(sipstack_sip_core::Error::MissingMandatoryHeader(name))
}

impl Dialog {
    /// Dialog of the side that answered `request` with `response`
    pub(crate) fn new_uas(
        request: &Request,
        response: &Response,
        listening_point: Arc<ListeningPoint>,
    ) -> Result<Self> {
        let id = DialogId::for_uas(response).ok_or_else(|| missing(HeaderName::CallId))?;
        let from = request.from().ok_or_else(|| missing(HeaderName::From))?;
        let to = response.to().ok_or_else(|| missing(HeaderName::To))?;
        // a Contact-less request falls back to its From URI
        let remote_target = request
            .contact()
            .map(|contact| contact.uri.clone())
            .unwrap_or_else(|| from.uri.clone());

        Ok(Dialog {
            id,
            is_uac: false,
            local_uri: to.uri.clone(),
            remote_uri: from.uri.clone(),
            route_set: request.record_routes().into_iter().cloned().collect(),
            listening_point,
            inner: Mutex::new(DialogInner {
                state: DialogState::Early,
                remote_target,
                local_seq: None,
                remote_seq: request.cseq().map(|cseq| cseq.seq),
            }),
        })
    }

    /// Dialog of the side that sent `request` and received `response`
    pub(crate) fn new_uac(
        request: &Request,
        response: &Response,
        listening_point: Arc<ListeningPoint>,
    ) -> Result<Self> {
        let id = DialogId::for_uac(response).ok_or_else(|| missing(HeaderName::CallId))?;
        let from = request.from().ok_or_else(|| missing(HeaderName::From))?;
        let to = response.to().ok_or_else(|| missing(HeaderName::To))?;
        // provisional responses may omit Contact; the 2xx refreshes the target
        let remote_target = response
            .contact()
            .map(|contact| contact.uri.clone())
            .unwrap_or_else(|| request.uri.clone());
        let mut route_set: Vec<Address> = response.record_routes().into_iter().cloned().collect();
        route_set.reverse();

        Ok(Dialog {
            id,
            is_uac: true,
            local_uri: from.uri.clone(),
            remote_uri: to.uri.clone(),
            route_set,
            listening_point,
            inner: Mutex::new(DialogInner {
                state: DialogState::Early,
                remote_target,
                local_seq: request.cseq().map(|cseq| cseq.seq),
                remote_seq: None,
            }),
        })
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    /// Whether this side sent the dialog-forming request
    pub fn is_uac(&self) -> bool {
        self.is_uac
    }

    pub fn state(&self) -> DialogState {
        self.inner.lock().state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == DialogState::Terminated
    }

    pub fn local_uri(&self) -> &SipUri {
        &self.local_uri
    }

    pub fn remote_uri(&self) -> &SipUri {
        &self.remote_uri
    }

    /// Request-URI of the next in-dialog request
    pub fn remote_target(&self) -> SipUri {
        self.inner.lock().remote_target.clone()
    }

    pub fn route_set(&self) -> &[Address] {
        &self.route_set
    }

    pub fn local_seq(&self) -> Option<u32> {
        self.inner.lock().local_seq
    }

    pub fn remote_seq(&self) -> Option<u32> {
        self.inner.lock().remote_seq
    }

    pub fn listening_point(&self) -> &Arc<ListeningPoint> {
        &self.listening_point
    }

    /// Builds the next in-dialog request and consumes a local sequence number.
    ///
    /// ACK and CANCEL are rejected: they reuse the CSeq of the transaction
    /// they belong to. See [`Dialog::create_ack`].
    pub fn create_request(&self, method: Method) -> Result<Request> {
        if matches!(method, Method::Ack | Method::Cancel) {
            return Err(Error::InvalidDialogMethod(method));
        }
        let (seq, remote_target) = {
            let mut inner = self.inner.lock();
            if inner.state == DialogState::Terminated {
                return Err(Error::DialogTerminated);
            }
            let seq = inner.local_seq.unwrap_or(0).wrapping_add(1);
            inner.local_seq = Some(seq);
            (seq, inner.remote_target.clone())
        };
        Ok(self.build_request(method, remote_target, seq))
    }

    /// ACK for a 2xx to the INVITE sent with CSeq `cseq`, on a fresh branch
    pub fn create_ack(&self, cseq: u32) -> Request {
        let mut ack = self.build_request(Method::Ack, self.remote_target(), cseq);
        if let Some(via) = ack.via_mut() {
            via.set_branch(generate_branch());
        }
        ack
    }

    /// Sends an ACK statelessly through the dialog's listening point
    pub async fn send_ack(&self, ack: &Request) -> Result<()> {
        self.listening_point.send_request(ack).await
    }

    /// Marks the dialog terminated without touching the registry
    pub fn terminate(&self) {
        let mut inner = self.inner.lock();
        if inner.state != DialogState::Terminated {
            inner.state = DialogState::Terminated;
            debug!(dialog = %self.id, "dialog terminated");
        }
    }

    /// Terminates the dialog and removes it from the stack. Idempotent.
    pub fn delete(&self) {
        self.terminate();
        if let Some(stack) = self.listening_point.stack() {
            stack.dialogs.remove(&self.id.to_string());
        }
    }

    /// Early is only entered at creation; this is a no-op afterwards
    pub(crate) fn confirm(&self, remote_target: Option<&Address>) {
        let mut inner = self.inner.lock();
        if inner.state == DialogState::Terminated {
            return;
        }
        if let Some(contact) = remote_target {
            inner.remote_target = contact.uri.clone();
        }
        if inner.state != DialogState::Confirmed {
            inner.state = DialogState::Confirmed;
            debug!(dialog = %self.id, "dialog confirmed");
        }
    }

    /// Accepts an inbound in-dialog CSeq, rejecting one lower than the last seen
    pub(crate) fn check_remote_seq(&self, seq: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.remote_seq {
            Some(last) if seq < last => Err(Error::OutOfOrderSequence {
                last,
                received: seq,
            }),
            _ => {
                inner.remote_seq = Some(seq);
                Ok(())
            }
        }
    }

    fn build_request(&self, method: Method, remote_target: SipUri, seq: u32) -> Request {
        let mut request = Request::new(method.clone(), remote_target);
        request.set_header(TypedHeader::Via(self.listening_point.create_via()));
        if !self.route_set.is_empty() {
            request.set_header(TypedHeader::Route(self.route_set.clone()));
        }
        request.set_max_forwards(MAX_FORWARDS);
        request.set_header(TypedHeader::From(
            Address::new(self.local_uri.clone()).with_tag(self.id.local_tag.clone()),
        ));
        request.set_header(TypedHeader::To(
            Address::new(self.remote_uri.clone()).with_tag(self.id.remote_tag.clone()),
        ));
        request.set_header(TypedHeader::CallId(self.id.call_id.clone()));
        request.set_header(TypedHeader::CSeq(CSeq::new(seq, method)));
        if let Some(user_agent) = self.listening_point.user_agent() {
            request.set_user_agent(user_agent);
        }
        request
    }
}

impl fmt::Debug for Dialog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Dialog")
            .field("id", &self.id.to_string())
            .field("uac", &self.is_uac)
            .field("state", &inner.state)
            .field("remote_target", &inner.remote_target.to_string())
            .field("local_seq", &inner.local_seq)
            .field("remote_seq", &inner.remote_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListeningPointConfig;
    use sipstack_sip_core::{StatusCode, Via};
    use std::sync::Weak;

    fn listening_point() -> Arc<ListeningPoint> {
        Arc::new(ListeningPoint::new(
            &ListeningPointConfig::udp("127.0.0.1", 5060),
            None,
            Weak::new(),
        ))
    }

    fn invite() -> Request {
        let raw = "INVITE sip:bob@192.168.1.20:5070 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.168.1.10:5060;branch=z9hG4bK-inv1\r\n\
Record-Route: <sip:p1.example.com;lr>, <sip:p2.example.com;lr>\r\n\
Max-Forwards: 70\r\n\
From: <sip:alice@example.com>;tag=alice-tag\r\n\
To: <sip:bob@example.com>\r\n\
Call-ID: call-1\r\n\
CSeq: 4 INVITE\r\n\
Contact: <sip:alice@192.168.1.10:5060>\r\n\
Content-Length: 0\r\n\r\n";
        Request::parse(raw.as_bytes()).unwrap()
    }

    fn ok_with_tag(request: &Request) -> Response {
        let mut response = request.create_response(StatusCode::Ok);
        response.to_mut().unwrap().set_tag("bob-tag");
        response.set_header(TypedHeader::Contact(vec!["<sip:bob@192.168.1.20:5070>".parse().unwrap()]));
        response.set_header(TypedHeader::RecordRoute(vec![
            "<sip:p1.example.com;lr>".parse().unwrap(),
            "<sip:p2.example.com;lr>".parse().unwrap(),
        ]));
        response
    }

    #[test]
    fn test_uas_dialog() {
        let request = invite();
        let dialog = Dialog::new_uas(&request, &ok_with_tag(&request), listening_point()).unwrap();
        assert_eq!(dialog.id().to_string(), "call-1:alice-tag:bob-tag");
        assert!(!dialog.is_uac());
        assert_eq!(dialog.state(), DialogState::Early);
        assert_eq!(dialog.remote_seq(), Some(4));
        assert_eq!(dialog.local_seq(), None);
        assert_eq!(dialog.remote_target().to_string(), "sip:alice@192.168.1.10:5060");
        assert_eq!(dialog.route_set()[0].uri.host, "p1.example.com");
        assert_eq!(dialog.remote_uri().user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_uac_dialog_and_requests() {
        let request = invite();
        let response = ok_with_tag(&request);
        let dialog = Dialog::new_uac(&request, &response, listening_point()).unwrap();
        assert_eq!(dialog.id().to_string(), "call-1:bob-tag:alice-tag");
        assert_eq!(dialog.local_seq(), Some(4));
        assert_eq!(dialog.route_set()[0].uri.host, "p2.example.com");

        dialog.confirm(response.contact());
        assert_eq!(dialog.state(), DialogState::Confirmed);

        let bye = dialog.create_request(Method::Bye).unwrap();
        assert_eq!(bye.uri.to_string(), "sip:bob@192.168.1.20:5070");
        assert_eq!(bye.cseq().unwrap().seq, 5);
        assert_eq!(bye.cseq().unwrap().method, Method::Bye);
        assert_eq!(bye.from().unwrap().tag(), "alice-tag");
        assert_eq!(bye.to().unwrap().tag(), "bob-tag");
        assert_eq!(bye.call_id(), Some("call-1"));
        assert_eq!(bye.routes().len(), 2);
        assert_eq!(bye.max_forwards(), Some(MAX_FORWARDS));
        assert!(bye.branch().is_none());
        bye.check_headers().unwrap();

        let ack = dialog.create_ack(4);
        assert_eq!(ack.cseq().unwrap(), &CSeq::new(4, Method::Ack));
        assert!(ack.branch().unwrap().starts_with("z9hG4bK"));
        assert_eq!(dialog.local_seq(), Some(5));
    }

    #[test]
    fn test_invalid_methods_and_termination() {
        let request = invite();
        let dialog = Dialog::new_uac(&request, &ok_with_tag(&request), listening_point()).unwrap();
        assert!(matches!(
            dialog.create_request(Method::Ack),
            Err(Error::InvalidDialogMethod(Method::Ack))
        ));
        assert!(matches!(
            dialog.create_request(Method::Cancel),
            Err(Error::InvalidDialogMethod(Method::Cancel))
        ));
        dialog.terminate();
        dialog.confirm(None);
        assert!(dialog.is_terminated());
        assert!(matches!(dialog.create_request(Method::Bye), Err(Error::DialogTerminated)));
        // no stack behind the listening point, so this only marks it
        dialog.delete();
        dialog.delete();
    }

    #[test]
    fn test_remote_sequence() {
        let request = invite();
        let dialog = Dialog::new_uac(&request, &ok_with_tag(&request), listening_point()).unwrap();
        assert_eq!(dialog.remote_seq(), None);
        dialog.check_remote_seq(10).unwrap();
        dialog.check_remote_seq(10).unwrap();
        dialog.check_remote_seq(11).unwrap();
        assert!(matches!(
            dialog.check_remote_seq(9),
            Err(Error::OutOfOrderSequence { last: 11, received: 9 })
        ));
        assert_eq!(dialog.remote_seq(), Some(11));
    }

    #[test]
    fn test_uas_without_contact_targets_from() {
        let mut request = invite();
        request.remove_header(HeaderName::Contact);
        request.set_header(TypedHeader::Via(Via::new("UDP", "192.168.1.10", Some(5060)).with_branch("z9hG4bK-x")));
        let dialog = Dialog::new_uas(&request, &ok_with_tag(&request), listening_point()).unwrap();
        assert_eq!(dialog.remote_target().to_string(), "sip:alice@example.com");
    }
}
