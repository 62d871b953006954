//! Stack wiring: listener-less stacks, interceptors, registries and
//! transport selection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use tokio::sync::mpsc;

use common::*;
use sipstack_dialog_core::prelude::*;

struct Tap {
    requests: mpsc::UnboundedSender<Request>,
    responses: mpsc::UnboundedSender<Response>,
}

#[async_trait]
impl EventInterceptor for Tap {
    async fn on_request(&self, request: Request) {
        let _ = self.requests.send(request);
    }

    async fn on_response(&self, response: Response) {
        let _ = self.responses.send(response);
    }
}

#[tokio::test]
#[serial]
async fn test_requests_need_a_listener() {
    init_tracing();
    let bob = udp_stack(None).await;
    let alice = start_stack(
        ListeningPointConfig::udp("127.0.0.1", 0),
        fast_config().with_request_timeout(Duration::from_millis(300)),
        None,
    )
    .await;

    let err = lp(&alice)
        .new_client_transaction(request(Method::Options, &alice, &bob))
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert_eq!(err, UacError::RequestTimeout);
    assert_eq!(bob.stats().server_transactions, 0);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_interceptor_sees_raw_messages() {
    init_tracing();
    let (requests, mut seen) = mpsc::unbounded_channel();
    let (responses, _) = mpsc::unbounded_channel();
    let bob = Stack::builder()
        .with_config(fast_config())
        .listening_point(ListeningPointConfig::udp("127.0.0.1", 0))
        .event_interceptor(Arc::new(Tap { requests, responses }))
        .build()
        .unwrap();
    bob.start().await.unwrap();
    let alice = udp_stack(None).await;

    let options = request(Method::Options, &alice, &bob);
    let transaction = lp(&alice).new_client_transaction(options.clone()).unwrap();
    let pending = tokio::spawn({
        let transaction = transaction.clone();
        async move { transaction.execute().await }
    });

    let intercepted = next_request(&mut seen).await;
    assert_eq!(intercepted.call_id(), options.call_id());
    assert!(intercepted.source().is_some());
    assert_eq!(bob.stats(), StackStats::default());

    // answer statelessly through the listening point
    let mut response = intercepted.create_response(StatusCode::Ok);
    response.to_mut().unwrap().set_tag("stateless");
    lp(&bob).send_response(&response).await.unwrap();

    let event = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap().unwrap();
    assert_eq!(event.response.status(), StatusCode::Ok);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_bye_without_dialog() {
    init_tracing();
    let (uas, mut seen) = Uas::new(reply_with(StatusCode::Ok));
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    let mut bye = request(Method::Bye, &alice, &bob);
    bye.to_mut().unwrap().set_tag("gone");
    let event = lp(&alice)
        .new_client_transaction(bye)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(event.response.status(), StatusCode::CallOrTransactionDoesNotExist);
    assert!(seen.try_recv().is_err());

    // out-of-dialog methods outside the filter list pass
    let event = lp(&alice)
        .new_client_transaction(request(Method::Message, &alice, &bob))
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(event.response.status(), StatusCode::Ok);
    assert_eq!(next_request(&mut seen).await.method, Method::Message);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_response_after_final_is_refused() {
    init_tracing();
    let (outcome, mut results) = mpsc::unbounded_channel();
    let handler: Handler = Arc::new(move |event: RequestEvent| {
        let outcome = outcome.clone();
        Box::pin(async move {
            let transaction = event.transaction.clone();
            let ok = transaction.create_response(StatusCode::Ok);
            transaction.send_response(ok).await.unwrap();
            let late = transaction.create_response(StatusCode::Ringing);
            let _ = outcome.send(transaction.send_response(late).await);
        })
    });
    let (uas, _seen) = Uas::new(handler);
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    lp(&alice)
        .new_client_transaction(request(Method::Options, &alice, &bob))
        .unwrap()
        .execute()
        .await
        .unwrap();
    let late = tokio::time::timeout(WAIT, results.recv()).await.unwrap().unwrap();
    assert!(matches!(late, Err(Error::InvalidTransactionState(_))));

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_transport_selection() {
    init_tracing();
    let alice = udp_stack(None).await;
    assert!(alice.listening_point("UDP").is_some());
    assert!(alice.listening_point("udp").is_some());
    assert!(alice.listening_point("tcp").is_none());
    assert!(alice.is_running());

    let mut request = lp(&alice).new_request(
        Method::Options,
        "sip:bob@127.0.0.1:5099".parse().unwrap(),
        "<sip:alice@example.com>".parse().unwrap(),
        "<sip:bob@example.com>".parse().unwrap(),
        None,
    );
    request.via_mut().unwrap().transport = "TCP".to_string();
    assert!(matches!(
        lp(&alice).new_client_transaction(request),
        Err(Error::TransportMismatch { .. })
    ));

    alice.stop().await;
    assert!(!alice.is_running());
}

#[tokio::test]
#[serial]
async fn test_user_agent_and_contact() {
    init_tracing();
    let (uas, mut seen) = Uas::new(reply_with(StatusCode::Ok));
    let bob = udp_stack(Some(uas)).await;
    let alice = start_stack(
        ListeningPointConfig::udp("127.0.0.1", 0).with_contact("<sip:alice@192.0.2.10:5060>"),
        fast_config().with_user_agent("probe/1.0"),
        None,
    )
    .await;

    let mut invite = request(Method::Invite, &alice, &bob);
    invite.remove_header(HeaderName::Contact);
    let transaction = lp(&alice).new_client_transaction(invite).unwrap();
    assert_eq!(transaction.request().user_agent(), Some("probe/1.0"));
    assert_eq!(
        transaction.request().contact().map(|c| c.uri.host.as_str()),
        Some("192.0.2.10")
    );
    let event = transaction.execute().await.unwrap();
    assert_eq!(event.response.status(), StatusCode::Ok);
    assert_eq!(next_request(&mut seen).await.user_agent(), Some("probe/1.0"));

    alice.stop().await;
    bob.stop().await;
}
