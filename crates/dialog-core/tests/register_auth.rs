//! REGISTER with a digest challenge, and the register refresher.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::sync::mpsc;

use common::*;
use sipstack_dialog_core::prelude::*;

const PASSWORD: &str = "secret";

/// A registrar challenging every REGISTER without valid credentials
fn registrar() -> Handler {
    Arc::new(|event: RequestEvent| {
        Box::pin(async move {
            let transaction = event.transaction.clone();
            let response = if verify_plain_text_password(&event.request, PASSWORD) {
                let mut ok = transaction.create_response(StatusCode::Ok);
                ok.set_expires(event.request.expires().unwrap_or(3600));
                ok
            } else {
                let mut challenge = transaction.create_response(StatusCode::Unauthorized);
                generate_challenge(&mut challenge, "example.com");
                challenge
            };
            let _ = transaction.send_response(response).await;
        })
    })
}

fn register(alice: &Stack, registrar: &Stack, expires: u32) -> Request {
    let aor = Address::new(SipUri::new("example.com", None).with_user("alice"));
    let target = lp(registrar);
    let mut register = lp(alice).new_request(
        Method::Register,
        SipUri::new(target.ip(), Some(target.port())),
        aor.clone(),
        aor,
        None,
    );
    register.set_header(TypedHeader::Contact(vec![Address::new(uri_of("alice", alice))]));
    register.set_expires(expires);
    register
}

#[tokio::test]
#[serial]
async fn test_register_with_digest() {
    init_tracing();
    let (uas, mut seen) = Uas::new(registrar());
    let server = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    let mut request = register(&alice, &server, 3600);
    let event = lp(&alice)
        .new_client_transaction(request.clone())
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(event.response.status(), StatusCode::Unauthorized);
    assert!(event.dialog.is_none());

    generate_credentials(&mut request, &event.response, PASSWORD).unwrap();
    request.clear_branch();
    request.bump_cseq();
    let event = lp(&alice)
        .new_client_transaction(request)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(event.response.status(), StatusCode::Ok);
    assert_eq!(event.response.expires(), Some(3600));

    assert!(next_request(&mut seen).await.authorization().is_none());
    assert!(verify_plain_text_password(&next_request(&mut seen).await, PASSWORD));

    // REGISTER never forms a dialog
    assert_eq!(alice.stats().dialogs, 0);
    assert_eq!(server.stats().dialogs, 0);

    alice.stop().await;
    server.stop().await;
}

#[tokio::test]
#[serial]
async fn test_register_refresh_cycles() {
    init_tracing();
    let (uas, mut seen) = Uas::new(reply_with(StatusCode::Ok));
    let server = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    // Expires at or below the margin is used as-is
    let request = register(&alice, &server, 1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let refresher = alice
        .start_register_refresh(&request, move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
    assert_eq!(refresher.interval(), Duration::from_secs(1));

    let mut cseqs = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, RefreshEvent::Refreshed), "{:?}", event);
        let sent = next_request(&mut seen).await;
        cseqs.push(sent.cseq().unwrap().seq);
        assert_ne!(sent.from().unwrap().tag(), request.from().unwrap().tag());
    }
    let first = request.cseq().unwrap().seq;
    assert_eq!(cseqs, vec![first + 1, first + 2]);

    refresher.stop();
    alice.stop().await;
    server.stop().await;
}

#[tokio::test]
#[serial]
async fn test_register_refresh_stops_on_rejection() {
    init_tracing();
    let (uas, _seen) = Uas::new(reply_with(StatusCode::Forbidden));
    let server = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    let request = register(&alice, &server, 1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let refresher = alice
        .start_register_refresh(&request, move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

    let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        event,
        RefreshEvent::Failed(Error::UnexpectedStatus { code: 403, .. })
    ));
    assert!(eventually(|| refresher.is_stopped()).await);

    alice.stop().await;
    server.stop().await;
}
