//! SUBSCRIBE-created dialogs, in-dialog NOTIFY and subscription refresh.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::sync::mpsc;

use common::*;
use sipstack_dialog_core::prelude::*;

/// Accepts SUBSCRIBE for one hour
fn notifier() -> Handler {
    Arc::new(|event: RequestEvent| {
        Box::pin(async move {
            let transaction = event.transaction.clone();
            let mut response = with_contact(&event, transaction.create_response(StatusCode::Ok));
            if event.request.method == Method::Subscribe {
                response.set_expires(3600);
            }
            let _ = transaction.send_response(response).await;
        })
    })
}

fn subscribe(alice: &Stack, bob: &Stack) -> Request {
    let mut subscribe = request(Method::Subscribe, alice, bob);
    subscribe.set_header(TypedHeader::Event(Event::new("presence")));
    subscribe.set_expires(3600);
    subscribe
}

async fn subscribe_dialog(alice: &Stack, bob: &Stack) -> (Arc<Dialog>, Request) {
    let request = subscribe(alice, bob);
    let event = lp(alice)
        .new_client_transaction(request.clone())
        .unwrap()
        .execute()
        .await
        .expect("SUBSCRIBE answered");
    assert_eq!(event.response.status(), StatusCode::Ok);
    (event.dialog.expect("dialog from 2xx"), request)
}

#[tokio::test]
#[serial]
async fn test_subscribe_forms_dialog() {
    init_tracing();
    let (subscriber, mut notified) = Uas::new(reply_with(StatusCode::Ok));
    let (notifier, _seen) = Uas::new(notifier());
    let bob = udp_stack(Some(notifier)).await;
    let alice = udp_stack(Some(subscriber)).await;

    let request = subscribe(&alice, &bob);
    let event = lp(&alice)
        .new_client_transaction(request.clone())
        .unwrap()
        .execute()
        .await
        .unwrap();

    // keyed Call-ID, remote (To) tag, local (From) tag
    let key = format!(
        "{}:{}:{}",
        request.call_id().unwrap(),
        event.response.to().unwrap().tag(),
        request.from().unwrap().tag()
    );
    let dialog = alice.dialog(&key).expect("dialog registered");
    assert_eq!(dialog.state(), DialogState::Confirmed);
    assert_eq!(dialog.id().to_string(), key);
    assert_eq!(alice.stats().dialogs, 1);
    assert_eq!(bob.stats().dialogs, 1);

    // the notifier reaches the subscriber inside the same dialog
    let bob_dialog = bob.dialogs().pop().unwrap();
    let mut notify = bob_dialog.create_request(Method::Notify).unwrap();
    notify.set_header(TypedHeader::Event(Event::new("presence")));
    notify.set_header(TypedHeader::SubscriptionState(SubscriptionState::new("active")));
    let event = lp(&bob)
        .new_client_transaction(notify)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(event.response.status(), StatusCode::Ok);
    assert_eq!(next_request(&mut notified).await.method, Method::Notify);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_notify_outside_dialog_is_rejected() {
    init_tracing();
    let (uas, mut seen) = Uas::new(reply_with(StatusCode::Ok));
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    let mut notify = request(Method::Notify, &alice, &bob);
    notify.set_header(TypedHeader::Event(Event::new("presence")));
    notify.set_header(TypedHeader::SubscriptionState(SubscriptionState::new("active")));
    let event = lp(&alice)
        .new_client_transaction(notify)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(event.response.status(), StatusCode::CallOrTransactionDoesNotExist);
    assert!(seen.try_recv().is_err());

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_subscribe_refresh() {
    init_tracing();
    let (uas, mut seen) = Uas::new(notifier());
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;
    let (dialog, request) = subscribe_dialog(&alice, &bob).await;
    next_request(&mut seen).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let refresher = alice
        .start_subscribe_refresh(&request, dialog.clone(), Duration::from_millis(200), move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

    let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, RefreshEvent::Refreshed), "{:?}", event);
    let refresh = next_request(&mut seen).await;
    assert_eq!(refresh.method, Method::Subscribe);
    assert_eq!(refresh.call_id(), request.call_id());
    assert_eq!(refresh.event().map(|e| e.event_type.as_str()), Some("presence"));
    assert_eq!(refresh.expires(), Some(3600));
    assert!(refresh.cseq().unwrap().seq > request.cseq().unwrap().seq);

    // once the dialog ends the refresher reports it and stops
    dialog.delete();
    let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, RefreshEvent::Terminated(Error::DialogTerminated)));
    assert!(eventually(|| refresher.is_stopped()).await);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_subscribe_refresh_rejects_zero_interval() {
    let (uas, _seen) = Uas::new(notifier());
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;
    let (dialog, request) = subscribe_dialog(&alice, &bob).await;

    let err = alice
        .start_subscribe_refresh(&request, dialog, Duration::ZERO, |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRefreshInterval));

    alice.stop().await;
    bob.stop().await;
}
