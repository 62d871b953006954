//! INVITE call flow between two loopback stacks: early and confirmed
//! dialogs, the caller's ACK and BYE teardown.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serial_test::serial;

use common::*;
use sipstack_dialog_core::prelude::*;

/// Rings, then answers INVITE; accepts BYE and INFO
fn callee() -> Handler {
    Arc::new(|event: RequestEvent| {
        Box::pin(async move {
            let transaction = event.transaction.clone();
            match event.request.method {
                Method::Invite => {
                    let ringing = with_contact(&event, transaction.create_response(StatusCode::Ringing));
                    transaction.send_response(ringing).await.expect("180 sent");
                    let ok = with_contact(&event, transaction.create_response(StatusCode::Ok));
                    transaction.send_response(ok).await.expect("200 sent");
                }
                Method::Ack => {}
                _ => {
                    let ok = transaction.create_response(StatusCode::Ok);
                    let _ = transaction.send_response(ok).await;
                }
            }
        })
    })
}

async fn establish(caller: &Stack, callee: &Stack) -> (Arc<Dialog>, Request, Vec<u16>) {
    let invite = request(Method::Invite, caller, callee);
    let transaction = lp(caller).new_client_transaction(invite.clone()).unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let event = transaction
        .execute_with_progress(move |event| seen.lock().push(event.response.status_code()))
        .await
        .expect("INVITE answered");
    assert_eq!(event.response.status(), StatusCode::Ok);
    assert_eq!(transaction.state().await, TransactionState::Terminated);

    let dialog = event.dialog.expect("dialog from 2xx");
    let statuses = progress.lock().clone();
    (dialog, invite, statuses)
}

#[tokio::test]
#[serial]
async fn test_invite_ack_bye() {
    init_tracing();
    let (uas, mut seen) = Uas::new(callee());
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    let (dialog, invite, progress) = establish(&alice, &bob).await;
    assert_eq!(progress, vec![180]);
    assert!(dialog.is_uac());
    assert_eq!(dialog.state(), DialogState::Confirmed);
    assert_eq!(dialog.remote_target(), uri_of("bob", &bob));
    assert_eq!(alice.stats().dialogs, 1);
    assert_eq!(next_request(&mut seen).await.method, Method::Invite);

    // the callee holds the mirror image of the same dialog
    let id = dialog.id();
    let mirror = format!("{}:{}:{}", id.call_id, id.local_tag, id.remote_tag);
    let bob_dialog = bob.dialog(&mirror).expect("callee dialog");
    assert_eq!(bob_dialog.state(), DialogState::Confirmed);
    assert!(!bob_dialog.is_uac());

    let cseq = invite.cseq().unwrap().seq;
    let ack = dialog.create_ack(cseq);
    assert_eq!(ack.cseq().unwrap().method, Method::Ack);
    assert_ne!(ack.branch(), invite.branch());
    dialog.send_ack(&ack).await.unwrap();
    let delivered = next_request(&mut seen).await;
    assert_eq!(delivered.method, Method::Ack);
    assert_eq!(delivered.cseq().unwrap().seq, cseq);

    let bye = dialog.create_request(Method::Bye).unwrap();
    assert_eq!(bye.cseq().unwrap().seq, cseq + 1);
    let event = lp(&alice)
        .new_client_transaction(bye)
        .unwrap()
        .execute()
        .await
        .expect("BYE answered");
    assert_eq!(event.response.status(), StatusCode::Ok);
    assert_eq!(next_request(&mut seen).await.method, Method::Bye);

    assert!(dialog.is_terminated());
    assert!(alice.dialogs().is_empty());
    assert!(eventually(|| bob.dialogs().is_empty()).await);
    assert!(bob_dialog.is_terminated());

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_rejected_invite_removes_early_dialog() {
    init_tracing();
    let handler: Handler = Arc::new(|event: RequestEvent| {
        Box::pin(async move {
            if event.request.method != Method::Invite {
                return;
            }
            let transaction = event.transaction.clone();
            let ringing = with_contact(&event, transaction.create_response(StatusCode::Ringing));
            transaction.send_response(ringing).await.expect("180 sent");
            let busy = transaction.create_response(StatusCode::BusyHere);
            transaction.send_response(busy).await.expect("486 sent");
        })
    });
    let (uas, _seen) = Uas::new(handler);
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;

    let transaction = lp(&alice)
        .new_client_transaction(request(Method::Invite, &alice, &bob))
        .unwrap();
    let event = transaction.execute().await.expect("INVITE answered");
    assert_eq!(event.response.status(), StatusCode::BusyHere);
    assert!(event.dialog.is_none());

    // the client transaction lingers in Completed for Timer D, absorbing
    // final retransmissions, then goes away
    assert!(alice.dialogs().is_empty());
    assert!(eventually(|| bob.dialogs().is_empty()).await);
    assert!(eventually(|| alice.stats().client_transactions == 0).await);
    assert!(eventually(|| bob.stats().server_transactions == 0).await);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_in_dialog_sequence_checks() {
    init_tracing();
    let (uas, mut seen) = Uas::new(callee());
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;
    let (dialog, _, _) = establish(&alice, &bob).await;
    next_request(&mut seen).await;

    let info = dialog.create_request(Method::Info).unwrap();
    let stale_seq = info.cseq().unwrap().seq;
    let event = lp(&alice).new_client_transaction(info).unwrap().execute().await.unwrap();
    assert_eq!(event.response.status(), StatusCode::Ok);
    assert_eq!(next_request(&mut seen).await.method, Method::Info);

    // a second INFO that goes backwards in CSeq
    let mut stale = dialog.create_request(Method::Info).unwrap();
    stale.cseq_mut().unwrap().seq = stale_seq - 1;
    let event = lp(&alice).new_client_transaction(stale).unwrap().execute().await.unwrap();
    assert_eq!(event.response.status(), StatusCode::ServerInternalError);
    assert!(seen.try_recv().is_err());
    assert_eq!(dialog.state(), DialogState::Confirmed);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
#[serial]
async fn test_ended_dialog_refuses_requests() {
    init_tracing();
    let (uas, _seen) = Uas::new(callee());
    let bob = udp_stack(Some(uas)).await;
    let alice = udp_stack(None).await;
    let (dialog, _, _) = establish(&alice, &bob).await;

    assert!(matches!(
        dialog.create_request(Method::Ack),
        Err(Error::InvalidDialogMethod(Method::Ack))
    ));
    dialog.delete();
    dialog.delete();
    assert!(alice.dialogs().is_empty());
    assert!(matches!(dialog.create_request(Method::Bye), Err(Error::DialogTerminated)));

    alice.stop().await;
    bob.stop().await;
}
