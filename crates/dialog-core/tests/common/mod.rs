//! Shared fixtures: loopback stacks with fast timers and a scriptable UAS.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use sipstack_dialog_core::prelude::*;

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub type Handler = Arc<dyn Fn(RequestEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Records every request it sees and answers through `handler`
pub struct Uas {
    seen: mpsc::UnboundedSender<Request>,
    handler: Handler,
}

impl Uas {
    pub fn new(handler: Handler) -> (Arc<Self>, mpsc::UnboundedReceiver<Request>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (Arc::new(Uas { seen, handler }), rx)
    }
}

#[async_trait]
impl EventListener for Uas {
    async fn on_request(&self, event: RequestEvent) {
        let _ = self.seen.send(event.request.clone());
        (self.handler)(event).await;
    }
}

/// Answers every request except ACK with `status`
pub fn reply_with(status: StatusCode) -> Handler {
    Arc::new(move |event: RequestEvent| {
        Box::pin(async move {
            if event.request.method == Method::Ack {
                return;
            }
            let response = with_contact(&event, event.transaction.create_response(status));
            let _ = event.transaction.send_response(response).await;
        })
    })
}

/// Adds the answering listening point's address as Contact
pub fn with_contact(event: &RequestEvent, mut response: Response) -> Response {
    let lp = event.transaction.listening_point();
    let contact = Address::new(SipUri::new(lp.ip(), Some(lp.port())).with_user("bob"));
    response.set_header(TypedHeader::Contact(vec![contact]));
    response
}

pub fn fast_config() -> StackConfig {
    StackConfig::default().with_timers(TimerSettings::fast())
}

/// A started stack on 127.0.0.1 with an OS-assigned port
pub async fn start_stack(
    listening_point: ListeningPointConfig,
    config: StackConfig,
    listener: Option<Arc<dyn EventListener>>,
) -> Stack {
    let mut builder = Stack::builder().with_config(config).listening_point(listening_point);
    if let Some(listener) = listener {
        builder = builder.event_listener(listener);
    }
    let stack = builder.build().expect("stack builds");
    stack.start().await.expect("stack starts");
    stack
}

pub async fn udp_stack(listener: Option<Arc<dyn EventListener>>) -> Stack {
    start_stack(ListeningPointConfig::udp("127.0.0.1", 0), fast_config(), listener).await
}

pub fn lp(stack: &Stack) -> Arc<ListeningPoint> {
    stack.listening_points()[0].clone()
}

pub fn uri_of(user: &str, stack: &Stack) -> SipUri {
    let lp = lp(stack);
    SipUri::new(lp.ip(), Some(lp.port())).with_user(user)
}

/// Out-of-dialog request from alice on `from` to bob on `to`
pub fn request(method: Method, from: &Stack, to: &Stack) -> Request {
    let alice = Address::new(uri_of("alice", from));
    let bob = Address::new(uri_of("bob", to));
    let mut request = lp(from).new_request(method, uri_of("bob", to), alice.clone(), bob, None);
    request.set_header(TypedHeader::Contact(vec![alice]));
    request
}

pub async fn next_request(rx: &mut mpsc::UnboundedReceiver<Request>) -> Request {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("request within deadline")
        .expect("listener alive")
}

/// Polls until `check` holds or the wait expires
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
