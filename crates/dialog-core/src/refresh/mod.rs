//! Periodic re-registration and re-subscription.
//!
//! A refresher owns a background task that sleeps for its interval, sends
//! the refresh through a fresh client transaction and reports each outcome
//! to the handler. The first failure stops it. Dropping a refresher stops
//! it too.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sipstack_sip_core::util::generate_tag;
use sipstack_sip_core::{HeaderAccess, HeaderName, Method, Request, StatusCode};

use crate::dialog::Dialog;
use crate::errors::{Error, Result};
use crate::stack::Stack;

/// Registrations are refreshed this long before they expire
const REGISTER_MARGIN_SECS: u32 = 5;

/// Outcome of one refresh cycle
#[derive(Debug)]
pub enum RefreshEvent {
    /// The refresh was answered with 200
    Refreshed,
    /// The refresh failed; the refresher has stopped
    Failed(Error),
    /// The dialog is gone; the refresher has stopped
    Terminated(Error),
}

/// Seconds between refreshes of a registration lasting `expires` seconds
pub(crate) fn register_interval(expires: Option<u32>) -> Result<Duration> {
    match expires {
        None | Some(0) => Err(Error::InvalidRefreshInterval),
        Some(secs) if secs > REGISTER_MARGIN_SECS => {
            Ok(Duration::from_secs(u64::from(secs - REGISTER_MARGIN_SECS)))
        }
        Some(secs) => Ok(Duration::from_secs(u64::from(secs))),
    }
}

/// Keeps a registration alive by resending the REGISTER before it expires
pub struct RegisterRefresher {
    interval: Duration,
    task: JoinHandle<()>,
}

impl RegisterRefresher {
    /// # Panics
    ///
    /// Panics if `request` is not a REGISTER.
    pub(crate) fn start<H>(stack: Stack, request: &Request, handler: H) -> Result<Self>
    where
        H: Fn(RefreshEvent) + Send + Sync + 'static,
    {
        assert_eq!(
            request.method,
            Method::Register,
            "register refresh needs a REGISTER request"
        );
        let interval = register_interval(request.expires())?;
        let mut request = request.clone();
        info!(interval = ?interval, "starting register refresh");

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match refresh_register(&stack, &mut request).await {
                    Ok(()) => handler(RefreshEvent::Refreshed),
                    Err(err) => {
                        warn!(error = %err, "register refresh failed");
                        handler(RefreshEvent::Failed(err));
                        break;
                    }
                }
            }
        });
        Ok(RegisterRefresher { interval, task })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

async fn refresh_register(stack: &Stack, request: &mut Request) -> Result<()> {
    request.clear_branch();
    if let Some(from) = request.from_mut() {
        from.set_tag(generate_tag());
    }
    request.bump_cseq();

    let transport = request
        .via()
        .map(|via| via.transport.clone())
        .unwrap_or_else(|| "UDP".to_string());
    let listening_point = stack
        .listening_point(&transport)
        .ok_or_else(|| Error::NoListeningPoint(transport))?;

    let transaction = listening_point.new_client_transaction(request.clone())?;
    let event = transaction.execute().await?;
    match event.response.status() {
        StatusCode::Ok => {
            debug!(cseq = ?request.cseq().map(|cseq| cseq.seq), "registration refreshed");
            Ok(())
        }
        status => Err(Error::UnexpectedStatus {
            code: status.as_u16(),
            reason: event.response.reason_phrase().to_string(),
        }),
    }
}

impl Drop for RegisterRefresher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for RegisterRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRefresher")
            .field("interval", &self.interval)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Keeps a subscription alive with in-dialog SUBSCRIBE requests
pub struct SubscribeRefresher {
    interval: Duration,
    task: JoinHandle<()>,
}

impl SubscribeRefresher {
    /// # Panics
    ///
    /// Panics if `request` is not a SUBSCRIBE.
    pub(crate) fn start<H>(
        request: &Request,
        dialog: Arc<Dialog>,
        interval: Duration,
        handler: H,
    ) -> Result<Self>
    where
        H: Fn(RefreshEvent) + Send + Sync + 'static,
    {
        assert_eq!(
            request.method,
            Method::Subscribe,
            "subscribe refresh needs a SUBSCRIBE request"
        );
        if interval.is_zero() {
            return Err(Error::InvalidRefreshInterval);
        }
        let saved = request.clone();
        info!(dialog = %dialog.id(), interval = ?interval, "starting subscribe refresh");

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match refresh_subscribe(&dialog, &saved).await {
                    Ok(()) => handler(RefreshEvent::Refreshed),
                    Err(err @ (Error::DialogTerminated | Error::UnexpectedStatus { code: 481, .. })) => {
                        info!(dialog = %dialog.id(), error = %err, "subscription ended");
                        handler(RefreshEvent::Terminated(err));
                        break;
                    }
                    Err(err) => {
                        warn!(dialog = %dialog.id(), error = %err, "subscribe refresh failed");
                        handler(RefreshEvent::Failed(err));
                        break;
                    }
                }
            }
        });
        Ok(SubscribeRefresher { interval, task })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

async fn refresh_subscribe(dialog: &Arc<Dialog>, saved: &Request) -> Result<()> {
    let mut request = dialog.create_request(Method::Subscribe)?;
    for name in [HeaderName::Expires, HeaderName::Contact, HeaderName::Event] {
        copy_headers(saved, &mut request, name);
    }
    if !saved.body().is_empty() {
        let content_type = saved.content_type().unwrap_or("application/octet-stream").to_string();
        request.set_content(content_type, saved.body().clone());
    }

    let transaction = dialog.listening_point().new_client_transaction(request)?;
    let event = transaction.execute().await?;
    match event.response.status() {
        StatusCode::Ok => {
            debug!(dialog = %dialog.id(), "subscription refreshed");
            Ok(())
        }
        status => Err(Error::UnexpectedStatus {
            code: status.as_u16(),
            reason: event.response.reason_phrase().to_string(),
        }),
    }
}

fn copy_headers(from: &Request, to: &mut Request, name: HeaderName) {
    let values = from.headers().get_all(name);
    if values.is_empty() {
        return;
    }
    to.remove_header(name);
    for value in values {
        // the target had none left, so even singular headers append
        let _ = to.append_header(value.clone());
    }
}

impl Drop for SubscribeRefresher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for SubscribeRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRefresher")
            .field("interval", &self.interval)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
