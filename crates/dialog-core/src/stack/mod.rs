//! # SIP Stack
//!
//! The [`Stack`] owns the three registries (client transactions, server
//! transactions, dialogs), one [`ListeningPoint`] per configured address and
//! the application's [`EventListener`] or [`EventInterceptor`].
//!
//! ```text
//!  transport events ──▶ inbound::run ──▶ parse ──▶ server/client transaction
//!                                                        │
//!                                  EventListener ◀───────┘ (requests)
//!                                  ResponseEvent ◀───────┘ (responses, to the waiter)
//! ```
//!
//! ```text
//! let stack = Stack::builder()
//!     .with_config(config)
//!     .event_listener(Arc::new(MyListener))
//!     .build()?;
//! stack.start().await?;
//! let lp = stack.listening_point("udp").unwrap();
//! let tx = lp.new_client_transaction(request)?;
//! let event = tx.execute().await?;
//! ```

pub mod hop;
pub(crate) mod inbound;
mod listening_point;
mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use sipstack_infra_common::logging::log_welcome;
use sipstack_sip_core::{Address, Request};

use crate::config::{ListeningPointConfig, StackConfig};
use crate::dialog::{Dialog, DialogId};
use crate::errors::{Error, Result};
use crate::events::{EventInterceptor, EventListener, RequestEvent};
use crate::refresh::{RefreshEvent, RegisterRefresher, SubscribeRefresher};
use crate::transaction::{ClientTransaction, ServerTransaction};

pub use hop::Hop;
pub use listening_point::ListeningPoint;
pub(crate) use registry::Registry;

/// Registry sizes at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackStats {
    pub client_transactions: usize,
    pub server_transactions: usize,
    pub dialogs: usize,
}

pub(crate) struct StackInner {
    pub(crate) config: StackConfig,
    pub(crate) listening_points: Vec<Arc<ListeningPoint>>,
    pub(crate) listener: Option<Arc<dyn EventListener>>,
    pub(crate) interceptor: Option<Arc<dyn EventInterceptor>>,
    pub(crate) client_transactions: Registry<Arc<ClientTransaction>>,
    pub(crate) server_transactions: Registry<Arc<ServerTransaction>>,
    pub(crate) dialogs: Registry<Arc<Dialog>>,
    running: AtomicBool,
}

impl StackInner {
    /// Hands a request to the listener on its own task
    pub(crate) fn notify(&self, event: RequestEvent) {
        if let Some(listener) = self.listener.clone() {
            tokio::spawn(async move {
                listener.on_request(event).await;
            });
        }
    }

    /// Removes a dialog and marks it terminated
    pub(crate) fn remove_dialog(&self, id: &DialogId) -> Option<Arc<Dialog>> {
        let dialog = self.dialogs.remove(&id.to_string())?;
        dialog.terminate();
        debug!(dialog = %id, "dialog removed");
        Some(dialog)
    }
}

/// Builder for [`Stack`]
#[derive(Default)]
pub struct StackBuilder {
    config: StackConfig,
    listener: Option<Arc<dyn EventListener>>,
    interceptor: Option<Arc<dyn EventInterceptor>>,
}

impl StackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: StackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listening_point(mut self, listening_point: ListeningPointConfig) -> Self {
        self.config.listening_points.push(listening_point);
        self
    }

    pub fn event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Makes the stack stateless; see [`EventInterceptor`]
    pub fn event_interceptor(mut self, interceptor: Arc<dyn EventInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn build(self) -> Result<Stack> {
        let StackBuilder {
            config,
            listener,
            interceptor,
        } = self;
        if config.listening_points.is_empty() {
            return Err(Error::Config("at least one listening point is required".to_string()));
        }
        let contacts = config
            .listening_points
            .iter()
            .map(|lp| lp.contact.as_deref().map(str::parse::<Address>).transpose())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let capacity = config.tu_count;
        let inner = Arc::new_cyclic(|stack| StackInner {
            listening_points: config
                .listening_points
                .iter()
                .zip(contacts)
                .map(|(lp, contact)| Arc::new(ListeningPoint::new(lp, contact, stack.clone())))
                .collect(),
            listener,
            interceptor,
            client_transactions: Registry::with_capacity(capacity),
            server_transactions: Registry::with_capacity(capacity),
            dialogs: Registry::with_capacity(capacity),
            running: AtomicBool::new(false),
            config,
        });
        Ok(Stack { inner })
    }
}

/// Handle to a running SIP engine. Cloning is cheap and shares the stack.
#[derive(Clone)]
pub struct Stack {
    inner: Arc<StackInner>,
}

impl Stack {
    pub fn builder() -> StackBuilder {
        StackBuilder::new()
    }

    /// Binds every listening point. If one fails the others are stopped again.
    pub async fn start(&self) -> Result<()> {
        for lp in &self.inner.listening_points {
            if let Err(err) = lp.start().await {
                error!(transport = %lp.transport(), addr = %lp.sent_by(), error = %err, "failed to start listening point");
                self.stop().await;
                return Err(err);
            }
        }
        self.inner.running.store(true, Ordering::Release);
        log_welcome("sipstack", env!("CARGO_PKG_VERSION"));
        info!(listening_points = self.inner.listening_points.len(), "stack started");
        Ok(())
    }

    /// Closes the transports, fails every pending client wait and clears
    /// the registries
    pub async fn stop(&self) {
        for lp in &self.inner.listening_points {
            lp.stop().await;
        }
        for transaction in self.inner.client_transactions.drain() {
            transaction.shutdown().await;
        }
        for transaction in self.inner.server_transactions.drain() {
            transaction.shutdown().await;
        }
        for dialog in self.inner.dialogs.drain() {
            dialog.terminate();
        }
        if self.inner.running.swap(false, Ordering::AcqRel) {
            info!("stack stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &StackConfig {
        &self.inner.config
    }

    pub fn listening_points(&self) -> &[Arc<ListeningPoint>] {
        &self.inner.listening_points
    }

    /// First listening point for `transport`, case-insensitively
    pub fn listening_point(&self, transport: &str) -> Option<Arc<ListeningPoint>> {
        self.inner
            .listening_points
            .iter()
            .find(|lp| lp.transport().as_str().eq_ignore_ascii_case(transport))
            .cloned()
    }

    pub fn dialog(&self, id: &str) -> Option<Arc<Dialog>> {
        self.inner.dialogs.get(id)
    }

    pub fn dialogs(&self) -> Vec<Arc<Dialog>> {
        self.inner.dialogs.values()
    }

    pub fn client_transaction(&self, id: &str) -> Option<Arc<ClientTransaction>> {
        self.inner.client_transactions.get(id)
    }

    pub fn server_transaction(&self, id: &str) -> Option<Arc<ServerTransaction>> {
        self.inner.server_transactions.get(id)
    }

    pub fn stats(&self) -> StackStats {
        StackStats {
            client_transactions: self.inner.client_transactions.len(),
            server_transactions: self.inner.server_transactions.len(),
            dialogs: self.inner.dialogs.len(),
        }
    }

    /// Re-sends `request` shortly before each registration expires.
    ///
    /// # Panics
    ///
    /// Panics if `request` is not a REGISTER.
    pub fn start_register_refresh<H>(&self, request: &Request, handler: H) -> Result<RegisterRefresher>
    where
        H: Fn(RefreshEvent) + Send + Sync + 'static,
    {
        RegisterRefresher::start(self.clone(), request, handler)
    }

    /// Re-subscribes inside `dialog` every `interval`.
    ///
    /// # Panics
    ///
    /// Panics if `request` is not a SUBSCRIBE.
    pub fn start_subscribe_refresh<H>(
        &self,
        request: &Request,
        dialog: Arc<Dialog>,
        interval: Duration,
        handler: H,
    ) -> Result<SubscribeRefresher>
    where
        H: Fn(RefreshEvent) + Send + Sync + 'static,
    {
        SubscribeRefresher::start(request, dialog, interval, handler)
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("listening_points", &self.inner.listening_points)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_listening_point() {
        assert!(matches!(Stack::builder().build(), Err(Error::Config(_))));
    }

    #[test]
    fn test_build_rejects_bad_contact() {
        let result = Stack::builder()
            .listening_point(ListeningPointConfig::udp("127.0.0.1", 0).with_contact("<not a uri"))
            .build();
        assert!(matches!(result, Err(Error::Sip(_))));
    }

    #[test]
    fn test_listening_point_lookup() {
        let stack = Stack::builder()
            .listening_point(ListeningPointConfig::udp("127.0.0.1", 0))
            .listening_point(ListeningPointConfig::tcp("127.0.0.1", 0).with_contact("<sip:gw@203.0.113.9:5060>"))
            .build()
            .unwrap();
        assert_eq!(stack.listening_point("tcp").unwrap().transport().as_str(), "TCP");
        assert!(stack.listening_point("UDP").unwrap().contact().is_none());
        assert!(stack.listening_point("tls").is_none());
        assert_eq!(stack.stats(), StackStats::default());
        assert!(!stack.is_running());
    }

    #[tokio::test]
    async fn test_start_failure_stops_everything() {
        let stack = Stack::builder()
            .listening_point(ListeningPointConfig::udp("127.0.0.1", 0))
            .listening_point(ListeningPointConfig::udp("not-an-ip", 0))
            .build()
            .unwrap();
        assert!(matches!(stack.start().await, Err(Error::Config(_))));
        assert!(!stack.is_running());
        assert!(stack.listening_points().iter().all(|lp| !lp.is_started()));
    }
}
