//! Application boundary.
//!
//! Inbound requests reach the application through an [`EventListener`],
//! once per logical request and never for retransmissions. Installing an
//! [`EventInterceptor`] instead turns the stack stateless: every parsed
//! message goes to the interceptor and no transaction or dialog is touched.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sipstack_sip_core::{Request, Response};

use crate::dialog::Dialog;
use crate::transaction::{ServerTransaction, TransactionKey};

/// An inbound request together with the server transaction that answers it
pub struct RequestEvent {
    pub request: Request,
    /// The dialog the request belongs to, if any
    pub dialog: Option<Arc<Dialog>>,
    pub transaction: Arc<ServerTransaction>,
}

impl fmt::Debug for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvent")
            .field("method", &self.request.method)
            .field("dialog", &self.dialog.as_ref().map(|d| d.id().to_string()))
            .field("transaction", &self.transaction.key().as_str())
            .finish()
    }
}

/// A response delivered to the issuer of a client transaction
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub response: Response,
    /// Dialog created or matched by this response
    pub dialog: Option<Arc<Dialog>>,
    pub transaction_id: TransactionKey,
}

/// Receives inbound requests. Each call runs on its own task.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    async fn on_request(&self, event: RequestEvent);
}

/// Receives every inbound message, bypassing transactions and dialogs
#[async_trait]
pub trait EventInterceptor: Send + Sync + 'static {
    async fn on_request(&self, request: Request);

    async fn on_response(&self, response: Response);
}
