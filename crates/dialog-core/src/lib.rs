//! # sipstack-dialog-core
//!
//! Transaction, dialog and stack layer of the sipstack SIP engine.
//!
//! A [`Stack`] owns one [`ListeningPoint`] per configured transport and
//! three registries: client transactions, server transactions and dialogs.
//! Inbound requests reach the application through an [`EventListener`];
//! outbound requests go through a [`ClientTransaction`] whose
//! [`execute`](ClientTransaction::execute) waits for the final response.
//!
//! ```text
//! let stack = Stack::builder()
//!     .listening_point(ListeningPointConfig::udp("0.0.0.0", 5060))
//!     .event_listener(Arc::new(MyListener))
//!     .build()?;
//! stack.start().await?;
//!
//! let lp = stack.listening_point("udp").unwrap();
//! let request = lp.new_request(Method::Options, uri, from, to, None);
//! let event = lp.new_client_transaction(request)?.execute().await?;
//! ```

pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod refresh;
pub mod stack;
pub mod transaction;

pub use config::{ListeningPointConfig, StackConfig};
pub use dialog::{Dialog, DialogId, DialogState};
pub use errors::{Error, Result, UacError};
pub use events::{EventInterceptor, EventListener, RequestEvent, ResponseEvent};
pub use refresh::{RefreshEvent, RegisterRefresher, SubscribeRefresher};
pub use stack::{Hop, ListeningPoint, Stack, StackBuilder, StackStats};
pub use transaction::{
    ClientTransaction, ServerTransaction, TimerSettings, TransactionKey, TransactionState,
};

/// The stack plus the message types most handlers need
pub mod prelude {
    pub use crate::{
        ClientTransaction, Dialog, DialogId, DialogState, Error, EventInterceptor, EventListener,
        ListeningPoint, ListeningPointConfig, RefreshEvent, RequestEvent, ResponseEvent,
        Result, ServerTransaction, Stack, StackConfig, StackStats, TimerSettings, TransactionState,
        UacError,
    };
    pub use sipstack_sip_core::prelude::*;
}
