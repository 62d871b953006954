//! # SIP Dialogs
//!
//! A dialog is the peer relationship created when a dialog-forming request
//! (INVITE, SUBSCRIBE, REFER) is answered with a tagged 1xx or 2xx. It is
//! identified by the Call-ID plus both tags and carries the state needed to
//! build in-dialog requests: remote target, route set and CSeq counters.
//!
//! ```text
//!   1xx with tag        2xx
//!  ------------> Early ------> Confirmed
//!                  |               |
//!                  | non-2xx       | BYE / delete()
//!                  v               v
//!               Terminated <-------+
//! ```
//!
//! The stack's dialog registry owns every dialog. Transactions keep only the
//! [`DialogId`] and look the dialog up when they need it.

mod dialog_id;
mod dialog_impl;

pub use dialog_id::DialogId;
pub use dialog_impl::{Dialog, DialogState, MAX_FORWARDS};
