//! Invoice listeners
//!
//! - [`NotificationInvoiceListener`] - push: wallet `payment_received` notifications
//! - [`PollingInvoiceListener`] - pull: diffing recent settled transactions
//!
//! The adapter picks one per connection based on what the wallet advertises.

mod notification;
mod polling;

pub use notification::NotificationInvoiceListener;
pub use polling::{PollingInvoiceListener, TransactionSnapshot};
