//! Pure domain logic for the beacon status relay: ticket model, issue
//! classification, signal vocabulary, and the reconciliation store that
//! decides which ticket transitions warrant a signal.
//!
//! No async, no I/O. The daemon crate wires these pieces to Jira and to the
//! WebSocket relay.

pub mod classify;
pub mod reconcile;
pub mod signal;
pub mod source;
pub mod ticket;

pub use classify::{classify, Category, CategoryMap, Classification, Phase};
pub use reconcile::{ReconcileStore, TransitionAction};
pub use signal::{Channel, Signal};
pub use source::TicketSource;
pub use ticket::{format_ticket_line, PriorityLevel, Ticket};
