use crate::ticket::Ticket;

/// Abstraction over the ticketing backend's search endpoint.
///
/// Defined here (pure, no async) as a synchronous trait; the daemon runs
/// implementations on a blocking thread. A transport or auth failure is an
/// `Err` the poller catches per cycle.
pub trait TicketSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run the configured search query and return the matching tickets in
    /// server order.
    fn search(&self, query: &str) -> Result<Vec<Ticket>, Self::Error>;
}
