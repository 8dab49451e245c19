//! The beacon daemon: polls a Jira-style ticketing backend, reconciles issue
//! state against what has already been signaled, and relays indicator
//! signals to connected WebSocket clients.

pub mod jira;
pub mod poller;
pub mod relay;
