//! Reconciliation store: remembers, per ticket id, what the poller has
//! already seen and signaled, and decides which observed transitions warrant
//! a new signal.
//!
//! Core guarantees:
//!
//! - **At-most-one active emission**: a ticket id produces `EmitActive` at
//!   most once before a corresponding `EmitResolved`.
//! - **Exactly-one resolution**: the active→resolved transition emits once;
//!   after that the id is terminal and re-observing it is a no-op.
//! - **First-cycle suppression**: tickets observed active on the first poll
//!   are recorded but never signaled, so a pre-existing backlog does not
//!   flood operators at startup.
//!
//! The store is owned by its poller and mutated from a single execution
//! context; callers that share it must wrap the whole read-decide-mutate
//! sequence in one critical section.

use std::collections::{HashMap, HashSet};

use crate::classify::Phase;

/// What the poller should do about one observed ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Nothing to signal, nothing changed.
    None,
    /// Newly active ticket; raise the active signal for its category.
    EmitActive,
    /// Tracked ticket resolved; raise the resolved signal once.
    EmitResolved,
    /// Still active but the status text drifted; tracked silently.
    UpdateSilent,
}

/// Per-ticket reconciliation state.
///
/// A ticket id is in at most one of: unseen, `active`, `seen`-only. It moves
/// `active`→`seen` exactly once, on the active→resolved transition.
#[derive(Debug, Default)]
pub struct ReconcileStore {
    /// Ids already processed to a terminal state (resolved, or signaled and
    /// awaiting resolution).
    seen: HashSet<String>,
    /// Currently open tickets, id → last stored status text.
    active: HashMap<String, String>,
    first_cycle: bool,
}

impl ReconcileStore {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
            active: HashMap::new(),
            first_cycle: true,
        }
    }

    /// Feed one classified observation through the decision table and apply
    /// its store mutation. `status` is the raw status text used for silent
    /// drift tracking.
    pub fn reconcile(&mut self, id: &str, phase: Phase, status: &str) -> TransitionAction {
        if let Some(prev_status) = self.active.get(id) {
            return match phase {
                Phase::Resolved => {
                    self.active.remove(id);
                    self.seen.insert(id.to_string());
                    TransitionAction::EmitResolved
                }
                Phase::Active if prev_status.as_str() == status => TransitionAction::None,
                Phase::Active => {
                    self.active.insert(id.to_string(), status.to_string());
                    TransitionAction::UpdateSilent
                }
                Phase::Unclassified => TransitionAction::None,
            };
        }

        // Terminal: already resolved (or signaled) earlier.
        if self.seen.contains(id) {
            return TransitionAction::None;
        }

        match phase {
            // Resolved on first sight: remember, never signal.
            Phase::Resolved => {
                self.seen.insert(id.to_string());
                TransitionAction::None
            }
            Phase::Active if self.first_cycle => {
                self.active.insert(id.to_string(), status.to_string());
                TransitionAction::None
            }
            Phase::Active => {
                self.seen.insert(id.to_string());
                self.active.insert(id.to_string(), status.to_string());
                TransitionAction::EmitActive
            }
            Phase::Unclassified => TransitionAction::None,
        }
    }

    /// Clear first-cycle suppression. Called by the poller after a cycle
    /// completes with a successful (possibly empty) fetch. Idempotent.
    pub fn complete_first_cycle(&mut self) {
        self.first_cycle = false;
    }

    pub fn is_first_cycle(&self) -> bool {
        self.first_cycle
    }

    /// Drop all remembered ids. Memory-bound safety valve for long-running
    /// processes; deliberately leaves the first-cycle flag alone.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.active.clear();
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
