//! Issue classifier: maps a raw ticket to a semantic category and lifecycle
//! phase. Pure functions over fixed vocabularies; no I/O.

use serde::{Deserialize, Serialize};

use crate::ticket::Ticket;

/// Status tokens that mark a ticket as open and needing attention.
/// Matched case-insensitively as substrings; localized and English variants.
const ACTIVE_TOKENS: &[&str] = &[
    "создан",
    "назначен",
    "исполнитель",
    "руководитель",
    "created",
    "assigned",
    "in progress",
    "в работе",
];

/// Status tokens that mark a ticket as settled. Disjoint from
/// `ACTIVE_TOKENS`; checked first so an overlap could never double-classify.
const RESOLVED_TOKENS: &[&str] = &[
    "ожидании",
    "решен",
    "закрыт",
    "отклонен",
    "отменен",
    "завершен",
    "pending",
    "resolved",
    "closed",
    "rejected",
    "declined",
    "canceled",
    "cancelled",
    "done",
    "finished",
    "completed",
];

/// Semantic ticket category, derived from the issue type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Incident,
    Alert,
    Other,
}

/// Lifecycle phase derived from the status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Active,
    Resolved,
    /// Status matched neither vocabulary (or was missing). Ignored for
    /// signaling purposes.
    Unclassified,
}

/// Issue-type-id to category mapping. The defaults are the two well-known
/// type ids the monitored Jira project uses for incidents and alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMap {
    pub incident_type_id: String,
    pub alert_type_id: String,
}

impl Default for CategoryMap {
    fn default() -> Self {
        Self {
            incident_type_id: "11206".into(),
            alert_type_id: "13802".into(),
        }
    }
}

impl CategoryMap {
    pub fn category_of(&self, type_id: &str) -> Category {
        if type_id == self.incident_type_id {
            Category::Incident
        } else if type_id == self.alert_type_id {
            Category::Alert
        } else {
            Category::Other
        }
    }
}

/// Result of classifying one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub phase: Phase,
}

/// Classify a ticket. A missing status field yields `Unclassified`, not an
/// error.
pub fn classify(ticket: &Ticket, map: &CategoryMap) -> Classification {
    Classification {
        category: map.category_of(&ticket.type_id),
        phase: phase_of(ticket.status.as_deref()),
    }
}

fn phase_of(status: Option<&str>) -> Phase {
    let Some(status) = status else {
        return Phase::Unclassified;
    };
    let status = status.to_lowercase();
    if RESOLVED_TOKENS.iter().any(|t| status.contains(t)) {
        Phase::Resolved
    } else if ACTIVE_TOKENS.iter().any(|t| status.contains(t)) {
        Phase::Active
    } else {
        Phase::Unclassified
    }
}
