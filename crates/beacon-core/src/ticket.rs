use serde::{Deserialize, Serialize};

/// One ticket record as returned by the external search query.
///
/// Ephemeral: a fresh set is fetched every poll cycle and only the id and
/// status text survive into the reconciliation store. Fields the ticketing
/// system may omit are modeled as `Option` so a partial record degrades to
/// defaults instead of failing the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Stable unique ticket key, e.g. `OPS-1234`.
    pub id: String,
    /// Issue type identifier used for category mapping.
    #[serde(default)]
    pub type_id: String,
    /// Human-readable issue type name, for logs only.
    #[serde(default)]
    pub type_name: String,
    /// Raw status text. `None` when the record carried no status field.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority_id: Option<String>,
    #[serde(default)]
    pub priority_name: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// Coarse priority bucket derived from the ticket's priority name or id.
/// Only used to make log lines scannable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl PriorityLevel {
    /// Derive the bucket from name keywords (English and Russian), falling
    /// back to the numeric priority id (1-2 high, 3 medium, 4+ low).
    /// Defaults to `Medium` when neither field is usable.
    pub fn from_ticket(ticket: &Ticket) -> Self {
        if let Some(name) = &ticket.priority_name {
            let name = name.to_lowercase();
            if name.contains("критич") || name.contains("critical") {
                return Self::Critical;
            }
            if name.contains("высок") || name.contains("high") {
                return Self::High;
            }
            if name.contains("средн") || name.contains("medium") {
                return Self::Medium;
            }
            if name.contains("низк") || name.contains("low") {
                return Self::Low;
            }
        }

        if let Some(id) = ticket.priority_id.as_deref().and_then(|s| s.parse::<u32>().ok()) {
            return match id {
                0..=2 => Self::High,
                3 => Self::Medium,
                _ => Self::Low,
            };
        }

        Self::Medium
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Format a one-line human summary of a ticket for the daemon log.
pub fn format_ticket_line(ticket: &Ticket) -> String {
    let mut line = format!("{}: {}", ticket.id, ticket.summary);
    line.push_str(&format!(
        " | priority: {}",
        PriorityLevel::from_ticket(ticket).as_str()
    ));
    if let Some(status) = &ticket.status {
        line.push_str(&format!(" | status: {status}"));
    }
    if let Some(author) = &ticket.author {
        line.push_str(&format!(" | author: {author}"));
    }
    line
}
