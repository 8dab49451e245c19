//! Blocking Jira REST client implementing the `TicketSource` trait.
//!
//! Speaks the v2 search API with a personal access token. The poller runs
//! these calls on a blocking thread; nothing here is async.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use beacon_core::{Ticket, TicketSource};

/// Fields requested from the search endpoint; everything else is dead weight
/// on the wire.
const SEARCH_FIELDS: &str = "issuetype,status,priority,summary,reporter";
const MAX_RESULTS: u32 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum JiraError {
    #[error("jira request failed: {0}")]
    Transport(#[from] Box<ureq::Error>),
}

impl From<ureq::Error> for JiraError {
    fn from(e: ureq::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}

/// Jira REST client holding the base URL and bearer token.
pub struct JiraClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl JiraClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            agent: config.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Cheap connectivity and auth check against `/rest/api/2/myself`.
    /// Called once at poller startup; a failure disables the poller but not
    /// the relay.
    pub fn ping(&self) -> Result<(), JiraError> {
        let url = format!("{}/rest/api/2/myself", self.base_url);
        self.agent
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .call()?;
        Ok(())
    }
}

impl TicketSource for JiraClient {
    type Error = JiraError;

    fn search(&self, query: &str) -> Result<Vec<Ticket>, Self::Error> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let mut response = self
            .agent
            .get(&url)
            .query("jql", query)
            .query("fields", SEARCH_FIELDS)
            .query("maxResults", &MAX_RESULTS.to_string())
            .header("Authorization", format!("Bearer {}", self.token))
            .call()?;

        let body: SearchResponse = response.body_mut().read_json()?;
        Ok(body.issues.into_iter().map(Ticket::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    #[serde(default)]
    fields: Fields,
}

#[derive(Debug, Default, Deserialize)]
struct Fields {
    issuetype: Option<Named>,
    status: Option<Named>,
    priority: Option<Named>,
    summary: Option<String>,
    reporter: Option<Reporter>,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Reporter {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

impl From<Issue> for Ticket {
    fn from(issue: Issue) -> Self {
        let fields = issue.fields;
        let (type_id, type_name) = fields
            .issuetype
            .map(|t| (t.id, t.name))
            .unwrap_or_default();
        let (priority_id, priority_name) = match fields.priority {
            Some(p) => (Some(p.id), Some(p.name)),
            None => (None, None),
        };
        Ticket {
            id: issue.key,
            type_id,
            type_name,
            status: fields.status.map(|s| s.name),
            priority_id,
            priority_name,
            summary: fields.summary.unwrap_or_default(),
            author: fields.reporter.and_then(|r| r.display_name),
        }
    }
}
