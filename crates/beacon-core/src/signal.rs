//! The closed signal vocabulary sent to indicator clients, and the channel
//! (with its durability policy) each signal belongs to.
//!
//! On the wire a signal is a single case-sensitive UTF-8 text frame; in
//! process it is always this enum so dispatch is exhaustive.

use serde::{Deserialize, Serialize};

use crate::classify::Category;

/// A named indicator line. Each channel has its own durability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Incident,
    Alert,
    Queue,
}

/// One signal instance from the closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    RedBlink,
    YellowBlink,
    GreenBlinkIncident,
    GreenBlinkAlert,
    GreenBlink,
    QueueRed,
    QueueGreen,
}

impl Signal {
    /// Wire token for this signal.
    pub fn token(&self) -> &'static str {
        match self {
            Self::RedBlink => "RED_BLINK",
            Self::YellowBlink => "YELLOW_BLINK",
            Self::GreenBlinkIncident => "GREEN_BLINK_INCIDENT",
            Self::GreenBlinkAlert => "GREEN_BLINK_ALERT",
            Self::GreenBlink => "GREEN_BLINK",
            Self::QueueRed => "QUEUE_RED",
            Self::QueueGreen => "QUEUE_GREEN",
        }
    }

    /// Parse a wire token. Anything outside the closed vocabulary is `None`;
    /// consumers treat that as a no-op.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "RED_BLINK" => Some(Self::RedBlink),
            "YELLOW_BLINK" => Some(Self::YellowBlink),
            "GREEN_BLINK_INCIDENT" => Some(Self::GreenBlinkIncident),
            "GREEN_BLINK_ALERT" => Some(Self::GreenBlinkAlert),
            "GREEN_BLINK" => Some(Self::GreenBlink),
            "QUEUE_RED" => Some(Self::QueueRed),
            "QUEUE_GREEN" => Some(Self::QueueGreen),
            _ => None,
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::RedBlink | Self::GreenBlinkIncident | Self::GreenBlink => Channel::Incident,
            Self::YellowBlink | Self::GreenBlinkAlert => Channel::Alert,
            Self::QueueRed | Self::QueueGreen => Channel::Queue,
        }
    }

    /// Whether the relay retains this signal for replay to late-joining
    /// clients. Only the queue channel is durable; incident and alert
    /// signals are extinguished by client-side timers and replaying them
    /// would leave a stale blinking indicator.
    pub fn is_durable(&self) -> bool {
        self.channel() == Channel::Queue
    }

    /// Signal for a ticket entering an active phase.
    pub fn for_active(category: Category) -> Self {
        match category {
            Category::Incident => Self::RedBlink,
            Category::Alert => Self::YellowBlink,
            // Unknown type still signals, on the incident indicator.
            Category::Other => Self::RedBlink,
        }
    }

    /// Signal for a ticket transitioning into a resolved phase.
    pub fn for_resolved(category: Category) -> Self {
        match category {
            Category::Incident => Self::GreenBlinkIncident,
            Category::Alert => Self::GreenBlinkAlert,
            Category::Other => Self::GreenBlink,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}
