use serde::{Deserialize, Serialize};

/// Lifecycle state of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeStatus {
    /// Background generation has not finished yet.
    Generating,
    /// The model answered; options were derived and the turn was recorded.
    Completed,
    /// The backend failed; the response holds the failure sentinel.
    Failed,
}

/// A point-in-time view of one exchange: the player's line, the agent's
/// answer once available, and the candidate replies offered next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub player_input: String,
    pub agent_id: String,
    pub agent_name: String,
    /// `None` until the background worker finishes.
    pub response: Option<String>,
    pub options: Vec<String>,
    pub status: ExchangeStatus,
}

impl Exchange {
    pub fn is_generating(&self) -> bool {
        self.status == ExchangeStatus::Generating
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExchangeStatus::Failed
    }
}
