/// Conversation history — append-only per-agent turn log used as prompt
/// context for later turns.
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of past turns rendered into a prompt unless the caller asks otherwise.
pub const DEFAULT_MAX_TURNS: usize = 3;

/// One recorded turn. The agent's display name is captured at append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub agent_id: String,
    pub player_input: String,
    pub response: String,
    pub agent_name: String,
}

impl HistoryTurn {
    fn render(&self) -> String {
        format!(
            "Earlier, the player said '{}', {} answered '{}'.",
            self.player_input, self.agent_name, self.response
        )
    }
}

/// Thread-safe turn log keyed by agent id.
///
/// Each turn carries a position reserved when its exchange was created, and
/// turns are kept sorted by it, so history follows creation order even when
/// exchanges finish out of order. A reserved position that is never filled
/// (a failed exchange) leaves no trace.
#[derive(Debug, Default)]
pub struct HistoryStore {
    turns: RwLock<FxHashMap<String, Vec<(u64, HistoryTurn)>>>,
    next_position: AtomicU64,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the position for a turn that will be recorded later.
    pub fn reserve(&self) -> u64 {
        self.next_position.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a turn at the next free position.
    pub fn append(&self, agent_id: &str, agent_name: &str, player_input: &str, response: &str) {
        let position = self.reserve();
        self.insert_at(position, agent_id, agent_name, player_input, response);
    }

    /// Record a turn at a position obtained from [`HistoryStore::reserve`].
    pub fn insert_at(
        &self,
        position: u64,
        agent_id: &str,
        agent_name: &str,
        player_input: &str,
        response: &str,
    ) {
        let turn = HistoryTurn {
            agent_id: agent_id.to_string(),
            player_input: player_input.to_string(),
            response: response.to_string(),
            agent_name: agent_name.to_string(),
        };
        let mut turns = self.turns.write();
        let history = turns.entry(agent_id.to_string()).or_default();
        let at = history.partition_point(|(p, _)| *p < position);
        history.insert(at, (position, turn));
    }

    pub fn len(&self, agent_id: &str) -> usize {
        self.turns.read().get(agent_id).map_or(0, Vec::len)
    }

    /// Copy of every turn recorded for the agent, oldest first.
    pub fn turns(&self, agent_id: &str) -> Vec<HistoryTurn> {
        self.turns
            .read()
            .get(agent_id)
            .map(|history| history.iter().map(|(_, turn)| turn.clone()).collect())
            .unwrap_or_default()
    }

    /// The last `max_turns` turns, oldest of the window first, one line each.
    pub fn context(&self, agent_id: &str, max_turns: usize) -> String {
        let turns = self.turns.read();
        let Some(history) = turns.get(agent_id) else {
            return String::new();
        };
        let start = history.len().saturating_sub(max_turns);
        history[start..]
            .iter()
            .map(|(_, turn)| turn.render())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
