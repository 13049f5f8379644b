/// Exchange slots, completion handles, and in-flight generation tracking.
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::schema::exchange::{Exchange, ExchangeStatus};

/// Terminal fields of an exchange, written once by its worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub response: String,
    pub options: Vec<String>,
    pub status: ExchangeStatus,
}

impl ExchangeOutcome {
    pub fn completed(response: String, options: Vec<String>) -> Self {
        Self {
            response,
            options,
            status: ExchangeStatus::Completed,
        }
    }

    pub fn failed(response: String) -> Self {
        Self {
            response,
            options: Vec::new(),
            status: ExchangeStatus::Failed,
        }
    }
}

/// Shared storage for one exchange. The immutable request half is set at
/// creation; the outcome is filled exactly once.
#[derive(Debug)]
pub(crate) struct ExchangeSlot {
    player_input: String,
    agent_id: String,
    agent_name: String,
    /// Where the turn lands in the agent's history if generation succeeds.
    history_position: u64,
    outcome: Mutex<Option<ExchangeOutcome>>,
    done: Condvar,
}

impl ExchangeSlot {
    pub(crate) fn new(
        player_input: &str,
        agent_id: &str,
        agent_name: &str,
        history_position: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            player_input: player_input.to_string(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            history_position,
            outcome: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    pub(crate) fn player_input(&self) -> &str {
        &self.player_input
    }

    pub(crate) fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub(crate) fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub(crate) fn history_position(&self) -> u64 {
        self.history_position
    }

    /// Store the outcome and wake waiters. A second call is ignored and
    /// returns false.
    pub(crate) fn complete(&self, outcome: ExchangeOutcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.done.notify_all();
        true
    }

    pub(crate) fn option_count(&self) -> usize {
        self.outcome.lock().as_ref().map_or(0, |o| o.options.len())
    }

    pub(crate) fn option(&self, index: usize) -> Option<String> {
        self.outcome
            .lock()
            .as_ref()
            .and_then(|o| o.options.get(index).cloned())
    }

    pub(crate) fn snapshot(&self) -> Exchange {
        self.render(self.outcome.lock().as_ref())
    }

    fn render(&self, outcome: Option<&ExchangeOutcome>) -> Exchange {
        Exchange {
            player_input: self.player_input.clone(),
            agent_id: self.agent_id.clone(),
            agent_name: self.agent_name.clone(),
            response: outcome.map(|o| o.response.clone()),
            options: outcome.map(|o| o.options.clone()).unwrap_or_default(),
            status: outcome.map_or(ExchangeStatus::Generating, |o| o.status),
        }
    }

    fn wait(&self) -> Exchange {
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            self.done.wait(&mut outcome);
        }
        self.render(outcome.as_ref())
    }

    fn wait_until(&self, deadline: Instant) -> Option<Exchange> {
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            if self.done.wait_until(&mut outcome, deadline).timed_out() {
                break;
            }
        }
        outcome.as_ref().map(|o| self.render(Some(o)))
    }
}

/// Returned by `start_exchange`: a live view of the exchange plus a way to
/// block until its worker has finished.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    slot: Arc<ExchangeSlot>,
}

impl ExchangeHandle {
    pub(crate) fn new(slot: Arc<ExchangeSlot>) -> Self {
        Self { slot }
    }

    /// Current state without blocking.
    pub fn snapshot(&self) -> Exchange {
        self.slot.snapshot()
    }

    pub fn is_generating(&self) -> bool {
        self.slot.outcome.lock().is_none()
    }

    /// Block until the worker has written the outcome.
    pub fn wait(&self) -> Exchange {
        self.slot.wait()
    }

    /// Block for at most `timeout`; `None` if the worker is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Exchange> {
        self.slot.wait_until(Instant::now() + timeout)
    }
}

#[derive(Debug, Default)]
struct AgentInFlight {
    epoch: u64,
    count: usize,
}

/// Counts running workers per agent.
///
/// Each worker holds a [`GenerationTicket`]; dropping it decrements the
/// count. Resetting an agent starts a new epoch so tickets issued before
/// the reset no longer affect the count.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    agents: Mutex<FxHashMap<String, AgentInFlight>>,
}

impl GenerationTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(self: &Arc<Self>, agent_id: &str) -> GenerationTicket {
        let mut agents = self.agents.lock();
        let entry = agents.entry(agent_id.to_string()).or_default();
        entry.count += 1;
        GenerationTicket {
            tracker: Arc::clone(self),
            agent_id: agent_id.to_string(),
            epoch: entry.epoch,
        }
    }

    /// True while any worker is running.
    pub fn is_generating(&self) -> bool {
        self.agents.lock().values().any(|a| a.count > 0)
    }

    pub fn is_agent_generating(&self, agent_id: &str) -> bool {
        self.agents
            .lock()
            .get(agent_id)
            .is_some_and(|a| a.count > 0)
    }

    pub fn reset_agent(&self, agent_id: &str) {
        if let Some(entry) = self.agents.lock().get_mut(agent_id) {
            entry.epoch += 1;
            entry.count = 0;
        }
    }

    pub fn reset_all(&self) {
        for entry in self.agents.lock().values_mut() {
            entry.epoch += 1;
            entry.count = 0;
        }
    }

    fn finish(&self, agent_id: &str, epoch: u64) {
        if let Some(entry) = self.agents.lock().get_mut(agent_id) {
            if entry.epoch == epoch {
                entry.count = entry.count.saturating_sub(1);
            }
        }
    }
}

/// Marks one running worker; releases its count when dropped.
#[derive(Debug)]
pub struct GenerationTicket {
    tracker: Arc<GenerationTracker>,
    agent_id: String,
    epoch: u64,
}

impl Drop for GenerationTicket {
    fn drop(&mut self) {
        self.tracker.finish(&self.agent_id, self.epoch);
    }
}
