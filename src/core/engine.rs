/// The dialogue engine: exchange lifecycle, background generation, and the
/// two-axis history cursor (exchanges × reply options).
use rustc_hash::FxHashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::core::directory::{AgentDirectory, DirectoryError, TargetMap};
use crate::core::exchange::{ExchangeHandle, ExchangeOutcome, ExchangeSlot, GenerationTracker};
use crate::core::generation::{GenerationClient, GenerationConfig, TextBackend};
use crate::core::history::HistoryStore;
use crate::core::options::OptionSynthesizer;
use crate::core::prompt::PromptComposer;
use crate::core::retrieval::KnowledgeRetriever;
use crate::schema::agent::{AgentProfile, Role, Verdict};
use crate::schema::exchange::Exchange;
use crate::schema::knowledge::KnowledgeEntry;

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("cannot spawn exchange worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Feedback for a one-shot, blocking turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub agent_id: String,
    pub role: Role,
    pub verdict: Verdict,
    pub feedback: String,
}

/// Everything a background worker needs. Shared read-only except for the
/// history store, the knowledge cache, and the tracker, which lock
/// internally.
#[derive(Debug)]
struct Services {
    directory: AgentDirectory,
    retriever: KnowledgeRetriever,
    history: HistoryStore,
    client: GenerationClient,
    synthesizer: OptionSynthesizer,
    generation: GenerationConfig,
    evaluator_generation: GenerationConfig,
    tracker: Arc<GenerationTracker>,
}

impl Services {
    fn composer(&self) -> PromptComposer<'_> {
        PromptComposer::new(&self.directory, &self.retriever, &self.history)
    }

    fn config_for(&self, role: Role) -> &GenerationConfig {
        match role {
            Role::ArticleEvaluator => &self.evaluator_generation,
            Role::Field | Role::Editor => &self.generation,
        }
    }

    /// Compose, generate, derive options, and record the turn.
    ///
    /// Failed generations come back as a failed outcome and are never
    /// written to the history store. Successful turns land at the history
    /// position reserved when the exchange was created.
    fn run_exchange(&self, slot: &ExchangeSlot, target_id: &str) -> ExchangeOutcome {
        let composed = match self
            .composer()
            .compose(slot.agent_id(), target_id, slot.player_input())
        {
            Ok(composed) => composed,
            Err(e) => return ExchangeOutcome::failed(format!("[Error: {e}]")),
        };

        let response = match self
            .client
            .try_generate(&composed.prompt, self.config_for(composed.role))
        {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "exchange failed");
                return ExchangeOutcome::failed(e.sentinel());
            }
        };

        let options = self
            .synthesizer
            .synthesize(slot.agent_name(), slot.player_input(), &response);
        self.history.insert_at(
            slot.history_position(),
            slot.agent_id(),
            slot.agent_name(),
            slot.player_input(),
            &response,
        );
        info!(options = options.len(), "exchange completed");
        ExchangeOutcome::completed(response, options)
    }
}

/// Owns every cache (agents, knowledge, history) and the per-agent exchange
/// lists. Built once via [`DialogueEngine::builder`].
///
/// Exchange lists only grow, and only through `&mut self`; workers hold
/// their own slot and never touch the lists.
#[derive(Debug)]
pub struct DialogueEngine {
    services: Arc<Services>,
    exchanges: FxHashMap<String, Vec<Arc<ExchangeSlot>>>,
    current_agent: Option<String>,
    exchange_index: Option<usize>,
    option_index: usize,
}

/// Builder for constructing a `DialogueEngine`.
pub struct DialogueEngineBuilder {
    agents_path: Option<PathBuf>,
    knowledge_dir: Option<PathBuf>,
    targets_path: Option<PathBuf>,
    generation: GenerationConfig,
    evaluator_generation: GenerationConfig,
    backend: Option<Arc<dyn TextBackend>>,
    timeout: Option<Duration>,
    /// Directly provided agents (for testing without files).
    agents: Option<Vec<AgentProfile>>,
    /// Directly provided knowledge bases (for testing without files).
    knowledge: Vec<(String, Vec<KnowledgeEntry>)>,
    /// Directly provided target table (for testing without files).
    targets: Option<TargetMap>,
}

impl DialogueEngine {
    pub fn builder() -> DialogueEngineBuilder {
        DialogueEngineBuilder {
            agents_path: None,
            knowledge_dir: None,
            targets_path: None,
            generation: GenerationConfig::default(),
            evaluator_generation: GenerationConfig::evaluator(),
            backend: None,
            timeout: None,
            agents: None,
            knowledge: Vec::new(),
            targets: None,
        }
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.services.directory
    }

    pub fn history_store(&self) -> &HistoryStore {
        &self.services.history
    }

    /// Start an exchange and generate the agent's reply in the background.
    ///
    /// Blank input is ignored. The returned handle shows the exchange as
    /// generating until its worker finishes.
    pub fn start_exchange(
        &mut self,
        player_input: &str,
        agent_id: &str,
        target_id: &str,
    ) -> Result<Option<ExchangeHandle>, DialogueError> {
        let text = player_input.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let agent_id = self.services.directory.resolve(target_id, Some(agent_id))?;
        let agent_name = self.services.directory.name(&agent_id);
        let position = self.services.history.reserve();
        let slot = ExchangeSlot::new(text, &agent_id, &agent_name, position);
        let index = self.exchanges.get(&agent_id).map_or(0, Vec::len);

        let ticket = self.services.tracker.begin(&agent_id);
        let services = Arc::clone(&self.services);
        let worker_slot = Arc::clone(&slot);
        let target_id = target_id.to_string();
        std::thread::Builder::new()
            .name(format!("exchange-{agent_id}"))
            .spawn(move || {
                let span = info_span!("exchange", agent = %worker_slot.agent_id(), index);
                let _entered = span.enter();
                debug!("generation started");

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    services.run_exchange(&worker_slot, &target_id)
                }))
                .unwrap_or_else(|_| {
                    ExchangeOutcome::failed("[Error: exchange worker panicked]".to_string())
                });

                drop(ticket);
                worker_slot.complete(outcome);
            })?;

        if self.current_agent.as_deref() != Some(agent_id.as_str()) {
            self.current_agent = Some(agent_id.clone());
        }
        let list = self.exchanges.entry(agent_id).or_default();
        list.push(Arc::clone(&slot));
        self.exchange_index = Some(list.len() - 1);
        self.option_index = 0;

        Ok(Some(ExchangeHandle::new(slot)))
    }

    fn current_list(&self) -> Option<&Vec<Arc<ExchangeSlot>>> {
        self.current_agent
            .as_ref()
            .and_then(|id| self.exchanges.get(id))
    }

    fn current_slot(&self) -> Option<&Arc<ExchangeSlot>> {
        self.current_list()?.get(self.exchange_index?)
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    /// Index of the exchange under the cursor; `None` when nothing is selected.
    pub fn exchange_index(&self) -> Option<usize> {
        self.exchange_index
    }

    pub fn option_index(&self) -> usize {
        self.option_index
    }

    /// Snapshot of the exchange under the cursor.
    pub fn current_exchange(&self) -> Option<Exchange> {
        self.current_slot().map(|slot| slot.snapshot())
    }

    pub fn option_count(&self) -> usize {
        self.current_slot().map_or(0, |slot| slot.option_count())
    }

    pub fn current_option(&self) -> Option<String> {
        self.current_slot()?.option(self.option_index)
    }

    pub fn next_option(&mut self) -> bool {
        let count = self.option_count();
        if count > 0 && self.option_index + 1 < count {
            self.option_index += 1;
            true
        } else {
            false
        }
    }

    pub fn prev_option(&mut self) -> bool {
        if self.option_count() > 0 && self.option_index > 0 {
            self.option_index -= 1;
            true
        } else {
            false
        }
    }

    pub fn next_exchange(&mut self) -> bool {
        let len = self.current_list().map_or(0, Vec::len);
        let next = self.exchange_index.map_or(0, |i| i + 1);
        if next < len {
            self.exchange_index = Some(next);
            self.option_index = 0;
            true
        } else {
            false
        }
    }

    pub fn prev_exchange(&mut self) -> bool {
        match self.exchange_index {
            Some(i) if i > 0 => {
                self.exchange_index = Some(i - 1);
                self.option_index = 0;
                true
            }
            _ => false,
        }
    }

    /// True when the cursor is not on the current agent's latest exchange.
    pub fn is_viewing_past(&self) -> bool {
        match self.current_list() {
            Some(list) if !list.is_empty() => self.exchange_index.map_or(true, |i| i + 1 < list.len()),
            _ => false,
        }
    }

    /// True while any exchange is still generating.
    pub fn is_generating(&self) -> bool {
        self.services.tracker.is_generating()
    }

    pub fn is_agent_generating(&self, agent_id: &str) -> bool {
        self.services.tracker.is_agent_generating(agent_id)
    }

    /// Make `agent_id` current and jump to its latest exchange, if any.
    pub fn switch_agent(&mut self, agent_id: &str) {
        let len = self.exchanges.entry(agent_id.to_string()).or_default().len();
        self.current_agent = Some(agent_id.to_string());
        self.exchange_index = len.checked_sub(1);
        self.option_index = 0;
    }

    /// Text of the option under the cursor, or an empty string.
    pub fn select_current_option(&self) -> String {
        self.current_option().unwrap_or_default()
    }

    /// Start a new exchange with the option under the cursor.
    pub fn select_option_and_continue(
        &mut self,
        target_id: &str,
    ) -> Result<Option<ExchangeHandle>, DialogueError> {
        let option = self.select_current_option();
        self.continue_with(option, target_id)
    }

    /// Start a new exchange with option `index` of the current exchange.
    pub fn select_option(
        &mut self,
        index: usize,
        target_id: &str,
    ) -> Result<Option<ExchangeHandle>, DialogueError> {
        let option = self
            .current_slot()
            .and_then(|slot| slot.option(index))
            .unwrap_or_default();
        self.continue_with(option, target_id)
    }

    fn continue_with(
        &mut self,
        option: String,
        target_id: &str,
    ) -> Result<Option<ExchangeHandle>, DialogueError> {
        let Some(agent_id) = self.current_agent.clone() else {
            return Ok(None);
        };
        self.start_exchange(&option, &agent_id, target_id)
    }

    /// Snapshots of an agent's exchanges (the current agent by default).
    pub fn history(&self, agent_id: Option<&str>) -> Vec<Exchange> {
        agent_id
            .or(self.current_agent.as_deref())
            .and_then(|id| self.exchanges.get(id))
            .map(|list| list.iter().map(|slot| slot.snapshot()).collect())
            .unwrap_or_default()
    }

    /// Drop one agent's exchanges, or every agent's when `agent_id` is
    /// `None`, along with the matching cursor and generating state.
    ///
    /// Workers already running finish into their own handles but no longer
    /// count as generating.
    pub fn clear(&mut self, agent_id: Option<&str>) {
        match agent_id {
            Some(id) => {
                if let Some(list) = self.exchanges.get_mut(id) {
                    list.clear();
                }
                self.services.tracker.reset_agent(id);
                if self.current_agent.as_deref() == Some(id) {
                    self.exchange_index = None;
                    self.option_index = 0;
                }
            }
            None => {
                self.exchanges.clear();
                self.current_agent = None;
                self.exchange_index = None;
                self.option_index = 0;
                self.services.tracker.reset_all();
            }
        }
    }

    /// Clear the given agent's exchanges, or the current agent's.
    pub fn clear_history(&mut self, agent_id: Option<&str>) {
        if let Some(id) = agent_id.map(str::to_string).or_else(|| self.current_agent.clone()) {
            self.clear(Some(&id));
        }
    }

    /// Blocking, judged turn: the reply is classified against the agent's
    /// role contract (`Good article:` / `Good answer:` / `Try again:`).
    pub fn evaluate(
        &self,
        player_text: &str,
        target_id: &str,
        explicit_agent: Option<&str>,
    ) -> Result<Evaluation, DialogueError> {
        let services = &self.services;
        let agent_id = services.directory.resolve(target_id, explicit_agent)?;
        let role = services.directory.role(&agent_id);

        let text = player_text.trim();
        if text.is_empty() {
            return Ok(Evaluation {
                agent_id,
                role,
                verdict: Verdict::Unmarked,
                feedback: "No input provided.".to_string(),
            });
        }

        let composed = services.composer().compose(&agent_id, target_id, text)?;
        let feedback = match services
            .client
            .try_generate(&composed.prompt, services.config_for(role))
        {
            Ok(feedback) => feedback,
            Err(e) => {
                return Ok(Evaluation {
                    agent_id,
                    role,
                    verdict: Verdict::Unmarked,
                    feedback: e.sentinel(),
                })
            }
        };

        let verdict = role.classify(&feedback);
        debug!(agent = %agent_id, ?verdict, "evaluated turn");
        services
            .history
            .append(&agent_id, &composed.agent_name, text, &feedback);
        Ok(Evaluation {
            agent_id,
            role,
            verdict,
            feedback,
        })
    }

    /// Blocking in-character reply with no judgement, optionally framed by
    /// a scene description.
    pub fn character_response(
        &self,
        agent_id: &str,
        query: &str,
        scene: Option<&str>,
    ) -> Result<String, DialogueError> {
        let services = &self.services;
        let agent_id = services.directory.resolve("", Some(agent_id))?;
        let composed = services
            .composer()
            .compose_character(&agent_id, query, scene)?;
        let response = services
            .client
            .try_generate(&composed.prompt, &services.generation)
            .map(|response| {
                services
                    .history
                    .append(&agent_id, &composed.agent_name, query, &response);
                response
            })
            .unwrap_or_else(|e| e.sentinel());
        Ok(response)
    }
}

impl DialogueEngineBuilder {
    /// Agent file (RON, or JSON by extension).
    pub fn agents_file(mut self, path: &str) -> Self {
        self.agents_path = Some(PathBuf::from(path));
        self
    }

    /// Directory that agents' knowledge references are resolved against.
    pub fn knowledge_dir(mut self, path: &str) -> Self {
        self.knowledge_dir = Some(PathBuf::from(path));
        self
    }

    /// Target → agent table file.
    pub fn targets_file(mut self, path: &str) -> Self {
        self.targets_path = Some(PathBuf::from(path));
        self
    }

    pub fn generation(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    /// Sampling profile for article-evaluator turns.
    pub fn evaluator_generation(mut self, config: GenerationConfig) -> Self {
        self.evaluator_generation = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn TextBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Give up on backend calls after `timeout`, yielding a failure sentinel.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Provide agents directly (for testing without files).
    pub fn with_agents<I>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = AgentProfile>,
    {
        self.agents = Some(agents.into_iter().collect());
        self
    }

    /// Provide one agent's knowledge base directly (for testing without files).
    pub fn with_knowledge(mut self, agent_id: &str, entries: Vec<KnowledgeEntry>) -> Self {
        self.knowledge.push((agent_id.to_string(), entries));
        self
    }

    /// Provide the target table directly (for testing without files).
    pub fn with_targets(mut self, targets: TargetMap) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn build(self) -> DialogueEngine {
        for config in [&self.generation, &self.evaluator_generation] {
            for warning in config.validate() {
                warn!("{warning}");
            }
        }

        let targets = match (self.targets, &self.targets_path) {
            (Some(targets), _) => targets,
            (None, Some(path)) => load_targets(path),
            (None, None) => TargetMap::new(),
        };
        let directory = match (self.agents, &self.agents_path) {
            (Some(agents), _) => AgentDirectory::from_profiles(agents),
            (None, Some(path)) => AgentDirectory::load(path),
            (None, None) => AgentDirectory::fallback(),
        }
        .with_targets(targets);

        let retriever = KnowledgeRetriever::new(self.knowledge_dir);
        for (agent_id, entries) in self.knowledge {
            retriever.preload(&agent_id, entries);
        }

        let client = match self.backend {
            Some(backend) => GenerationClient::new(backend),
            None => GenerationClient::unavailable(),
        }
        .with_timeout(self.timeout);
        if !client.is_available() {
            warn!("no text generation backend configured, every exchange will fail");
        }
        let synthesizer = OptionSynthesizer::new(client.clone(), &self.generation);

        DialogueEngine {
            services: Arc::new(Services {
                directory,
                retriever,
                history: HistoryStore::new(),
                client,
                synthesizer,
                generation: self.generation,
                evaluator_generation: self.evaluator_generation,
                tracker: GenerationTracker::new(),
            }),
            exchanges: FxHashMap::default(),
            current_agent: None,
            exchange_index: None,
            option_index: 0,
        }
    }
}

fn load_targets(path: &Path) -> TargetMap {
    TargetMap::load(path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "cannot load target table");
        TargetMap::new()
    })
}
