/// Prompt composition — role-specific user prompts wrapped in the chat
/// template expected by instruct models.
use crate::core::directory::{build_system_prompt, AgentDirectory, DirectoryError};
use crate::core::history::{HistoryStore, DEFAULT_MAX_TURNS};
use crate::core::retrieval::{KnowledgeRetriever, DEFAULT_MAX_CHUNKS};
use crate::schema::agent::{AgentProfile, Role};

/// Wrap system and user content in the three-turn chat template, leaving
/// the assistant turn open for the model.
pub fn chat_prompt(system: &str, user: &str) -> String {
    format!(
        "<|im_start|>system\n{system}\n<|im_end|>\n\
         <|im_start|>user\n{user}\n<|im_end|>\n\
         <|im_start|>assistant\n"
    )
}

/// Context gathered for one turn before the template is filled in.
#[derive(Debug, Clone, Default)]
pub struct TurnContext<'a> {
    /// Rendered knowledge snippets, empty when nothing matched.
    pub knowledge: &'a str,
    /// Rendered earlier turns, empty when there are none.
    pub history: &'a str,
    /// Free-form scene description supplied by the caller.
    pub scene: Option<&'a str>,
}

/// The user prompt for `role`.
pub fn user_prompt(role: Role, target_id: &str, player_text: &str, ctx: &TurnContext<'_>) -> String {
    match role {
        Role::Field => field_prompt(target_id, player_text, ctx),
        Role::Editor => editor_prompt(player_text, ctx),
        Role::ArticleEvaluator => evaluator_prompt(player_text, ctx),
    }
}

fn context_block(parts: &[(&str, &str)], when_empty: &str) -> String {
    let blocks: Vec<String> = parts
        .iter()
        .filter(|(_, body)| !body.is_empty())
        .map(|(heading, body)| format!("{heading}\n{body}"))
        .collect();
    if blocks.is_empty() {
        when_empty.to_string()
    } else {
        blocks.join("\n\n")
    }
}

fn field_prompt(target_id: &str, player_text: &str, ctx: &TurnContext<'_>) -> String {
    let context = context_block(
        &[
            ("Relevant local facts:", ctx.knowledge),
            ("Earlier dialogue:", ctx.history),
        ],
        "No additional context.",
    );
    format!(
        "Location or interaction id: '{target_id}'.\n\
         {context}\n\n\
         The player says to you:\n\"{player_text}\"\n\n\
         Answer briefly (2–4 sentences), in character, from your limited perspective. \
         You can hint at what the player should pay attention to, but do not break character."
    )
}

fn editor_prompt(article_text: &str, ctx: &TurnContext<'_>) -> String {
    let context = context_block(
        &[
            ("Guidelines for good revolutionary journalism:", ctx.knowledge),
            ("Previous drafts and your feedback:", ctx.history),
        ],
        "No prior submissions.",
    );
    format!(
        "You are reviewing a draft article about recent events in Paris.\n\
         {context}\n\n\
         Article draft:\n\"\"\"\n{article_text}\n\"\"\"\n\n\
         Evaluate this article. Start your answer with 'Good article:' if \
         it is strong enough to publish and move to the next episode. \
         Otherwise start with 'Try again:' and specify which angles, facts or \
         voices are missing and where the journalist should investigate again."
    )
}

fn evaluator_prompt(article_text: &str, ctx: &TurnContext<'_>) -> String {
    let context = if ctx.knowledge.is_empty() {
        "No external context."
    } else {
        ctx.knowledge
    };
    format!(
        "Historical notes:\n{context}\n\n\
         Newspaper article:\n\"\"\"\n{article_text}\n\"\"\"\n\n\
         Decide whether this article correctly explains the storming of the Bastille \
         and its meaning for the beginning of the French Revolution. \
         Start with 'Good answer:' if the article integrates both the spontaneous \
         crowd action and the political/symbolic significance. Otherwise start with \
         'Try again:' and explain what aspects are missing or oversimplified."
    )
}

/// Plain in-character prompt with no judgement contract.
pub fn character_prompt(agent_name: &str, query: &str, ctx: &TurnContext<'_>) -> String {
    let context = context_block(
        &[
            ("Scene context:", ctx.scene.unwrap_or_default()),
            ("Relevant facts:", ctx.knowledge),
            ("Earlier dialogue:", ctx.history),
        ],
        "No additional context.",
    );
    format!(
        "{context}\n\n\
         The player says: \"{query}\"\n\n\
         Respond in character as {agent_name}, briefly (2–4 sentences)."
    )
}

/// A fully assembled prompt and the pieces it was built from.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub agent_id: String,
    pub agent_name: String,
    pub role: Role,
    pub system: String,
    pub user: String,
    /// `system` and `user` wrapped in the chat template.
    pub prompt: String,
}

/// Pulls knowledge and history for an agent and fills in its templates.
pub struct PromptComposer<'a> {
    directory: &'a AgentDirectory,
    retriever: &'a KnowledgeRetriever,
    history: &'a HistoryStore,
}

impl<'a> PromptComposer<'a> {
    pub fn new(
        directory: &'a AgentDirectory,
        retriever: &'a KnowledgeRetriever,
        history: &'a HistoryStore,
    ) -> Self {
        Self {
            directory,
            retriever,
            history,
        }
    }

    /// Role-specific prompt for a player turn addressed to `agent_id`.
    pub fn compose(
        &self,
        agent_id: &str,
        target_id: &str,
        player_text: &str,
    ) -> Result<ComposedPrompt, DirectoryError> {
        let profile = self.directory.profile(agent_id)?;
        let knowledge = self.retriever.context(profile, player_text, DEFAULT_MAX_CHUNKS);
        let history = match profile.role {
            Role::ArticleEvaluator => String::new(),
            Role::Field | Role::Editor => self.history.context(&profile.id, DEFAULT_MAX_TURNS),
        };
        let ctx = TurnContext {
            knowledge: &knowledge,
            history: &history,
            scene: None,
        };
        let user = user_prompt(profile.role, target_id, player_text, &ctx);
        Ok(assemble(profile, user))
    }

    /// In-character prompt with an optional scene description.
    pub fn compose_character(
        &self,
        agent_id: &str,
        query: &str,
        scene: Option<&str>,
    ) -> Result<ComposedPrompt, DirectoryError> {
        let profile = self.directory.profile(agent_id)?;
        let knowledge = self.retriever.context(profile, query, DEFAULT_MAX_CHUNKS);
        let history = self.history.context(&profile.id, DEFAULT_MAX_TURNS);
        let ctx = TurnContext {
            knowledge: &knowledge,
            history: &history,
            scene: scene.filter(|s| !s.is_empty()),
        };
        let user = character_prompt(&profile.name, query, &ctx);
        Ok(assemble(profile, user))
    }
}

fn assemble(profile: &AgentProfile, user: String) -> ComposedPrompt {
    let system = build_system_prompt(profile);
    let prompt = chat_prompt(&system, &user);
    ComposedPrompt {
        agent_id: profile.id.clone(),
        agent_name: profile.name.clone(),
        role: profile.role,
        system,
        user,
        prompt,
    }
}
