/// Reply option synthesis — asks the model for a few short player replies
/// and parses them, with a fixed fallback set.
use tracing::debug;

use crate::core::generation::{GenerationClient, GenerationConfig};
use crate::core::prompt::chat_prompt;

/// Most options ever offered for one exchange.
pub const MAX_OPTIONS: usize = 4;
/// Fewer parsed options than this triggers the fallback set.
pub const MIN_OPTIONS: usize = 2;
/// Token budget for option generation.
pub const OPTION_MAX_TOKENS: u32 = 100;

const FALLBACK_OPTIONS: [&str; 3] = [
    "Tell me more about that.",
    "What do you mean exactly?",
    "I understand. What's next?",
];

const OPTION_SYSTEM_PROMPT: &str = "You are a dialogue option generator for a visual novel. \
     Generate 3 realistic and distinct response options that the player could say next. \
     Each option should be 1 short sentence (5-10 words). \
     Make options diverse: one could be inquisitive, one confrontational or curious, \
     and one could be friendly or neutral. \
     Format: Option 1: [text]\nOption 2: [text]\nOption 3: [text]";

/// The replies used when the model gives fewer than two usable options.
pub fn fallback_options() -> Vec<String> {
    FALLBACK_OPTIONS.iter().map(|s| s.to_string()).collect()
}

/// Full chat prompt asking for three reply options.
pub fn options_prompt(agent_name: &str, player_input: &str, agent_response: &str) -> String {
    let user = format!(
        "Previous context:\nPlayer asked: \"{player_input}\"\n\
         {agent_name} responded: \"{agent_response}\"\n\n\
         Generate 3 distinct response options the player could choose from."
    );
    chat_prompt(OPTION_SYSTEM_PROMPT, &user)
}

/// Extract option texts from model output.
///
/// Each line that contains a `:` and has non-blank text after the first one
/// contributes that text, trimmed. Order is kept and duplicates are not
/// removed.
pub fn parse_options(output: &str) -> Vec<String> {
    output
        .trim()
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
        .collect()
}

/// Generates the candidate replies offered after an agent answers.
#[derive(Debug, Clone)]
pub struct OptionSynthesizer {
    client: GenerationClient,
    config: GenerationConfig,
}

impl OptionSynthesizer {
    /// `base` is the agent-response profile; only its token budget is lowered.
    pub fn new(client: GenerationClient, base: &GenerationConfig) -> Self {
        Self {
            client,
            config: base.clone().with_max_tokens(OPTION_MAX_TOKENS),
        }
    }

    /// Two to four reply options for the exchange.
    pub fn synthesize(&self, agent_name: &str, player_input: &str, agent_response: &str) -> Vec<String> {
        let prompt = options_prompt(agent_name, player_input, agent_response);
        let parsed = self
            .client
            .try_generate(&prompt, &self.config)
            .map(|output| parse_options(&output))
            .unwrap_or_default();

        let mut options = if parsed.len() < MIN_OPTIONS {
            debug!(parsed = parsed.len(), "too few options parsed, using fallback");
            fallback_options()
        } else {
            parsed
        };
        options.truncate(MAX_OPTIONS);
        options
    }
}
