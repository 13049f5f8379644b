use serde::{Deserialize, Serialize};

/// Conversational function of an agent. Governs which prompt template is
/// used and how a generated reply is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// An in-world character the player interviews.
    #[default]
    Field,
    /// The editor-in-chief reviewing a draft article.
    Editor,
    /// The historian grading a submitted article.
    ArticleEvaluator,
}

/// Outcome of judging a generated reply against its role's prefix contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Reply starts with the role's success prefix.
    Accepted,
    /// Reply starts with `Try again:`.
    TryAgain,
    /// Reply carries neither prefix.
    Unmarked,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Prefix a reply must start with when the agent asks for another attempt.
pub const TRY_AGAIN_PREFIX: &str = "Try again:";

impl Role {
    /// Configuration tag for this role (e.g. "article_evaluator").
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Editor => "editor",
            Self::ArticleEvaluator => "article_evaluator",
        }
    }

    /// Prefix that marks a reply as a success for this role.
    pub fn success_prefix(&self) -> &'static str {
        match self {
            Self::Editor => "Good article:",
            Self::Field | Self::ArticleEvaluator => "Good answer:",
        }
    }

    /// Judge generated text by its leading prefix, ignoring case.
    ///
    /// Only the start of the (trimmed) text is inspected; a success phrase
    /// appearing later in the reply does not count.
    pub fn classify(&self, text: &str) -> Verdict {
        let lowered = text.trim_start().to_lowercase();
        if lowered.starts_with(&self.success_prefix().to_lowercase()) {
            Verdict::Accepted
        } else if lowered.starts_with(&TRY_AGAIN_PREFIX.to_lowercase()) {
            Verdict::TryAgain
        } else {
            Verdict::Unmarked
        }
    }
}

/// A configured persona. Immutable once loaded.
///
/// The id is the key the profile was registered under in the agent file,
/// so it is not part of the serialized record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub personality: String,
    /// File name of the agent's knowledge base, relative to the knowledge dir.
    #[serde(default, alias = "knowledge_file")]
    pub knowledge: Option<String>,
}

impl AgentProfile {
    pub fn new(id: &str, name: &str, role: Role, personality: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role,
            personality: personality.to_string(),
            knowledge: None,
        }
    }

    pub fn with_knowledge(mut self, reference: &str) -> Self {
        self.knowledge = Some(reference.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_editor_prefix() {
        assert_eq!(
            Role::Editor.classify("Good article: publish it."),
            Verdict::Accepted
        );
        assert_eq!(
            Role::Editor.classify("GOOD ARTICLE: fine work"),
            Verdict::Accepted
        );
        // The evaluator's prefix is not the editor's
        assert_eq!(
            Role::Editor.classify("Good answer: close enough"),
            Verdict::Unmarked
        );
    }

    #[test]
    fn classify_only_checks_start() {
        assert_eq!(
            Role::ArticleEvaluator.classify("Well. Good answer: maybe"),
            Verdict::Unmarked
        );
        assert_eq!(
            Role::ArticleEvaluator.classify("  good answer: nuanced"),
            Verdict::Accepted
        );
    }

    #[test]
    fn classify_try_again() {
        let verdict = Role::Field.classify("Try again: ask the soldiers.");
        assert_eq!(verdict, Verdict::TryAgain);
        assert!(!verdict.is_accepted());
    }

    #[test]
    fn role_deserializes_from_snake_case() {
        let role: Role = ron::from_str("article_evaluator").unwrap();
        assert_eq!(role, Role::ArticleEvaluator);
        let role: Role = serde_json::from_str("\"editor\"").unwrap();
        assert_eq!(role, Role::Editor);
    }

    #[test]
    fn profile_defaults() {
        let profile: AgentProfile = serde_json::from_str(r#"{"name": "Baker"}"#).unwrap();
        assert_eq!(profile.role, Role::Field);
        assert!(profile.personality.is_empty());
        assert!(profile.knowledge.is_none());
    }

    #[test]
    fn profile_accepts_knowledge_file_alias() {
        let profile: AgentProfile = serde_json::from_str(
            r#"{"name": "Worker", "role": "field", "knowledge_file": "bastille_worker.json"}"#,
        )
        .unwrap();
        assert_eq!(profile.knowledge.as_deref(), Some("bastille_worker.json"));
    }
}
