use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// One snippet in an agent's knowledge base.
///
/// Tags take part in lexical matching exactly like words of the text;
/// the engine does not otherwise interpret them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub tags: FxHashSet<String>,
}

impl KnowledgeEntry {
    pub fn new(id: &str, text: &str, tags: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Text and tags as a single string for tokenization.
    pub fn searchable_text(&self) -> String {
        let mut tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        tags.sort_unstable();
        format!("{} {}", self.text, tags.join(" "))
    }
}
