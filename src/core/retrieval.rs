/// Lexical knowledge retrieval — per-agent knowledge bases ranked by
/// keyword overlap with the player's text.
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::data::load_data_file;
use crate::schema::agent::AgentProfile;
use crate::schema::knowledge::KnowledgeEntry;

/// Number of snippets injected into a prompt unless the caller asks otherwise.
pub const DEFAULT_MAX_CHUNKS: usize = 3;

/// Words ignored during matching (English and French function words).
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "in", "on", "to", "le", "la", "les", "un", "une", "des",
    "et", "de", "du", "en", "au", "aux",
];

/// Characters that belong to a word besides ASCII letters.
const EXTRA_WORD_CHARS: &[char] = &['é', 'è', 'ê', 'à', 'ù', 'ï', 'û', 'ç', '\'', '-'];

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphabetic() || EXTRA_WORD_CHARS.contains(&c)
}

/// Lowercase `text`, split it into word runs, and drop stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !is_word_char(c))
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

fn token_set(text: &str) -> FxHashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Number of distinct query tokens found in the entry's text or tags.
pub fn score(query: &str, entry: &KnowledgeEntry) -> usize {
    score_tokens(&token_set(query), entry)
}

fn score_tokens(query_tokens: &FxHashSet<String>, entry: &KnowledgeEntry) -> usize {
    let entry_tokens = token_set(&entry.searchable_text());
    query_tokens.intersection(&entry_tokens).count()
}

/// Rank `entries` against `query` and return at most `max_chunks` matches,
/// best first. Equal scores keep knowledge-base order.
pub fn rank<'a>(
    entries: &'a [KnowledgeEntry],
    query: &str,
    max_chunks: usize,
) -> Vec<(usize, &'a KnowledgeEntry)> {
    let query_tokens = token_set(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &KnowledgeEntry)> = entries
        .iter()
        .map(|entry| (score_tokens(&query_tokens, entry), entry))
        .filter(|(score, _)| *score > 0)
        .collect();

    // sort_by is stable, which keeps ties in their original order
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(max_chunks);
    scored
}

/// Per-agent knowledge bases, loaded on first use and kept for the
/// lifetime of the retriever.
#[derive(Debug, Default)]
pub struct KnowledgeRetriever {
    knowledge_dir: Option<PathBuf>,
    bases: RwLock<FxHashMap<String, Arc<Vec<KnowledgeEntry>>>>,
}

impl KnowledgeRetriever {
    pub fn new(knowledge_dir: Option<PathBuf>) -> Self {
        Self {
            knowledge_dir,
            bases: RwLock::new(FxHashMap::default()),
        }
    }

    /// Install a knowledge base directly, bypassing file loading.
    pub fn preload(&self, agent_id: &str, entries: Vec<KnowledgeEntry>) {
        self.bases
            .write()
            .insert(agent_id.to_string(), Arc::new(entries));
    }

    /// The agent's knowledge base, loading it on first request.
    ///
    /// A missing reference or unreadable file yields an empty base, which
    /// is cached like any other.
    pub fn knowledge_base(&self, profile: &AgentProfile) -> Arc<Vec<KnowledgeEntry>> {
        if let Some(base) = self.bases.read().get(&profile.id) {
            return Arc::clone(base);
        }

        let mut bases = self.bases.write();
        // Another worker may have loaded it while we waited for the lock
        if let Some(base) = bases.get(&profile.id) {
            return Arc::clone(base);
        }
        let base = Arc::new(self.load_base(profile));
        bases.insert(profile.id.clone(), Arc::clone(&base));
        base
    }

    fn load_base(&self, profile: &AgentProfile) -> Vec<KnowledgeEntry> {
        let (Some(dir), Some(reference)) = (&self.knowledge_dir, &profile.knowledge) else {
            return Vec::new();
        };
        let path = dir.join(reference);
        match load_data_file::<Vec<KnowledgeEntry>>(&path) {
            Ok(entries) => {
                debug!(agent = %profile.id, entries = entries.len(), "loaded knowledge base");
                entries
            }
            Err(e) => {
                warn!(
                    agent = %profile.id,
                    path = %path.display(),
                    error = %e,
                    "cannot load knowledge base"
                );
                Vec::new()
            }
        }
    }

    /// Bullet list of the best matching snippets, blank-line separated.
    /// Empty when nothing in the agent's base shares a word with `query`.
    pub fn context(&self, profile: &AgentProfile, query: &str, max_chunks: usize) -> String {
        let base = self.knowledge_base(profile);
        rank(&base, query, max_chunks)
            .into_iter()
            .map(|(_, entry)| format!("- {}", entry.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::agent::Role;

    fn worker() -> AgentProfile {
        AgentProfile::new("bastille_worker", "Jacques", Role::Field, "")
    }

    fn make_base() -> Vec<KnowledgeEntry> {
        vec![
            KnowledgeEntry::new(
                "crowd",
                "The crowd has been gathering since dawn.",
                &["bastille", "crowd"],
            ),
            KnowledgeEntry::new(
                "cannon",
                "Cannons point down from the towers at the crowd.",
                &["bastille", "soldiers"],
            ),
            KnowledgeEntry::new("bread", "Bread prices doubled this week.", &["faubourg"]),
        ]
    }

    #[test]
    fn tokenize_lowercases_and_drops_stopwords() {
        assert_eq!(
            tokenize("The Storming of the Bastille"),
            vec!["storming", "bastille"]
        );
    }

    #[test]
    fn tokenize_keeps_accents_hyphens_apostrophes() {
        assert_eq!(
            tokenize("Le peuple s'élève, arc-en-ciel!"),
            vec!["peuple", "s'élève", "arc-en-ciel"]
        );
    }

    #[test]
    fn tokenize_splits_on_digits_and_unlisted_letters() {
        assert_eq!(tokenize("July 14, 1789"), vec!["july"]);
        // 'ô' is not a word character
        assert_eq!(tokenize("hôtel"), vec!["h", "tel"]);
    }

    #[test]
    fn score_counts_distinct_shared_tokens() {
        let base = make_base();
        assert_eq!(score("crowd crowd crowd", &base[0]), 1);
        assert_eq!(score("Is the bastille crowd angry?", &base[0]), 2);
        assert_eq!(score("bread", &base[0]), 0);
    }

    #[test]
    fn tags_count_toward_score() {
        let base = make_base();
        assert_eq!(score("faubourg", &base[2]), 1);
    }

    #[test]
    fn rank_ties_keep_base_order() {
        let base = make_base();
        let ranked = rank(&base, "crowd", 3);
        let ids: Vec<&str> = ranked.iter().map(|(_, e)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["crowd", "cannon"]);
    }

    #[test]
    fn rank_orders_by_score() {
        let base = make_base();
        let ranked = rank(&base, "soldiers crowd bastille", 3);
        assert_eq!(ranked[0].1.id, "cannon");
        assert_eq!(ranked[0].0, 3);
        assert_eq!(ranked[1].1.id, "crowd");
    }

    #[test]
    fn rank_respects_max_chunks() {
        let base = make_base();
        assert_eq!(rank(&base, "crowd", 1).len(), 1);
    }

    #[test]
    fn context_renders_bullets() {
        let retriever = KnowledgeRetriever::default();
        retriever.preload("bastille_worker", make_base());
        let ctx = retriever.context(&worker(), "What about the crowd?", DEFAULT_MAX_CHUNKS);
        assert_eq!(
            ctx,
            "- The crowd has been gathering since dawn.\n\n\
             - Cannons point down from the towers at the crowd."
        );
    }

    #[test]
    fn context_empty_without_overlap() {
        let retriever = KnowledgeRetriever::default();
        retriever.preload("bastille_worker", make_base());
        assert_eq!(retriever.context(&worker(), "weather tomorrow", 3), "");
        // Only stopwords in the query
        assert_eq!(retriever.context(&worker(), "the and of", 3), "");
    }

    #[test]
    fn context_is_deterministic() {
        let retriever = KnowledgeRetriever::default();
        retriever.preload("bastille_worker", make_base());
        let first = retriever.context(&worker(), "bastille crowd soldiers", 3);
        for _ in 0..5 {
            assert_eq!(retriever.context(&worker(), "bastille crowd soldiers", 3), first);
        }
    }

    #[test]
    fn missing_knowledge_file_yields_empty_base() {
        let retriever = KnowledgeRetriever::new(Some(PathBuf::from("tests/fixtures/rag")));
        let profile = worker().with_knowledge("missing.ron");
        assert!(retriever.knowledge_base(&profile).is_empty());
        assert_eq!(retriever.context(&profile, "crowd", 3), "");
    }

    #[test]
    fn loads_json_knowledge_fixture() {
        let retriever = KnowledgeRetriever::new(Some(PathBuf::from("tests/fixtures/rag")));
        let profile = worker().with_knowledge("bastille_worker.json");
        let base = retriever.knowledge_base(&profile);
        assert!(!base.is_empty());
        // Cached: the same allocation comes back
        assert!(Arc::ptr_eq(&base, &retriever.knowledge_base(&profile)));
    }
}
