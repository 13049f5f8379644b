/// Agent directory — persona lookup, target resolution, and system prompts.
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::data::{load_data_file, DataError};
use crate::schema::agent::{AgentProfile, Role};

/// Id of the built-in agent used whenever nothing better matches.
pub const DEFAULT_AGENT_ID: &str = "default_field";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("no agents available to resolve '{0}'")]
    Empty(String),
}

/// Static table mapping interaction/target ids to agent ids.
#[derive(Debug, Clone, Default)]
pub struct TargetMap {
    targets: FxHashMap<String, String>,
}

impl TargetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            targets: pairs
                .iter()
                .map(|(t, a)| (t.to_string(), a.to_string()))
                .collect(),
        }
    }

    /// Load a target table (map of target id to agent id) from RON or JSON.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let raw: BTreeMap<String, String> = load_data_file(path)?;
        Ok(Self {
            targets: raw.into_iter().collect(),
        })
    }

    pub fn get(&self, target_id: &str) -> Option<&str> {
        self.targets.get(target_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Loaded agent profiles plus the target table used to pick one.
///
/// Profiles keep their declaration order; "first agent" means the first
/// one declared in the agent file.
#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    profiles: IndexMap<String, AgentProfile>,
    targets: TargetMap,
}

impl AgentDirectory {
    /// Build a directory from already constructed profiles, in the given
    /// order. A repeated id replaces the earlier profile but keeps its place.
    pub fn from_profiles<I>(profiles: I) -> Self
    where
        I: IntoIterator<Item = AgentProfile>,
    {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            targets: TargetMap::default(),
        }
    }

    /// Load an agent file, degrading to the built-in fallback profile if the
    /// file is missing or malformed. Never fails.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(directory) => {
                debug!(path = %path.display(), agents = directory.len(), "loaded agents");
                directory
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot load agents, using minimal fallback"
                );
                Self::fallback()
            }
        }
    }

    /// Load an agent file, surfacing any read or parse error.
    pub fn try_load(path: &Path) -> Result<Self, DataError> {
        let raw: IndexMap<String, AgentProfile> = load_data_file(path)?;
        Ok(Self::from_profiles(raw.into_iter().map(|(id, mut p)| {
            p.id = id;
            p
        })))
    }

    /// A directory holding only the built-in `default_field` witness.
    pub fn fallback() -> Self {
        Self::from_profiles([fallback_profile()])
    }

    pub fn with_targets(mut self, targets: TargetMap) -> Self {
        self.targets = targets;
        self
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.profiles.contains_key(agent_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Decide which agent handles an interaction.
    ///
    /// An explicit agent wins when it is known; otherwise the target table
    /// is consulted, then `default_field`, then the first agent.
    pub fn resolve(
        &self,
        target_id: &str,
        explicit_agent: Option<&str>,
    ) -> Result<String, DirectoryError> {
        if let Some(agent_id) = explicit_agent.filter(|id| !id.is_empty()) {
            if self.contains(agent_id) {
                return Ok(agent_id.to_string());
            }
        }

        if let Some(agent_id) = self.targets.get(target_id) {
            if self.contains(agent_id) {
                return Ok(agent_id.to_string());
            }
        }

        if self.contains(DEFAULT_AGENT_ID) {
            return Ok(DEFAULT_AGENT_ID.to_string());
        }

        self.profiles
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| DirectoryError::Empty(target_id.to_string()))
    }

    /// Profile for `agent_id`, falling back to `default_field` and then to
    /// the first agent.
    pub fn profile(&self, agent_id: &str) -> Result<&AgentProfile, DirectoryError> {
        self.profiles
            .get(agent_id)
            .or_else(|| self.profiles.get(DEFAULT_AGENT_ID))
            .or_else(|| self.profiles.values().next())
            .ok_or_else(|| DirectoryError::Empty(agent_id.to_string()))
    }

    /// Display name, or the id itself when the directory is empty.
    pub fn name(&self, agent_id: &str) -> String {
        self.profile(agent_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|_| agent_id.to_string())
    }

    pub fn role(&self, agent_id: &str) -> Role {
        self.profile(agent_id).map(|p| p.role).unwrap_or_default()
    }

    /// Personality text followed by the role's fixed instructions.
    pub fn system_prompt(&self, agent_id: &str) -> Result<String, DirectoryError> {
        let profile = self.profile(agent_id)?;
        Ok(build_system_prompt(profile))
    }
}

/// Personality plus the role instructions for one profile.
pub fn build_system_prompt(profile: &AgentProfile) -> String {
    let personality = &profile.personality;
    match profile.role {
        Role::Field => format!(
            "{personality}\n\
             You are a historical character in Paris in July 1789. \
             You speak briefly, in character, based on your own experience."
        ),
        Role::Editor => format!(
            "{personality}\n\
             You are the demanding editor-in-chief of a small political newspaper. \
             You evaluate the journalist's article. Start with 'Good article:' if it \
             is strong enough to publish and move to the next episode, otherwise start \
             with 'Try again:' and give precise hints about missing viewpoints or facts."
        ),
        Role::ArticleEvaluator => format!(
            "{personality}\n\
             You are a rigorous historian of the French Revolution. You evaluate whether \
             a newspaper article correctly explains the storming of the Bastille and its \
             significance. Start with 'Good answer:' if the understanding is nuanced, \
             otherwise start with 'Try again:' and explain what is missing."
        ),
    }
}

fn fallback_profile() -> AgentProfile {
    AgentProfile::new(
        DEFAULT_AGENT_ID,
        "Parisian Witness",
        Role::Field,
        "You are an anonymous Parisian witness in July 1789. \
         You answer briefly about what you see around you.",
    )
    .with_knowledge("default_field.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_directory() -> AgentDirectory {
        AgentDirectory::from_profiles([
            AgentProfile::new("bastille_worker", "Jacques", Role::Field, "A mason."),
            AgentProfile::new("editor_in_chief", "Madame Roland", Role::Editor, "Strict."),
            AgentProfile::new(
                "article_evaluator",
                "Historian",
                Role::ArticleEvaluator,
                "Careful.",
            ),
            AgentProfile::new(DEFAULT_AGENT_ID, "Witness", Role::Field, "Anonymous."),
        ])
        .with_targets(TargetMap::from_pairs(&[
            ("bastille_worker", "bastille_worker"),
            ("editor_office", "editor_in_chief"),
            ("palais_orator", "palais_orator"),
        ]))
    }

    #[test]
    fn explicit_agent_wins() {
        let dir = make_directory();
        for id in ["bastille_worker", "editor_in_chief", "article_evaluator"] {
            assert_eq!(dir.resolve("editor_office", Some(id)).unwrap(), id);
        }
    }

    #[test]
    fn unknown_explicit_agent_falls_through_to_target() {
        let dir = make_directory();
        assert_eq!(
            dir.resolve("editor_office", Some("nobody")).unwrap(),
            "editor_in_chief"
        );
    }

    #[test]
    fn mapped_target_missing_from_directory_uses_default() {
        let dir = make_directory();
        assert_eq!(dir.resolve("palais_orator", None).unwrap(), DEFAULT_AGENT_ID);
        assert_eq!(dir.resolve("unmapped", None).unwrap(), DEFAULT_AGENT_ID);
    }

    #[test]
    fn first_agent_when_no_default() {
        let dir = AgentDirectory::from_profiles([
            AgentProfile::new("zola", "Zola", Role::Field, ""),
            AgentProfile::new("marat", "Marat", Role::Editor, ""),
        ]);
        // Declaration order, not id order
        assert_eq!(dir.resolve("anything", None).unwrap(), "zola");
        assert_eq!(dir.profile("missing").unwrap().id, "zola");
        assert_eq!(dir.ids().collect::<Vec<_>>(), vec!["zola", "marat"]);
    }

    #[test]
    fn empty_directory_is_the_only_error() {
        let dir = AgentDirectory::default();
        assert!(matches!(
            dir.resolve("bastille_worker", None),
            Err(DirectoryError::Empty(_))
        ));
        assert!(dir.profile("x").is_err());
        assert_eq!(dir.name("x"), "x");
    }

    #[test]
    fn profile_falls_back_to_default_field() {
        let dir = make_directory();
        assert_eq!(dir.profile("ghost").unwrap().id, DEFAULT_AGENT_ID);
        assert_eq!(dir.name("ghost"), "Witness");
        assert_eq!(dir.role("editor_in_chief"), Role::Editor);
    }

    #[test]
    fn system_prompt_embeds_role_contract() {
        let dir = make_directory();
        let editor = dir.system_prompt("editor_in_chief").unwrap();
        assert!(editor.starts_with("Strict.\n"));
        assert!(editor.contains("Start with 'Good article:'"));
        assert!(editor.contains("'Try again:'"));

        let evaluator = dir.system_prompt("article_evaluator").unwrap();
        assert!(evaluator.contains("Start with 'Good answer:'"));

        let field = dir.system_prompt("bastille_worker").unwrap();
        assert!(field.contains("historical character in Paris"));
    }

    #[test]
    fn missing_file_degrades_to_fallback() {
        let dir = AgentDirectory::load(Path::new("tests/fixtures/no_such_agents.ron"));
        assert_eq!(dir.len(), 1);
        let profile = dir.profile(DEFAULT_AGENT_ID).unwrap();
        assert_eq!(profile.name, "Parisian Witness");
        assert_eq!(profile.role, Role::Field);
    }

    #[test]
    fn load_fixture_agents() {
        let dir = AgentDirectory::load(Path::new("tests/fixtures/agents.ron"));
        assert!(dir.contains("bastille_worker"));
        assert!(dir.contains("editor_in_chief"));
        assert_eq!(dir.profile("bastille_worker").unwrap().id, "bastille_worker");
        assert_eq!(dir.role("article_evaluator"), Role::ArticleEvaluator);
    }

    #[test]
    fn fixture_agents_keep_file_order() {
        let dir = AgentDirectory::load(Path::new("tests/fixtures/agents.ron"));
        assert_eq!(
            dir.ids().collect::<Vec<_>>(),
            vec![
                "bastille_worker",
                "bastille_soldier",
                "editor_in_chief",
                "article_evaluator"
            ]
        );
        // No default_field in the file, so the first declared agent answers
        assert_eq!(dir.resolve("unmapped", None).unwrap(), "bastille_worker");
    }

    #[test]
    fn load_fixture_targets() {
        let targets = TargetMap::load(Path::new("tests/fixtures/targets.ron")).unwrap();
        assert_eq!(targets.get("editor_office"), Some("editor_in_chief"));
        assert_eq!(targets.get("article_submission"), Some("article_evaluator"));
        assert!(targets.get("nowhere").is_none());
    }
}
