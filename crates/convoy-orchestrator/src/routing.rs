use crate::traits::Capability;
use crate::types::{Task, TaskContext};
use async_trait::async_trait;
use convoy_core::{AgentOutput, ConvoyResult, StructuredAnswer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type FallbackFactory = Arc<dyn Fn(&str) -> Arc<dyn Capability> + Send + Sync>;

/// Which routing rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteVia {
    /// Exact capability name.
    Exact,
    /// Registered alias.
    Alias,
    /// Task tag mapped to a role.
    Tag,
    /// Keyword match on the task text.
    Keyword,
    /// Generic capability for the declared role.
    Fallback,
}

impl RouteVia {
    /// Whether the declared role had no name match and a weaker rule was used.
    pub fn is_fallback(&self) -> bool {
        matches!(self, RouteVia::Keyword | RouteVia::Fallback)
    }
}

/// A task's resolved capability.
#[derive(Clone)]
pub struct Routed {
    /// Capability that handles the task.
    pub capability: Arc<dyn Capability>,
    /// Resolved role name written back onto the task.
    pub role: String,
    /// Rule that matched.
    pub via: RouteVia,
}

impl std::fmt::Debug for Routed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routed")
            .field("capability", &self.capability.name())
            .field("role", &self.role)
            .field("via", &self.via)
            .finish()
    }
}

/// Resolves task roles to registered capabilities.
///
/// Resolution order, first match wins:
/// 1. exact capability name, then alias
/// 2. task tag mapped to a role
/// 3. keyword sets matched against the task's title and description
/// 4. a generic capability parameterised by the declared role
pub struct Router {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    aliases: HashMap<String, String>,
    tags: HashMap<String, String>,
    keywords: Vec<(String, Vec<String>)>,
    fallback: FallbackFactory,
}

impl Router {
    /// Empty router with the generic fallback.
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
            aliases: HashMap::new(),
            tags: HashMap::new(),
            keywords: Vec::new(),
            fallback: Arc::new(|role: &str| -> Arc<dyn Capability> {
                Arc::new(GenericCapability::new(role))
            }),
        }
    }

    /// Register a capability under its own name.
    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities
            .insert(normalize(capability.name()), capability);
        self
    }

    /// Route `alias` to the capability named `name`.
    pub fn alias(mut self, alias: &str, name: &str) -> Self {
        self.aliases.insert(normalize(alias), normalize(name));
        self
    }

    /// Route tasks tagged `tag` to `role`.
    pub fn tag(mut self, tag: &str, role: &str) -> Self {
        self.tags.insert(normalize(tag), normalize(role));
        self
    }

    /// Keyword sets are tried in registration order.
    pub fn keywords(mut self, role: &str, words: &[&str]) -> Self {
        self.keywords.push((
            normalize(role),
            words.iter().map(|w| normalize(w)).collect(),
        ));
        self
    }

    /// Replace the generic fallback.
    pub fn with_fallback<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn Capability> + Send + Sync + 'static,
    {
        self.fallback = Arc::new(factory);
        self
    }

    /// Look up a capability by exact name or alias.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.lookup(name).map(|(_, capability, _)| capability)
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Whether no capability is registered.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<(String, Arc<dyn Capability>, RouteVia)> {
        let key = normalize(name);
        if let Some(capability) = self.capabilities.get(&key) {
            return Some((key, capability.clone(), RouteVia::Exact));
        }
        let target = self.aliases.get(&key)?;
        self.capabilities
            .get(target)
            .map(|capability| (target.clone(), capability.clone(), RouteVia::Alias))
    }

    /// Resolve a task to a capability. Never fails.
    pub fn resolve(&self, task: &Task) -> Routed {
        if let Some((role, capability, via)) = self.lookup(&task.role) {
            return Routed {
                capability,
                role,
                via,
            };
        }

        for tag in task.tags.iter() {
            let Some(role) = self.tags.get(&normalize(tag)) else {
                continue;
            };
            if let Some((role, capability, _)) = self.lookup(role) {
                debug!(task_id = %task.id, tag = %tag, role = %role, "Routed by tag");
                return Routed {
                    capability,
                    role,
                    via: RouteVia::Tag,
                };
            }
        }

        let text = task.text().to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        for (role, keywords) in self.keywords.iter() {
            if !keywords.iter().any(|k| words.contains(&k.as_str())) {
                continue;
            }
            if let Some((role, capability, _)) = self.lookup(role) {
                debug!(task_id = %task.id, role = %role, "Routed by keyword");
                return Routed {
                    capability,
                    role,
                    via: RouteVia::Keyword,
                };
            }
        }

        let role = if task.role.trim().is_empty() {
            "generic".to_string()
        } else {
            normalize(&task.role)
        };
        Routed {
            capability: (self.fallback)(&role),
            role,
            via: RouteVia::Fallback,
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Fallback capability for roles nothing else handles.
///
/// Produces a short acknowledgement of the task so the pipeline always has
/// an answer to collect.
pub struct GenericCapability {
    role: String,
}

impl GenericCapability {
    /// Generic capability for `role`.
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl Capability for GenericCapability {
    fn name(&self) -> &str {
        &self.role
    }

    async fn dispatch(&self, task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
        let mut content = format!("[{}] {}", self.role, task.title);
        if !task.description.is_empty() {
            content.push_str(": ");
            content.push_str(&task.description);
        }
        if !ctx.objective.is_empty() {
            content.push_str(&format!(" (objective: {})", ctx.objective));
        }
        Ok(AgentOutput::Structured(StructuredAnswer {
            content: Some(content),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Capability for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn dispatch(&self, _task: &Task, _ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
            Ok(AgentOutput::RawText(self.0.to_string()))
        }
    }

    fn router() -> Router {
        Router::new()
            .register(Arc::new(Named("researcher")))
            .register(Arc::new(Named("writer")))
            .register(Arc::new(Named("coder")))
            .alias("analyst", "researcher")
            .tag("docs", "writer")
            .keywords("coder", &["implement", "refactor"])
            .keywords("writer", &["draft", "implement"])
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let routed = router().resolve(&Task::new("t1", "Writer", "Anything"));
        assert_eq!(routed.role, "writer");
        assert_eq!(routed.via, RouteVia::Exact);
    }

    #[test]
    fn test_alias_match() {
        let routed = router().resolve(&Task::new("t1", "analyst", "Look into it"));
        assert_eq!(routed.role, "researcher");
        assert_eq!(routed.via, RouteVia::Alias);
        assert!(!routed.via.is_fallback());
    }

    #[test]
    fn test_tag_beats_keyword() {
        let task = Task::new("t1", "unknown", "Implement the parser").with_tags(vec!["docs".into()]);
        let routed = router().resolve(&task);
        assert_eq!(routed.role, "writer");
        assert_eq!(routed.via, RouteVia::Tag);
    }

    #[test]
    fn test_keyword_sets_in_registration_order() {
        let routed = router().resolve(&Task::new("t1", "unknown", "Implement the parser"));
        assert_eq!(routed.role, "coder");
        assert_eq!(routed.via, RouteVia::Keyword);
        assert!(routed.via.is_fallback());
    }

    #[test]
    fn test_keyword_matches_whole_words() {
        let routed = router().resolve(&Task::new("t1", "unknown", "Drafting notes"));
        assert_eq!(routed.via, RouteVia::Fallback);
    }

    #[tokio::test]
    async fn test_generic_fallback_uses_role_name() {
        let routed = router().resolve(&Task::new("t1", "Translator", "Translate the summary"));
        assert_eq!(routed.via, RouteVia::Fallback);
        assert_eq!(routed.role, "translator");
        assert_eq!(routed.capability.name(), "translator");

        let out = routed
            .capability
            .dispatch(&Task::new("t1", "translator", "Translate"), &TaskContext::default())
            .await
            .unwrap();
        assert_eq!(out.content(), Some("[translator] Translate"));
    }

    #[test]
    fn test_get_by_name_or_alias() {
        let router = router();
        assert!(router.get("coder").is_some());
        assert!(router.get("ANALYST").is_some());
        assert!(router.get("synth").is_none());
        assert_eq!(router.len(), 3);
    }
}
