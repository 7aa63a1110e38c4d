//! Actor context for policy evaluation and audit.

use serde::{Deserialize, Serialize};

/// Identity and access context of the caller.
///
/// Constructed by the authentication layer (out of scope here) and passed
/// into every mediated operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Stable actor identifier (player id, staff id, service account).
    pub actor_id: String,
    /// Role name matched against policy rules (lowercase by convention).
    pub role: String,
    /// Team codes the actor may see under `team_scoped` rules.
    pub team_access: Vec<String>,
}

impl ActorContext {
    /// Create an actor context.
    pub fn new(actor_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            role: role.into(),
            team_access: Vec::new(),
        }
    }

    /// Attach team access.
    pub fn with_teams(mut self, teams: Vec<String>) -> Self {
        self.team_access = teams;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let actor = ActorContext::new("u-42", "scout").with_teams(vec!["MTL".into()]);
        assert_eq!(actor.role, "scout");
        assert_eq!(actor.team_access, vec!["MTL".to_string()]);
    }
}
