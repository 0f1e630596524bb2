//! Tool registry: which worker owns which tool name.

use crate::config::CollisionPolicy;
use relay_types::ToolDefinition;
use std::collections::BTreeMap;

/// Separator between worker and tool under [`CollisionPolicy::Namespace`].
pub const NAMESPACE_SEPARATOR: &str = "__";

/// A tool resolved to the worker that serves it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    /// Worker that owns the tool.
    pub worker: String,
    /// Name the worker knows the tool by.
    pub remote_name: String,
    /// Definition as exposed to the model (its name may be namespaced).
    pub definition: ToolDefinition,
}

/// A name claimed by more than one worker, in merge order.
#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub name: String,
    pub workers: Vec<String>,
}

/// Exposed tool name → owning worker, built from handshake tool lists.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    collisions: Vec<Collision>,
}

impl ToolRegistry {
    /// Merge per-worker tool lists, given in merge order.
    pub fn build<'a, I>(workers: I, policy: CollisionPolicy) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [ToolDefinition])>,
    {
        let mut claims: BTreeMap<String, Vec<RegisteredTool>> = BTreeMap::new();
        for (worker, tools) in workers {
            for tool in tools {
                let exposed = match policy {
                    CollisionPolicy::Namespace => {
                        format!("{worker}{NAMESPACE_SEPARATOR}{}", tool.name)
                    }
                    _ => tool.name.clone(),
                };
                let definition = ToolDefinition {
                    name: exposed.clone(),
                    ..tool.clone()
                };
                claims.entry(exposed).or_default().push(RegisteredTool {
                    worker: worker.to_string(),
                    remote_name: tool.name.clone(),
                    definition,
                });
            }
        }

        let mut registry = Self::default();
        for (name, mut owners) in claims {
            if owners.len() > 1 {
                let workers: Vec<String> = owners.iter().map(|o| o.worker.clone()).collect();
                tracing::warn!(
                    "Tool '{}' is exposed by several workers ({}); policy {:?}",
                    name,
                    workers.join(", "),
                    policy
                );
                registry.collisions.push(Collision {
                    name: name.clone(),
                    workers,
                });
            }
            let winner = match policy {
                CollisionPolicy::LastWins => owners.pop(),
                CollisionPolicy::Reject if owners.len() > 1 => None,
                _ => Some(owners.swap_remove(0)),
            };
            if let Some(winner) = winner {
                registry.tools.insert(name, winner);
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Exposed definitions, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.tools.values()
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
