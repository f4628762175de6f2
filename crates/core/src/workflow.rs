//! Workflow aggregate and DAG definition
//!
//! A workflow owns an immutable-per-version `WorkflowDefinition`: a map of
//! typed nodes, an edge list, and an entrypoint. Definitions are validated
//! on create/update and again before every run; the graph must be acyclic
//! over the union of the edge list, `next` lists and condition branches.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, Result};
use crate::ids::{TenantId, WorkflowId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Monotonically increasing; bumped on every definition change.
    pub version: i32,
    pub definition: WorkflowDefinition,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> Result<Self> {
        definition.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: WorkflowId::new(),
            tenant_id,
            name: name.into(),
            version: 1,
            definition,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the definition, bumping the version.
    pub fn update_definition(&mut self, definition: WorkflowDefinition) -> Result<()> {
        definition.validate()?;
        self.definition = definition;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Soft delete: runs referencing this workflow stay readable.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionMetadata {
    pub name: String,
    pub version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub metadata: DefinitionMetadata,
    /// Keyed by node key; `nodes[key].id == key` is a validated invariant.
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub entrypoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub next: Vec<String>,
}

/// Node type tag, used on step records and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "AI_COMPLETION")]
    AiCompletion,
    #[serde(rename = "HTTP_REQUEST")]
    HttpRequest,
    #[serde(rename = "CONDITION")]
    Condition,
    #[serde(rename = "TRANSFORM")]
    Transform,
    #[serde(rename = "DELAY")]
    Delay,
    #[serde(rename = "WEBHOOK")]
    Webhook,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiCompletion => "AI_COMPLETION",
            Self::HttpRequest => "HTTP_REQUEST",
            Self::Condition => "CONDITION",
            Self::Transform => "TRANSFORM",
            Self::Delay => "DELAY",
            Self::Webhook => "WEBHOOK",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "AI_COMPLETION" => Ok(Self::AiCompletion),
            "HTTP_REQUEST" => Ok(Self::HttpRequest),
            "CONDITION" => Ok(Self::Condition),
            "TRANSFORM" => Ok(Self::Transform),
            "DELAY" => Ok(Self::Delay),
            "WEBHOOK" => Ok(Self::Webhook),
            other => Err(DomainError::validation(format!(
                "unknown node type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed node configuration, tagged on the wire as `type` + `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum NodeKind {
    #[serde(rename = "AI_COMPLETION")]
    AiCompletion(AiCompletionConfig),
    #[serde(rename = "HTTP_REQUEST")]
    HttpRequest(HttpRequestConfig),
    #[serde(rename = "CONDITION")]
    Condition(ConditionConfig),
    #[serde(rename = "TRANSFORM")]
    Transform(TransformConfig),
    #[serde(rename = "DELAY")]
    Delay(DelayConfig),
    #[serde(rename = "WEBHOOK")]
    Webhook(WebhookConfig),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::AiCompletion(_) => NodeType::AiCompletion,
            Self::HttpRequest(_) => NodeType::HttpRequest,
            Self::Condition(_) => NodeType::Condition,
            Self::Transform(_) => NodeType::Transform,
            Self::Delay(_) => NodeType::Delay,
            Self::Webhook(_) => NodeType::Webhook,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCompletionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub user_prompt_template: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    /// Templated; interpolated against the step context.
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Templated JSON body; string leaves are interpolated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// String leaves are interpolated; everything else passes through.
    pub template: serde_json::Map<String, Value>,
}

/// Suspension is realized by re-enqueuing with a delay; a worker thread is
/// never held for the duration.
pub const MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    pub delay_ms: u64,
}

impl DelayConfig {
    /// Delays at or beyond the cap are clamped, not rejected.
    pub fn clamped_ms(&self) -> u64 {
        self.delay_ms.min(MAX_DELAY_MS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Templated; interpolated against the step context.
    pub webhook_url: String,
}

impl WorkflowDefinition {
    /// Check every structural invariant, collecting all offending field
    /// paths rather than stopping at the first.
    pub fn validate(&self) -> Result<()> {
        let mut fields = Vec::new();

        if !self.nodes.contains_key(&self.entrypoint) {
            fields.push("definition.entrypoint".to_string());
        }

        for (key, node) in &self.nodes {
            if node.id != *key {
                fields.push(format!("definition.nodes.{key}.id"));
            }
            for (i, next) in node.next.iter().enumerate() {
                if !self.nodes.contains_key(next) {
                    fields.push(format!("definition.nodes.{key}.next[{i}]"));
                }
            }
            if let NodeKind::Condition(cond) = &node.kind {
                if let Some(branch) = &cond.true_branch {
                    if !self.nodes.contains_key(branch) {
                        fields.push(format!("definition.nodes.{key}.config.trueBranch"));
                    }
                }
                if let Some(branch) = &cond.false_branch {
                    if !self.nodes.contains_key(branch) {
                        fields.push(format!("definition.nodes.{key}.config.falseBranch"));
                    }
                }
            }
        }

        for (i, edge) in self.edges.iter().enumerate() {
            if !self.nodes.contains_key(&edge.from) {
                fields.push(format!("definition.edges[{i}].from"));
            }
            if !self.nodes.contains_key(&edge.to) {
                fields.push(format!("definition.edges[{i}].to"));
            }
        }

        // Cycle detection only makes sense once every reference resolves.
        if fields.is_empty() && self.has_cycle() {
            fields.push("definition.edges".to_string());
            return Err(DomainError::validation_fields(
                "workflow definition contains a cycle",
                fields,
            ));
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation_fields(
                "invalid workflow definition",
                fields,
            ))
        }
    }

    /// Successor map over the union of the edge list, `next` lists and
    /// condition branches. Traversal follows `next`/branches; the edge list
    /// is the client's declared topology. Both must agree on acyclicity.
    fn successors(&self) -> HashMap<&str, HashSet<&str>> {
        let mut succ: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (key, node) in &self.nodes {
            let entry = succ.entry(key.as_str()).or_default();
            for next in &node.next {
                entry.insert(next.as_str());
            }
            if let NodeKind::Condition(cond) = &node.kind {
                for branch in [&cond.true_branch, &cond.false_branch].into_iter().flatten() {
                    entry.insert(branch.as_str());
                }
            }
        }
        for edge in &self.edges {
            succ.entry(edge.from.as_str())
                .or_default()
                .insert(edge.to.as_str());
        }
        succ
    }

    /// Three-coloring DFS: white = unvisited, grey = on the current path,
    /// black = finished. A grey-to-grey edge is a back edge, hence a cycle.
    fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }

        let succ = self.successors();
        let mut color: HashMap<&str, Color> =
            self.nodes.keys().map(|k| (k.as_str(), Color::White)).collect();

        fn visit<'a>(
            key: &'a str,
            succ: &HashMap<&'a str, HashSet<&'a str>>,
            color: &mut HashMap<&'a str, Color>,
        ) -> bool {
            color.insert(key, Color::Grey);
            if let Some(nexts) = succ.get(key) {
                for next in nexts {
                    match color.get(next).copied().unwrap_or(Color::White) {
                        Color::Grey => return true,
                        Color::White => {
                            if visit(next, succ, color) {
                                return true;
                            }
                        }
                        Color::Black => {}
                    }
                }
            }
            color.insert(key, Color::Black);
            false
        }

        let keys: Vec<&str> = self.nodes.keys().map(|k| k.as_str()).collect();
        for key in keys {
            if color.get(key) == Some(&Color::White) && visit(key, &succ, &mut color) {
                return true;
            }
        }
        false
    }

    /// Effective successors of a node after it completed. For CONDITION
    /// nodes the single selected branch overrides `next`.
    pub fn successors_of(&self, key: &str, selected_branch: Option<&str>) -> Vec<String> {
        let Some(node) = self.nodes.get(key) else {
            return Vec::new();
        };
        if matches!(node.kind, NodeKind::Condition(_)) {
            return selected_branch.map(|b| vec![b.to_string()]).unwrap_or_default();
        }
        node.next.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform_node(id: &str, next: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Transform(TransformConfig {
                template: serde_json::Map::new(),
            }),
            next: next.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn definition(nodes: Vec<Node>, edges: Vec<(&str, &str)>, entrypoint: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            metadata: DefinitionMetadata {
                name: "test".to_string(),
                version: 1,
                description: None,
            },
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges: edges
                .into_iter()
                .map(|(from, to)| Edge {
                    from: from.to_string(),
                    to: to.to_string(),
                })
                .collect(),
            entrypoint: entrypoint.to_string(),
        }
    }

    #[test]
    fn accepts_linear_chain() {
        let def = definition(
            vec![
                transform_node("a", &["b"]),
                transform_node("b", &["c"]),
                transform_node("c", &[]),
            ],
            vec![("a", "b"), ("b", "c")],
            "a",
        );
        assert!(def.validate().is_ok());
    }

    #[test]
    fn rejects_missing_entrypoint() {
        let def = definition(vec![transform_node("a", &[])], vec![], "nope");
        let err = def.validate().unwrap_err();
        match err {
            DomainError::Validation { fields, .. } => {
                assert!(fields.contains(&"definition.entrypoint".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_edge_to_unknown_node() {
        let def = definition(vec![transform_node("a", &[])], vec![("a", "ghost")], "a");
        let err = def.validate().unwrap_err();
        match err {
            DomainError::Validation { fields, .. } => {
                assert!(fields.iter().any(|f| f.contains("edges[0].to")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_next_to_unknown_node() {
        let def = definition(vec![transform_node("a", &["ghost"])], vec![], "a");
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_node_id() {
        let mut node = transform_node("a", &[]);
        node.id = "b".to_string();
        let def = WorkflowDefinition {
            metadata: DefinitionMetadata {
                name: "test".to_string(),
                version: 1,
                description: None,
            },
            nodes: [("a".to_string(), node)].into_iter().collect(),
            edges: vec![],
            entrypoint: "a".to_string(),
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_cycle() {
        let def = definition(
            vec![transform_node("a", &["b"]), transform_node("b", &["a"])],
            vec![("a", "b"), ("b", "a")],
            "a",
        );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_self_loop() {
        let def = definition(vec![transform_node("a", &["a"])], vec![], "a");
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_condition_branch_to_unknown_node() {
        let cond = Node {
            id: "check".to_string(),
            kind: NodeKind::Condition(ConditionConfig {
                expression: "input.x > 1".to_string(),
                true_branch: Some("ghost".to_string()),
                false_branch: None,
            }),
            next: vec![],
        };
        let def = definition(vec![cond], vec![], "check");
        let err = def.validate().unwrap_err();
        match err {
            DomainError::Validation { fields, .. } => {
                assert!(fields.iter().any(|f| f.contains("trueBranch")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn condition_successor_follows_selected_branch_only() {
        let cond = Node {
            id: "check".to_string(),
            kind: NodeKind::Condition(ConditionConfig {
                expression: "input.x > 1".to_string(),
                true_branch: Some("hi".to_string()),
                false_branch: Some("lo".to_string()),
            }),
            next: vec!["hi".to_string(), "lo".to_string()],
        };
        let def = definition(
            vec![cond, transform_node("hi", &[]), transform_node("lo", &[])],
            vec![],
            "check",
        );
        assert_eq!(def.successors_of("check", Some("hi")), vec!["hi".to_string()]);
        assert!(def.successors_of("check", None).is_empty());
        assert_eq!(
            def.successors_of("hi", None),
            Vec::<String>::new()
        );
    }

    #[test]
    fn parses_wire_format() {
        let json = serde_json::json!({
            "metadata": {"name": "demo", "version": 1},
            "entrypoint": "fetch",
            "nodes": {
                "fetch": {
                    "id": "fetch",
                    "type": "HTTP_REQUEST",
                    "config": {"url": "https://example.com/{{input.path}}", "method": "GET"},
                    "next": ["shape"]
                },
                "shape": {
                    "id": "shape",
                    "type": "TRANSFORM",
                    "config": {"template": {"status": "{{steps[\"fetch\"].output.statusCode}}"}},
                    "next": []
                }
            },
            "edges": [{"from": "fetch", "to": "shape"}]
        });
        let def: WorkflowDefinition = serde_json::from_value(json).unwrap();
        assert!(def.validate().is_ok());
        assert_eq!(
            def.nodes["fetch"].kind.node_type(),
            NodeType::HttpRequest
        );
    }

    #[test]
    fn delay_is_clamped() {
        let config = DelayConfig { delay_ms: 90_000 };
        assert_eq!(config.clamped_ms(), MAX_DELAY_MS);
        let config = DelayConfig { delay_ms: 250 };
        assert_eq!(config.clamped_ms(), 250);
    }

    #[test]
    fn update_definition_bumps_version() {
        let def = definition(vec![transform_node("a", &[])], vec![], "a");
        let mut wf = Workflow::new(TenantId::new(), "wf", def.clone()).unwrap();
        assert_eq!(wf.version, 1);
        wf.update_definition(def).unwrap();
        assert_eq!(wf.version, 2);
    }
}
