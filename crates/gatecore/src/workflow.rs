use crate::WorkflowError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type WorkflowId = String;
pub type NodeId = String;

/// Node-level execution settings the engine stores beside `parameters`.
///
/// They are folded into `NodeSpec::parameters` on load (model key) and lifted
/// back onto the node object on export (engine key).
pub const NODE_SETTINGS: &[(&str, &str)] = &[
    ("retryOnFail", "retryOnFail"),
    ("maxRetries", "maxTries"),
    ("waitBetweenTries", "waitBetweenTries"),
    ("continueOnFail", "continueOnFail"),
    ("alwaysOutputData", "alwaysOutputData"),
    ("executeOnce", "executeOnce"),
    ("onError", "onError"),
    ("notes", "notes"),
    ("notesInFlow", "notesInFlow"),
];

pub const MAIN_CONNECTION: &str = "main";

/// Canonical in-memory workflow graph.
///
/// Nodes are keyed by their engine name, which is also what connections
/// reference. Cycles are allowed; nothing here assumes a DAG.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowGraph {
    pub id: Option<WorkflowId>,
    pub name: String,
    pub nodes: BTreeMap<NodeId, NodeSpec>,
    pub connections: Vec<Connection>,
    pub active: bool,
    pub tags: BTreeSet<String>,
    pub version: u64,
    /// Opaque engine revision (`versionId`)
    pub revision: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            active: false,
            tags: BTreeSet::new(),
            version: 0,
            revision: None,
            settings: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Connect output 0 of `source` to input 0 of `target`.
    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.connections.push(Connection::main(source, target));
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Smart-upsert key: workflows are matched against the engine by exact name.
    pub fn upsert_key(&self) -> &str {
        &self.name
    }

    /// Parse the engine's workflow JSON.
    pub fn load(raw: &Value) -> Result<Self, WorkflowError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| WorkflowError::parse("workflow must be a JSON object"))?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkflowError::parse("workflow is missing 'name'"))?
            .to_string();

        let raw_nodes = match obj.get("nodes") {
            Some(Value::Array(nodes)) => nodes.as_slice(),
            Some(_) => return Err(WorkflowError::parse("'nodes' must be an array")),
            None => return Err(WorkflowError::parse("workflow is missing 'nodes'")),
        };

        let mut nodes = BTreeMap::new();
        for (index, raw_node) in raw_nodes.iter().enumerate() {
            let node = NodeSpec::from_engine(raw_node)
                .map_err(|e| WorkflowError::parse(format!("node #{}: {}", index, e)))?;
            if nodes.contains_key(&node.id) {
                return Err(WorkflowError::parse(format!(
                    "duplicate node name '{}'",
                    node.id
                )));
            }
            nodes.insert(node.id.clone(), node);
        }

        let connections = match obj.get("connections") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => parse_connections(map)?,
            Some(_) => return Err(WorkflowError::parse("'connections' must be an object")),
        };

        let tags = match obj.get("tags") {
            Some(Value::Array(tags)) => tags
                .iter()
                .filter_map(|tag| match tag {
                    Value::String(name) => Some(name.clone()),
                    Value::Object(t) => t.get("name").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect(),
            _ => BTreeSet::new(),
        };

        let graph = Self {
            id: obj.get("id").and_then(id_string),
            name,
            nodes,
            connections,
            active: obj.get("active").and_then(Value::as_bool).unwrap_or(false),
            tags,
            version: obj
                .get("versionCounter")
                .or_else(|| obj.get("version"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            revision: obj
                .get("versionId")
                .and_then(Value::as_str)
                .map(str::to_string),
            settings: obj
                .get("settings")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        };

        graph.validate()?;
        Ok(graph)
    }

    /// Every connection endpoint must reference an existing node.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for conn in &self.connections {
            for endpoint in [&conn.source, &conn.target] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(WorkflowError::parse(format!(
                        "connection '{}' -> '{}' references unknown node '{}'",
                        conn.source, conn.target, endpoint
                    )));
                }
            }
        }
        Ok(())
    }

    /// Body accepted by the engine's create/update endpoints.
    pub fn to_engine_json(&self) -> Value {
        let nodes: Vec<Value> = self.nodes.values().map(NodeSpec::to_engine_json).collect();

        let mut connections: BTreeMap<&str, BTreeMap<&str, Vec<Vec<Value>>>> = BTreeMap::new();
        for conn in &self.connections {
            let outputs = connections
                .entry(conn.source.as_str())
                .or_default()
                .entry(conn.kind.as_str())
                .or_default();
            if outputs.len() <= conn.source_output {
                outputs.resize(conn.source_output + 1, Vec::new());
            }
            outputs[conn.source_output].push(json!({
                "node": conn.target,
                "type": conn.kind,
                "index": conn.target_input,
            }));
        }

        let settings = if self.settings.is_empty() {
            json!({ "saveManualExecutions": true, "saveExecutionProgress": true })
        } else {
            Value::Object(self.settings.clone())
        };

        json!({
            "name": self.name,
            "nodes": nodes,
            "connections": connections,
            "settings": settings,
        })
    }

    /// Direct predecessors of a node, in connection order.
    pub fn predecessors(&self, id: &str) -> Vec<&NodeId> {
        let mut seen = BTreeSet::new();
        self.connections
            .iter()
            .filter(|c| c.target == id)
            .map(|c| &c.source)
            .filter(|source| seen.insert(source.as_str()))
            .collect()
    }

    /// Direct successors of a node, in connection order.
    pub fn successors(&self, id: &str) -> Vec<&NodeId> {
        let mut seen = BTreeSet::new();
        self.connections
            .iter()
            .filter(|c| c.source == id)
            .map(|c| &c.target)
            .filter(|target| seen.insert(target.as_str()))
            .collect()
    }

    /// Nodes without incoming connections (triggers and orphans).
    pub fn entry_nodes(&self) -> Vec<&NodeId> {
        self.nodes
            .keys()
            .filter(|id| !self.connections.iter().any(|c| &c.target == *id))
            .collect()
    }

    /// Every node reachable downstream of `id`, excluding `id` itself.
    pub fn downstream_of(&self, id: &str) -> Vec<NodeId> {
        let (graph, index) = self.as_digraph();
        let Some(&start) = index.get(id) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&graph, start);
        let mut reached = Vec::new();
        while let Some(next) = bfs.next(&graph) {
            if next != start {
                reached.push(graph[next].clone());
            }
        }
        reached
    }

    /// Every node reachable upstream of `id`, excluding `id` itself.
    pub fn upstream_of(&self, id: &str) -> Vec<NodeId> {
        let (graph, index) = self.as_digraph();
        let Some(&start) = index.get(id) else {
            return Vec::new();
        };
        let reversed = Reversed(&graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut reached = Vec::new();
        while let Some(next) = bfs.next(reversed) {
            if next != start {
                reached.push(graph[next].clone());
            }
        }
        reached
    }

    /// Directed multigraph view for graph algorithms. Edge weights are output indices.
    pub fn as_digraph(&self) -> (DiGraph<NodeId, usize>, HashMap<NodeId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for id in self.nodes.keys() {
            index.insert(id.clone(), graph.add_node(id.clone()));
        }
        for conn in &self.connections {
            if let (Some(&from), Some(&to)) = (index.get(&conn.source), index.get(&conn.target)) {
                graph.add_edge(from, to, conn.source_output);
            }
        }
        (graph, index)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub type_version: f64,
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialRef>,
    pub position: Option<Position>,
    pub disabled: bool,
    /// Engine-side node uuid, when the engine assigned one
    pub engine_id: Option<String>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            type_version: 1.0,
            parameters: BTreeMap::new(),
            credentials: BTreeMap::new(),
            position: None,
            disabled: false,
            engine_id: None,
        }
    }

    pub fn with_parameter(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set_parameter(path, value.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_credential(mut self, credential_type: impl Into<String>, credential: CredentialRef) -> Self {
        self.credentials.insert(credential_type.into(), credential);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Look up a parameter by dotted path (`options.timeout`).
    pub fn parameter(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.parameters.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Set a parameter by dotted path, creating intermediate objects.
    pub fn set_parameter(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return,
        };
        if parents.is_empty() {
            self.parameters.insert(last.to_string(), value);
            return;
        }

        let mut current = self
            .parameters
            .entry(parents[0].to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        for segment in &parents[1..] {
            current = as_object(current)
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        as_object(current).insert(last.to_string(), value);
    }

    /// Remove a parameter by dotted path. Returns the removed value.
    pub fn remove_parameter(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments.split_last()?;
        if parents.is_empty() {
            return self.parameters.remove(*last);
        }
        let mut current = self.parameters.get_mut(parents[0])?;
        for segment in &parents[1..] {
            current = current.as_object_mut()?.get_mut(*segment)?;
        }
        current.as_object_mut()?.remove(*last)
    }

    /// Credential types referenced by this node that carry no credential id.
    pub fn unbound_credentials(&self) -> Vec<String> {
        self.credentials
            .iter()
            .filter(|(_, credential)| !credential.is_bound())
            .map(|(credential_type, _)| credential_type.clone())
            .collect()
    }

    fn from_engine(raw: &Value) -> Result<Self, String> {
        let obj = raw.as_object().ok_or("node must be an object")?;
        let id = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or("node is missing 'name'")?;
        let node_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("node '{}' is missing 'type'", id))?;

        let mut parameters: BTreeMap<String, Value> = match obj.get("parameters") {
            Some(Value::Object(params)) => params.clone().into_iter().collect(),
            None | Some(Value::Null) => BTreeMap::new(),
            Some(_) => return Err(format!("node '{}' has non-object 'parameters'", id)),
        };
        for (model_key, engine_key) in NODE_SETTINGS {
            if let Some(value) = obj.get(*engine_key) {
                parameters.insert(model_key.to_string(), value.clone());
            }
        }

        let credentials = obj
            .get("credentials")
            .and_then(Value::as_object)
            .map(|creds| {
                creds
                    .iter()
                    .map(|(credential_type, reference)| {
                        (credential_type.clone(), CredentialRef::from_engine(reference))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let position = obj.get("position").and_then(Value::as_array).and_then(|pos| {
            Some(Position {
                x: pos.first()?.as_f64()?,
                y: pos.get(1)?.as_f64()?,
            })
        });

        Ok(Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            type_version: obj.get("typeVersion").and_then(Value::as_f64).unwrap_or(1.0),
            parameters,
            credentials,
            position,
            disabled: obj.get("disabled").and_then(Value::as_bool).unwrap_or(false),
            engine_id: obj.get("id").and_then(id_string),
        })
    }

    fn to_engine_json(&self) -> Value {
        let mut node = Map::new();
        let mut parameters = Map::new();
        for (key, value) in &self.parameters {
            match NODE_SETTINGS.iter().find(|(model_key, _)| model_key == key) {
                Some((_, engine_key)) => {
                    node.insert(engine_key.to_string(), value.clone());
                }
                None => {
                    parameters.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(engine_id) = &self.engine_id {
            node.insert("id".into(), json!(engine_id));
        }
        node.insert("name".into(), json!(self.id));
        node.insert("type".into(), json!(self.node_type));
        node.insert("typeVersion".into(), json!(self.type_version));
        let position = self.position.unwrap_or(Position { x: 0.0, y: 0.0 });
        node.insert("position".into(), json!([position.x, position.y]));
        node.insert("parameters".into(), Value::Object(parameters));
        if !self.credentials.is_empty() {
            let credentials: Map<String, Value> = self
                .credentials
                .iter()
                .map(|(credential_type, reference)| {
                    (credential_type.clone(), json!({ "id": reference.id, "name": reference.name }))
                })
                .collect();
            node.insert("credentials".into(), Value::Object(credentials));
        }
        if self.disabled {
            node.insert("disabled".into(), json!(true));
        }
        Value::Object(node)
    }
}

/// Reference from a node to a stored credential
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CredentialRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl CredentialRef {
    pub fn bound(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }

    fn from_engine(raw: &Value) -> Self {
        match raw {
            Value::Object(obj) => Self {
                id: obj.get("id").and_then(id_string),
                name: obj.get("name").and_then(Value::as_str).map(str::to_string),
            },
            // Legacy shape: the credential name as a bare string
            Value::String(name) => Self {
                id: None,
                name: Some(name.clone()),
            },
            _ => Self::default(),
        }
    }
}

/// Directed edge from a node output to a node input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Connection {
    pub source: NodeId,
    pub source_output: usize,
    pub target: NodeId,
    pub target_input: usize,
    pub kind: String,
}

impl Connection {
    pub fn main(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_output: 0,
            target: target.into(),
            target_input: 0,
            kind: MAIN_CONNECTION.to_string(),
        }
    }

    pub fn from_output(mut self, output: usize) -> Self {
        self.source_output = output;
        self
    }

    pub fn touches(&self, node: &str) -> bool {
        self.source == node || self.target == node
    }
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

fn parse_connections(map: &Map<String, Value>) -> Result<Vec<Connection>, WorkflowError> {
    let mut connections = Vec::new();
    for (source, by_kind) in map {
        let by_kind = by_kind.as_object().ok_or_else(|| {
            WorkflowError::parse(format!("connections of '{}' must be an object", source))
        })?;
        for (kind, outputs) in by_kind {
            let outputs = outputs.as_array().ok_or_else(|| {
                WorkflowError::parse(format!("'{}' outputs of '{}' must be an array", kind, source))
            })?;
            for (source_output, targets) in outputs.iter().enumerate() {
                // Unused output slots are null
                let Some(targets) = targets.as_array() else {
                    continue;
                };
                for target in targets {
                    let target_node = target.get("node").and_then(Value::as_str).ok_or_else(|| {
                        WorkflowError::parse(format!(
                            "connection from '{}' output {} has no target node",
                            source, source_output
                        ))
                    })?;
                    connections.push(Connection {
                        source: source.clone(),
                        source_output,
                        target: target_node.to_string(),
                        target_input: target.get("index").and_then(Value::as_u64).unwrap_or(0) as usize,
                        kind: kind.clone(),
                    });
                }
            }
        }
    }
    Ok(connections)
}

/// Coerce a value into an object, replacing scalars.
fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Engine ids show up both as strings and as numbers depending on the version.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice_sync() -> Value {
        json!({
            "id": "wf-1",
            "name": "Invoice Sync",
            "active": true,
            "versionId": "6b1c",
            "versionCounter": 4,
            "tags": [{"id": "1", "name": "billing"}],
            "nodes": [
                {"id": "a1", "name": "Webhook", "type": "n8n-nodes-base.webhook", "typeVersion": 2, "position": [0, 0], "parameters": {"path": "invoices"}},
                {"name": "HTTP Request", "type": "n8n-nodes-base.httpRequest", "position": [200, 0],
                 "parameters": {"url": "https://api.example.com", "options": {"timeout": 10000}},
                 "retryOnFail": true, "maxTries": 2,
                 "credentials": {"httpHeaderAuth": {"id": null, "name": "Billing API"}}},
                {"name": "Slack", "type": "n8n-nodes-base.slack", "parameters": {}}
            ],
            "connections": {
                "Webhook": {"main": [[{"node": "HTTP Request", "type": "main", "index": 0}]]},
                "HTTP Request": {"main": [[{"node": "Slack", "type": "main", "index": 0}]]}
            }
        })
    }

    #[test]
    fn test_load_engine_workflow() {
        let graph = WorkflowGraph::load(&invoice_sync()).unwrap();

        assert_eq!(graph.id.as_deref(), Some("wf-1"));
        assert_eq!(graph.upsert_key(), "Invoice Sync");
        assert_eq!(graph.version, 4);
        assert_eq!(graph.revision.as_deref(), Some("6b1c"));
        assert!(graph.tags.contains("billing"));
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.connections.len(), 2);

        let http = graph.node("HTTP Request").unwrap();
        assert_eq!(http.parameter("options.timeout"), Some(&json!(10000)));
        assert_eq!(http.parameter("retryOnFail"), Some(&json!(true)));
        assert_eq!(http.parameter("maxRetries"), Some(&json!(2)));
        assert_eq!(http.unbound_credentials(), vec!["httpHeaderAuth".to_string()]);
    }

    #[test]
    fn test_load_rejects_dangling_connection() {
        let mut raw = invoice_sync();
        raw["connections"]["Slack"] = json!({"main": [[{"node": "Ghost", "type": "main", "index": 0}]]});

        let err = WorkflowGraph::load(&raw).unwrap_err();
        assert!(matches!(err, WorkflowError::Parse(ref msg) if msg.contains("Ghost")));
        assert_eq!(err.error_class(), "ParseError");
    }

    #[test]
    fn test_load_rejects_missing_fields() {
        assert!(WorkflowGraph::load(&json!({"nodes": []})).is_err());
        assert!(WorkflowGraph::load(&json!({"name": "x"})).is_err());
        assert!(WorkflowGraph::load(&json!({"name": "x", "nodes": [{"name": "A"}]})).is_err());
    }

    #[test]
    fn test_engine_json_lifts_node_settings() {
        let graph = WorkflowGraph::load(&invoice_sync()).unwrap();
        let exported = graph.to_engine_json();

        let http = exported["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["name"] == "HTTP Request")
            .unwrap();
        assert_eq!(http["maxTries"], json!(2));
        assert!(http["parameters"].get("maxRetries").is_none());

        let reloaded = WorkflowGraph::load(&exported).unwrap();
        assert_eq!(reloaded.nodes, graph.nodes);
        assert_eq!(reloaded.connections, graph.connections);
    }

    #[test]
    fn test_cycles_are_allowed() {
        let mut graph = WorkflowGraph::new("Loop");
        graph.add_node(NodeSpec::new("A", "n8n-nodes-base.noOp"));
        graph.add_node(NodeSpec::new("B", "n8n-nodes-base.if"));
        graph.connect("A", "B");
        graph.connect("B", "A");

        assert!(graph.validate().is_ok());
        assert_eq!(graph.downstream_of("A"), vec!["B".to_string()]);
        assert_eq!(graph.upstream_of("A"), vec!["B".to_string()]);
        assert!(graph.entry_nodes().is_empty());
    }

    #[test]
    fn test_dotted_parameter_paths() {
        let mut node = NodeSpec::new("HTTP", "n8n-nodes-base.httpRequest").with_parameter("url", "https://x");
        node.set_parameter("options.timeout", json!(5000));
        assert_eq!(node.parameter("options.timeout"), Some(&json!(5000)));

        assert_eq!(node.remove_parameter("options.timeout"), Some(json!(5000)));
        assert!(node.parameter("options.timeout").is_none());
        assert_eq!(node.parameter("url"), Some(&json!("https://x")));
    }
}
