use crate::patch::ErrorClass;
use crate::workflow::NodeId;
use serde::{Deserialize, Serialize};

/// Structured failure extracted from one execution.
///
/// Built fresh for every diagnosis and dropped once the patch generator
/// has consumed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureReport {
    pub execution_id: String,
    pub workflow_id: Option<String>,
    /// Root-cause node; differs from `symptom_node_id` after an upstream shift
    pub failing_node_id: NodeId,
    /// Node whose run was first marked failed
    pub symptom_node_id: NodeId,
    pub error_class: ErrorClass,
    pub error_message: String,
    /// Bounded excerpt of the offending data
    pub context_snippet: Option<String>,
    /// Nodes executed before the failure, oldest first
    pub upstream_chain: Vec<NodeId>,
    pub signals: FailureSignals,
}

/// Raw signals the classifier matches against
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FailureSignals {
    pub http_status: Option<u16>,
    pub error_name: Option<String>,
    pub description: Option<String>,
    pub node_type: Option<String>,
    pub elapsed_ms: Option<u64>,
    /// The symptom node reported malformed input
    pub malformed_input: bool,
    /// Credential types the failing node references without a credential id
    pub unbound_credentials: Vec<String>,
}

impl FailureReport {
    pub fn shifted(&self) -> bool {
        self.failing_node_id != self.symptom_node_id
    }

    /// Message plus description and error name, for signature matching.
    pub fn searchable_text(&self) -> String {
        let mut text = self.error_message.clone();
        for extra in [&self.signals.description, &self.signals.error_name].into_iter().flatten() {
            text.push(' ');
            text.push_str(extra);
        }
        text
    }
}
