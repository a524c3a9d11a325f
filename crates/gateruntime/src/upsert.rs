use crate::error::UpsertError;
use gatecore::{ClientError, EngineClient, WorkflowGraph};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub action: UpsertAction,
    pub workflow: WorkflowGraph,
}

/// Create-or-update by exact workflow name.
///
/// An existing workflow is updated against the version it was listed with, so
/// a concurrent edit fails with a conflict instead of being overwritten. Two
/// remote workflows sharing the name are reported, never guessed between.
pub async fn deploy(engine: &dyn EngineClient, graph: &WorkflowGraph) -> Result<Deployment, UpsertError> {
    let key = graph.upsert_key();
    let matches: Vec<WorkflowGraph> = engine
        .list_workflows(None)
        .await?
        .into_iter()
        .filter(|remote| remote.name == key)
        .collect();

    match matches.as_slice() {
        [] => {
            let created = engine.create_workflow(graph).await?;
            tracing::info!(name = key, id = created.id.as_deref().unwrap_or("-"), "created workflow");
            Ok(Deployment {
                action: UpsertAction::Created,
                workflow: created,
            })
        }
        [existing] => {
            let id = existing
                .id
                .clone()
                .ok_or_else(|| ClientError::InvalidResponse(format!("workflow '{}' has no id", key)))?;
            let updated = engine.update_workflow(&id, graph, existing.version).await?;
            tracing::info!(name = key, %id, version = updated.version, "updated workflow");
            Ok(Deployment {
                action: UpsertAction::Updated,
                workflow: updated,
            })
        }
        many => {
            let ids: Vec<String> = many.iter().filter_map(|w| w.id.clone()).collect();
            tracing::warn!(name = key, count = many.len(), "workflow name collision");
            Err(UpsertError::NameCollision {
                name: key.to_string(),
                ids,
            })
        }
    }
}
