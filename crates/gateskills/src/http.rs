use async_trait::async_trait;
use gatecore::config::EngineConfig;
use gatecore::{ClientError, CredentialSummary, EngineClient, ExecutionQuery, WorkflowGraph};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Longest engine error text carried into a `ClientError`
const ERROR_BODY_LIMIT: usize = 300;
/// Page size used when walking cursor-paginated listings
const PAGE_SIZE: usize = 100;

/// REST client for the n8n public API
pub struct N8nClient {
    client: reqwest::Client,
    api_url: String,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl N8nClient {
    pub fn new(config: &EngineConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| ClientError::InvalidResponse(format!("API key is not a valid header value: {}", e)))?;
        headers.insert("X-N8N-API-KEY", key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::UpstreamUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url(),
            timeout: config.request_timeout,
            retries: config.retries,
            backoff: config.retry_backoff,
        })
    }

    /// Send with bounded retries on transient failures.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), path, query, body).await {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(%method, path, attempt, error = %e, "retrying engine call");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self.client.request(method.clone(), &url).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&method, path, e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(&method, path, e))?;
        tracing::debug!(%method, path, status = status.as_u16(), "engine responded");

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| ClientError::InvalidResponse(format!("{} {}: {}", method, path, e)));
        }

        let message = error_message(&text);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth {
                status: status.as_u16(),
                message,
            },
            StatusCode::NOT_FOUND => ClientError::NotFound(format!("{}: {}", path, message)),
            StatusCode::TOO_MANY_REQUESTS => ClientError::UpstreamUnavailable(format!("rate limited: {}", message)),
            s if s.is_server_error() => ClientError::UpstreamUnavailable(format!("HTTP {}: {}", s.as_u16(), message)),
            s => ClientError::InvalidResponse(format!("HTTP {}: {}", s.as_u16(), message)),
        })
    }

    fn transport_error(&self, method: &Method, path: &str, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::UpstreamTimeout {
                operation: format!("{} {}", method, path),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            ClientError::UpstreamUnavailable(format!("{} {}: {}", method, path, err))
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ClientError> {
        self.request(Method::GET, path, query, None).await
    }

    /// Walk a cursor-paginated listing until `limit` items (0 = all) are collected.
    async fn collect_pages(&self, path: &str, query: &[(&str, String)], limit: usize) -> Result<Vec<Value>, ClientError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page_size = match limit {
                0 => PAGE_SIZE,
                n => (n - items.len()).min(PAGE_SIZE),
            };
            let mut page_query = query.to_vec();
            page_query.push(("limit", page_size.to_string()));
            if let Some(cursor) = &cursor {
                page_query.push(("cursor", cursor.clone()));
            }

            let page = self.get(path, &page_query).await?;
            if let Some(data) = page.get("data").and_then(Value::as_array) {
                items.extend(data.iter().cloned());
            }
            cursor = page.get("nextCursor").and_then(Value::as_str).map(str::to_string);
            if cursor.is_none() || (limit > 0 && items.len() >= limit) {
                break;
            }
        }
        if limit > 0 {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<WorkflowGraph>, ClientError> {
        let named: Vec<WorkflowGraph> = self
            .list_workflows(None)
            .await?
            .into_iter()
            .filter(|graph| graph.name == name)
            .collect();
        Ok(match named.len() {
            1 => named.into_iter().next(),
            _ => None,
        })
    }
}

fn load_graph(raw: &Value) -> Result<WorkflowGraph, ClientError> {
    WorkflowGraph::load(raw).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    message.chars().take(ERROR_BODY_LIMIT).collect()
}

fn credential_summary(raw: &Value) -> Option<CredentialSummary> {
    Some(CredentialSummary {
        id: gatecore::id_string(raw.get("id")?)?,
        name: raw.get("name")?.as_str()?.to_string(),
        credential_type: raw.get("type")?.as_str()?.to_string(),
    })
}

#[async_trait]
impl EngineClient for N8nClient {
    async fn get_workflow(&self, id_or_name: &str) -> Result<WorkflowGraph, ClientError> {
        match self.get(&format!("/workflows/{}", id_or_name), &[]).await {
            Ok(raw) => load_graph(&raw),
            Err(ClientError::NotFound(message)) => self
                .find_by_name(id_or_name)
                .await?
                .ok_or(ClientError::NotFound(message)),
            Err(e) => Err(e),
        }
    }

    async fn create_workflow(&self, graph: &WorkflowGraph) -> Result<WorkflowGraph, ClientError> {
        let raw = self
            .request(Method::POST, "/workflows", &[], Some(&graph.to_engine_json()))
            .await?;
        load_graph(&raw)
    }

    async fn update_workflow(
        &self,
        id: &str,
        graph: &WorkflowGraph,
        expected_version: u64,
    ) -> Result<WorkflowGraph, ClientError> {
        let current = load_graph(&self.get(&format!("/workflows/{}", id), &[]).await?)?;
        if current.version != expected_version {
            return Err(ClientError::Conflict {
                id: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let raw = self
            .request(Method::PUT, &format!("/workflows/{}", id), &[], Some(&graph.to_engine_json()))
            .await?;
        let mut stored = load_graph(&raw)?;
        // Engines without a version counter still report a monotonic version here
        if stored.version <= expected_version {
            stored.version = expected_version + 1;
        }
        Ok(stored)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Value, ClientError> {
        self.get(
            &format!("/executions/{}", execution_id),
            &[("includeData", "true".to_string())],
        )
        .await
    }

    async fn list_workflows(&self, tag_filter: Option<&[String]>) -> Result<Vec<WorkflowGraph>, ClientError> {
        let raw = self.collect_pages("/workflows", &[], 0).await?;
        let mut graphs = Vec::with_capacity(raw.len());
        for item in &raw {
            match WorkflowGraph::load(item) {
                Ok(graph) => graphs.push(graph),
                Err(e) => tracing::warn!(error = %e, "skipping unparseable workflow in listing"),
            }
        }
        if let Some(tags) = tag_filter.filter(|tags| !tags.is_empty()) {
            graphs.retain(|graph| tags.iter().any(|tag| graph.tags.contains(tag)));
        }
        Ok(graphs)
    }

    async fn set_workflow_active(&self, id: &str, active: bool) -> Result<WorkflowGraph, ClientError> {
        let action = if active { "activate" } else { "deactivate" };
        let raw = self
            .request(Method::POST, &format!("/workflows/{}/{}", id, action), &[], None)
            .await?;
        load_graph(&raw)
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.request(Method::DELETE, &format!("/workflows/{}", id), &[], None)
            .await
            .map(|_| ())
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Value>, ClientError> {
        let mut params = Vec::new();
        if let Some(workflow_id) = &query.workflow_id {
            params.push(("workflowId", workflow_id.clone()));
        }
        if let Some(status) = query.status {
            params.push(("status", status.as_str().to_string()));
        }
        if query.include_data {
            params.push(("includeData", "true".to_string()));
        }
        self.collect_pages("/executions", &params, query.limit).await
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<(), ClientError> {
        self.request(Method::DELETE, &format!("/executions/{}", execution_id), &[], None)
            .await
            .map(|_| ())
    }

    async fn retry_execution(&self, execution_id: &str) -> Result<Value, ClientError> {
        self.request(Method::POST, &format!("/executions/{}/retry", execution_id), &[], None)
            .await
    }

    async fn run_workflow(&self, id: &str, payload: &Value) -> Result<Value, ClientError> {
        self.request(
            Method::POST,
            &format!("/workflows/{}/run", id),
            &[],
            Some(&json!({ "data": payload })),
        )
        .await
    }

    async fn inject_execution_data(&self, execution_id: &str, node: &str, data: &Value) -> Result<Value, ClientError> {
        self.request(
            Method::POST,
            &format!("/executions/{}/resume", execution_id),
            &[],
            Some(&json!({ "nodeName": node, "data": data })),
        )
        .await
    }

    async fn list_tags(&self) -> Result<Vec<String>, ClientError> {
        match self.collect_pages("/tags", &[], 0).await {
            Ok(raw) => Ok(raw
                .iter()
                .filter_map(|tag| tag.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()),
            // Older engines have no tags endpoint
            Err(ClientError::NotFound(_)) => {
                let mut tags: Vec<String> = self
                    .list_workflows(None)
                    .await?
                    .into_iter()
                    .flat_map(|graph| graph.tags.into_iter())
                    .collect();
                tags.sort();
                tags.dedup();
                Ok(tags)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_credentials(&self) -> Result<Vec<CredentialSummary>, ClientError> {
        let raw = self.collect_pages("/credentials", &[], 0).await?;
        Ok(raw.iter().filter_map(credential_summary).collect())
    }

    async fn create_credential(
        &self,
        name: &str,
        credential_type: &str,
        data: &Value,
    ) -> Result<CredentialSummary, ClientError> {
        let raw = self
            .request(
                Method::POST,
                "/credentials",
                &[],
                Some(&json!({ "name": name, "type": credential_type, "data": data })),
            )
            .await?;
        credential_summary(&raw)
            .ok_or_else(|| ClientError::InvalidResponse("credential response lacks id, name or type".to_string()))
    }

    async fn credential_schema(&self, credential_type: &str) -> Result<Value, ClientError> {
        self.get(&format!("/credentials/schema/{}", credential_type), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecore::GatewayConfig;

    #[test]
    fn test_error_message_prefers_engine_message() {
        assert_eq!(error_message(r#"{"message":"not allowed"}"#), "not allowed");
        assert_eq!(error_message("  plain text  "), "plain text");
        assert_eq!(error_message(&"x".repeat(1000)).len(), ERROR_BODY_LIMIT);
    }

    #[test]
    fn test_credential_summary_accepts_numeric_ids() {
        let summary = credential_summary(&json!({"id": 12, "name": "Billing", "type": "httpBasicAuth"})).unwrap();
        assert_eq!(summary.id, "12");
        assert!(credential_summary(&json!({"id": "1", "name": "x"})).is_none());
    }

    #[test]
    fn test_client_targets_public_api() {
        let mut config = GatewayConfig::default().engine;
        config.api_key = "secret".into();
        config.base_url = "https://n8n.example.com/".into();
        let client = N8nClient::new(&config).unwrap();
        assert_eq!(client.api_url, "https://n8n.example.com/api/v1");
    }

    #[test]
    fn test_invalid_api_key_is_rejected() {
        let mut config = GatewayConfig::default().engine;
        config.api_key = "line\nbreak".into();
        assert!(N8nClient::new(&config).is_err());
    }
}
