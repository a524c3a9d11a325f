//! Process-wide configuration, assembled once at startup and never mutated.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Feature flag a skill may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    N8n,
    Docker,
    Git,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::N8n => "n8n",
            Capability::Docker => "docker",
            Capability::Git => "git",
        }
    }

    /// Environment switch controlling this capability.
    pub fn env_flag(&self) -> &'static str {
        match self {
            Capability::N8n => "ENABLE_N8N_TOOLS",
            Capability::Docker => "ENABLE_DOCKER_TOOLS",
            Capability::Git => "ENABLE_GIT_TOOLS",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub base_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub editor_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl EngineConfig {
    /// Base URL with the public API prefix.
    pub fn api_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/api/v1") {
            base.to_string()
        } else {
            format!("{}/api/v1", base)
        }
    }

    pub fn editor_link(&self, workflow_id: &str) -> String {
        format!("{}/workflow/{}", self.editor_url.trim_end_matches('/'), workflow_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureFlags {
    pub n8n: bool,
    pub docker: bool,
    pub git: bool,
}

impl FeatureFlags {
    pub fn enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::N8n => self.n8n,
            Capability::Docker => self.docker,
            Capability::Git => self.git,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisConfig {
    /// Elapsed time after which a failed node counts as timed out
    pub slow_node_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationConfig {
    /// Patches at or above this risk need explicit confirmation
    pub risk_threshold: f64,
    pub timeout_ceiling_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DockerConfig {
    pub binary: String,
    pub n8n_container: String,
    pub command_timeout: Duration,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub engine: EngineConfig,
    pub features: FeatureFlags,
    pub diagnosis: DiagnosisConfig,
    pub remediation: RemediationConfig,
    pub docker: DockerConfig,
    pub snapshot_dir: PathBuf,
    pub bind_address: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                base_url: "http://localhost:5678".to_string(),
                api_key: String::new(),
                editor_url: "http://localhost:5678".to_string(),
                data_dir: PathBuf::from(".n8n"),
                request_timeout: Duration::from_secs(30),
                retries: 3,
                retry_backoff: Duration::from_millis(500),
            },
            features: FeatureFlags {
                n8n: true,
                docker: true,
                git: false,
            },
            diagnosis: DiagnosisConfig { slow_node_ms: 60_000 },
            remediation: RemediationConfig {
                risk_threshold: 0.5,
                timeout_ceiling_ms: 300_000,
            },
            docker: DockerConfig {
                binary: "docker".to_string(),
                n8n_container: "n8n".to_string(),
                command_timeout: Duration::from_secs(60),
            },
            snapshot_dir: PathBuf::from("./snapshots"),
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment, honouring a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let features = FeatureFlags {
            n8n: flag(&get, Capability::N8n.env_flag(), defaults.features.n8n)?,
            docker: flag(&get, Capability::Docker.env_flag(), defaults.features.docker)?,
            git: flag(&get, Capability::Git.env_flag(), defaults.features.git)?,
        };

        let api_key = get("N8N_API_KEY").unwrap_or_default();
        if features.n8n && api_key.is_empty() {
            return Err(ConfigError::Missing("N8N_API_KEY".to_string()));
        }

        let base_url = get("N8N_BASE_URL").unwrap_or(defaults.engine.base_url);
        let data_dir = match get("N8N_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => get("HOME")
                .map(|home| PathBuf::from(home).join(".n8n"))
                .unwrap_or(defaults.engine.data_dir),
        };

        let risk_threshold: f64 = number(&get, "GATEWAY_RISK_THRESHOLD", defaults.remediation.risk_threshold)?;
        if !(0.0..=1.0).contains(&risk_threshold) {
            return Err(ConfigError::Invalid {
                key: "GATEWAY_RISK_THRESHOLD".to_string(),
                value: risk_threshold.to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        Ok(Self {
            engine: EngineConfig {
                editor_url: get("N8N_EDITOR_URL").unwrap_or_else(|| {
                    base_url.trim_end_matches('/').trim_end_matches("/api/v1").to_string()
                }),
                base_url,
                api_key,
                data_dir,
                request_timeout: Duration::from_secs(number(&get, "HTTP_TIMEOUT", 30)?),
                retries: number(&get, "HTTP_RETRIES", defaults.engine.retries)?,
                retry_backoff: defaults.engine.retry_backoff,
            },
            features,
            diagnosis: DiagnosisConfig {
                slow_node_ms: number(&get, "GATEWAY_SLOW_NODE_MS", defaults.diagnosis.slow_node_ms)?,
            },
            remediation: RemediationConfig {
                risk_threshold,
                timeout_ceiling_ms: number(&get, "GATEWAY_TIMEOUT_CEILING_MS", defaults.remediation.timeout_ceiling_ms)?,
            },
            docker: DockerConfig {
                binary: get("DOCKER_BIN").unwrap_or(defaults.docker.binary),
                n8n_container: get("N8N_CONTAINER").unwrap_or(defaults.docker.n8n_container),
                command_timeout: Duration::from_secs(number(&get, "DOCKER_TIMEOUT", 60)?),
            },
            snapshot_dir: get("GATEWAY_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
        })
    }
}

fn flag<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

fn number<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_api_key() {
        let config = GatewayConfig::from_lookup(lookup(&[("N8N_API_KEY", "secret"), ("HOME", "/home/ops")])).unwrap();

        assert_eq!(config.engine.api_url(), "http://localhost:5678/api/v1");
        assert_eq!(config.engine.data_dir, PathBuf::from("/home/ops/.n8n"));
        assert!(config.features.docker);
        assert!(!config.features.git);
        assert_eq!(config.remediation.risk_threshold, 0.5);
        assert_eq!(config.remediation.timeout_ceiling_ms, 300_000);
        assert_eq!(config.bind_address, "0.0.0.0:8000");
    }

    #[test]
    fn test_missing_api_key_is_fatal_only_with_n8n_tools() {
        let err = GatewayConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("N8N_API_KEY".to_string()));

        let config = GatewayConfig::from_lookup(lookup(&[("ENABLE_N8N_TOOLS", "false")])).unwrap();
        assert!(!config.features.n8n);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_number = GatewayConfig::from_lookup(lookup(&[("N8N_API_KEY", "k"), ("HTTP_TIMEOUT", "soon")]));
        assert!(matches!(bad_number, Err(ConfigError::Invalid { ref key, .. }) if key == "HTTP_TIMEOUT"));

        let bad_threshold = GatewayConfig::from_lookup(lookup(&[("N8N_API_KEY", "k"), ("GATEWAY_RISK_THRESHOLD", "1.5")]));
        assert!(bad_threshold.is_err());

        let bad_flag = GatewayConfig::from_lookup(lookup(&[("N8N_API_KEY", "k"), ("ENABLE_DOCKER_TOOLS", "maybe")]));
        assert!(bad_flag.is_err());
    }

    #[test]
    fn test_base_url_keeps_existing_api_prefix() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("N8N_API_KEY", "k"),
            ("N8N_BASE_URL", "https://n8n.example.com/api/v1/"),
        ]))
        .unwrap();
        assert_eq!(config.engine.api_url(), "https://n8n.example.com/api/v1");
        assert_eq!(config.engine.editor_link("7"), "https://n8n.example.com/workflow/7");
    }
}
