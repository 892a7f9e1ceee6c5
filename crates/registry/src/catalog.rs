use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{ModelDescriptor, ProviderDescriptor, RollingStats};

pub const DEFAULT_LOCAL_RUNTIME: &str = "http://127.0.0.1:11434";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog parse error: {0}")]
    Parse(String),
    #[error("duplicate backend name: {0}")]
    DuplicateName(String),
    #[error("backend name must not be empty")]
    EmptyName,
    #[error("{name}: endpoint must start with http:// or https:// (got {endpoint})")]
    BadEndpoint { name: String, endpoint: String },
    #[error("{0}: memory_cost_mb must be positive")]
    ZeroCost(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFlavor {
    /// Anything speaking the OpenAI REST shape (OpenAI, Groq, OpenRouter, ...).
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub memory_cost_mb: u64,
    pub priority: i32,
    #[serde(default)]
    pub embeddings: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    pub flavor: ProviderFlavor,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Name of the env var holding the API key. The key itself never enters the catalog.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderSpec {
    pub fn supports_embeddings(&self) -> bool {
        self.flavor == ProviderFlavor::OpenAi && self.embedding_model.is_some()
    }
}

/// Static backend catalog, validated once at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default = "default_local_runtime")]
    pub local_runtime: String,
    #[serde(default)]
    pub local_models: Vec<ModelSpec>,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

fn default_local_runtime() -> String {
    DEFAULT_LOCAL_RUNTIME.to_string()
}

impl Catalog {
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog =
            serde_json::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Catalog used when no file is configured.
    pub fn builtin() -> Self {
        Self {
            local_runtime: default_local_runtime(),
            local_models: vec![
                ModelSpec { name: "llama3.2:3b".into(), memory_cost_mb: 2_400, priority: 1, embeddings: false },
                ModelSpec { name: "qwen2.5:1.5b".into(), memory_cost_mb: 1_200, priority: 2, embeddings: false },
                ModelSpec { name: "nomic-embed-text".into(), memory_cost_mb: 300, priority: 3, embeddings: true },
            ],
            providers: vec![
                ProviderSpec {
                    name: "openai".into(),
                    flavor: ProviderFlavor::OpenAi,
                    endpoint: "https://api.openai.com/v1".into(),
                    model: "gpt-4o-mini".into(),
                    embedding_model: Some("text-embedding-3-small".into()),
                    api_key_env: Some("OPENAI_API_KEY".into()),
                },
                ProviderSpec {
                    name: "groq".into(),
                    flavor: ProviderFlavor::OpenAi,
                    endpoint: "https://api.groq.com/openai/v1".into(),
                    model: "llama-3.1-8b-instant".into(),
                    embedding_model: None,
                    api_key_env: Some("GROQ_API_KEY".into()),
                },
                ProviderSpec {
                    name: "anthropic".into(),
                    flavor: ProviderFlavor::Anthropic,
                    endpoint: "https://api.anthropic.com/v1".into(),
                    model: "claude-3-5-haiku-latest".into(),
                    embedding_model: None,
                    api_key_env: Some("ANTHROPIC_API_KEY".into()),
                },
            ],
        }
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        check_endpoint("local_runtime", &self.local_runtime)?;

        let mut seen = HashSet::new();
        for m in &self.local_models {
            if m.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if m.memory_cost_mb == 0 {
                return Err(CatalogError::ZeroCost(m.name.clone()));
            }
            if !seen.insert(m.name.as_str()) {
                return Err(CatalogError::DuplicateName(m.name.clone()));
            }
        }
        for p in &self.providers {
            if p.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            check_endpoint(&p.name, &p.endpoint)?;
            if !seen.insert(p.name.as_str()) {
                return Err(CatalogError::DuplicateName(p.name.clone()));
            }
        }
        Ok(())
    }

    pub fn model_descriptors(&self) -> Vec<ModelDescriptor> {
        self.local_models
            .iter()
            .map(|m| ModelDescriptor {
                name: m.name.clone(),
                memory_cost_mb: m.memory_cost_mb,
                priority: m.priority,
                embeddings: m.embeddings,
                loaded: false,
                stats: RollingStats::default(),
            })
            .collect()
    }

    /// `has_credentials` decides credential presence per provider; the registry
    /// only ever sees the resulting flag.
    pub fn provider_descriptors<F>(&self, has_credentials: F) -> Vec<ProviderDescriptor>
    where
        F: Fn(&ProviderSpec) -> bool,
    {
        self.providers
            .iter()
            .map(|p| ProviderDescriptor {
                name: p.name.clone(),
                endpoint: p.endpoint.clone(),
                has_credentials: has_credentials(p),
                embeddings: p.supports_embeddings(),
                healthy: true,
                stats: RollingStats::default(),
            })
            .collect()
    }
}

fn check_endpoint(name: &str, endpoint: &str) -> Result<(), CatalogError> {
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(CatalogError::BadEndpoint {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        Catalog::builtin().validate().unwrap();
    }

    #[test]
    fn test_parse_minimal_catalog() {
        let text = r#"{
            "local_models": [{"name": "tiny", "memory_cost_mb": 100, "priority": 1}],
            "providers": [{"name": "p", "flavor": "openai", "endpoint": "http://localhost:9", "model": "m",
                           "embedding_model": "e", "api_key_env": "P_KEY"}]
        }"#;
        let catalog = Catalog::from_json(text).unwrap();
        assert_eq!(catalog.local_runtime, DEFAULT_LOCAL_RUNTIME);
        assert!(!catalog.local_models[0].embeddings);
        assert!(catalog.providers[0].supports_embeddings());
    }

    #[test]
    fn test_duplicate_names_rejected_across_tiers() {
        let text = r#"{
            "local_models": [{"name": "dup", "memory_cost_mb": 100, "priority": 1}],
            "providers": [{"name": "dup", "flavor": "anthropic", "endpoint": "https://x", "model": "m"}]
        }"#;
        assert!(matches!(Catalog::from_json(text), Err(CatalogError::DuplicateName(n)) if n == "dup"));
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let text = r#"{"providers": [{"name": "p", "flavor": "openai", "endpoint": "ftp://x", "model": "m"}]}"#;
        assert!(matches!(Catalog::from_json(text), Err(CatalogError::BadEndpoint { .. })));
    }

    #[test]
    fn test_anthropic_never_serves_embeddings() {
        let spec = ProviderSpec {
            name: "a".into(),
            flavor: ProviderFlavor::Anthropic,
            endpoint: "https://x".into(),
            model: "m".into(),
            embedding_model: Some("e".into()),
            api_key_env: None,
        };
        assert!(!spec.supports_embeddings());
    }
}
