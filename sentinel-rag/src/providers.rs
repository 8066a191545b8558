//! Provider selection by configuration key.
//!
//! Each capability (embedding, vector store, reranker, guard, generator) is
//! chosen at startup by a `backend` string. Keys whose cargo feature is not
//! compiled in are rejected like unknown keys, with the list of keys that
//! are available in this build.
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel_rag::{ProviderSet, ProviderSettings, RagConfig};
//!
//! let providers = ProviderSet::from_settings(&ProviderSettings::default())?;
//! let ingestion = providers.ingestion_pipeline(RagConfig::default())?;
//! let orchestrator = providers.query_orchestrator(RagConfig::default())?;
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generator::{ExtractiveGenerator, Generator};
use crate::guard::{KeywordClassifier, SafetyClassifier};
use crate::hashing::HashEmbeddingProvider;
use crate::ingest::IngestionPipeline;
use crate::inmemory::InMemoryVectorStore;
use crate::orchestrator::QueryOrchestrator;
use crate::reranker::{KeywordReranker, NoOpReranker, Reranker};
use crate::vectorstore::VectorStore;

/// The default OpenAI-compatible gateway.
pub const DEFAULT_BASE_URL: &str = "https://mkp-api.fptcloud.com/v1";

/// Backend choice plus endpoint overrides for one capability.
///
/// `base_url` and `api_key` fall back to the values on [`ProviderSettings`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl BackendSettings {
    pub fn new(backend: impl Into<String>) -> Self {
        Self { backend: backend.into(), model: None, base_url: None, api_key: None }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn key(&self) -> String {
        self.backend.trim().to_ascii_lowercase()
    }
}

impl fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSettings")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Which concrete providers to wire in, and how to reach them.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Endpoint shared by all remote backends unless overridden.
    pub base_url: String,
    /// Credential shared by all remote backends unless overridden.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Embedding dimensionality; must match the vector store collection.
    pub dimensions: usize,
    pub embedding: BackendSettings,
    pub vector_store: VectorStoreSettings,
    pub reranker: BackendSettings,
    pub guard: BackendSettings,
    pub generator: GeneratorSettings,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("dimensions", &self.dimensions)
            .field("embedding", &self.embedding)
            .field("vector_store", &self.vector_store)
            .field("reranker", &self.reranker)
            .field("guard", &self.guard)
            .field("generator", &self.generator)
            .finish()
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            dimensions: 1024,
            embedding: BackendSettings::new("hash").with_model("Vietnamese_Embedding"),
            vector_store: VectorStoreSettings::default(),
            reranker: BackendSettings::new("keyword").with_model("bge-reranker-v2-m3"),
            guard: BackendSettings::new("keyword").with_model("Llama-Guard-3-8B"),
            generator: GeneratorSettings::default(),
        }
    }
}

/// Vector store selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    pub backend: String,
    /// Server URL for remote stores.
    pub url: String,
    pub collection: String,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            url: "http://localhost:6334".to_string(),
            collection: "documents".to_string(),
        }
    }
}

/// Generator selection plus sampling parameters.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            backend: "extractive".to_string(),
            model: Some("GLM-4.5".to_string()),
            base_url: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

impl fmt::Debug for GeneratorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorSettings")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn unknown(capability: &str, key: &str, available: &[&str]) -> RagError {
    RagError::InvalidConfig(format!(
        "unknown {capability} backend '{key}'. Available: {}",
        available.join(", ")
    ))
}

#[cfg(feature = "openai")]
fn endpoint(
    settings: &ProviderSettings,
    base_url: &Option<String>,
    api_key: &Option<String>,
) -> (String, String) {
    let base_url = base_url.clone().unwrap_or_else(|| settings.base_url.clone());
    let api_key = api_key.clone().or_else(|| settings.api_key.clone()).unwrap_or_default();
    (base_url, api_key)
}

/// Build the configured embedding provider.
pub fn build_embedding_provider(settings: &ProviderSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    let backend = &settings.embedding;
    match backend.key().as_str() {
        "hash" => Ok(Arc::new(HashEmbeddingProvider::new(settings.dimensions)?)),
        #[cfg(feature = "openai")]
        "openai" => {
            let (base_url, api_key) = endpoint(settings, &backend.base_url, &backend.api_key);
            let mut provider = crate::openai::OpenAIEmbeddingProvider::new(api_key)?
                .with_base_url(base_url)?
                .with_native_dimensions(settings.dimensions);
            if let Some(model) = &backend.model {
                provider = provider.with_model(model);
            }
            Ok(Arc::new(provider))
        }
        other => Err(unknown("embedding", other, &embedding_backends())),
    }
}

/// Build the configured vector store.
pub fn build_vector_store(settings: &ProviderSettings) -> Result<Arc<dyn VectorStore>> {
    let store = &settings.vector_store;
    match store.backend.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        #[cfg(feature = "qdrant")]
        "qdrant" => Ok(Arc::new(crate::qdrant::QdrantVectorStore::new(
            &store.url,
            store.collection.clone(),
        )?)),
        other => Err(unknown("vector store", other, &vector_store_backends())),
    }
}

/// Build the configured reranker.
pub fn build_reranker(settings: &ProviderSettings) -> Result<Arc<dyn Reranker>> {
    let backend = &settings.reranker;
    match backend.key().as_str() {
        "none" => Ok(Arc::new(NoOpReranker)),
        "keyword" => Ok(Arc::new(KeywordReranker)),
        #[cfg(feature = "openai")]
        "remote" => {
            let (base_url, api_key) = endpoint(settings, &backend.base_url, &backend.api_key);
            let mut reranker = crate::remote_reranker::RemoteReranker::new(base_url, api_key)?;
            if let Some(model) = &backend.model {
                reranker = reranker.with_model(model);
            }
            Ok(Arc::new(reranker))
        }
        other => Err(unknown("reranker", other, &reranker_backends())),
    }
}

/// Build the configured safety classifier.
pub fn build_safety_classifier(settings: &ProviderSettings) -> Result<Arc<dyn SafetyClassifier>> {
    let backend = &settings.guard;
    match backend.key().as_str() {
        "keyword" => Ok(Arc::new(KeywordClassifier::with_default_rules())),
        #[cfg(feature = "openai")]
        "llama-guard" => {
            let (base_url, api_key) = endpoint(settings, &backend.base_url, &backend.api_key);
            let mut client = crate::chat::ChatClient::new("llama-guard", base_url, api_key)?
                .with_model(crate::llama_guard::DEFAULT_GUARD_MODEL);
            if let Some(model) = &backend.model {
                client = client.with_model(model);
            }
            Ok(Arc::new(crate::llama_guard::LlamaGuardClassifier::new(client)))
        }
        other => Err(unknown("guard", other, &guard_backends())),
    }
}

/// Build the configured answer generator.
pub fn build_generator(settings: &ProviderSettings) -> Result<Arc<dyn Generator>> {
    let generator = &settings.generator;
    match generator.backend.trim().to_ascii_lowercase().as_str() {
        "extractive" | "echo" => Ok(Arc::new(ExtractiveGenerator::new())),
        #[cfg(feature = "openai")]
        "openai" => {
            let (base_url, api_key) = endpoint(settings, &generator.base_url, &generator.api_key);
            let mut client = crate::chat::ChatClient::new("chat", base_url, api_key)?
                .with_temperature(generator.temperature)
                .with_max_tokens(generator.max_tokens);
            if let Some(model) = &generator.model {
                client = client.with_model(model);
            }
            Ok(Arc::new(crate::chat::ChatGenerator::new(client)))
        }
        other => Err(unknown("generator", other, &generator_backends())),
    }
}

fn embedding_backends() -> Vec<&'static str> {
    let mut keys = vec!["hash"];
    if cfg!(feature = "openai") {
        keys.push("openai");
    }
    keys
}

fn vector_store_backends() -> Vec<&'static str> {
    let mut keys = vec!["memory"];
    if cfg!(feature = "qdrant") {
        keys.push("qdrant");
    }
    keys
}

fn reranker_backends() -> Vec<&'static str> {
    let mut keys = vec!["none", "keyword"];
    if cfg!(feature = "openai") {
        keys.push("remote");
    }
    keys
}

fn guard_backends() -> Vec<&'static str> {
    let mut keys = vec!["keyword"];
    if cfg!(feature = "openai") {
        keys.push("llama-guard");
    }
    keys
}

fn generator_backends() -> Vec<&'static str> {
    let mut keys = vec!["extractive", "echo"];
    if cfg!(feature = "openai") {
        keys.push("openai");
    }
    keys
}

/// One instance of every capability, shared by ingestion and querying.
#[derive(Clone)]
pub struct ProviderSet {
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    pub reranker: Arc<dyn Reranker>,
    pub safety_classifier: Arc<dyn SafetyClassifier>,
    pub generator: Arc<dyn Generator>,
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet")
            .field("embedding_provider", &self.embedding_provider.name())
            .field("vector_store", &self.vector_store.backend())
            .field("reranker", &self.reranker.name())
            .field("safety_classifier", &self.safety_classifier.name())
            .field("generator", &self.generator.name())
            .finish()
    }
}

impl ProviderSet {
    /// Build every provider named in `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] for an unknown or uncompiled
    /// backend key, or a remote backend without credentials.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let set = Self {
            embedding_provider: build_embedding_provider(settings)?,
            vector_store: build_vector_store(settings)?,
            reranker: build_reranker(settings)?,
            safety_classifier: build_safety_classifier(settings)?,
            generator: build_generator(settings)?,
        };
        info!(
            embedding = set.embedding_provider.name(),
            vector_store = set.vector_store.backend(),
            reranker = set.reranker.name(),
            guard = set.safety_classifier.name(),
            generator = set.generator.name(),
            "providers ready"
        );
        Ok(set)
    }

    /// Build every provider named in `settings` and prepare the vector store
    /// for the embedding dimensionality, so that both ingestion and querying
    /// work against a store nothing has been written to yet.
    ///
    /// # Errors
    ///
    /// As [`ProviderSet::from_settings`], plus [`RagError::DimensionMismatch`]
    /// when an existing collection was created with another dimensionality.
    pub async fn connect(settings: &ProviderSettings, config: &RagConfig) -> Result<Self> {
        let set = Self::from_settings(settings)?;
        set.ingestion_pipeline(config.clone())?.ensure_schema().await?;
        Ok(set)
    }

    /// An ingestion pipeline over these providers.
    pub fn ingestion_pipeline(&self, config: RagConfig) -> Result<IngestionPipeline> {
        IngestionPipeline::builder()
            .config(config)
            .embedding_provider(self.embedding_provider.clone())
            .vector_store(self.vector_store.clone())
            .build()
    }

    /// A query orchestrator over these providers.
    pub fn query_orchestrator(&self, config: RagConfig) -> Result<QueryOrchestrator> {
        QueryOrchestrator::builder()
            .config(config)
            .embedding_provider(self.embedding_provider.clone())
            .vector_store(self.vector_store.clone())
            .reranker(self.reranker.clone())
            .safety_classifier(self.safety_classifier.clone())
            .generator(self.generator.clone())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{Query, RunStatus};

    #[test]
    fn defaults_build_local_providers() {
        let set = ProviderSet::from_settings(&ProviderSettings::default()).unwrap();
        assert_eq!(set.embedding_provider.name(), "hash");
        assert_eq!(set.embedding_provider.dimensions(), 1024);
        assert_eq!(set.vector_store.backend(), "memory");
        assert_eq!(set.reranker.name(), "keyword");
        assert_eq!(set.safety_classifier.name(), "keyword");
        assert_eq!(set.generator.name(), "extractive");
        assert!(set.ingestion_pipeline(RagConfig::default()).is_ok());
        assert!(set.query_orchestrator(RagConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn connected_providers_answer_before_anything_is_ingested() {
        let config = RagConfig::default();
        let set = ProviderSet::connect(&ProviderSettings::default(), &config).await.unwrap();
        let outcome = set
            .query_orchestrator(config)
            .unwrap()
            .answer(Query::new("What is the refund policy?"))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert!(outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn schema_check_rejects_a_store_with_other_dimensions() {
        let set = ProviderSet::from_settings(&ProviderSettings::default()).unwrap();
        set.vector_store.ensure_schema(8).await.unwrap();
        let err = set.ingestion_pipeline(RagConfig::default()).unwrap().ensure_schema().await;
        assert!(matches!(err, Err(RagError::DimensionMismatch { .. })));
    }

    #[test]
    fn unknown_keys_list_available_backends() {
        let settings = ProviderSettings {
            reranker: BackendSettings::new("cohere"),
            ..ProviderSettings::default()
        };
        let err = build_reranker(&settings).err().unwrap();
        let message = err.to_string();
        assert!(message.contains("unknown reranker backend 'cohere'"));
        assert!(message.contains("none, keyword"));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let settings = ProviderSettings {
            reranker: BackendSettings::new(" None "),
            ..ProviderSettings::default()
        };
        assert_eq!(build_reranker(&settings).unwrap().name(), "none");
    }

    #[test]
    fn api_keys_are_redacted_and_not_serialized() {
        let settings = ProviderSettings {
            api_key: Some("secret-key".into()),
            ..ProviderSettings::default()
        };
        assert!(!format!("{settings:?}").contains("secret-key"));
        assert!(!serde_json::to_string(&settings).unwrap().contains("secret-key"));
    }

    #[test]
    fn partial_settings_deserialize_with_defaults() {
        let settings: ProviderSettings = serde_json::from_str(
            r#"{"dimensions": 384, "generator": {"backend": "echo", "temperature": 0.0}}"#,
        )
        .unwrap();
        assert_eq!(settings.dimensions, 384);
        assert_eq!(settings.generator.backend, "echo");
        assert_eq!(settings.generator.max_tokens, 2000);
        assert_eq!(settings.vector_store.collection, "documents");
    }

    #[cfg(feature = "openai")]
    #[test]
    fn remote_backends_require_credentials() {
        let settings = ProviderSettings {
            reranker: BackendSettings::new("remote"),
            ..ProviderSettings::default()
        };
        assert!(matches!(build_reranker(&settings), Err(RagError::InvalidConfig(_))));
    }
}
