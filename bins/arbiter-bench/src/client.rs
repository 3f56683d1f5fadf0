/// Generation Client - Provider Calls
///
/// **Core Responsibility:**
/// Turn one batch of test prompts into a map of test id -> generated code
/// via the provider's chat-completions endpoint.
///
/// **Error Contract:**
/// Rate limiting and network failures surface as transient errors the
/// orchestrator retries with backoff; schema violations and other HTTP
/// failures are permanent and fail the batch immediately.
use crate::prompt::{build_prompt, response_schema};
use arbiter_common::error::GenerateError;
use arbiter_common::types::TestCase;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// One generation call: produce code for every test in the batch.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub doc_content: String,
    pub tests: Vec<TestCase>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Capability to generate code for a batch of test prompts.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<HashMap<String, String>, GenerateError>;
}

#[derive(Debug, Clone, Deserialize)]
struct ModelInfo {
    id: String,
    #[serde(default)]
    top_provider: TopProvider,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TopProvider {
    max_completion_tokens: Option<u32>,
}

/// Read-mostly cache of provider model metadata.
///
/// Owned by the client instance and refreshed explicitly under a write
/// lock; readers only ever see a complete catalog.
#[derive(Default)]
struct ModelCatalog {
    models: RwLock<Option<HashMap<String, ModelInfo>>>,
}

/// OpenRouter-backed generation client.
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    language: String,
    catalog: ModelCatalog,
}

impl OpenRouterClient {
    pub fn new(api_key: String, language: String) -> Result<Self, GenerateError> {
        Self::with_base_url(api_key, language, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        api_key: String,
        language: String,
        base_url: String,
    ) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GenerateError::Network(e.to_string()))?;

        Ok(OpenRouterClient {
            http,
            base_url,
            api_key,
            language,
            catalog: ModelCatalog::default(),
        })
    }

    /// Fetch the provider's model list and replace the catalog.
    pub async fn refresh_models(&self) -> Result<usize, GenerateError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GenerateError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        #[derive(Deserialize)]
        struct ModelList {
            data: Vec<ModelInfo>,
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| GenerateError::MalformedResponse(e.to_string()))?;

        let count = list.data.len();
        let catalog: HashMap<String, ModelInfo> =
            list.data.into_iter().map(|m| (m.id.clone(), m)).collect();
        *self.catalog.models.write().await = Some(catalog);

        info!(models = count, "Refreshed provider model catalog");
        Ok(count)
    }

    /// Completion-token ceiling for a model, from the catalog's
    /// `top_provider` metadata. Falls back to a conservative default when
    /// the model is unknown.
    pub async fn max_tokens_for(&self, model: &str) -> Result<u32, GenerateError> {
        if self.catalog.models.read().await.is_none() {
            self.refresh_models().await?;
        }

        let models = self.catalog.models.read().await;
        let max_tokens = models
            .as_ref()
            .and_then(|m| m.get(model))
            .and_then(|m| m.top_provider.max_completion_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        Ok(max_tokens)
    }
}

async fn status_error(response: reqwest::Response) -> GenerateError {
    let status = response.status().as_u16();
    if status == 429 {
        return GenerateError::RateLimited;
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    GenerateError::BadStatus { status, body }
}

#[async_trait]
impl GenerationClient for OpenRouterClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<HashMap<String, String>, GenerateError> {
        let prompt = build_prompt(&self.language, &request.doc_content, &request.tests);
        let body = json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "response_format": response_schema(&request.tests),
        });

        debug!(
            model = %request.model,
            tests = request.tests.len(),
            max_tokens = request.max_tokens,
            "Issuing generation call"
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let err = status_error(response).await;
            warn!(error = %err, "Generation call failed");
            return Err(err);
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerateError::MalformedResponse(e.to_string()))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                GenerateError::MalformedResponse("response has no message content".to_string())
            })?
            .trim();

        let responses: HashMap<String, String> = serde_json::from_str(content).map_err(|e| {
            GenerateError::MalformedResponse(format!("content is not an id->code map: {}", e))
        })?;

        Ok(responses)
    }
}
