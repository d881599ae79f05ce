use async_trait::async_trait;
use beacon_config::{AiConfig, AiProviderKind};
use beacon_core::Secret;
use serde_json::{Value, json};

use crate::SummaryError;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Generative-AI text endpoint. Implementations return the upstream JSON
/// response body untouched; callers extract what they need.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Value, SummaryError>;
}

pub struct LoadedAiProvider {
    pub provider: Box<dyn AiProvider>,
    pub provider_name: String,
    pub model_name: String,
}

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Secret,
    model: String,
    api_base: String,
}

impl GeminiProvider {
    pub fn from_env_key(api_key_env: &str, model: Option<String>) -> Result<Self, SummaryError> {
        let api_key = Secret::from_env(api_key_env)
            .ok_or_else(|| SummaryError::MissingApiKey(api_key_env.to_owned()))?;

        Ok(Self::new(api_key, resolve_gemini_model(model)))
    }

    pub fn new(api_key: Secret, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            api_base: GEMINI_API_BASE.to_owned(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base,
            self.model,
            self.api_key.expose()
        )
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<Value, SummaryError> {
        let body = json!({
            "contents": [
                {
                    "parts": [
                        {
                            "text": prompt
                        }
                    ]
                }
            ]
        });

        let response = self
            .client
            .post(self.endpoint_url())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .as_ref()
                .and_then(|value| value.pointer("/error/message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("upstream returned {status}"));
            return Err(SummaryError::Upstream(message));
        }

        Ok(response.json::<Value>().await?)
    }
}

/// Canned provider for tests and keyless development runs.
#[derive(Debug, Clone)]
pub struct MockProvider {
    text: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            text: Some("Mock release notes.".to_owned()),
        }
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            text: Some(text.to_owned()),
        }
    }

    /// A provider whose responses carry no usable text.
    pub fn empty() -> Self {
        Self { text: None }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    async fn generate(&self, _prompt: &str) -> Result<Value, SummaryError> {
        match &self.text {
            Some(text) => Ok(json!({
                "candidates": [
                    {
                        "content": {
                            "parts": [
                                {
                                    "text": text
                                }
                            ]
                        }
                    }
                ]
            })),
            None => Ok(json!({ "candidates": [] })),
        }
    }
}

/// Pick a provider from configuration. `Auto` uses Gemini when its key is
/// present and falls back to the mock otherwise; an explicit `Gemini`
/// without a key is an error the caller surfaces.
pub fn load_ai_provider(config: &AiConfig) -> Result<LoadedAiProvider, SummaryError> {
    match config.provider {
        AiProviderKind::Auto => {
            if let Some(api_key) = Secret::from_env(&config.api_key_env) {
                let model = resolve_gemini_model(config.model.clone());
                Ok(LoadedAiProvider {
                    provider: Box::new(GeminiProvider::new(api_key, model.clone())),
                    provider_name: AiProviderKind::Gemini.as_str().to_owned(),
                    model_name: model,
                })
            } else {
                Ok(LoadedAiProvider {
                    provider: Box::new(MockProvider::new()),
                    provider_name: AiProviderKind::Mock.as_str().to_owned(),
                    model_name: "mock".to_owned(),
                })
            }
        }
        AiProviderKind::Mock => Ok(LoadedAiProvider {
            provider: Box::new(MockProvider::new()),
            provider_name: AiProviderKind::Mock.as_str().to_owned(),
            model_name: "mock".to_owned(),
        }),
        AiProviderKind::Gemini => {
            let provider = GeminiProvider::from_env_key(&config.api_key_env, config.model.clone())?;
            Ok(LoadedAiProvider {
                model_name: provider.model_name().to_owned(),
                provider: Box::new(provider),
                provider_name: AiProviderKind::Gemini.as_str().to_owned(),
            })
        }
    }
}

/// The generated text from a Gemini-shaped response body, when present.
pub fn extract_text_part(response: &Value) -> Option<String> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn resolve_gemini_model(model: Option<String>) -> String {
    model
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_owned())
}
