//! Provider detection and request shaping.
//!
//! Providers differ in URL layout and in how the API key is sent.

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        deployment_name: String,
        /// e.g. "2024-08-01-preview"
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Groq (groq.com)
    Groq,
    /// Local Ollama server
    Ollama,
    /// Generic OpenAI-compatible provider
    Generic,
}

impl Provider {
    /// Detect provider from base URL.
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("openai.azure.com") || lower.contains("azure.com") {
            Self::AzureOpenAI {
                deployment_name: String::new(),
                api_version: "2024-08-01-preview".to_string(),
            }
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains(":11434") || lower.contains("ollama") {
            Self::Ollama
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Chat completions endpoint for this provider.
    #[must_use]
    pub fn chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => format!(
                "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
            ),
            Self::Groq => format!("{base}/openai/v1/chat/completions"),
            _ => format!("{base}/v1/chat/completions"),
        }
    }

    /// Attach the API key the way the provider expects it.
    pub fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match (self, api_key) {
            (Self::AzureOpenAI { .. }, Some(key)) => request.header("api-key", key),
            (_, Some(key)) => request.bearer_auth(key),
            (_, None) => request,
        }
    }

    /// Whether the `model` field belongs in the body. Azure routes by deployment.
    #[must_use]
    pub fn sends_model(&self) -> bool {
        !matches!(self, Self::AzureOpenAI { .. })
    }
}
