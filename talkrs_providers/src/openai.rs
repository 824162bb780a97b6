use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use talkrs_core::{CompletionRequest, DeltaStream, LLMProvider, LLMResponse, Usage};
use tracing::{debug, info};

use crate::sse::delta_stream;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// How requests are addressed and authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `POST {base}/chat/completions` with a bearer token.
    OpenAi,
    /// `POST {base}/openai/deployments/{deployment}/chat/completions` with an
    /// `api-key` header. Azure does not accept per-user attribution.
    Azure {
        deployment: String,
        api_version: String,
    },
}

/// Chat completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    flavor: ApiFlavor,
}

impl OpenAIProvider {
    pub fn new(api_key: String) -> Self {
        info!("Creating OpenAIProvider");
        Self {
            client: Client::new(),
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            flavor: ApiFlavor::OpenAi,
        }
    }

    /// Azure OpenAI resource, addressed by resource and deployment name.
    pub fn azure(
        api_key: String,
        resource_name: &str,
        deployment: String,
        api_version: String,
    ) -> Self {
        info!("Creating OpenAIProvider for Azure resource {resource_name}");
        Self {
            client: Client::new(),
            api_key,
            base_url: format!("https://{resource_name}.openai.azure.com"),
            model: deployment.clone(),
            flavor: ApiFlavor::Azure {
                deployment,
                api_version,
            },
        }
    }

    /// Point at a compatible gateway. The `/v1` suffix is appended.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = format!("{}/v1", base_url.trim_end_matches('/'));
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Route all traffic through an HTTP proxy.
    pub fn with_proxy(mut self, proxy_url: &str) -> anyhow::Result<Self> {
        self.client = Client::builder()
            .proxy(reqwest::Proxy::all(proxy_url)?)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(self)
    }

    #[must_use]
    pub const fn flavor(&self) -> &ApiFlavor {
        &self.flavor
    }

    fn endpoint(&self) -> String {
        match &self.flavor {
            ApiFlavor::OpenAi => format!("{}/chat/completions", self.base_url),
            ApiFlavor::Azure {
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                self.base_url
            ),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.flavor {
            ApiFlavor::OpenAi => builder.bearer_auth(&self.api_key),
            ApiFlavor::Azure { .. } => builder.header("api-key", &self.api_key),
        }
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let Some(user) = request.user.as_deref().filter(|u| !u.is_empty()) {
            body["user"] = json!(user);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> anyhow::Result<reqwest::Response> {
        let body = self.build_body(request, stream);
        let response = self
            .authorize(self.client.post(self.endpoint()))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            anyhow::bail!("Rate limited by upstream (HTTP 429)");
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            anyhow::bail!("HTTP {status}: {text}");
        }
        Ok(response)
    }
}

fn parse_usage(response: &serde_json::Value) -> Option<Usage> {
    response["usage"].as_object().map(|u| Usage {
        prompt_tokens: u32::try_from(u["prompt_tokens"].as_u64().unwrap_or(0)).unwrap_or(0),
        completion_tokens: u32::try_from(u["completion_tokens"].as_u64().unwrap_or(0))
            .unwrap_or(0),
        total_tokens: u32::try_from(u["total_tokens"].as_u64().unwrap_or(0)).unwrap_or(0),
    })
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<LLMResponse> {
        info!("Sending completion request: model={}", request.model);

        let response = self
            .send(request, false)
            .await?
            .json::<serde_json::Value>()
            .await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing content"))?
            .to_string();

        debug!("Received completion of {} bytes", content.len());
        Ok(LLMResponse {
            content,
            usage: parse_usage(&response),
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<DeltaStream> {
        info!("Opening completion stream: model={}", request.model);
        let response = self.send(request, true).await?;
        Ok(delta_stream(response))
    }

    fn get_default_model(&self) -> &str {
        &self.model
    }

    fn attributes_user(&self) -> bool {
        self.flavor == ApiFlavor::OpenAi
    }
}
