use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use evalbox_core::LlmConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::shape::ChatShapeReport;

fn llm_err(e: impl ToString) -> BridgeError {
    BridgeError::Llm(e.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeModel {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<BridgeModel>,
}

#[derive(Debug, Serialize)]
struct RawChatRequest<'a> {
    model: &'a str,
    messages: Vec<RawChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct RawChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub model: String,
    pub content: String,
    pub total_tokens: Option<u32>,
}

fn extract_reply(response: CreateChatCompletionResponse) -> Result<ChatReply> {
    let total_tokens = response.usage.as_ref().map(|u| u.total_tokens);
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BridgeError::Llm("No response content".into()))?;

    Ok(ChatReply {
        model: response.model,
        content,
        total_tokens,
    })
}

/// Client for an OpenAI-compatible chat-completion bridge.
#[derive(Clone)]
pub struct BridgeClient {
    api_base: String,
    api_key: String,
    http: reqwest::Client,
    llm: Client<OpenAIConfig>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// `api_base` is the `/v1` root, e.g. `http://localhost:8765/v1`.
    pub fn new(api_base: &str, api_key: &str, request_timeout: Duration) -> Result<Self> {
        let api_base = api_base.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BridgeError::Http(e.to_string()))?;

        let config = OpenAIConfig::new()
            .with_api_base(&api_base)
            .with_api_key(api_key);
        let llm = Client::with_config(config).with_http_client(http.clone());

        Ok(Self {
            api_base,
            api_key: api_key.to_string(),
            http,
            llm,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(
            &config.api_base,
            &config.api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// `GET {base}/models`
    pub async fn list_models(&self) -> Result<Vec<BridgeModel>> {
        let url = format!("{}/models", self.api_base);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(&url, e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Status { url, status, body });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| BridgeError::Http(e.to_string()))?;
        let models: ModelsResponse = serde_json::from_str(&body).map_err(|e| {
            BridgeError::Parse(format!(
                "{} - Body: {}",
                e,
                body.chars().take(500).collect::<String>()
            ))
        })?;

        info!("Bridge at {} lists {} models", self.api_base, models.data.len());
        Ok(models.data)
    }

    /// Send a raw, non-streaming chat request and describe the response shape.
    ///
    /// Only transport failures are errors; odd status codes and bodies end up
    /// in the report.
    pub async fn inspect_chat(&self, model: &str, prompt: &str) -> Result<ChatShapeReport> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = RawChatRequest {
            model,
            messages: vec![RawChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(&url, e))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .text()
            .await
            .map_err(|e| BridgeError::Http(e.to_string()))?;

        debug!("Raw chat response ({}): {}", status, body);
        Ok(ChatShapeReport::from_body(status, content_type, &body))
    }

    /// Typed chat completion through the OpenAI client.
    #[allow(deprecated)]
    pub async fn chat(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<ChatReply> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(llm_err)?,
        )]);
        if let Some(max_tokens) = max_tokens {
            args.max_tokens(max_tokens);
        }
        if let Some(temperature) = temperature {
            args.temperature(temperature);
        }
        let request = args.build().map_err(llm_err)?;

        let response = self.llm.chat().create(request).await.map_err(llm_err)?;
        let reply = extract_reply(response)?;
        debug!("Chat reply from {}: {}", reply.model, reply.content);
        Ok(reply)
    }
}
