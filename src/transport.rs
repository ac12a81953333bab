use std::{env, future::Future};

use async_openai::{
    config::{AzureConfig, Config, OpenAIConfig},
    types::{
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
};
use reqwest::{StatusCode, header::HeaderMap};
use tracing::debug;

use crate::{
    config::{ConfigError, ProviderKind},
    experiment::ExperimentError,
};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Status, headers and raw body of one chat-completion call.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status:  StatusCode,
    pub headers: HeaderMap,
    pub body:    String,
}

/// Outbound chat-completion call against a named endpoint.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        endpoint: &str,
        request: &CreateChatCompletionRequest,
    ) -> impl Future<Output = Result<RawResponse, ExperimentError>> + Send;
}

/// Single user message carrying `prompt`. `max_tokens` is left out of the
/// payload entirely when no cap is given.
pub fn build_request(
    endpoint: &str,
    prompt: &str,
    max_tokens: Option<u32>,
) -> Result<CreateChatCompletionRequest, ExperimentError> {
    let user_message = ChatCompletionRequestUserMessageArgs::default()
        .content(prompt)
        .build()
        .map_err(|err| ExperimentError::Request(err.to_string()))?;

    let mut builder = CreateChatCompletionRequestArgs::default();
    builder.model(endpoint).messages(vec![user_message.into()]);
    if let Some(limit) = max_tokens {
        #[allow(deprecated)]
        builder.max_tokens(limit);
    }

    builder
        .build()
        .map_err(|err| ExperimentError::Request(err.to_string()))
}

/// Where and how requests are authenticated.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi(OpenAIConfig),
    /// Azure routes by deployment, so a config is built per endpoint.
    Azure {
        api_base:    String,
        api_key:     String,
        api_version: String,
    },
}

/// Transport that posts requests over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http:     reqwest::Client,
    provider: Provider,
}

impl HttpTransport {
    pub fn new(provider: Provider) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider,
        }
    }

    /// Reads credentials from the environment for the chosen provider.
    pub fn from_env(kind: ProviderKind, api_version: &str) -> Result<Self, ConfigError> {
        let provider = match kind {
            ProviderKind::OpenAi => {
                let api_key =
                    env::var("OPENAI_API_KEY").map_err(|_| ConfigError::MissingEnv("OPENAI_API_KEY"))?;
                let mut config = OpenAIConfig::new().with_api_key(api_key);
                if let Ok(url) = env::var("OPENAI_BASE_URL") {
                    config = config.with_api_base(url);
                }
                Provider::OpenAi(config)
            }
            ProviderKind::Azure => Provider::Azure {
                api_base:    env::var("AZURE_OPENAI_ENDPOINT")
                    .map_err(|_| ConfigError::MissingEnv("AZURE_OPENAI_ENDPOINT"))?,
                api_key:     env::var("AZURE_OPENAI_API_KEY")
                    .map_err(|_| ConfigError::MissingEnv("AZURE_OPENAI_API_KEY"))?,
                api_version: api_version.to_string(),
            },
        };

        Ok(Self::new(provider))
    }

    async fn post<C: Config>(
        &self,
        config: &C,
        request: &CreateChatCompletionRequest,
    ) -> Result<RawResponse, ExperimentError> {
        let url = config.url(CHAT_COMPLETIONS_PATH);
        debug!(url = %url, "transport.post");

        let response = self
            .http
            .post(url)
            .query(&config.query())
            .headers(config.headers())
            .json(request)
            .send()
            .await
            .map_err(|err| ExperimentError::Transport(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|err| ExperimentError::Transport(err.to_string()))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &CreateChatCompletionRequest,
    ) -> Result<RawResponse, ExperimentError> {
        match &self.provider {
            Provider::OpenAi(config) => self.post(config, request).await,
            Provider::Azure {
                api_base,
                api_key,
                api_version,
            } => {
                let config = AzureConfig::new()
                    .with_api_base(api_base)
                    .with_api_key(api_key)
                    .with_api_version(api_version)
                    .with_deployment_id(endpoint);
                self.post(&config, request).await
            }
        }
    }
}
