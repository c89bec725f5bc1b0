use crate::completion::CompletionModel;
use crate::embeddings::EmbeddingModel;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection settings for an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub model: String,
    /// Output width for embedding models; ignored for completion.
    pub dimensions: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl HttpProviderConfig {
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, ProviderError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            endpoint,
            api_key: None,
            model: model.into(),
            dimensions: 1_536,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        })
    }
}

struct JsonApi {
    client: Client,
    config: HttpProviderConfig,
}

impl JsonApi {
    fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// POST `body` to `path`, retrying rate limits, server errors and network
    /// failures with exponential backoff.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = self.config.endpoint.join(path)?;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url.clone()).json(body);
            if let Some(api_key) = &self.config.api_key {
                request = request.bearer_auth(api_key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let details = response.text().await.unwrap_or_default();
                    let error =
                        ProviderError::Unavailable(format!("{url} returned {status}: {details}"));
                    if is_retryable(status) {
                        debug!(%url, %status, attempt, "retrying provider call");
                        last_error = Some(error);
                        continue;
                    }
                    return Err(error);
                }
                Err(error) => {
                    debug!(%url, %error, attempt, "provider request failed");
                    last_error = Some(ProviderError::Http(error));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::Unavailable(format!("{url} failed after retries"))
        }))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Embedding client for `POST {endpoint}/embeddings`.
pub struct HttpEmbedder {
    api: JsonApi,
}

impl HttpEmbedder {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            api: JsonApi::new(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.api.config.model
    }

    fn dimensions(&self) -> usize {
        self.api.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.api.config.model,
            "input": texts,
        });
        let response = self.api.post("embeddings", &body).await?;
        parse_embeddings(&response)
    }
}

fn parse_embeddings(response: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = response
        .pointer("/data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = data
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let index = item
                .pointer("/index")
                .and_then(Value::as_u64)
                .map(|index| index as usize)
                .unwrap_or(position);
            let vector = item
                .pointer("/embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| ProviderError::InvalidResponse("missing embedding".to_string()))?
                .iter()
                .map(|value| {
                    value.as_f64().map(|value| value as f32).ok_or_else(|| {
                        ProviderError::InvalidResponse("non-numeric embedding value".to_string())
                    })
                })
                .collect::<Result<Vec<f32>, ProviderError>>()?;
            Ok((index, vector))
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

/// Chat completion client for `POST {endpoint}/chat/completions`.
pub struct HttpCompletionModel {
    api: JsonApi,
}

impl HttpCompletionModel {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            api: JsonApi::new(config)?,
        })
    }
}

#[async_trait]
impl CompletionModel for HttpCompletionModel {
    fn model_name(&self) -> &str {
        &self.api.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.api.config.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self.api.post("chat/completions", &body).await?;
        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("missing choices[0].message.content".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_its_path_prefix() {
        let config = HttpProviderConfig::new("https://api.example.com/v1", "embed-small").unwrap();
        assert_eq!(
            config.endpoint.join("embeddings").unwrap().as_str(),
            "https://api.example.com/v1/embeddings"
        );
    }

    #[test]
    fn embeddings_are_returned_in_input_order() {
        let response = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_embeddings(&response).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn malformed_embedding_payload_is_rejected() {
        let missing = parse_embeddings(&json!({ "object": "list" })).unwrap_err();
        assert!(matches!(missing, ProviderError::InvalidResponse(_)));

        let non_numeric =
            parse_embeddings(&json!({ "data": [{ "embedding": ["x"] }] })).unwrap_err();
        assert!(matches!(non_numeric, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn only_rate_limits_and_server_errors_retry() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }
}
