use crate::config::FoundationConfig;
use crate::error::AssistantError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Text generation backend consulted by the assistant mediator.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AssistantError>;

    /// Hands every chunk to `on_chunk` as it arrives and returns the whole text.
    async fn generate_streaming(
        &self,
        prompt: &str,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, AssistantError>;
}

/// Client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, AssistantError> {
        let client = Client::builder()
            .gzip(true)
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &FoundationConfig) -> Result<Self, AssistantError> {
        Self::new(
            &config.assistant_url,
            &config.assistant_model,
            config.assistant_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// True when the server answers its model listing.
    pub async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Ollama not reachable: {}", e);
                false
            }
        }
    }

    /// Names of the locally installed models.
    pub async fn list_models(&self) -> Result<Vec<String>, AssistantError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        let tags: TagsResponse = check_status(response).await?.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn post_generate(&self, prompt: &str, stream: bool) -> Result<Response, AssistantError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream,
        };
        trace!("Sending prompt to {} ({} chars)", self.model, prompt.len());
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, AssistantError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AssistantError::Http {
        status: status.as_u16(),
        body,
    })
}

// One NDJSON line; malformed lines are skipped
fn decode_chunk(line: &[u8]) -> Option<StreamChunk> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            warn!("Skipping malformed stream line: {}", e);
            None
        }
    }
}

#[async_trait]
impl AssistantBackend for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, AssistantError> {
        let response = self.post_generate(prompt, false).await?;
        let body: GenerateResponse = response.json().await?;
        Ok(body.response)
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, AssistantError> {
        let response = self.post_generate(prompt, true).await?;
        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut full = String::new();

        while let Some(bytes) = stream.next().await {
            pending.extend_from_slice(&bytes?);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Some(chunk) = decode_chunk(&line) {
                    if !chunk.response.is_empty() {
                        on_chunk(&chunk.response);
                        full.push_str(&chunk.response);
                    }
                    if chunk.done {
                        return Ok(full);
                    }
                }
            }
        }
        // Last line without trailing newline
        if let Some(chunk) = decode_chunk(&pending) {
            if !chunk.response.is_empty() {
                on_chunk(&chunk.response);
                full.push_str(&chunk.response);
            }
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::new(&server.uri(), "mistral", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "mistral", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "mistral",
                "response": "VLC is a media player",
                "done": true
            })))
            .mount(&server)
            .await;

        let text = client(&server).generate("What is VLC?").await.unwrap();
        assert_eq!(text, "VLC is a media player");
    }

    #[tokio::test]
    async fn test_generate_streaming() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"response\":\"Hel\",\"done\":false}\n",
            "not json\n",
            "{\"response\":\"lo\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
            "{\"response\":\"ignored\",\"done\":false}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut chunks = Vec::new();
        let full = client(&server)
            .generate_streaming("hi", &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(chunks, vec!["Hel", "lo"]);
        assert_eq!(full, "Hello");
    }

    #[tokio::test]
    async fn test_http_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model 'mistral' not found"))
            .mount(&server)
            .await;

        let err = client(&server).generate("hi").await.unwrap_err();
        assert_eq!(err.kind(), AssistantErrorKind::Http);
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = OllamaClient::new("http://127.0.0.1:9", "mistral", Duration::from_secs(2)).unwrap();
        assert!(!client.is_available().await);
        let err = client.generate("hi").await.unwrap_err();
        assert!(
            matches!(err.kind(), AssistantErrorKind::Unavailable | AssistantErrorKind::Timeout),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "mistral:latest"}, {"name": "llama3:8b"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.is_available().await);
        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["mistral:latest", "llama3:8b"]
        );
    }
}
