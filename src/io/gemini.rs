//! Gemini `generateContent` client
//!
//! One request carries the prompt text followed by inline base64 images.

use crate::config::ModelConfig;
use crate::types::{LidarError, LidarResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Longest error-body excerpt kept in a [`LidarError::ModelService`]
const ERROR_BODY_EXCERPT: usize = 500;

/// An image attached to a request
#[derive(Debug, Clone)]
pub struct ImagePart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Prompt text plus images, sent as one multimodal request
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub prompt: String,
    pub images: Vec<ImagePart>,
}

/// A text-generating multimodal model
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Return the model's raw text answer
    async fn generate(&self, request: &ModelRequest) -> LidarResult<String>;
}

// Wire format of the REST API.

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// HTTP client for the Gemini REST API
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, api_key: &str) -> LidarResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.name.clone(),
            api_key: api_key.to_string(),
        })
    }

    /// Build a client with the key from `config.api_key_env`.
    ///
    /// Fails with [`LidarError::MissingCredential`] before any network use
    /// when the variable is unset or blank.
    pub fn from_env(config: &ModelConfig) -> LidarResult<Self> {
        let key = std::env::var(&config.api_key_env).unwrap_or_default();
        if key.trim().is_empty() {
            return Err(LidarError::MissingCredential(config.api_key_env.clone()));
        }
        Self::new(config, key.trim())
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

fn request_body(request: &ModelRequest) -> GenerateContentRequest<'_> {
    let mut parts = Vec::with_capacity(request.images.len() + 1);
    parts.push(RequestPart::Text {
        text: &request.prompt,
    });
    for image in &request.images {
        parts.push(RequestPart::InlineData {
            inline_data: InlineData {
                mime_type: &image.mime_type,
                data: STANDARD.encode(&image.data),
            },
        });
    }
    GenerateContentRequest {
        contents: vec![Content { role: "user", parts }],
    }
}

/// Concatenated text parts of the first candidate
fn response_text(response: GenerateContentResponse) -> LidarResult<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LidarError::InvalidResponse {
            reason: "response has no candidates".to_string(),
            excerpt: String::new(),
        })?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LidarError::InvalidResponse {
            reason: format!(
                "candidate has no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
            excerpt: String::new(),
        });
    }
    Ok(text)
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, request: &ModelRequest) -> LidarResult<String> {
        log::info!(
            "Sending prompt with {} image(s) to {}",
            request.images.len(),
            self.model
        );

        let resp = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LidarError::ModelService {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_EXCERPT).collect(),
            });
        }

        let parsed: GenerateContentResponse = resp.json().await?;
        let text = response_text(parsed)?;
        log::debug!("Model returned {} characters", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let request = ModelRequest {
            prompt: "find walls".to_string(),
            images: vec![ImagePart {
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
            }],
        };
        let value = serde_json::to_value(request_body(&request)).unwrap();
        let parts = &value["contents"][0]["parts"];
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(parts[0]["text"], "find walls");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "AQID");
    }

    #[test]
    fn test_response_text_joins_parts() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"{\"type\":"},{"text":"\"FeatureCollection\"}"}]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response_text(parsed).unwrap(), r#"{"type":"FeatureCollection"}"#);
    }

    #[test]
    fn test_blocked_response_is_invalid() {
        let json = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let err = response_text(parsed).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(response_text(empty).is_err());
    }

    #[test]
    fn test_missing_key_is_missing_credential() {
        let config = ModelConfig {
            api_key_env: "LIDAR_PROSPECT_TEST_UNSET_KEY".to_string(),
            ..ModelConfig::default()
        };
        match GeminiClient::from_env(&config) {
            Err(LidarError::MissingCredential(var)) => assert_eq!(var, "LIDAR_PROSPECT_TEST_UNSET_KEY"),
            other => panic!("expected MissingCredential, got {:?}", other),
        }
    }

    #[test]
    fn test_url_layout() {
        let client = GeminiClient::new(&ModelConfig::default(), "k").unwrap();
        assert_eq!(
            client.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }
}
