use crate::error::ProviderError;
use crate::models::{
    AudioRequest, AudioResponse, ChatRequest, ChatResponse, Choice, EmbeddingRequest,
    EmbeddingResponse, ImageRequest, ImageResponse, Message, Role, SpeechRequest, SpeechResponse,
    Usage,
};
use crate::providers::{HealthStatus, Provider, ProviderConfig, ProviderHealth, StreamResult};

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Instant;

use super::http_client::map_error_response;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "bedrock";

/// Adapter for Amazon Bedrock's `InvokeModel` API, reached over a hand-signed
/// AWS Signature Version 4 request rather than a static bearer token.
///
/// Request/response translation targets the Anthropic Messages body shape,
/// the same one [`super::anthropic`] speaks directly — Bedrock just wraps it
/// behind `/model/{id}/invoke` and drops the top-level `model` field in
/// favor of `anthropic_version`.
///
/// Credentials come from `ProviderConfig.api_key` (access key id) and
/// `ProviderConfig.headers`: `aws-secret-access-key` (required),
/// `aws-region` (defaults to `us-east-1`), `aws-session-token` (optional,
/// for assumed-role credentials).
pub struct BedrockProvider {
    client: Client,
    config: ProviderConfig,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    region: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct BedrockAnthropicRequest {
    anthropic_version: String,
    max_tokens: u32,
    messages: Vec<BedrockMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct BedrockMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct BedrockAnthropicResponse {
    id: String,
    content: Vec<BedrockContent>,
    model: String,
    stop_reason: Option<String>,
    usage: BedrockUsage,
}

#[derive(Debug, Deserialize)]
struct BedrockContent {
    text: String,
}

#[derive(Debug, Deserialize)]
struct BedrockUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl BedrockProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        let secret_access_key = config
            .headers
            .get("aws-secret-access-key")
            .cloned()
            .ok_or_else(|| ProviderError::Configuration {
                message: "bedrock provider requires an aws-secret-access-key header".to_string(),
            })?;

        let region = config
            .headers
            .get("aws-region")
            .cloned()
            .unwrap_or_else(|| "us-east-1".to_string());

        let session_token = config.headers.get("aws-session-token").cloned();

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{region}.amazonaws.com"));

        Ok(Self {
            client,
            access_key_id: config.api_key.clone(),
            config,
            secret_access_key,
            session_token,
            region,
            base_url,
        })
    }

    fn map_model(&self, model: &str) -> String {
        self.config
            .model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| match model {
                "claude-3-5-sonnet" | "claude-3-sonnet" | "claude" => {
                    "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string()
                }
                "claude-3-haiku" => "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
                _ => model.to_string(),
            })
    }

    fn convert_messages(&self, messages: Vec<Message>) -> Vec<BedrockMessage> {
        messages
            .into_iter()
            .filter_map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    _ => return None,
                };
                Some(BedrockMessage {
                    role: role.to_string(),
                    content: msg.content,
                })
            })
            .collect()
    }

    fn convert_response(&self, response: BedrockAnthropicResponse) -> ChatResponse {
        let content = response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        ChatResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp() as u64,
            model: response.model,
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content,
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
                finish_reason: response.stop_reason,
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            }),
            system_fingerprint: None,
        }
    }

    /// Sign and send a `POST` with a JSON body, returning the raw response.
    ///
    /// AWS Signature Version 4: canonical request -> string to sign ->
    /// derived signing key (`HMAC` chain over date/region/service/
    /// `aws4_request`) -> signature, per AWS's published algorithm.
    async fn signed_post(
        &self,
        path: &str,
        body: &[u8],
    ) -> Result<reqwest::Response, ProviderError> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let host = self
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();

        let payload_hash = hex::encode(Sha256::digest(body));

        let mut canonical_headers = format!("host:{host}\n");
        canonical_headers.push_str(&format!("x-amz-content-sha256:{payload_hash}\n"));
        canonical_headers.push_str(&format!("x-amz-date:{amz_date}\n"));
        let mut signed_headers = "host;x-amz-content-sha256;x-amz-date".to_string();
        if let Some(token) = &self.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{token}\n"));
            signed_headers.push_str(";x-amz-security-token");
        }

        let canonical_request = format!(
            "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        );

        let credential_scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.derive_signing_key(&date_stamp);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id,
        );

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .post(&url)
            .header("host", host)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date)
            .header("authorization", authorization)
            .header("content-type", "application/json")
            .body(body.to_vec());

        if let Some(token) = &self.session_token {
            req = req.header("x-amz-security-token", token);
        }

        Ok(req.send().await?)
    }

    fn derive_signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_access_key).as_bytes(),
            date_stamp.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

#[async_trait::async_trait]
impl Provider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn supports_function_calling(&self) -> bool {
        false
    }

    fn supported_models(&self) -> Vec<String> {
        vec![
            "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
            "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            "anthropic.claude-3-opus-20240229-v1:0".to_string(),
        ]
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let model = self.map_model(&request.model);
        let messages = self.convert_messages(request.messages);

        let bedrock_request = BedrockAnthropicRequest {
            anthropic_version: "bedrock-2023-05-31".to_string(),
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages,
            temperature: request.temperature,
        };

        let body = serde_json::to_vec(&bedrock_request).map_err(ProviderError::Serialization)?;
        let path = format!("/model/{model}/invoke");
        let response = self.signed_post(&path, &body).await?;

        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let bedrock_response: BedrockAnthropicResponse = response.json().await?;
        Ok(self.convert_response(bedrock_response))
    }

    async fn stream_chat_completion(
        &self,
        _request: ChatRequest,
    ) -> Result<StreamResult, ProviderError> {
        Err(ProviderError::Configuration {
            message: "Streaming via InvokeModelWithResponseStream is not implemented for the Bedrock adapter".to_string(),
        })
    }

    async fn embedding(
        &self,
        _request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::Configuration {
            message: "Embeddings not supported by the Bedrock adapter".to_string(),
        })
    }

    async fn image_generation(
        &self,
        _request: ImageRequest,
    ) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::Configuration {
            message: "Image generation not supported by the Bedrock adapter".to_string(),
        })
    }

    async fn audio_transcription(
        &self,
        _request: AudioRequest,
    ) -> Result<AudioResponse, ProviderError> {
        Err(ProviderError::Configuration {
            message: "Audio transcription not supported by the Bedrock adapter".to_string(),
        })
    }

    async fn text_to_speech(
        &self,
        _request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        Err(ProviderError::Configuration {
            message: "Text-to-speech not supported by the Bedrock adapter".to_string(),
        })
    }

    async fn health_check(&self) -> Result<ProviderHealth, ProviderError> {
        let start = Instant::now();

        let health_request = BedrockAnthropicRequest {
            anthropic_version: "bedrock-2023-05-31".to_string(),
            max_tokens: 1,
            messages: vec![BedrockMessage {
                role: "user".to_string(),
                content: "Hi".to_string(),
            }],
            temperature: Some(0.0),
        };

        let body = match serde_json::to_vec(&health_request) {
            Ok(body) => body,
            Err(e) => {
                let mut details = HashMap::new();
                details.insert("error".to_string(), e.to_string());
                return Ok(ProviderHealth {
                    status: HealthStatus::Unhealthy,
                    latency_ms: None,
                    error_rate: 1.0,
                    last_check: Utc::now(),
                    details,
                });
            }
        };

        let path = "/model/anthropic.claude-3-haiku-20240307-v1:0/invoke";
        let response = self.signed_post(path, &body).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(ProviderHealth {
                status: HealthStatus::Healthy,
                latency_ms: Some(latency_ms),
                error_rate: 0.0,
                last_check: Utc::now(),
                details: HashMap::new(),
            }),
            Ok(resp) => {
                let mut details = HashMap::new();
                details.insert("status".to_string(), resp.status().to_string());
                Ok(ProviderHealth {
                    status: HealthStatus::Degraded,
                    latency_ms: Some(latency_ms),
                    error_rate: 1.0,
                    last_check: Utc::now(),
                    details,
                })
            }
            Err(e) => {
                let mut details = HashMap::new();
                details.insert("error".to_string(), e.to_string());
                Ok(ProviderHealth {
                    status: HealthStatus::Degraded,
                    latency_ms: Some(latency_ms),
                    error_rate: 1.0,
                    last_check: Utc::now(),
                    details,
                })
            }
        }
    }
}
