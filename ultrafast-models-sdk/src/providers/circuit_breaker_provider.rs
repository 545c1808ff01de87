use crate::circuit_breaker::{AdmissionError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::ProviderError;
use crate::models::{
    AudioRequest, AudioResponse, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse,
    ImageRequest, ImageResponse, SpeechRequest, SpeechResponse,
};
use crate::providers::{Provider, ProviderHealth, StreamResult};
use std::sync::Arc;
use std::time::Duration;

/// Wrapper that adds circuit breaker protection to any provider, for
/// standalone-mode use where there is no surrounding Coordinator managing
/// breaker admission directly. A per-call timeout is layered on top since the
/// breaker itself only tracks outcomes, not deadlines.
pub struct CircuitBreakerProvider {
    inner: Arc<dyn Provider>,
    circuit_breaker: CircuitBreaker,
    request_timeout: Duration,
}

impl CircuitBreakerProvider {
    pub fn new(provider: Arc<dyn Provider>, config: CircuitBreakerConfig) -> Self {
        Self::with_timeout(provider, config, Duration::from_secs(30))
    }

    pub fn with_timeout(
        provider: Arc<dyn Provider>,
        config: CircuitBreakerConfig,
        request_timeout: Duration,
    ) -> Self {
        let circuit_breaker = CircuitBreaker::new(provider.name().to_string(), config);

        Self {
            inner: provider,
            circuit_breaker,
            request_timeout,
        }
    }

    pub fn with_default_config(provider: Arc<dyn Provider>) -> Self {
        Self::new(provider, CircuitBreakerConfig::default())
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Run `op` under breaker admission and a request timeout, recording the
    /// outcome on the guard before returning.
    async fn guarded<T, F>(&self, op: F) -> Result<T, ProviderError>
    where
        F: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let guard = match self.circuit_breaker.try_admit() {
            Ok(guard) => guard,
            Err(AdmissionError::Open) => {
                tracing::warn!(provider = self.inner.name(), "circuit breaker is OPEN");
                return Err(ProviderError::RetryableError {
                    message: format!(
                        "circuit open for {}, retry after {:?}",
                        self.inner.name(),
                        self.circuit_breaker.retry_after()
                    ),
                });
            }
            Err(AdmissionError::HalfOpenSaturated) => {
                return Err(ProviderError::RetryableError {
                    message: format!(
                        "circuit half-open probe limit reached for {}",
                        self.inner.name()
                    ),
                });
            }
        };

        match tokio::time::timeout(self.request_timeout, op).await {
            Ok(Ok(value)) => {
                guard.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                guard.record_failure();
                Err(err)
            }
            Err(_) => {
                guard.record_failure();
                Err(ProviderError::Timeout)
            }
        }
    }
}

#[async_trait::async_trait]
impl Provider for CircuitBreakerProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    fn supports_function_calling(&self) -> bool {
        self.inner.supports_function_calling()
    }

    fn supported_models(&self) -> Vec<String> {
        self.inner.supported_models()
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.guarded(self.inner.chat_completion(request)).await
    }

    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<StreamResult, ProviderError> {
        // Streaming establishes the connection under breaker protection; once
        // the stream is handed back, individual chunk failures are the
        // caller's concern, not the breaker's.
        if self.circuit_breaker.state() == CircuitState::Open {
            return Err(ProviderError::ServiceUnavailable);
        }
        self.guarded(self.inner.stream_chat_completion(request))
            .await
    }

    async fn embedding(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        self.guarded(self.inner.embedding(request)).await
    }

    async fn image_generation(
        &self,
        request: ImageRequest,
    ) -> Result<ImageResponse, ProviderError> {
        self.guarded(self.inner.image_generation(request)).await
    }

    async fn audio_transcription(
        &self,
        request: AudioRequest,
    ) -> Result<AudioResponse, ProviderError> {
        self.guarded(self.inner.audio_transcription(request)).await
    }

    async fn text_to_speech(
        &self,
        request: SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        self.guarded(self.inner.text_to_speech(request)).await
    }

    async fn health_check(&self) -> Result<ProviderHealth, ProviderError> {
        self.guarded(self.inner.health_check()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::providers::{HealthStatus, ProviderHealth};
    use std::collections::HashMap;

    struct MockProvider {
        name: String,
        should_fail: bool,
        delay: Duration,
    }

    impl MockProvider {
        fn new(name: String, should_fail: bool, delay: Duration) -> Self {
            Self {
                name,
                should_fail,
                delay,
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports_streaming(&self) -> bool {
            false
        }

        fn supports_function_calling(&self) -> bool {
            false
        }

        fn supported_models(&self) -> Vec<String> {
            vec!["test-model".to_string()]
        }

        async fn chat_completion(
            &self,
            _request: ChatRequest,
        ) -> Result<ChatResponse, ProviderError> {
            tokio::time::sleep(self.delay).await;

            if self.should_fail {
                Err(ProviderError::ServiceUnavailable)
            } else {
                Ok(ChatResponse {
                    id: "test-id".to_string(),
                    object: "chat.completion".to_string(),
                    created: 1234567890,
                    model: "test-model".to_string(),
                    choices: vec![],
                    usage: None,
                    system_fingerprint: None,
                })
            }
        }

        async fn stream_chat_completion(
            &self,
            _request: ChatRequest,
        ) -> Result<StreamResult, ProviderError> {
            Err(ProviderError::Configuration {
                message: "Streaming not supported by mock provider".to_string(),
            })
        }

        async fn health_check(&self) -> Result<ProviderHealth, ProviderError> {
            if self.should_fail {
                Err(ProviderError::ServiceUnavailable)
            } else {
                Ok(ProviderHealth {
                    status: HealthStatus::Healthy,
                    latency_ms: Some(10),
                    last_check: chrono::Utc::now(),
                    details: HashMap::new(),
                    error_rate: 0.0,
                })
            }
        }
    }

    fn config(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            min_requests: u32::MAX,
            failure_rate_threshold: 1.1,
            recovery_timeout: Duration::from_millis(100),
            ..CircuitBreakerConfig::default()
        }
    }

    #[tokio::test]
    async fn succeeds_and_stays_closed() {
        let mock_provider = Arc::new(MockProvider::new(
            "test".to_string(),
            false,
            Duration::from_millis(10),
        ));

        let cb_provider =
            CircuitBreakerProvider::with_timeout(mock_provider, config(2), Duration::from_millis(50));

        let request = ChatRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("test")],
            ..Default::default()
        };

        let result = cb_provider.chat_completion(request).await;
        assert!(result.is_ok());
        assert_eq!(cb_provider.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_failure_and_blocks_next_call() {
        let mock_provider = Arc::new(MockProvider::new(
            "test".to_string(),
            true,
            Duration::from_millis(10),
        ));

        let cb_provider =
            CircuitBreakerProvider::with_timeout(mock_provider, config(1), Duration::from_millis(50));

        let request = ChatRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("test")],
            ..Default::default()
        };

        let result = cb_provider.chat_completion(request.clone()).await;
        assert!(result.is_err());
        assert_eq!(cb_provider.circuit_state(), CircuitState::Open);

        let result = cb_provider.chat_completion(request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn slow_call_times_out_and_opens_circuit() {
        let mock_provider = Arc::new(MockProvider::new(
            "test".to_string(),
            false,
            Duration::from_millis(100),
        ));

        let cb_provider =
            CircuitBreakerProvider::with_timeout(mock_provider, config(1), Duration::from_millis(20));

        let request = ChatRequest {
            model: "test-model".to_string(),
            messages: vec![Message::user("test")],
            ..Default::default()
        };

        let result = cb_provider.chat_completion(request).await;
        assert!(matches!(result, Err(ProviderError::Timeout)));
        assert_eq!(cb_provider.circuit_state(), CircuitState::Open);
    }
}
