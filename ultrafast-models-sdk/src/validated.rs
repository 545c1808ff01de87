//! # Validated Request Types
//!
//! Typed value types and a typestate builder for the unified, provider-
//! neutral chat request described by the core (§3 `UnifiedRequest`). Each
//! constrained scalar is wrapped so that an out-of-range value cannot be
//! constructed at all, and the builder will not compile a call to `build()`
//! until `model` and at least one message have been supplied — this
//! collapses a large class of 400-level request errors into compile-time
//! impossibilities rather than a runtime validation pass.

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Message, Role, Tool, ToolChoice};

/// `temperature ∈ [0, 2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> Result<Self, CoreError> {
        if (0.0..=2.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation {
                message: format!("temperature must be within [0,2], got {value}"),
            })
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

/// `top_p ∈ (0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopP(f32);

impl TopP {
    pub fn new(value: f32) -> Result<Self, CoreError> {
        if value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation {
                message: format!("top_p must be within (0,1], got {value}"),
            })
        }
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

/// `top_k ≥ 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopK(u32);

impl TopK {
    pub fn new(value: u32) -> Result<Self, CoreError> {
        if value >= 1 {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation {
                message: "top_k must be >= 1".to_string(),
            })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// `max_tokens ∈ [1, 128000]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxTokens(u32);

impl MaxTokens {
    pub const MAX: u32 = 128_000;

    pub fn new(value: u32) -> Result<Self, CoreError> {
        if (1..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation {
                message: format!("max_tokens must be within [1,{}], got {value}", Self::MAX),
            })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// `model` — non-empty, at most 256 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let value = value.into();
        if value.is_empty() || value.len() > 256 {
            return Err(CoreError::Validation {
                message: "model must be non-empty and at most 256 characters".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-empty, validated message list with a role-alternation invariant:
/// after any leading `System` messages, roles must alternate between
/// `User` and `Assistant`, and a `Tool` message may only follow an
/// `Assistant` message (the one that issued the tool call it answers).
#[derive(Debug, Clone)]
pub struct Messages(Vec<Message>);

impl Messages {
    pub fn new(messages: Vec<Message>) -> Result<Self, CoreError> {
        if messages.is_empty() {
            return Err(CoreError::Validation {
                message: "messages must not be empty".to_string(),
            });
        }
        for m in &messages {
            if m.content.trim().is_empty() && m.tool_calls.is_none() {
                return Err(CoreError::Validation {
                    message: "message content must not be whitespace-only".to_string(),
                });
            }
        }
        Self::validate_alternation(&messages)?;
        Ok(Self(messages))
    }

    fn validate_alternation(messages: &[Message]) -> Result<(), CoreError> {
        let mut last_non_system: Option<&Role> = None;
        for m in messages {
            match &m.role {
                Role::System => continue,
                Role::Tool => {
                    if !matches!(last_non_system, Some(Role::Assistant)) {
                        return Err(CoreError::Validation {
                            message: "a tool message must follow an assistant message"
                                .to_string(),
                        });
                    }
                }
                Role::User | Role::Assistant => {
                    if let Some(last) = last_non_system {
                        if std::mem::discriminant(last) == std::mem::discriminant(&m.role) {
                            return Err(CoreError::Validation {
                                message: format!(
                                    "messages must alternate roles, got repeated {:?}",
                                    m.role
                                ),
                            });
                        }
                    }
                    last_non_system = Some(&m.role);
                }
            }
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Message> {
        self.0
    }
}

/// Unique, opaque request identifier. Generated at construction time; two
/// `UnifiedRequest`s never share one within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The validated, provider-neutral request the Router and Coordinator
/// operate on. Constructed only via [`ChatRequestBuilder`].
#[derive(Debug, Clone)]
pub struct UnifiedRequest {
    pub request_id: RequestId,
    pub model: ModelId,
    pub messages: Messages,
    pub temperature: Option<Temperature>,
    pub max_tokens: Option<MaxTokens>,
    pub top_p: Option<TopP>,
    pub top_k: Option<TopK>,
    pub stream: bool,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub system: Option<String>,
    pub tenant_id: Option<String>,
    pub deadline: Option<Instant>,
}

impl UnifiedRequest {
    /// Gateway deadline remaining from now, or `None` if this request carries
    /// no deadline (treated as the configured default by the Coordinator).
    pub fn remaining_budget(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Marker types for the typestate builder. `Unset`/`Set` track whether the
/// required fields (`model`, `messages`) have been supplied.
pub struct Unset;
pub struct Set;

/// Typestate builder for [`UnifiedRequest`]. `build()` is only a method on
/// `ChatRequestBuilder<Set, Set>` — a builder missing `model` or `messages`
/// has no `build` method to call, so the error is a compile error rather
/// than a runtime one.
pub struct ChatRequestBuilder<M, Msgs> {
    model: Option<ModelId>,
    messages: Option<Vec<Message>>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    stream: bool,
    tools: Option<Vec<Tool>>,
    tool_choice: Option<ToolChoice>,
    system: Option<String>,
    tenant_id: Option<String>,
    deadline: Option<Instant>,
    _model_state: PhantomData<M>,
    _messages_state: PhantomData<Msgs>,
}

impl Default for ChatRequestBuilder<Unset, Unset> {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatRequestBuilder<Unset, Unset> {
    pub fn new() -> Self {
        Self {
            model: None,
            messages: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            top_k: None,
            stream: false,
            tools: None,
            tool_choice: None,
            system: None,
            tenant_id: None,
            deadline: None,
            _model_state: PhantomData,
            _messages_state: PhantomData,
        }
    }
}

impl<M, Msgs> ChatRequestBuilder<M, Msgs> {
    pub fn model(self, model: impl Into<String>) -> Result<ChatRequestBuilder<Set, Msgs>, CoreError> {
        let model = ModelId::new(model)?;
        Ok(ChatRequestBuilder {
            model: Some(model),
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
            stream: self.stream,
            tools: self.tools,
            tool_choice: self.tool_choice,
            system: self.system,
            tenant_id: self.tenant_id,
            deadline: self.deadline,
            _model_state: PhantomData,
            _messages_state: PhantomData,
        })
    }

    pub fn messages(self, messages: Vec<Message>) -> ChatRequestBuilder<M, Set> {
        ChatRequestBuilder {
            model: self.model,
            messages: Some(messages),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
            stream: self.stream,
            tools: self.tools,
            tool_choice: self.tool_choice,
            system: self.system,
            tenant_id: self.tenant_id,
            deadline: self.deadline,
            _model_state: PhantomData,
            _messages_state: PhantomData,
        }
    }

    pub fn temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    pub fn top_p(mut self, value: f32) -> Self {
        self.top_p = Some(value);
        self
    }

    pub fn top_k(mut self, value: u32) -> Self {
        self.top_k = Some(value);
        self
    }

    pub fn stream(mut self, value: bool) -> Self {
        self.stream = value;
        self
    }

    pub fn tools(mut self, value: Vec<Tool>) -> Self {
        self.tools = Some(value);
        self
    }

    pub fn tool_choice(mut self, value: ToolChoice) -> Self {
        self.tool_choice = Some(value);
        self
    }

    pub fn system(mut self, value: impl Into<String>) -> Self {
        self.system = Some(value.into());
        self
    }

    pub fn tenant_id(mut self, value: impl Into<String>) -> Self {
        self.tenant_id = Some(value.into());
        self
    }

    pub fn deadline(mut self, value: Instant) -> Self {
        self.deadline = Some(value);
        self
    }

    pub fn timeout_from_now(mut self, value: Duration) -> Self {
        self.deadline = Some(Instant::now() + value);
        self
    }
}

impl ChatRequestBuilder<Set, Set> {
    /// Validate every field and produce a [`UnifiedRequest`]. Only callable
    /// once both `model` and `messages` have been set.
    pub fn build(self) -> Result<UnifiedRequest, CoreError> {
        let model = self.model.expect("Set state guarantees model is present");
        let messages = Messages::new(self.messages.expect("Set state guarantees messages is present"))?;

        let temperature = self.temperature.map(Temperature::new).transpose()?;
        let max_tokens = self.max_tokens.map(MaxTokens::new).transpose()?;
        let top_p = self.top_p.map(TopP::new).transpose()?;
        let top_k = self.top_k.map(TopK::new).transpose()?;

        if self.tool_choice.is_some() && self.tools.is_none() {
            return Err(CoreError::Validation {
                message: "tool_choice requires tools to be set".to_string(),
            });
        }

        Ok(UnifiedRequest {
            request_id: RequestId::new(),
            model,
            messages,
            temperature,
            max_tokens,
            top_p,
            top_k,
            stream: self.stream,
            tools: self.tools,
            tool_choice: self.tool_choice,
            system: self.system,
            tenant_id: self.tenant_id,
            deadline: self.deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_boundary_values() {
        assert!(Temperature::new(0.0).is_ok());
        assert!(Temperature::new(2.0).is_ok());
        assert!(MaxTokens::new(1).is_ok());
        assert!(MaxTokens::new(128_000).is_ok());
        assert!(TopP::new(1.0).is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Temperature::new(-0.1).is_err());
        assert!(Temperature::new(2.1).is_err());
        assert!(MaxTokens::new(0).is_err());
        assert!(MaxTokens::new(128_001).is_err());
        assert!(TopP::new(0.0).is_err());
        assert!(TopP::new(1.1).is_err());
        assert!(TopK::new(0).is_err());
    }

    #[test]
    fn rejects_empty_messages() {
        assert!(Messages::new(vec![]).is_err());
    }

    #[test]
    fn rejects_whitespace_only_content() {
        let err = Messages::new(vec![Message::user("   ")]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_repeated_roles() {
        let msgs = vec![Message::user("hi"), Message::user("again")];
        assert!(Messages::new(msgs).is_err());
    }

    #[test]
    fn accepts_alternating_roles_with_leading_system() {
        let msgs = vec![
            Message::system("you are a bot"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("bye"),
        ];
        assert!(Messages::new(msgs).is_ok());
    }

    #[test]
    fn builder_requires_model_and_messages() {
        let req = ChatRequestBuilder::new()
            .model("gpt-4")
            .unwrap()
            .messages(vec![Message::user("hi")])
            .max_tokens(10)
            .build()
            .unwrap();
        assert_eq!(req.model.as_str(), "gpt-4");
        assert_eq!(req.max_tokens.unwrap().get(), 10);
    }

    #[test]
    fn tool_choice_without_tools_is_rejected() {
        let result = ChatRequestBuilder::new()
            .model("gpt-4")
            .unwrap()
            .messages(vec![Message::user("hi")])
            .tool_choice(ToolChoice::Auto)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }
}
