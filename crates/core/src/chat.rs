use crate::conversation::ConversationStore;
use crate::tenant::TenantRegistry;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use sitechat_common::{MessageRole, RankedChunk, Result, SiteChatError};
use sitechat_knowledge::cache::{CacheKey, ResponseCache};
use sitechat_knowledge::search::Retriever;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u16,
    pub temperature: f32,
    /// Previous messages included in the prompt.
    pub history_limit: usize,
    pub default_system_prompt: String,
    pub fallback_reply: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 800,
            temperature: 0.7,
            history_limit: 8,
            default_system_prompt: "You are a helpful website assistant. Answer concisely and \
                 truthfully. If you do not have the information, say so instead of guessing."
                .to_string(),
            fallback_reply: "I'm having trouble generating a response right now. Please try \
                 again in a moment."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// Hosted chat-completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String>;
}

pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    config: ChatConfig,
}

impl OpenAiChatModel {
    pub fn new(api_key: Option<String>, config: ChatConfig) -> Self {
        let openai_config = if let Some(key) = api_key {
            OpenAIConfig::new().with_api_key(key)
        } else {
            OpenAIConfig::new()
        };
        Self {
            client: Client::with_config(openai_config),
            config,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let mut request_messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(messages.len());
        for message in messages {
            let built = match message.role {
                PromptRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(message.content.clone())
                        .build()
                        .map_err(|e| SiteChatError::Provider(e.to_string()))?,
                ),
                PromptRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(message.content.clone())
                        .build()
                        .map_err(|e| SiteChatError::Provider(e.to_string()))?,
                ),
                PromptRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.content.clone())
                        .build()
                        .map_err(|e| SiteChatError::Provider(e.to_string()))?,
                ),
            };
            request_messages.push(built);
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(request_messages)
            .max_tokens(self.config.max_tokens)
            .temperature(self.config.temperature)
            .build()
            .map_err(|e| SiteChatError::Provider(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| SiteChatError::Provider(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| SiteChatError::Provider("model returned no content".to_string()))
    }
}

/// Answers user questions: retrieval, prompt assembly, completion, cache and
/// persistence around it.
pub struct ChatService {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn ChatModel>,
    cache: Arc<dyn ResponseCache>,
    conversations: Arc<ConversationStore>,
    tenants: Arc<TenantRegistry>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn ChatModel>,
        cache: Arc<dyn ResponseCache>,
        conversations: Arc<ConversationStore>,
        tenants: Arc<TenantRegistry>,
        config: ChatConfig,
    ) -> Self {
        Self {
            retriever,
            model,
            cache,
            conversations,
            tenants,
            config,
        }
    }

    pub async fn answer(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        message: &str,
    ) -> Result<String> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SiteChatError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }
        if !self.conversations.exists(tenant_id, conversation_id).await? {
            return Err(SiteChatError::NotFound(format!(
                "conversation {conversation_id} not found for tenant"
            )));
        }

        let cache_key = CacheKey {
            tenant_id,
            conversation_id,
            question: message.to_string(),
        };
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(%conversation_id, "answer served from cache");
            return Ok(cached);
        }

        // History, tenant config and retrieval are independent reads.
        let (history_result, tenant_result, retrieval_result) = tokio::join!(
            self.conversations
                .history(conversation_id, self.config.history_limit),
            self.tenants.get(tenant_id),
            self.retriever.search(tenant_id, message),
        );

        let history = history_result.unwrap_or_else(|e| {
            warn!(error = %e, "history lookup failed, answering without it");
            Vec::new()
        });
        let tenant = tenant_result.unwrap_or_else(|e| {
            warn!(error = %e, "tenant lookup failed, using default prompt");
            None
        });
        let context = retrieval_result.unwrap_or_else(|e| {
            warn!(error = %e, "retrieval failed, answering without knowledge context");
            Vec::new()
        });

        let base_prompt = tenant
            .and_then(|t| t.base_prompt)
            .unwrap_or_else(|| self.config.default_system_prompt.clone());
        let mut messages = vec![PromptMessage {
            role: PromptRole::System,
            content: build_system_prompt(&base_prompt, &context),
        }];
        for entry in &history {
            messages.push(PromptMessage {
                role: match entry.role {
                    MessageRole::User => PromptRole::User,
                    MessageRole::Assistant => PromptRole::Assistant,
                },
                content: entry.content.clone(),
            });
        }
        messages.push(PromptMessage {
            role: PromptRole::User,
            content: message.to_string(),
        });

        debug!(
            prompt_messages = messages.len(),
            context_chunks = context.len(),
            "requesting chat completion"
        );
        let reply = match self.model.complete(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, %conversation_id, "chat completion failed");
                return Ok(self.config.fallback_reply.clone());
            }
        };

        self.cache.set(cache_key, reply.clone()).await;

        // Persistence must not cost the user their answer.
        if let Err(e) = self
            .conversations
            .save_message(conversation_id, MessageRole::User, message)
            .await
        {
            warn!(error = %e, "failed to persist user message");
        }
        if let Err(e) = self
            .conversations
            .save_message(conversation_id, MessageRole::Assistant, &reply)
            .await
        {
            warn!(error = %e, "failed to persist assistant message");
        }

        info!(%conversation_id, %tenant_id, "reply generated");
        Ok(reply)
    }
}

/// System prompt = tenant base prompt plus the retrieved context, each chunk
/// labelled with its section path so the model can cite a source location.
fn build_system_prompt(base_prompt: &str, context: &[RankedChunk]) -> String {
    if context.is_empty() {
        return base_prompt.to_string();
    }

    let formatted: Vec<String> = context
        .iter()
        .map(|chunk| {
            let path = chunk.metadata.section_path();
            if path.is_empty() {
                chunk.text.clone()
            } else {
                format!("[Source: {path}]\n{}", chunk.text)
            }
        })
        .collect();

    format!(
        "{base_prompt}\n\nUse the following retrieved information when it is relevant to the \
         user's question:\n{}",
        formatted.join("\n\n---\n\n")
    )
}
