pub mod chat;
pub mod conversation;
pub mod tenant;

use sitechat_knowledge::jobs::IngestionQueue;
use sitechat_knowledge::search::Retriever;
use std::sync::Arc;

pub use chat::{ChatConfig, ChatModel, ChatService, OpenAiChatModel, PromptMessage, PromptRole};
pub use conversation::ConversationStore;
pub use tenant::{TenantConfig, TenantRegistry};

/// Aggregated service handles shared by the API layer. All collaborators are
/// injected; nothing here owns a global client.
pub struct ChatCore {
    pub chat: Arc<ChatService>,
    pub conversations: Arc<ConversationStore>,
    pub tenants: Arc<TenantRegistry>,
    pub retriever: Arc<dyn Retriever>,
    pub ingestion_queue: Arc<IngestionQueue>,
}

impl ChatCore {
    pub fn new(
        chat: Arc<ChatService>,
        conversations: Arc<ConversationStore>,
        tenants: Arc<TenantRegistry>,
        retriever: Arc<dyn Retriever>,
        ingestion_queue: Arc<IngestionQueue>,
    ) -> Self {
        Self {
            chat,
            conversations,
            tenants,
            retriever,
            ingestion_queue,
        }
    }
}
