pub mod chat;
pub mod search;

pub use chat::OpenAiChatClient;
pub use search::GoogleSearchClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::models::{Chat, Material, SearchResults};

/// 对话历史来源。失败时记录日志并返回空列表，不向上抛错
#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn get_recent_chats(&self, days: i64) -> Vec<Chat>;
}

/// 网页搜索来源。失败时同样降级为空结果
#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn search_topic(&self, topic: &str, max_results: usize) -> SearchResults;

    /// 返回发布时间晚于 `since` 的资料，无日期或日期无法解析的一律保留
    async fn check_for_updates(&self, topic: &str, since: DateTime<Utc>) -> Vec<Material>;
}
