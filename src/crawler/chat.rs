use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::ChatSource;
use crate::storage::models::{parse_timestamp, Chat, ChatMessage};

#[derive(Deserialize)]
struct ConversationList {
    #[serde(default)]
    data: Vec<ConversationRef>,
}

#[derive(Deserialize)]
struct ConversationRef {
    id: String,
}

#[derive(Deserialize)]
struct ConversationDetail {
    id: String,
    title: Option<String>,
    created_at: String,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

/// 对话历史 API 客户端
pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn fetch_recent(&self, since: DateTime<Utc>) -> Result<Vec<Chat>> {
        let url = format!("{}/conversations", self.base_url);
        info!("正在拉取 {} 之后的对话", since.to_rfc3339());

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("since", since.to_rfc3339())])
            .send()
            .await
            .context("请求对话列表失败")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("对话列表返回错误 {}: {}", status, body);
        }

        let list: ConversationList = response.json().await.context("解析对话列表失败")?;

        let mut chats = Vec::with_capacity(list.data.len());
        for conversation in list.data {
            // 单个对话失败只跳过该对话
            match self.fetch_detail(&conversation.id).await {
                Ok(chat) => chats.push(chat),
                Err(e) => warn!("获取对话 {} 详情失败，跳过: {:#}", conversation.id, e),
            }
        }

        Ok(chats)
    }

    async fn fetch_detail(&self, chat_id: &str) -> Result<Chat> {
        let url = format!("{}/conversations/{}", self.base_url, chat_id);
        debug!("获取对话详情: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("请求对话详情失败")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("对话详情返回错误 {}: {}", status, body);
        }

        let detail: ConversationDetail = response.json().await.context("解析对话详情失败")?;
        let created_at = parse_timestamp(&detail.created_at)
            .with_context(|| format!("无法解析创建时间: {}", detail.created_at))?;

        Ok(Chat {
            chat_id: detail.id,
            title: detail.title.unwrap_or_else(|| "Untitled Chat".to_string()),
            created_at,
            messages: detail.messages,
            topics: Vec::new(),
        })
    }
}

#[async_trait]
impl ChatSource for OpenAiChatClient {
    async fn get_recent_chats(&self, days: i64) -> Vec<Chat> {
        let since = Utc::now() - chrono::Duration::days(days);

        match self.fetch_recent(since).await {
            Ok(chats) => {
                info!("获取到 {} 个对话", chats.len());
                chats
            }
            Err(e) => {
                warn!("获取对话失败: {:#}", e);
                Vec::new()
            }
        }
    }
}
