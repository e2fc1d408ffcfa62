use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::models::Chat;

/// 单次请求中转写文本的最大字符数
const MAX_TRANSCRIPT_CHARS: usize = 12_000;
const MAX_TOPICS_PER_CHAT: usize = 5;

/// 行首的项目符号或编号
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("static regex"));

/// 从一段对话中提取研究话题
#[async_trait]
pub trait TopicExtractor: Send + Sync {
    async fn extract_topics(&self, chat: &Chat) -> Vec<String>;
}

/// 不提取任何话题
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExtractor;

#[async_trait]
impl TopicExtractor for NoopExtractor {
    async fn extract_topics(&self, _chat: &Chat) -> Vec<String> {
        Vec::new()
    }
}

/// 对每个对话调用提取器，结果写回 `chat.topics` 并按 chat_id 返回
pub async fn extract_topics_from_chats(
    extractor: &dyn TopicExtractor,
    chats: &mut [Chat],
) -> BTreeMap<String, Vec<String>> {
    let mut topics_by_chat = BTreeMap::new();

    for chat in chats.iter_mut() {
        let topics = extractor.extract_topics(chat).await;
        debug!("对话 {} 提取到 {} 个话题", chat.chat_id, topics.len());
        chat.topics = topics.clone();
        topics_by_chat.insert(chat.chat_id.clone(), topics);
    }

    topics_by_chat
}

/// chat completions 请求体
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<RequestMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct RequestMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// 调用 chat completions 接口让模型列出话题
pub struct LlmExtractor {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmExtractor {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self {
            client,
            api_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn build_request(&self, chat: &Chat) -> ChatRequest {
        let system_prompt = format!(
            "You identify research topics in a conversation transcript.\n\
             Reply with at most {} short topic names, one per line, \
             suitable as web search queries. Output nothing else.",
            MAX_TOPICS_PER_CHAT
        );

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                RequestMessage {
                    role: "system".to_string(),
                    content: system_prompt,
                },
                RequestMessage {
                    role: "user".to_string(),
                    content: render_transcript(chat),
                },
            ],
            temperature: 0.2,
        }
    }

    async fn do_request(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context("发送请求失败")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API 返回错误 {}: {}", status, body);
        }

        let chat_response: ChatResponse = response.json().await.context("解析 API 响应失败")?;

        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl TopicExtractor for LlmExtractor {
    async fn extract_topics(&self, chat: &Chat) -> Vec<String> {
        if !self.is_configured() || chat.messages.is_empty() {
            return Vec::new();
        }

        let request = self.build_request(chat);
        match self.do_request(&request).await {
            Ok(content) => {
                let topics = parse_topic_list(&content);
                info!("对话 {} 提取话题: {:?}", chat.chat_id, topics);
                topics
            }
            Err(e) => {
                warn!("对话 {} 话题提取失败: {:#}", chat.chat_id, e);
                Vec::new()
            }
        }
    }
}

fn render_transcript(chat: &Chat) -> String {
    let mut transcript = format!("Title: {}\n\n", chat.title);
    for message in &chat.messages {
        transcript.push_str(&message.role);
        transcript.push_str(": ");
        transcript.push_str(&message.content);
        transcript.push('\n');
    }

    if transcript.len() > MAX_TRANSCRIPT_CHARS {
        let mut cut = MAX_TRANSCRIPT_CHARS;
        while !transcript.is_char_boundary(cut) {
            cut -= 1;
        }
        transcript.truncate(cut);
    }
    transcript
}

/// 解析模型返回的列表，去掉项目符号和编号
fn parse_topic_list(response: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for line in response.lines() {
        let topic = LIST_MARKER.replace(line, "");
        let topic = topic.trim().trim_matches('"').trim();
        if topic.is_empty() || topics.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
            continue;
        }
        topics.push(topic.to_string());
        if topics.len() == MAX_TOPICS_PER_CHAT {
            break;
        }
    }
    topics
}
