use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// 一条资料记录：既用作话题的来源，也用作搜索发现的新资料
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(default)]
    pub title: Option<String>,
    /// 话题内的去重键
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
    /// 原始的发布时间字符串，不保证可解析
    #[serde(default)]
    pub date: Option<String>,
}

/// 被持续跟踪的研究话题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTopic {
    pub name: String,
    #[serde(alias = "last_updated", deserialize_with = "deserialize_timestamp")]
    pub last_checked: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<Material>,
    #[serde(default)]
    pub new_materials: Vec<Material>,
}

impl ResearchTopic {
    pub fn new(name: impl Into<String>, sources: Vec<Material>, now: DateTime<Utc>) -> Self {
        let mut topic = Self {
            name: name.into(),
            last_checked: now,
            sources: Vec::new(),
            new_materials: Vec::new(),
        };
        topic.merge_sources(sources);
        topic
    }

    /// 追加未出现过的来源，已有来源保持原样；返回新增数量
    pub fn merge_sources(&mut self, incoming: Vec<Material>) -> usize {
        let mut added = 0;
        for source in incoming {
            if self.sources.iter().any(|s| s.link == source.link) {
                continue;
            }
            self.sources.push(source);
            added += 1;
        }
        added
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// 从对话 API 拉取的一次会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    pub title: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// 一次话题搜索的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<Material>,
}

/// 一轮推送的完整快照，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub topic_updates: BTreeMap<String, Vec<Material>>,
    #[serde(default)]
    pub all_topics: Vec<ResearchTopic>,
}

impl UpdateRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        chats: Vec<Chat>,
        topic_updates: BTreeMap<String, Vec<Material>>,
        all_topics: Vec<ResearchTopic>,
    ) -> Self {
        Self {
            timestamp,
            chats,
            topic_updates,
            all_topics,
        }
    }

    /// `update_YYYYMMDD_HHMMSS.json`
    pub fn filename(&self) -> String {
        self.filename_with_seq(1)
    }

    /// 同一秒内的第 n 份快照：`update_YYYYMMDD_HHMMSS_n.json`，n 为 1 时不带后缀
    pub fn filename_with_seq(&self, seq: u32) -> String {
        let stamp = self.timestamp.format("%Y%m%d_%H%M%S");
        if seq <= 1 {
            format!("update_{}.json", stamp)
        } else {
            format!("update_{}_{}.json", stamp, seq)
        }
    }

    pub fn num_updates(&self) -> usize {
        self.topic_updates.values().map(Vec::len).sum()
    }

    pub fn summary(&self, filename: impl Into<String>) -> UpdateSummary {
        UpdateSummary {
            filename: filename.into(),
            timestamp: self.timestamp.to_rfc3339(),
            num_chats: self.chats.len(),
            num_updates: self.num_updates(),
        }
    }
}

/// `GET /api/updates` 列表项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub filename: String,
    pub timestamp: String,
    pub num_chats: usize,
    pub num_updates: usize,
}

/// 解析 ISO-8601 时间；不带时区的按 UTC 处理
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("无法解析时间: {}", raw)))
}
