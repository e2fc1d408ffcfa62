use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use super::SearchSource;
use crate::storage::models::{parse_timestamp, Material, SearchResults};

/// Custom Search 单次最多返回 10 条
const MAX_PAGE_SIZE: usize = 10;
const PUBLISHED_TIME_TAG: &str = "article:published_time";

#[derive(Deserialize, Default)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Deserialize)]
struct CseItem {
    title: Option<String>,
    #[serde(default)]
    link: String,
    snippet: Option<String>,
    pagemap: Option<PageMap>,
}

#[derive(Deserialize)]
struct PageMap {
    #[serde(default)]
    metatags: Vec<HashMap<String, serde_json::Value>>,
}

impl From<CseItem> for Material {
    fn from(item: CseItem) -> Self {
        let date = item
            .pagemap
            .as_ref()
            .and_then(|p| p.metatags.first())
            .and_then(|tags| tags.get(PUBLISHED_TIME_TAG))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Material {
            title: item.title,
            link: item.link,
            snippet: item.snippet,
            date,
        }
    }
}

/// Google Custom Search JSON API 客户端
pub struct GoogleSearchClient {
    client: Client,
    api_url: String,
    api_key: String,
    cse_id: String,
}

impl GoogleSearchClient {
    pub fn new(api_url: &str, api_key: &str, cse_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            cse_id: cse_id.to_string(),
        })
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Vec<Material>> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("key", self.api_key.as_str()), ("cx", self.cse_id.as_str())])
            .query(params)
            .send()
            .await
            .context("搜索请求失败")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("搜索 API 返回错误 {}: {}", status, body);
        }

        let body: CseResponse = response.json().await.context("解析搜索结果失败")?;
        Ok(body.items.into_iter().map(Material::from).collect())
    }
}

#[async_trait]
impl SearchSource for GoogleSearchClient {
    async fn search_topic(&self, topic: &str, max_results: usize) -> SearchResults {
        let num = max_results.clamp(1, MAX_PAGE_SIZE);
        info!("搜索话题: {} (最多 {} 条)", topic, num);

        let results = match self
            .query(&[("q", topic.to_string()), ("num", num.to_string())])
            .await
        {
            Ok(mut items) => {
                items.truncate(max_results);
                items
            }
            Err(e) => {
                warn!("搜索话题 {} 失败: {:#}", topic, e);
                Vec::new()
            }
        };

        SearchResults {
            query: topic.to_string(),
            timestamp: Utc::now(),
            results,
        }
    }

    async fn check_for_updates(&self, topic: &str, since: DateTime<Utc>) -> Vec<Material> {
        let days = date_restrict_days(since, Utc::now());
        info!("检查话题 {} 自 {} 以来的新资料", topic, since.to_rfc3339());

        let params = [
            ("q", topic.to_string()),
            ("sort", "date".to_string()),
            ("dateRestrict", format!("d{}", days)),
        ];

        match self.query(&params).await {
            Ok(items) => filter_new_materials(items, since),
            Err(e) => {
                warn!("检查话题 {} 更新失败: {:#}", topic, e);
                Vec::new()
            }
        }
    }
}

/// dateRestrict 的天数，至少为 1
fn date_restrict_days(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days().max(1)
}

/// 只保留严格晚于 `since` 的资料；日期缺失或无法解析的保留
pub fn filter_new_materials(items: Vec<Material>, since: DateTime<Utc>) -> Vec<Material> {
    items
        .into_iter()
        .filter(|item| match item.date.as_deref().map(parse_timestamp) {
            Some(Some(published)) => published > since,
            _ => true,
        })
        .collect()
}
