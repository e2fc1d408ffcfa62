use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::crawler::{ChatSource, GoogleSearchClient, OpenAiChatClient, SearchSource};
use crate::extractor::{self, LlmExtractor, NoopExtractor, TopicExtractor};
use crate::generator;
use crate::mailer::{MailTransport, SmtpMailer};
use crate::storage::models::{UpdateRecord, UpdateSummary};
use crate::storage::JsonStore;
use crate::tracker::TopicTracker;
use crate::utils::DigestResult;

pub const UPDATE_PREFIX: &str = "update_";
pub const UPDATE_SUFFIX: &str = ".json";
const MAX_SNAPSHOTS_PER_SECOND: u32 = 1000;

/// 串联 对话 → 话题 → 推送 → 邮件 的一轮流程
pub struct UpdateService {
    chat_source: Arc<dyn ChatSource>,
    extractor: Arc<dyn TopicExtractor>,
    tracker: Arc<TopicTracker>,
    mailer: Arc<dyn MailTransport>,
    store: JsonStore,
    lookback_days: i64,
}

impl UpdateService {
    pub fn new(
        chat_source: Arc<dyn ChatSource>,
        extractor: Arc<dyn TopicExtractor>,
        tracker: Arc<TopicTracker>,
        mailer: Arc<dyn MailTransport>,
        store: JsonStore,
        lookback_days: i64,
    ) -> Self {
        Self {
            chat_source,
            extractor,
            tracker,
            mailer,
            store,
            lookback_days,
        }
    }

    /// 按配置构造真实的外部客户端
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store = JsonStore::new(&config.data_dir);

        if !config.is_search_configured() {
            warn!("GOOGLE_API_KEY 或 GOOGLE_CSE_ID 未配置，话题检查将返回空结果");
        }
        let search: Arc<dyn SearchSource> = Arc::new(GoogleSearchClient::new(
            &config.search_api_url,
            &config.google_api_key,
            &config.google_cse_id,
        )?);

        let chat_source: Arc<dyn ChatSource> = Arc::new(OpenAiChatClient::new(
            &config.chat_api_url,
            &config.openai_api_key,
        )?);

        let extractor: Arc<dyn TopicExtractor> = match config.topic_extractor.as_str() {
            "llm" => {
                info!("使用 LLM 提取对话话题 (模型 {})", config.llm_model);
                Arc::new(LlmExtractor::new(
                    &config.chat_api_url,
                    &config.openai_api_key,
                    &config.llm_model,
                )?)
            }
            "none" | "" => Arc::new(NoopExtractor),
            other => {
                warn!("未知的 TOPIC_EXTRACTOR '{}'，不提取话题", other);
                Arc::new(NoopExtractor)
            }
        };

        let tracker = Arc::new(TopicTracker::load(store.clone(), search).await);
        let mailer: Arc<dyn MailTransport> = Arc::new(SmtpMailer::from_config(config));

        Ok(Self::new(
            chat_source,
            extractor,
            tracker,
            mailer,
            store,
            config.chat_lookback_days,
        ))
    }

    pub fn tracker(&self) -> &Arc<TopicTracker> {
        &self.tracker
    }

    /// 生成一轮推送，不落盘
    pub async fn generate_daily_update(&self) -> UpdateRecord {
        info!("开始生成每日推送...");

        let mut chats = self.chat_source.get_recent_chats(self.lookback_days).await;
        let topics_by_chat =
            extractor::extract_topics_from_chats(self.extractor.as_ref(), &mut chats).await;
        self.tracker.ingest_chat_topics(&topics_by_chat).await;

        let topic_updates = self.tracker.check_for_updates().await;
        let all_topics = self.tracker.topics().await;

        let record = UpdateRecord::new(Utc::now(), chats, topic_updates, all_topics);
        info!(
            "推送生成完成: {} 个对话, {} 条新资料",
            record.chats.len(),
            record.num_updates()
        );
        record
    }

    /// 保存推送快照，返回实际使用的文件名；已有快照不会被覆盖。失败时只记录日志
    pub async fn save_update(&self, record: &UpdateRecord) -> Option<String> {
        for seq in 1..=MAX_SNAPSHOTS_PER_SECOND {
            let filename = record.filename_with_seq(seq);
            match self.store.save_new(&filename, record).await {
                Ok(true) => {
                    info!("推送已保存: {}", filename);
                    return Some(filename);
                }
                Ok(false) => continue,
                Err(e) => {
                    error!("保存推送 {} 失败: {}", filename, e);
                    return None;
                }
            }
        }

        error!("同一秒内快照过多，放弃保存: {}", record.filename());
        None
    }

    /// 生成并保存
    pub async fn generate_and_save(&self) -> UpdateRecord {
        let record = self.generate_daily_update().await;
        self.save_update(&record).await;
        record
    }

    pub async fn send_email_update(&self, record: &UpdateRecord) -> bool {
        let subject = generator::email_subject(record);
        let html = generator::render_update_html(record);

        match self.mailer.send_html(&subject, &html).await {
            Ok(()) => true,
            Err(e) => {
                error!("发送推送邮件失败: {}", e);
                false
            }
        }
    }

    /// 完整的一轮：生成、保存、发送。返回邮件是否送达
    pub async fn run_daily_update(&self) -> bool {
        let record = self.generate_and_save().await;
        let delivered = self.send_email_update(&record).await;
        if delivered {
            info!("✅ 每日推送已发送");
        } else {
            error!("❌ 每日推送发送失败");
        }
        delivered
    }

    /// 已保存推送的摘要，按时间戳字符串倒序
    pub async fn list_updates(&self) -> DigestResult<Vec<UpdateSummary>> {
        let mut summaries = Vec::new();

        for filename in self.store.list(UPDATE_PREFIX, UPDATE_SUFFIX).await? {
            match self.store.load::<Value>(&filename).await {
                Ok(Some(data)) => summaries.push(summarize(filename, &data)),
                Ok(None) => {}
                Err(e) => warn!("读取推送文件 {} 失败: {}", filename, e),
            }
        }

        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    /// 原样读取一份已保存的推送
    pub async fn load_update(&self, filename: &str) -> DigestResult<Option<Value>> {
        self.store.load(filename).await
    }
}

/// 宽松读取，兼容字段缺失的旧文件
fn summarize(filename: String, data: &Value) -> UpdateSummary {
    let num_updates = data
        .get("topic_updates")
        .and_then(Value::as_object)
        .map(|updates| {
            updates
                .values()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .sum::<usize>()
        })
        .unwrap_or(0);

    UpdateSummary {
        filename,
        timestamp: data
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        num_chats: data
            .get("chats")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0),
        num_updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{Chat, Material, SearchResults};
    use crate::utils::DigestError;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;
    use std::sync::Mutex;

    struct OneChat;

    #[async_trait]
    impl ChatSource for OneChat {
        async fn get_recent_chats(&self, _days: i64) -> Vec<Chat> {
            vec![Chat {
                chat_id: "c1".to_string(),
                title: "Ownership".to_string(),
                created_at: Utc::now(),
                messages: Vec::new(),
                topics: Vec::new(),
            }]
        }
    }

    struct FixedTopics(Vec<String>);

    #[async_trait]
    impl TopicExtractor for FixedTopics {
        async fn extract_topics(&self, _chat: &Chat) -> Vec<String> {
            self.0.clone()
        }
    }

    struct UndatedSearch;

    #[async_trait]
    impl SearchSource for UndatedSearch {
        async fn search_topic(&self, topic: &str, _max_results: usize) -> SearchResults {
            SearchResults {
                query: topic.to_string(),
                timestamp: Utc::now(),
                results: Vec::new(),
            }
        }

        async fn check_for_updates(&self, topic: &str, _since: DateTime<Utc>) -> Vec<Material> {
            vec![Material {
                title: Some(format!("about {topic}")),
                link: format!("https://{topic}.example"),
                ..Default::default()
            }]
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        fail: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MailTransport for RecordingMailer {
        async fn send_html(&self, subject: &str, html: &str) -> DigestResult<()> {
            if self.fail {
                return Err(DigestError::MailError("smtp down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), html.to_string()));
            Ok(())
        }
    }

    async fn service(store: JsonStore, mailer: Arc<RecordingMailer>) -> UpdateService {
        let tracker = Arc::new(TopicTracker::load(store.clone(), Arc::new(UndatedSearch)).await);
        UpdateService::new(
            Arc::new(OneChat),
            Arc::new(FixedTopics(vec!["borrowck".to_string()])),
            tracker,
            mailer,
            store,
            1,
        )
    }

    #[tokio::test]
    async fn cycle_ingests_topics_finds_material_and_mails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let mailer = Arc::new(RecordingMailer::default());
        let service = service(store.clone(), mailer.clone()).await;

        assert!(service.run_daily_update().await);

        let summaries = service.list_updates().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].num_chats, 1);
        assert_eq!(summaries[0].num_updates, 1);

        let saved = service
            .load_update(&summaries[0].filename)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved["chats"][0]["topics"], json!(["borrowck"]));
        assert_eq!(saved["all_topics"][0]["name"], "borrowck");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.starts_with("ChatGPT Assistant Daily Update - "));
        assert!(sent[0].1.contains("https://borrowck.example"));
    }

    #[tokio::test]
    async fn mail_failure_is_the_reported_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let service = service(JsonStore::new(dir.path()), mailer).await;

        assert!(!service.run_daily_update().await);
        // 发送失败不影响快照落盘
        assert_eq!(service.list_updates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_second_snapshots_are_kept_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(JsonStore::new(dir.path()), Arc::new(RecordingMailer::default())).await;
        let record = service.generate_daily_update().await;
        let mut second = record.clone();
        second.chats.clear();

        let first_name = service.save_update(&record).await.unwrap();
        let second_name = service.save_update(&second).await.unwrap();

        assert_eq!(first_name, record.filename());
        assert_eq!(second_name, record.filename_with_seq(2));
        assert_eq!(service.list_updates().await.unwrap().len(), 2);

        let original = service.load_update(&first_name).await.unwrap().unwrap();
        assert_eq!(original["chats"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn back_to_back_cycles_each_leave_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(JsonStore::new(dir.path()), Arc::new(RecordingMailer::default())).await;

        service.generate_and_save().await;
        service.generate_and_save().await;

        assert_eq!(service.list_updates().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn listing_sorts_newest_first_and_tolerates_sparse_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store
            .save("update_a.json", &json!({"timestamp": "2024-01-01T00:00:00+00:00"}))
            .await
            .unwrap();
        store
            .save(
                "update_b.json",
                &json!({"timestamp": "2024-02-01T00:00:00+00:00", "chats": [{}],
                        "topic_updates": {"x": [{}, {}], "y": [{}]}}),
            )
            .await
            .unwrap();
        std::fs::write(dir.path().join("update_c.json"), "garbage").unwrap();

        let service = service(store, Arc::new(RecordingMailer::default())).await;
        let summaries = service.list_updates().await.unwrap();

        let names: Vec<_> = summaries.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, ["update_b.json", "update_a.json"]);
        assert_eq!(summaries[0].num_chats, 1);
        assert_eq!(summaries[0].num_updates, 3);
    }
}
