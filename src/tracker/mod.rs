use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::crawler::SearchSource;
use crate::storage::models::{Material, ResearchTopic};
use crate::storage::JsonStore;

pub const TOPICS_FILE: &str = "research_topics.json";

/// 话题名到本轮新资料的映射
pub type TopicUpdates = BTreeMap<String, Vec<Material>>;

/// 持有话题列表的唯一所有者。
///
/// 所有修改都在锁内完成读-改-写并整体落盘，HTTP 请求和定时任务
/// 因此不会交错覆盖彼此的结果。
pub struct TopicTracker {
    search: Arc<dyn SearchSource>,
    store: JsonStore,
    topics: Mutex<BTreeMap<String, ResearchTopic>>,
}

impl TopicTracker {
    /// 从存储中恢复话题列表；读取失败时从空列表开始
    pub async fn load(store: JsonStore, search: Arc<dyn SearchSource>) -> Self {
        let saved: Vec<ResearchTopic> = store.load_or_default(TOPICS_FILE).await;
        info!("已加载 {} 个研究话题", saved.len());

        let topics = saved
            .into_iter()
            .map(|topic| (topic.name.clone(), topic))
            .collect();

        Self {
            search,
            store,
            topics: Mutex::new(topics),
        }
    }

    /// 新建话题，或把来源合并进同名话题
    pub async fn add_topic(&self, name: &str, sources: Vec<Material>) -> ResearchTopic {
        let mut topics = self.topics.lock().await;
        let topic = upsert(&mut topics, name, sources, Utc::now());
        self.persist(&topics).await;
        topic
    }

    /// 把对话中提取的话题加入跟踪，只增不删
    pub async fn ingest_chat_topics(&self, topics_by_chat: &BTreeMap<String, Vec<String>>) {
        let names: Vec<&String> = topics_by_chat.values().flatten().collect();
        if names.is_empty() {
            return;
        }

        let mut topics = self.topics.lock().await;
        let now = Utc::now();
        for name in names {
            upsert(&mut topics, name, Vec::new(), now);
        }
        self.persist(&topics).await;
    }

    /// 逐个话题检查新资料，只返回确实有新资料的话题。
    ///
    /// 没有新资料的话题不推进 `last_checked`。整轮结束后统一落盘一次。
    pub async fn check_for_updates(&self) -> TopicUpdates {
        let targets: Vec<(String, DateTime<Utc>)> = {
            let topics = self.topics.lock().await;
            topics
                .values()
                .map(|t| (t.name.clone(), t.last_checked))
                .collect()
        };

        let mut updates = TopicUpdates::new();
        for (name, since) in targets {
            let materials = self.search.check_for_updates(&name, since).await;
            if !materials.is_empty() {
                info!("话题 {} 发现 {} 条新资料", name, materials.len());
                updates.insert(name, materials);
            }
        }

        let now = Utc::now();
        let mut topics = self.topics.lock().await;
        for (name, materials) in &updates {
            // 话题只增不删，检查期间不会消失
            if let Some(topic) = topics.get_mut(name) {
                topic.new_materials = materials.clone();
                topic.last_checked = topic.last_checked.max(now);
            }
        }
        self.persist(&topics).await;

        updates
    }

    /// 按名称排序的全部话题
    pub async fn topics(&self) -> Vec<ResearchTopic> {
        self.topics.lock().await.values().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<ResearchTopic> {
        self.topics.lock().await.get(name).cloned()
    }

    async fn persist(&self, topics: &BTreeMap<String, ResearchTopic>) -> bool {
        let roster: Vec<&ResearchTopic> = topics.values().collect();
        match self.store.save(TOPICS_FILE, &roster).await {
            Ok(()) => true,
            Err(e) => {
                error!("保存研究话题失败: {}", e);
                false
            }
        }
    }
}

fn upsert(
    topics: &mut BTreeMap<String, ResearchTopic>,
    name: &str,
    sources: Vec<Material>,
    now: DateTime<Utc>,
) -> ResearchTopic {
    match topics.get_mut(name) {
        Some(topic) => {
            let added = topic.merge_sources(sources);
            topic.last_checked = topic.last_checked.max(now);
            info!("更新话题 {}，新增 {} 个来源", name, added);
            topic.clone()
        }
        None => {
            let topic = ResearchTopic::new(name, sources, now);
            info!("新增话题 {}", name);
            topics.insert(name.to_string(), topic.clone());
            topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::search::filter_new_materials;
    use crate::storage::models::SearchResults;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    /// 每个话题返回固定结果，再按 since 过滤
    #[derive(Default)]
    struct StubSearch {
        results: HashMap<String, Vec<Material>>,
    }

    #[async_trait]
    impl SearchSource for StubSearch {
        async fn search_topic(&self, topic: &str, _max_results: usize) -> SearchResults {
            SearchResults {
                query: topic.to_string(),
                timestamp: Utc::now(),
                results: self.results.get(topic).cloned().unwrap_or_default(),
            }
        }

        async fn check_for_updates(&self, topic: &str, since: DateTime<Utc>) -> Vec<Material> {
            let items = self.results.get(topic).cloned().unwrap_or_default();
            filter_new_materials(items, since)
        }
    }

    fn material(link: &str, date: Option<DateTime<Utc>>) -> Material {
        Material {
            title: Some(link.to_string()),
            link: link.to_string(),
            snippet: None,
            date: date.map(|d| d.to_rfc3339()),
        }
    }

    #[tokio::test]
    async fn adding_twice_dedups_sources_by_link() {
        let dir = tempfile::tempdir().unwrap();
        let tracker =
            TopicTracker::load(JsonStore::new(dir.path()), Arc::new(StubSearch::default())).await;

        tracker
            .add_topic("rust", vec![material("a", None), material("b", None)])
            .await;
        let merged = tracker
            .add_topic("rust", vec![material("b", None), material("c", None)])
            .await;

        let links: Vec<_> = merged.sources.iter().map(|s| s.link.as_str()).collect();
        assert_eq!(links, ["a", "b", "c"]);
        assert_eq!(tracker.topics().await.len(), 1);
        assert!(tracker.add_topic("Rust", Vec::new()).await.sources.is_empty());
    }

    #[tokio::test]
    async fn roster_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        {
            let tracker = TopicTracker::load(store.clone(), Arc::new(StubSearch::default())).await;
            tracker.add_topic("x", vec![material("l", None)]).await;
        }

        let reloaded = TopicTracker::load(store, Arc::new(StubSearch::default())).await;
        let topic = reloaded.get("x").await.unwrap();
        assert_eq!(topic.sources.len(), 1);
    }

    #[tokio::test]
    async fn sweep_returns_only_newer_material() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let t0 = Utc::now() - Duration::days(3);
        let seeded = vec![
            ResearchTopic::new("quantum computing", Vec::new(), t0),
            ResearchTopic::new("quiet topic", Vec::new(), t0),
        ];
        store.save(TOPICS_FILE, &seeded).await.unwrap();

        let mut search = StubSearch::default();
        search.results.insert(
            "quantum computing".to_string(),
            vec![
                material("new", Some(t0 + Duration::days(1))),
                material("old", Some(t0 - Duration::days(1))),
            ],
        );
        search.results.insert(
            "quiet topic".to_string(),
            vec![material("stale", Some(t0 - Duration::days(2)))],
        );

        let tracker = TopicTracker::load(store.clone(), Arc::new(search)).await;
        let before = Utc::now();
        let updates = tracker.check_for_updates().await;
        let after = Utc::now();

        assert_eq!(updates.len(), 1);
        let found = &updates["quantum computing"];
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].link, "new");

        let topic = tracker.get("quantum computing").await.unwrap();
        assert!(topic.last_checked >= before && topic.last_checked <= after);
        assert_eq!(topic.new_materials, *found);

        let quiet = tracker.get("quiet topic").await.unwrap();
        assert_eq!(quiet.last_checked, t0);
        assert!(quiet.new_materials.is_empty());

        let on_disk: Vec<ResearchTopic> = store.load(TOPICS_FILE).await.unwrap().unwrap();
        let persisted = on_disk.iter().find(|t| t.name == "quantum computing").unwrap();
        assert_eq!(persisted.new_materials.len(), 1);
    }

    #[tokio::test]
    async fn undated_material_is_always_new_and_last_checked_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let future = Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap();
        store
            .save(TOPICS_FILE, &vec![ResearchTopic::new("future", Vec::new(), future)])
            .await
            .unwrap();

        let mut search = StubSearch::default();
        search
            .results
            .insert("future".to_string(), vec![material("undated", None)]);
        let tracker = TopicTracker::load(store.clone(), Arc::new(search)).await;

        let first = tracker.check_for_updates().await;
        let second = tracker.check_for_updates().await;
        assert_eq!(first["future"].len(), 1);
        assert_eq!(second["future"].len(), 1);
        assert_eq!(tracker.get("future").await.unwrap().last_checked, future);

        let readded = tracker.add_topic("future", vec![material("extra", None)]).await;
        assert_eq!(readded.last_checked, future);
        assert_eq!(readded.sources.len(), 1);

        let on_disk: Vec<ResearchTopic> = store.load(TOPICS_FILE).await.unwrap().unwrap();
        assert_eq!(on_disk[0].last_checked, future);
    }

    #[tokio::test]
    async fn ingest_adds_each_named_topic_once() {
        let dir = tempfile::tempdir().unwrap();
        let tracker =
            TopicTracker::load(JsonStore::new(dir.path()), Arc::new(StubSearch::default())).await;
        tracker.add_topic("kept", Vec::new()).await;

        let mut by_chat = BTreeMap::new();
        by_chat.insert("c1".to_string(), vec!["wasm".to_string(), "simd".to_string()]);
        by_chat.insert("c2".to_string(), vec!["wasm".to_string()]);
        by_chat.insert("c3".to_string(), Vec::new());
        tracker.ingest_chat_topics(&by_chat).await;

        let names: Vec<_> = tracker.topics().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["kept", "simd", "wasm"]);
    }
}
