use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::utils::{DigestError, DigestResult};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 按文件名存取整份 JSON 文档的本地目录
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> DigestResult<PathBuf> {
        let invalid = name.is_empty()
            || name.starts_with('.')
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\');
        if invalid {
            return Err(DigestError::InvalidDocumentName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// 整体覆盖写入：先写临时文件再 rename
    pub async fn save<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> DigestResult<()> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let content = serde_json::to_vec_pretty(data)?;
        let tmp_path = self.root.join(format!(".{}.tmp", name));
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!("已写入 {}", path.display());
        Ok(())
    }

    /// 只在目标不存在时写入，已存在返回 `false`，不覆盖
    pub async fn save_new<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> DigestResult<bool> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let content = serde_json::to_vec_pretty(data)?;
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.root.join(format!(".{}.{}.tmp", name, seq));
        tokio::fs::write(&tmp_path, content).await?;

        // hard_link 在目标存在时失败，写入仍是原子的
        let linked = tokio::fs::hard_link(&tmp_path, &path).await;
        tokio::fs::remove_file(&tmp_path).await?;
        match linked {
            Ok(()) => {
                debug!("已写入 {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 文件不存在时返回 `None`
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> DigestResult<Option<T>> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// 读取失败时记录日志并返回默认值
    pub async fn load_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        match self.load(name).await {
            Ok(Some(data)) => data,
            Ok(None) => T::default(),
            Err(e) => {
                warn!("读取 {} 失败，使用默认值: {}", name, e);
                T::default()
            }
        }
    }

    /// 列出匹配前后缀的文档名，按名称排序
    pub async fn list(&self, prefix: &str, suffix: &str) -> DigestResult<Vec<String>> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(prefix) && name.ends_with(suffix) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}
