//! 下载队列的持久化存储

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use fs2::FileExt;
use tracing::{debug, info};

use super::error::{DownloadError, Result};
use super::models::{DownloadItem, ItemPatch};

/// 任务 id -> DownloadItem 的持久映射
///
/// 找不到记录不算错误：`get`/`update_fields` 返回 `None`，`delete` 返回 `false`。
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, item: &DownloadItem) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<DownloadItem>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<DownloadItem>>;
    async fn update_fields(&self, id: &str, patch: &ItemPatch) -> Result<Option<DownloadItem>>;
}

fn sorted(mut items: Vec<DownloadItem>) -> Vec<DownloadItem> {
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    items
}

/// 纯内存实现，进程退出即丢失
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: DashMap<String, DownloadItem>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, item: &DownloadItem) -> Result<()> {
        self.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DownloadItem>> {
        Ok(self.items.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.items.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<DownloadItem>> {
        Ok(sorted(
            self.items.iter().map(|entry| entry.value().clone()).collect(),
        ))
    }

    async fn update_fields(&self, id: &str, patch: &ItemPatch) -> Result<Option<DownloadItem>> {
        // get_mut 持有分片写锁，读者看不到半更新的记录
        Ok(self.items.get_mut(id).map(|mut entry| {
            entry.apply(patch);
            entry.clone()
        }))
    }
}

type Snapshot = HashMap<String, DownloadItem>;

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    match std::fs::read(path) {
        Ok(data) if data.is_empty() => Ok(Snapshot::new()),
        Ok(data) => {
            let (list, _): (Vec<DownloadItem>, usize) =
                bincode::serde::decode_from_slice(&data, bincode::config::standard())?;
            Ok(list.into_iter().map(|item| (item.id.clone(), item)).collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::new()),
        Err(e) => Err(DownloadError::persistence(format!(
            "读取状态文件失败 {}: {}",
            path.display(),
            e
        ))),
    }
}

fn save_snapshot(path: &Path, items: &Snapshot) -> Result<()> {
    let list = sorted(items.values().cloned().collect());
    let data = bincode::serde::encode_to_vec(&list, bincode::config::standard())?;

    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, data)
        .map_err(|e| DownloadError::persistence(format!("写入状态文件失败: {}", e)))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| DownloadError::persistence(format!("替换状态文件失败: {}", e)))?;
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DownloadError::persistence(format!("存储线程异常退出: {}", e)))?
}

/// 基于状态文件的持久化实现
///
/// 不在内存里缓存队列，每次读写都面对状态文件本身。写入时在 `<file>.lock` 上
/// 持有排他锁，读出最新快照、修改后写临时文件再 rename，因此 `mqdl run` 和
/// 另一个进程里的 `mqdl add`/`pause`/`cancel` 可以共用同一个文件。
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// 打开状态文件，不存在时从空队列开始；损坏的文件在这里就报错
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            lock_path: sibling(&path, ".lock"),
            path,
        };

        let count = store.list().await?.len();
        if count > 0 {
            info!("从 {} 加载了 {} 个下载任务", store.path.display(), count);
        } else {
            debug!("状态文件为空或不存在: {}", store.path.display());
        }
        Ok(store)
    }

    /// 在文件锁内读取-修改-写回；mutate 返回的 bool 表示是否需要写盘
    async fn transact<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> (T, bool) + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DownloadError::persistence(e.to_string()))?;
            }
            let lock = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)
                .map_err(|e| DownloadError::persistence(format!("无法打开锁文件: {}", e)))?;
            FileExt::lock_exclusive(&lock)
                .map_err(|e| DownloadError::persistence(format!("无法锁定状态文件: {}", e)))?;

            let mut items = load_snapshot(&path)?;
            let (out, dirty) = mutate(&mut items);
            if dirty {
                save_snapshot(&path, &items)?;
            }
            // 关闭文件时锁也会释放
            let _ = FileExt::unlock(&lock);
            Ok(out)
        })
        .await
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let path = self.path.clone();
        // rename 是原子的，读取不需要加锁
        blocking(move || load_snapshot(&path)).await
    }
}

#[async_trait]
impl Store for FileStore {
    async fn put(&self, item: &DownloadItem) -> Result<()> {
        let item = item.clone();
        self.transact(move |items| {
            items.insert(item.id.clone(), item);
            ((), true)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<DownloadItem>> {
        Ok(self.snapshot().await?.remove(id))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.transact(move |items| {
            let removed = items.remove(&id).is_some();
            (removed, removed)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<DownloadItem>> {
        Ok(sorted(self.snapshot().await?.into_values().collect()))
    }

    async fn update_fields(&self, id: &str, patch: &ItemPatch) -> Result<Option<DownloadItem>> {
        let id = id.to_string();
        let patch = patch.clone();
        self.transact(move |items| {
            let updated = items.get_mut(&id).map(|item| {
                item.apply(&patch);
                item.clone()
            });
            let dirty = updated.is_some();
            (updated, dirty)
        })
        .await
    }
}
