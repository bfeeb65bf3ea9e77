#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use media_queue::QueueConfig;
use media_queue::downloader::error::Result;
use media_queue::downloader::{
    Collaborators, DownloadError, DownloadItem, DownloadStatus, FileSink, ItemPatch, ManualClock,
    MemoryStore, NetworkMonitor, QueueScheduler, Resource, ResourceResolver, Store,
    TransferStream, Transport,
};

/// 脚本化传输的一步
#[derive(Debug, Clone)]
pub enum Step {
    /// 按块返回数据，长度已知
    Chunks(Vec<Vec<u8>>),
    /// 等待一段时间后返回少量数据，期间计入并发数
    Slow(Duration),
    Fail,
    /// 永远不结束，直到被中止
    Hang,
}

struct InFlight {
    current: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(current: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            current: Arc::clone(current),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| u.as_str() == url).count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, url: &str) -> Result<TransferStream> {
        self.calls.lock().unwrap().push(url.to_string());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| Step::Chunks(vec![b"payload".to_vec()]));

        match step {
            Step::Fail => Err(DownloadError::Transport("connection reset".into())),
            Step::Chunks(chunks) => {
                let total = chunks.iter().map(|c| c.len() as u64).sum();
                let chunks = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
                Ok(TransferStream::from_chunks(Some(total), chunks))
            }
            Step::Slow(delay) => {
                let guard = InFlight::enter(&self.in_flight, &self.peak);
                let body = futures::stream::once(async move {
                    tokio::time::sleep(delay).await;
                    drop(guard);
                    Ok(Bytes::from_static(b"slow"))
                })
                .boxed();
                Ok(TransferStream::new(Some(4), body))
            }
            Step::Hang => Ok(TransferStream::new(
                None,
                futures::stream::pending::<Result<Bytes>>().boxed(),
            )),
        }
    }
}

/// 记录保存结果的 sink，可以预设若干次失败
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<(String, usize)>>,
    failures: AtomicUsize,
}

impl MemorySink {
    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<(String, usize)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn save(&self, suggested_name: &str, bytes: Bytes) -> Result<PathBuf> {
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DownloadError::Sink("disk full".into()));
        }
        self.saved
            .lock()
            .unwrap()
            .push((suggested_name.to_string(), bytes.len()));
        Ok(PathBuf::from(suggested_name))
    }
}

/// resource id 直接作为 URL 和标题
pub struct EchoResolver;

#[async_trait]
impl ResourceResolver for EchoResolver {
    async fn resolve(&self, resource_id: &str) -> Result<Option<Resource>> {
        Ok(Some(Resource::new(resource_id, resource_id)))
    }
}

/// 内存存储，可以让 update_fields 全部失败或只让写入 completed 失败
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_updates: AtomicBool,
    fail_completion: AtomicBool,
    update_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_completion(&self, fail: bool) {
        self.fail_completion.store(fail, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn put(&self, item: &DownloadItem) -> Result<()> {
        self.inner.put(item).await
    }

    async fn get(&self, id: &str) -> Result<Option<DownloadItem>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<DownloadItem>> {
        self.inner.list().await
    }

    async fn update_fields(&self, id: &str, patch: &ItemPatch) -> Result<Option<DownloadItem>> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let completing = patch.status == Some(DownloadStatus::Completed);
        if self.fail_updates.load(Ordering::SeqCst)
            || (completing && self.fail_completion.load(Ordering::SeqCst))
        {
            return Err(DownloadError::persistence("磁盘已满"));
        }
        self.inner.update_fields(id, patch).await
    }
}

pub fn test_config(max_concurrent: usize) -> QueueConfig {
    QueueConfig {
        max_concurrent_downloads: max_concurrent,
        transfer_timeout_secs: 3_600,
        ..Default::default()
    }
}

pub struct Harness {
    pub scheduler: QueueScheduler,
    pub store: Arc<dyn Store>,
    pub transport: Arc<ScriptedTransport>,
    pub sink: Arc<MemorySink>,
    pub clock: Arc<ManualClock>,
    pub network: NetworkMonitor,
}

impl Harness {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_parts(config, Arc::new(MemoryStore::new()), NetworkMonitor::default())
    }

    pub fn with_parts(config: QueueConfig, store: Arc<dyn Store>, network: NetworkMonitor) -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let sink = Arc::new(MemorySink::default());
        let clock = Arc::new(ManualClock::default());
        let collaborators = Collaborators {
            store: Arc::clone(&store),
            transport: transport.clone(),
            sink: sink.clone(),
            resolver: Arc::new(EchoResolver),
            clock: clock.clone(),
        };
        let scheduler = QueueScheduler::new(config, collaborators, network.clone()).unwrap();
        Self {
            scheduler,
            store,
            transport,
            sink,
            clock,
            network,
        }
    }

    /// 每次添加前时钟前进 1ms，保证创建时间严格递增
    pub async fn add(&self, resource_id: &str, priority: Option<i32>) -> DownloadItem {
        self.clock.advance(Duration::from_millis(1));
        self.scheduler
            .add_download(resource_id, priority)
            .await
            .unwrap()
    }

    pub async fn item(&self, id: &str) -> DownloadItem {
        self.store.get(id).await.unwrap().expect("item missing")
    }

    pub async fn wait_status(&self, id: &str, status: DownloadStatus) -> DownloadItem {
        wait_for(|| async { self.item(id).await.status == status }).await;
        self.item(id).await
    }
}

/// 轮询直到条件成立；在暂停的时钟下每次轮询推进 10ms
pub async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..20_000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
