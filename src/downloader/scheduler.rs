//! 下载队列调度器

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use itertools::Itertools;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::error::{DownloadError, Result};
use super::events::QueueEvent;
use super::models::{DownloadItem, DownloadStatus, ItemPatch, NetworkState, QueueStatus};
use super::network::NetworkMonitor;
use super::resolver::ResourceResolver;
use super::retry::RetryPolicy;
use super::sink::FileSink;
use super::store::Store;
use super::transport::Transport;
use super::worker::{JobLease, JobReporter, TransferWorker};
use crate::config::QueueConfig;

type Listener = Arc<dyn Fn(&[DownloadItem]) + Send + Sync>;
type Listeners = DashMap<u64, Listener>;

/// 调度器依赖的外部能力
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn Transport>,
    pub sink: Arc<dyn FileSink>,
    pub resolver: Arc<dyn ResourceResolver>,
    pub clock: Arc<dyn Clock>,
}

/// 发往调度循环的消息
#[derive(Debug)]
enum SchedulerEvent {
    Dispatch,
    /// 与存储对账后派发，用于发现其他进程写入的变化
    Sync,
    Finished {
        id: String,
        run: u64,
        outcome: Result<PathBuf>,
    },
}

struct ActiveJob {
    run: u64,
    token: CancellationToken,
    // worker 已经把任务标记为 downloading
    started: bool,
}

#[derive(Default)]
struct SchedulerState {
    // 正在传输的任务，重启后总是空的
    active: HashMap<String, ActiveJob>,
    // 重试等待中的任务，到期前不参与派发
    backoff: HashMap<String, Instant>,
    // 因持久化失败被放弃的任务，重启或手动恢复/重试前不再派发
    abandoned: HashSet<String>,
}

impl SchedulerState {
    /// 吊销许可并中止传输
    fn revoke(&mut self, id: &str) -> bool {
        match self.active.remove(id) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }
}

struct Inner {
    config: QueueConfig,
    retry: RetryPolicy,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    worker: TransferWorker,
    network: NetworkMonitor,
    state: Mutex<SchedulerState>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
    next_run: AtomicU64,
    events: broadcast::Sender<QueueEvent>,
    commands: mpsc::UnboundedSender<SchedulerEvent>,
    command_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>,
    shutdown: CancellationToken,
}

/// 持久化下载队列的调度器
///
/// 所有对队列状态的修改都在同一把锁下串行执行，派发只在调度循环里进行，
/// 因此同一时刻最多只有一轮派发，同一个任务也不会有两个 worker。
#[derive(Clone)]
pub struct QueueScheduler {
    inner: Arc<Inner>,
}

/// `subscribe` 返回的句柄，调用 `unsubscribe` 或 drop 后不再收到通知
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(&self.id);
        }
    }
}

impl QueueScheduler {
    pub fn new(
        config: QueueConfig,
        collaborators: Collaborators,
        network: NetworkMonitor,
    ) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            store,
            transport,
            sink,
            resolver,
            clock,
        } = collaborators;
        let worker = TransferWorker::new(transport, sink, resolver)
            .with_progress_throttle(config.progress_step_percent, config.progress_interval())
            .with_timeout(config.transfer_timeout());

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            inner: Arc::new(Inner {
                retry: config.retry_policy(),
                config,
                store,
                clock,
                worker,
                network,
                state: Mutex::new(SchedulerState::default()),
                listeners: Arc::new(DashMap::new()),
                next_listener: AtomicU64::new(0),
                next_run: AtomicU64::new(1),
                events,
                commands,
                command_rx: std::sync::Mutex::new(Some(command_rx)),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// 执行重启恢复并启动调度循环，只能调用一次
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let rx = self
            .inner
            .command_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| DownloadError::InvalidState("调度器已经启动".to_string()))?;

        if let Err(e) = self.inner.recover().await {
            error!("重启恢复失败: {}", e);
            if let Ok(mut slot) = self.inner.command_rx.lock() {
                *slot = Some(rx);
            }
            return Err(e);
        }

        let inner = Arc::clone(&self.inner);
        info!(
            "调度器已启动，最大并发数: {}",
            inner.config.max_concurrent_downloads
        );
        Ok(tokio::spawn(run_loop(inner, rx)))
    }

    /// 停止调度循环并中止所有传输；未完成的任务保持 downloading，下次启动时恢复
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("调度器正在停止");
            self.inner.shutdown.cancel();
        }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// 新建一个排队任务并触发派发，立即返回
    pub async fn add_download(
        &self,
        resource_id: &str,
        priority: Option<i32>,
    ) -> Result<DownloadItem> {
        let inner = &self.inner;
        let priority = priority.unwrap_or(inner.config.default_priority);
        let item = DownloadItem::new(
            resource_id,
            priority,
            inner.config.max_retries,
            inner.clock.now(),
        );

        let guard = inner.state.lock().await;
        inner.store.put(&item).await.inspect_err(|e| {
            error!("添加下载任务失败: {}: {}", resource_id, e);
        })?;
        info!("添加下载任务: {} (优先级 {})", item.id, priority);
        inner.emit(QueueEvent::Added {
            id: item.id.clone(),
            resource_id: item.resource_id.clone(),
        });
        inner.publish().await;
        drop(guard);

        inner.request_dispatch();
        Ok(item)
    }

    /// 暂停任务：正在传输的任务会被中止，排队中的任务不再被派发
    pub async fn pause_download(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let Some(item) = inner.store.get(id).await? else {
            debug!("暂停的任务不存在: {}", id);
            return Ok(());
        };

        // downloading 但不在本进程的活动集中：由另一个进程在传输，或已被放弃
        let pausable = matches!(
            item.status,
            DownloadStatus::Queued | DownloadStatus::Downloading
        );
        let was_active = state.revoke(id);
        if !was_active && !pausable {
            debug!("任务 {} 当前状态为 {}，忽略暂停", id, item.status);
            return Ok(());
        }
        state.backoff.remove(id);
        state.abandoned.remove(id);

        inner
            .store
            .update_fields(id, &ItemPatch::status(DownloadStatus::Paused))
            .await?;
        info!("⏸️ 已暂停任务: {} (进度 {}%)", id, item.progress);
        inner.emit(QueueEvent::Paused { id: id.to_string() });
        inner.publish().await;
        Ok(())
    }

    /// 对 paused 状态和因持久化失败被放弃的任务有效，其他状态下是空操作
    pub async fn resume_download(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.abandoned.contains(id) {
            let patch = ItemPatch::status(DownloadStatus::Queued).with_progress(0);
            if inner.store.update_fields(id, &patch).await?.is_some() {
                info!("▶️ 重新排队被放弃的任务: {}", id);
                inner.emit(QueueEvent::Resumed { id: id.to_string() });
            }
            state.abandoned.remove(id);
            inner.publish().await;
            drop(state);
            inner.request_dispatch();
            return Ok(());
        }
        match inner.store.get(id).await? {
            Some(item) if item.status == DownloadStatus::Paused => {}
            Some(item) => {
                debug!("任务 {} 当前状态为 {}，忽略恢复", id, item.status);
                return Ok(());
            }
            None => {
                debug!("恢复的任务不存在: {}", id);
                return Ok(());
            }
        }

        // 保留已保存的进度，传输仍然从头开始
        inner
            .store
            .update_fields(id, &ItemPatch::status(DownloadStatus::Queued))
            .await?;
        info!("▶️ 已恢复任务: {}", id);
        inner.emit(QueueEvent::Resumed { id: id.to_string() });
        inner.publish().await;
        drop(state);

        inner.request_dispatch();
        Ok(())
    }

    /// 从队列中删除任务，正在进行的传输会被中止
    pub async fn cancel_download(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        state.revoke(id);
        state.backoff.remove(id);
        state.abandoned.remove(id);

        if !inner.store.delete(id).await? {
            debug!("取消的任务不存在: {}", id);
            return Ok(());
        }
        info!("🗑️ 已取消任务: {}", id);
        inner.emit(QueueEvent::Cancelled { id: id.to_string() });
        inner.publish().await;
        Ok(())
    }

    /// 手动重试一个已失败的任务，重试次数清零
    pub async fn retry_download(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        match inner.store.get(id).await? {
            Some(item) if item.status == DownloadStatus::Failed => {}
            _ => return Ok(()),
        }

        let patch = ItemPatch::status(DownloadStatus::Queued)
            .with_progress(0)
            .with_retry_count(0)
            .with_completed_at(None);
        inner.store.update_fields(id, &patch).await?;
        state.abandoned.remove(id);
        state.backoff.remove(id);
        info!("🔁 手动重试任务: {}", id);
        inner.emit(QueueEvent::Resumed { id: id.to_string() });
        inner.publish().await;
        drop(state);

        inner.request_dispatch();
        Ok(())
    }

    /// 删除已完成和最终失败的记录，返回删除的条数
    pub async fn prune_finished(&self) -> Result<usize> {
        let inner = &self.inner;
        let _state = inner.state.lock().await;
        let mut removed = 0;
        for item in inner.store.list().await? {
            let finished = item.status.is_terminal() && !item.is_eligible();
            if finished && inner.store.delete(&item.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("清理了 {} 条已结束的记录", removed);
            inner.publish().await;
        }
        Ok(removed)
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock().await;
        QueueStatus {
            active_count: state.active.len(),
            max_concurrent: self.inner.config.max_concurrent_downloads,
            network_state: self.inner.network.state(),
        }
    }

    /// 还有正在传输或等待派发的任务（被放弃的任务不算）
    pub async fn has_pending_work(&self) -> Result<bool> {
        let state = self.inner.state.lock().await;
        if !state.active.is_empty() {
            return Ok(true);
        }
        let pending = self.inner.store.list().await?.iter().any(|item| {
            let waiting = item.is_eligible() || item.status == DownloadStatus::Downloading;
            waiting && !state.abandoned.contains(&item.id)
        });
        Ok(pending)
    }

    pub async fn list(&self) -> Result<Vec<DownloadItem>> {
        self.inner.store.list().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<DownloadItem>> {
        self.inner.store.get(id).await
    }

    /// 注册队列变化的回调，每次修改后收到完整的任务列表
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[DownloadItem]) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// 手动触发一轮派发
    pub fn dispatch(&self) {
        self.inner.request_dispatch();
    }

    /// 重新读取存储并对账，其他进程加入、暂停或删除的任务在这里生效
    pub fn sync(&self) {
        let _ = self.inner.commands.send(SchedulerEvent::Sync);
    }
}

async fn run_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<SchedulerEvent>) {
    let mut network_rx = inner.network.subscribe();
    let mut ticker = tokio::time::interval(inner.config.idle_tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            Some(event) = rx.recv() => match event {
                SchedulerEvent::Dispatch => inner.dispatch_pass().await,
                SchedulerEvent::Sync => {
                    inner.reconcile().await;
                    inner.dispatch_pass().await;
                }
                SchedulerEvent::Finished { id, run, outcome } => {
                    inner.finish(&id, run, outcome).await;
                    inner.dispatch_pass().await;
                }
            },
            Ok(()) = network_rx.changed() => {
                let state = *network_rx.borrow_and_update();
                inner.emit(QueueEvent::NetworkChanged(state));
                match state {
                    NetworkState::Online => inner.dispatch_pass().await,
                    NetworkState::Offline => inner.suspend_active().await,
                }
            }
            _ = ticker.tick() => {
                inner.reconcile().await;
                inner.dispatch_pass().await;
            }
        }
    }
    debug!("调度循环已退出");
}

impl Inner {
    fn request_dispatch(&self) {
        let _ = self.commands.send(SchedulerEvent::Dispatch);
    }

    fn emit(&self, event: QueueEvent) {
        // 没有接收者时发送失败是正常的
        let _ = self.events.send(event);
    }

    /// 把最新的任务列表推给所有订阅者，调用方需持有状态锁以保证顺序
    async fn publish(&self) {
        if self.listeners.is_empty() {
            return;
        }
        let items = match self.store.list().await {
            Ok(items) => items,
            Err(e) => {
                warn!("读取队列失败，跳过本次通知: {}", e);
                return;
            }
        };
        let listeners: Vec<Listener> = self
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener(&items);
        }
    }

    /// 重启恢复：没有 worker 的 downloading 任务重新排队
    async fn recover(&self) -> Result<usize> {
        let _state = self.state.lock().await;
        let mut count = 0;
        for item in self.store.list().await? {
            if item.status != DownloadStatus::Downloading {
                continue;
            }
            let patch = ItemPatch::status(DownloadStatus::Queued).with_progress(0);
            if self.store.update_fields(&item.id, &patch).await?.is_some() {
                warn!("恢复中断的任务: {} (原进度 {}%)", item.id, item.progress);
                count += 1;
            }
        }
        if count > 0 {
            info!("重新排队了 {} 个中断的任务", count);
            self.emit(QueueEvent::Recovered { count });
            self.publish().await;
        }
        Ok(count)
    }

    /// 一轮派发：按优先级和创建时间依次启动任务，直到没有空闲槽位
    async fn dispatch_pass(self: &Arc<Self>) {
        if !self.network.is_online() {
            debug!("当前离线，跳过派发");
            return;
        }

        let max = self.config.max_concurrent_downloads;
        let mut state = self.state.lock().await;
        if state.active.len() >= max {
            return;
        }

        let items = match self.store.list().await {
            Ok(items) => items,
            Err(e) => {
                error!("读取下载队列失败: {}", e);
                return;
            }
        };

        let now = Instant::now();
        state.backoff.retain(|_, until| *until > now);

        let candidates = items
            .into_iter()
            .filter(|item| item.is_eligible())
            .filter(|item| !state.active.contains_key(&item.id))
            .filter(|item| !state.backoff.contains_key(&item.id))
            .filter(|item| !state.abandoned.contains(&item.id))
            .sorted_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return;
        }
        debug!(
            "派发: {} 个候选任务，{} 个空闲槽位",
            candidates.len(),
            max - state.active.len()
        );

        for item in candidates {
            if state.active.len() >= max {
                break;
            }
            self.launch(&mut state, item);
        }
    }

    fn launch(self: &Arc<Self>, state: &mut SchedulerState, item: DownloadItem) {
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        state.active.insert(
            item.id.clone(),
            ActiveJob {
                run,
                token: token.clone(),
                started: false,
            },
        );
        debug!("启动 worker: {} (run {}, 优先级 {})", item.id, run, item.priority);

        let inner = Arc::clone(self);
        let lease = JobLease::new(item.id, run, token);
        tokio::spawn(async move {
            let outcome = inner.worker.run(&lease, inner.as_ref()).await;
            let _ = inner.commands.send(SchedulerEvent::Finished {
                id: lease.id().to_string(),
                run,
                outcome,
            });
        });
    }

    fn lease_is_current(state: &SchedulerState, lease: &JobLease) -> bool {
        !lease.is_revoked()
            && state
                .active
                .get(lease.id())
                .is_some_and(|job| job.run == lease.run())
    }

    /// 处理 worker 结束；许可已被吊销的结果直接丢弃
    async fn finish(&self, id: &str, run: u64, outcome: Result<PathBuf>) {
        let mut state = self.state.lock().await;
        let current = state.active.get(id).is_some_and(|job| job.run == run);
        if !current {
            if let Err(e) = &outcome {
                debug!("丢弃过期的结果: {} (run {}): {}", id, run, e);
            }
            return;
        }
        state.active.remove(id);

        match outcome {
            Ok(_) => {}
            Err(DownloadError::Aborted) => {}
            Err(e) if e.is_retryable() => {
                if let Err(pe) = self.record_failure(&mut state, id, &e).await {
                    error!("记录失败状态时持久化出错，放弃本次尝试: {}: {}", id, pe);
                    state.abandoned.insert(id.to_string());
                }
            }
            Err(e) => {
                error!("❌ 持久化错误，放弃本次尝试: {}: {}", id, e);
                state.abandoned.insert(id.to_string());
            }
        }
    }

    async fn record_failure(
        &self,
        state: &mut SchedulerState,
        id: &str,
        err: &DownloadError,
    ) -> Result<()> {
        let Some(mut item) = self.store.get(id).await? else {
            return Ok(());
        };

        item.retry_count = (item.retry_count + 1).min(item.max_retries);
        let retry_count = item.retry_count;
        let (status, retry_in) = if item.retries_exhausted() {
            (DownloadStatus::Failed, None)
        } else {
            (DownloadStatus::Queued, Some(self.retry.delay_for(retry_count)))
        };

        let patch = ItemPatch::status(status)
            .with_progress(0)
            .with_retry_count(retry_count);
        self.store.update_fields(id, &patch).await?;

        match retry_in {
            Some(delay) => {
                warn!(
                    "⚠️ 下载失败: {}，{:?} 后重试 ({}/{}): {}",
                    id, delay, retry_count, item.max_retries, err
                );
                state.backoff.insert(id.to_string(), Instant::now() + delay);
                let clock = Arc::clone(&self.clock);
                let commands = self.commands.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = clock.sleep(delay) => {
                            let _ = commands.send(SchedulerEvent::Dispatch);
                        }
                    }
                });
            }
            None => {
                error!(
                    "❌ 下载任务失败，重试次数已用完 ({}/{}): {}: {}",
                    retry_count, item.max_retries, id, err
                );
            }
        }

        self.emit(QueueEvent::Failed {
            id: id.to_string(),
            error: err.to_string(),
            retry_count,
            retry_in,
        });
        self.publish().await;
        Ok(())
    }

    /// 与存储对账：本进程正在传输的任务被其他进程暂停、删除或改写时，中止对应的 worker
    async fn reconcile(&self) {
        let mut state = self.state.lock().await;
        let started: Vec<String> = state
            .active
            .iter()
            .filter(|(_, job)| job.started)
            .map(|(id, _)| id.clone())
            .collect();

        let mut changed = false;
        for id in started {
            let current = match self.store.get(&id).await {
                Ok(current) => current,
                Err(e) => {
                    warn!("对账时读取任务失败: {}: {}", id, e);
                    continue;
                }
            };
            let event = match current {
                Some(item) if item.status == DownloadStatus::Downloading => continue,
                Some(item) if item.status == DownloadStatus::Paused => {
                    Some(QueueEvent::Paused { id: id.clone() })
                }
                Some(_) => None,
                None => Some(QueueEvent::Cancelled { id: id.clone() }),
            };
            state.revoke(&id);
            state.backoff.remove(&id);
            info!("任务已被外部修改，中止传输: {}", id);
            if let Some(event) = event {
                self.emit(event);
            }
            changed = true;
        }
        if changed {
            self.publish().await;
        }
    }

    /// 进度和完成写入前确认任务仍处于 downloading，否则吊销许可
    async fn ensure_downloading(
        &self,
        state: &mut SchedulerState,
        lease: &JobLease,
    ) -> Result<()> {
        if !Self::lease_is_current(state, lease) {
            return Err(DownloadError::Aborted);
        }
        let current = self.store.get(lease.id()).await?;
        if current.is_some_and(|item| item.status == DownloadStatus::Downloading) {
            return Ok(());
        }
        debug!("任务 {} 已不在下载状态，吊销许可", lease.id());
        state.revoke(lease.id());
        Err(DownloadError::Aborted)
    }

    /// 断网时中止所有传输并重新排队，不消耗重试次数
    async fn suspend_active(&self) {
        let mut state = self.state.lock().await;
        if state.active.is_empty() {
            return;
        }
        let suspended: Vec<(String, ActiveJob)> = state.active.drain().collect();
        for (id, job) in suspended {
            job.token.cancel();
            let patch = ItemPatch::status(DownloadStatus::Queued).with_progress(0);
            match self.store.update_fields(&id, &patch).await {
                Ok(_) => info!("网络断开，任务重新排队: {}", id),
                Err(e) => error!("网络断开时重新排队失败: {}: {}", id, e),
            }
        }
        self.publish().await;
    }
}

#[async_trait]
impl JobReporter for Inner {
    async fn started(&self, lease: &JobLease) -> Result<DownloadItem> {
        let mut state = self.state.lock().await;
        if !Self::lease_is_current(&state, lease) {
            return Err(DownloadError::Aborted);
        }
        let patch = ItemPatch::status(DownloadStatus::Downloading)
            .with_progress(0)
            .with_started_at(self.clock.now());
        let item = self
            .store
            .update_fields(lease.id(), &patch)
            .await?
            .ok_or(DownloadError::Aborted)?;
        if let Some(job) = state.active.get_mut(lease.id()) {
            job.started = true;
        }

        self.emit(QueueEvent::Started {
            id: item.id.clone(),
        });
        self.publish().await;
        Ok(item)
    }

    async fn progressed(&self, lease: &JobLease, progress: u8) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_downloading(&mut state, lease).await?;
        let patch = ItemPatch::default().with_progress(progress.min(99));
        self.store
            .update_fields(lease.id(), &patch)
            .await?
            .ok_or(DownloadError::Aborted)?;

        self.emit(QueueEvent::Progress {
            id: lease.id().to_string(),
            progress,
        });
        self.publish().await;
        Ok(())
    }

    async fn completed(&self, lease: &JobLease, saved_to: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_downloading(&mut state, lease).await?;
        let patch = ItemPatch::status(DownloadStatus::Completed)
            .with_progress(100)
            .with_completed_at(Some(self.clock.now()));
        self.store
            .update_fields(lease.id(), &patch)
            .await?
            .ok_or(DownloadError::Aborted)?;
        // 完成后立即让出槽位，之后的暂停/取消不会再影响它
        state.active.remove(lease.id());

        self.emit(QueueEvent::Completed {
            id: lease.id().to_string(),
            path: saved_to.to_path_buf(),
        });
        self.publish().await;
        Ok(())
    }
}
