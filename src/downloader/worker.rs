use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::{DownloadError, Result};
use super::models::{DownloadItem, Resource};
use super::progress::ProgressThrottle;
use super::resolver::ResourceResolver;
use super::sink::FileSink;
use super::transport::Transport;

// 预分配上限，避免服务器声明的长度过大
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// 调度器发给 worker 的一次执行许可
///
/// 暂停、取消、断网都会吊销许可并触发 token，之后 worker 的任何写入都会被拒绝。
#[derive(Debug, Clone)]
pub struct JobLease {
    id: String,
    run: u64,
    token: CancellationToken,
}

impl JobLease {
    pub fn new(id: impl Into<String>, run: u64, token: CancellationToken) -> Self {
        Self {
            id: id.into(),
            run,
            token,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn is_revoked(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// worker 对持久状态的所有修改都经由调度器落地
#[async_trait]
pub trait JobReporter: Send + Sync {
    /// 标记 downloading、进度归零、首次设置 startedAt
    async fn started(&self, lease: &JobLease) -> Result<DownloadItem>;

    async fn progressed(&self, lease: &JobLease, progress: u8) -> Result<()>;

    /// 标记 completed、进度 100、设置 completedAt
    async fn completed(&self, lease: &JobLease, saved_to: &Path) -> Result<()>;
}

/// 执行单个下载任务，不保存任何跨调用的状态
#[derive(Clone)]
pub struct TransferWorker {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn FileSink>,
    resolver: Arc<dyn ResourceResolver>,
    progress_step: u8,
    progress_interval: Duration,
    timeout: Duration,
}

impl TransferWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn FileSink>,
        resolver: Arc<dyn ResourceResolver>,
    ) -> Self {
        Self {
            transport,
            sink,
            resolver,
            progress_step: 5,
            progress_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_progress_throttle(mut self, step: u8, interval: Duration) -> Self {
        self.progress_step = step;
        self.progress_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 执行到成功或失败为止；许可被吊销时返回 `Aborted`
    pub async fn run(&self, lease: &JobLease, reporter: &dyn JobReporter) -> Result<PathBuf> {
        let token = lease.token.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("任务 {} 已中止 (run {})", lease.id, lease.run);
                Err(DownloadError::Aborted)
            }
            result = self.execute(lease, reporter) => result,
        }
    }

    async fn execute(&self, lease: &JobLease, reporter: &dyn JobReporter) -> Result<PathBuf> {
        let item = reporter.started(lease).await?;
        info!("开始下载任务: {} ({})", item.id, item.resource_id);

        let resource = self
            .resolver
            .resolve(&item.resource_id)
            .await?
            .ok_or_else(|| DownloadError::not_found(format!("资源 {}", item.resource_id)))?;

        let transfer = self.receive(lease, reporter, &resource);
        let bytes = match tokio::time::timeout(self.timeout, transfer).await {
            Ok(result) => result?,
            Err(_) => return Err(DownloadError::Timeout(self.timeout)),
        };

        // 传输成功后才交给 sink，sink 确认后才算完成
        let saved_to = self.sink.save(&resource.suggested_name(), bytes).await?;
        reporter.completed(lease, &saved_to).await?;
        info!("✅ 下载任务完成: {} -> {}", item.id, saved_to.display());
        Ok(saved_to)
    }

    async fn receive(
        &self,
        lease: &JobLease,
        reporter: &dyn JobReporter,
        resource: &Resource,
    ) -> Result<Bytes> {
        let mut stream = self.transport.fetch(&resource.url).await?;
        let total = stream.total.filter(|t| *t > 0);
        debug!("任务 {} 资源长度: {:?}", lease.id, total);

        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        let mut throttle = ProgressThrottle::new(self.progress_step, self.progress_interval);

        while let Some(chunk) = stream.body.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);

            // 长度未知时无法计算百分比，只在完成时写 100
            if let Some(total) = total {
                if let Some(progress) = throttle.observe(buffer.len() as u64, total) {
                    reporter.progressed(lease, progress).await?;
                }
            }
        }

        if let Some(total) = total {
            if (buffer.len() as u64) < total {
                return Err(DownloadError::Transport(format!(
                    "连接提前关闭: 已接收 {} / {} 字节",
                    buffer.len(),
                    total
                )));
            }
        }

        Ok(buffer.freeze())
    }
}
