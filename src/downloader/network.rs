//! 网络状态跟踪

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::NetworkState;

/// 在线/离线状态，只在真正发生变化时通知订阅者
///
/// 这里的状态只是参考：在线时单个传输照样可能失败。
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<NetworkState>>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkState::Online)
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> NetworkState {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == NetworkState::Online
    }

    /// 返回状态是否发生了变化
    pub fn set_state(&self, state: NetworkState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!("🌐 网络状态变化: {}", state);
        }
        changed
    }

    pub fn set_online(&self) -> bool {
        self.set_state(NetworkState::Online)
    }

    pub fn set_offline(&self) -> bool {
        self.set_state(NetworkState::Offline)
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

/// 定期向探测地址发送 HEAD 请求，把结果写入 NetworkMonitor
pub struct ConnectivityProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(interval.max(Duration::from_secs(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            interval,
        }
    }

    pub async fn check(&self) -> NetworkState {
        match self.client.head(&self.url).send().await {
            // 能收到任何响应就说明网络是通的
            Ok(resp) => {
                debug!("探测响应: {} {}", self.url, resp.status());
                NetworkState::Online
            }
            Err(e) => {
                debug!("探测失败: {}: {}", self.url, e);
                NetworkState::Offline
            }
        }
    }

    pub fn spawn(
        self,
        monitor: NetworkMonitor,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let state = self.check().await;
                        if monitor.set_state(state) && state == NetworkState::Offline {
                            warn!("⚠️ 无法连接到 {}，暂停派发新任务", self.url);
                        }
                    }
                }
            }
            debug!("网络探测已停止");
        })
    }
}
