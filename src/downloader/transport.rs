use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, warn};

use super::error::{DownloadError, Result};

/// 一次请求返回的字节流，`total` 为服务器声明的长度（可能未知）
pub struct TransferStream {
    pub total: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl TransferStream {
    pub fn new(total: Option<u64>, body: BoxStream<'static, Result<Bytes>>) -> Self {
        Self { total, body }
    }

    /// 由一组已知的数据块构造，便于测试和离线资源
    pub fn from_chunks(total: Option<u64>, chunks: Vec<Result<Bytes>>) -> Self {
        Self::new(total, futures::stream::iter(chunks).boxed())
    }
}

impl std::fmt::Debug for TransferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<TransferStream>;
}

#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // 检查响应状态并处理特殊情况
    fn check_response_status(response: &reqwest::Response, url: &str) -> Result<()> {
        let status = response.status();
        debug!("Response Status: {}", status);

        match status {
            reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED => {
                warn!("🚫 访问被拒绝 ({})，请检查资源权限: {}", status, url);
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                warn!("⚠️ 请求过于频繁 (429 Too Many Requests): {}", url);
            }
            status if status.is_success() => return Ok(()),
            _ => warn!("❌ 非成功状态码: {}", status),
        }
        Err(DownloadError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<TransferStream> {
        debug!("开始请求: {}", url);
        let response = self.client.get(url).send().await?;
        Self::check_response_status(&response, url)?;

        let total = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|ct_len| ct_len.to_str().ok())
            .and_then(|ct_len| ct_len.parse().ok());

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| DownloadError::Transport(e.to_string())))
            .boxed();

        Ok(TransferStream::new(total, body))
    }
}
