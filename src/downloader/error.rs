use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("未找到: {0}")]
    NotFound(String),

    #[error("传输失败: {0}")]
    Transport(String),

    #[error("HTTP 请求失败，状态码: {status}，URL: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("传输超时 ({0:?})")]
    Timeout(Duration),

    #[error("文件保存失败: {0}")]
    Sink(String),

    #[error("持久化失败: {0}")]
    Persistence(String),

    #[error("无效的状态: {0}")]
    InvalidState(String),

    #[error("任务已被中止")]
    Aborted,
}

impl DownloadError {
    /// 传输类错误会按重试策略自动重试，持久化错误不会
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::NotFound(_)
                | DownloadError::Transport(_)
                | DownloadError::HttpStatus { .. }
                | DownloadError::Timeout(_)
                | DownloadError::Sink(_)
        )
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        DownloadError::NotFound(what.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        DownloadError::Persistence(msg.into())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => DownloadError::HttpStatus {
                status: status.as_u16(),
                url: error.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => DownloadError::Transport(error.to_string()),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(error: std::io::Error) -> Self {
        DownloadError::Sink(error.to_string())
    }
}

impl From<bincode::error::EncodeError> for DownloadError {
    fn from(error: bincode::error::EncodeError) -> Self {
        DownloadError::Persistence(format!("编码失败: {}", error))
    }
}

impl From<bincode::error::DecodeError> for DownloadError {
    fn from(error: bincode::error::DecodeError) -> Self {
        DownloadError::Persistence(format!("解码失败: {}", error))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
