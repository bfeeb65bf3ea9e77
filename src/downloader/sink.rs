use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{DownloadError, Result};

/// 下载结果的落地方式（写盘、弹出保存对话框等），队列本身不关心
#[async_trait]
pub trait FileSink: Send + Sync {
    /// 保存成功后返回最终位置
    async fn save(&self, suggested_name: &str, bytes: Bytes) -> Result<PathBuf>;
}

lazy_static! {
    static ref INVALID_CHARS: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap();
}

/// 去掉文件系统不接受的字符
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = INVALID_CHARS.replace_all(name, "_");
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 写入输出目录：先占住目标文件名，再写独立的 `.part` 临时文件并重命名过去，同名文件追加 ` (n)`
#[derive(Debug, Clone)]
pub struct DirectorySink {
    output_dir: PathBuf,
}

impl DirectorySink {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    fn candidate(&self, stem: &str, ext: Option<&str>, n: usize) -> PathBuf {
        let file_name = match (n, ext) {
            (0, Some(ext)) => format!("{}.{}", stem, ext),
            (0, None) => stem.to_string(),
            (n, Some(ext)) => format!("{} ({}).{}", stem, n, ext),
            (n, None) => format!("{} ({})", stem, n),
        };
        self.output_dir.join(file_name)
    }

    /// 用 create_new 原子地占住一个未使用的文件名，并发保存同名文件时各拿各的
    async fn reserve(&self, name: &str) -> Result<PathBuf> {
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name)
            .to_string();
        let ext = path.extension().and_then(|s| s.to_str());

        let mut n = 0;
        loop {
            let candidate = self.candidate(&stem, ext, n);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => {
                    return Err(DownloadError::Sink(format!("{}: {}", candidate.display(), e)));
                }
            }
        }
    }
}

#[async_trait]
impl FileSink for DirectorySink {
    async fn save(&self, suggested_name: &str, bytes: Bytes) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let name = sanitize_file_name(suggested_name);
        let target = self.reserve(&name).await?;
        let tag = Uuid::new_v4().simple().to_string();
        let part = target.with_file_name(format!(
            "{}.{}.part",
            target
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("download"),
            &tag[..8]
        ));

        debug!("写入临时文件: {} ({} 字节)", part.display(), bytes.len());
        let written = match tokio::fs::write(&part, &bytes).await {
            Ok(()) => tokio::fs::rename(&part, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&part).await;
            let _ = tokio::fs::remove_file(&target).await;
            return Err(DownloadError::Sink(format!("{}: {}", target.display(), e)));
        }

        info!("📁 文件已保存: {}", target.display());
        Ok(target)
    }
}
