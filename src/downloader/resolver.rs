//! resource id -> 实际下载地址

use async_trait::async_trait;
use dashmap::DashMap;
use url::Url;

use super::error::Result;
use super::models::Resource;

/// 每次传输开始前按 resource id 查询资源，返回 None 表示资源已不存在
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn resolve(&self, resource_id: &str) -> Result<Option<Resource>>;
}

/// resource id 本身就是 URL，标题取路径最后一段
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlResolver;

#[async_trait]
impl ResourceResolver for UrlResolver {
    async fn resolve(&self, resource_id: &str) -> Result<Option<Resource>> {
        let Ok(url) = Url::parse(resource_id) else {
            return Ok(None);
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Ok(None);
        }

        let title = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|last| !last.is_empty())
            .map(|last| {
                urlencoding::decode(last)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| last.to_string())
            })
            .or_else(|| url.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "download".to_string());

        Ok(Some(Resource::new(url.as_str(), title)))
    }
}

/// 内存中的资源目录
#[derive(Debug, Default)]
pub struct CatalogResolver {
    entries: DashMap<String, Resource>,
}

impl CatalogResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource_id: impl Into<String>, resource: Resource) {
        self.entries.insert(resource_id.into(), resource);
    }
}

#[async_trait]
impl ResourceResolver for CatalogResolver {
    async fn resolve(&self, resource_id: &str) -> Result<Option<Resource>> {
        Ok(self.entries.get(resource_id).map(|e| e.value().clone()))
    }
}
