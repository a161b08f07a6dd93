use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::model::FetchConfig;

/// 下载订阅文本的统一接口，测试中以假实现替换。
#[async_trait]
pub trait Downloader: Send + Sync {
    /// 发起一次 GET，返回响应正文。
    async fn get_text(&self, url: &str) -> Result<String>;
}

/// 基于 reqwest 的实现
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if !status.is_success() {
            return Err(PipelineError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}
