use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

use super::Downloader;
use crate::error::Result;

/// 有序候选地址 + 固定重试间隔。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub candidates: Vec<String>,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptError {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { url: String, body: String },
    Failed,
}

/// 一次下载的完整过程记录
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub outcome: FetchOutcome,
    pub attempts: usize,
    pub waits: usize,
    pub errors: Vec<AttemptError>,
}

impl FetchReport {
    pub fn body(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Success { body, .. } => Some(body),
            FetchOutcome::Failed => None,
        }
    }

}

impl RetryPolicy {
    pub fn new(candidates: Vec<String>, delay: Duration) -> Self {
        Self { candidates, delay }
    }

    /// 依次尝试候选地址，第一个通过 `validate` 的响应即为结果。
    ///
    /// 失败后若还有候选地址则等待 `delay`，最后一个失败后不再等待。
    /// 不可重试的错误（本地 IO、输入不合法等）直接结束，不再尝试后续地址。
    pub async fn run<D, F>(&self, downloader: &D, validate: F) -> FetchReport
    where
        D: Downloader + ?Sized,
        F: Fn(&str) -> Result<()>,
    {
        let mut report = FetchReport {
            outcome: FetchOutcome::Failed,
            attempts: 0,
            waits: 0,
            errors: Vec::new(),
        };

        let total = self.candidates.len();
        for (i, url) in self.candidates.iter().enumerate() {
            report.attempts += 1;
            info!("🌐 [{}/{}] 尝试下载: {}", i + 1, total, url);

            let result = match downloader.get_text(url).await {
                Ok(body) => validate(&body).map(|_| body),
                Err(e) => Err(e),
            };

            match result {
                Ok(body) => {
                    info!("🟢 [{}/{}] 下载成功，{} 字节", i + 1, total, body.len());
                    report.outcome = FetchOutcome::Success { url: url.clone(), body };
                    return report;
                }
                Err(e) => {
                    warn!("🔴 [{}/{}] 下载失败: {}", i + 1, total, e);
                    let retryable = e.is_retryable();
                    report.errors.push(AttemptError {
                        url: url.clone(),
                        error: e.to_string(),
                    });
                    if !retryable {
                        error!("❌ 错误不可重试，放弃剩余 {} 个候选地址", total - i - 1);
                        return report;
                    }
                }
            }

            if i + 1 < total {
                info!("⏳ {} 秒后尝试下一个地址", self.delay.as_secs_f32());
                tokio::time::sleep(self.delay).await;
                report.waits += 1;
            }
        }

        warn!("❌ 全部 {} 个候选地址均失败", total);
        report
    }
}
