//! # fetcher 模块
//!
//! 通过订阅转换服务下载订阅文档：
//!
//! - [`convert`]：由订阅地址生成候选下载地址；
//! - [`policy`]：按顺序尝试候选地址，失败时固定间隔后换下一个；
//! - [`client`]：实际发起 HTTP 请求的 [`Downloader`]。
//!
//! 本模块不写任何文件，下载成功后由调用方负责写入缓存。

mod client;
mod convert;
mod policy;

pub use client::{Downloader, HttpDownloader};
pub use convert::candidate_urls;
pub use policy::{AttemptError, FetchOutcome, FetchReport, RetryPolicy};

use crate::error::{PipelineError, Result};

/// 基础内容校验：去掉空白后非空，且不包含任何无效标记。
pub fn check_content(text: &str, invalid_markers: &[String]) -> Result<()> {
    if text.trim().is_empty() {
        return Err(PipelineError::InvalidContent("empty response".into()));
    }
    if let Some(marker) = invalid_markers.iter().find(|m| !m.is_empty() && text.contains(m.as_str())) {
        return Err(PipelineError::InvalidContent(format!("response contains `{}`", marker)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_content() {
        let markers = vec!["doesn't contain any valid node".to_string()];
        assert!(check_content("proxies:\n  - {name: a}", &markers).is_ok());
        assert!(check_content(" \n\t", &markers).is_err());
        assert!(check_content("The link doesn't contain any valid node info", &markers).is_err());
    }
}
