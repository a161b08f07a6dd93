use std::path::PathBuf;
use thiserror::Error;

/// 聚合流水线的统一错误类型。
///
/// 除 `RunInProgress` 外，所有错误都只影响单个条目、单个分组或单个模板片段，
/// 调用方记录后继续处理后续内容。
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("section `{0}` not found")]
    SectionMissing(String),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error on {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("group `{0}` not found")]
    UnknownGroup(String),

    #[error("subscription `{0}` not found")]
    UnknownSubscription(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("an aggregation run is already in progress")]
    RunInProgress,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json { path: path.into(), source }
    }

    /// 网络类与内容类错误可以换下一个候选地址重试。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Status { .. } | Self::InvalidContent(_)
        )
    }
}
