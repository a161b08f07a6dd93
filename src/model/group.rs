use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 内联订阅的地址前缀，文档内容直接写入缓存目录。
pub const INLINE_PREFIX: &str = "file::";

/// 订阅分组元数据，保存在 `groups.json` 中。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "group_name")]
    pub name: String,

    /// `hash(name)`，同时作为条目文件名和缓存目录名
    #[serde(rename = "group_md5")]
    pub id: String,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub subscription_count: usize,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: crate::common::utils::hash_hex(name),
            created_at: Utc::now(),
            subscription_count: 0,
        }
    }
}

/// 分组内的一条订阅。
///
/// 字段名沿用磁盘上的 JSON 结构；缺失的派生字段在读取时自动补全。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// `hash(source_url)`，分组内唯一
    #[serde(default)]
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "subscribe_url", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    #[serde(rename = "yaml_file_name", default, skip_serializing_if = "Option::is_none")]
    pub cached_file_name: Option<String>,

    #[serde(rename = "expiryTime", default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,

    #[serde(rename = "submissionTime", default, skip_serializing_if = "Option::is_none")]
    pub submission_time: Option<DateTime<Utc>>,
}

impl SubscriptionEntry {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    pub fn is_inline(&self) -> bool {
        self.source_url
            .as_deref()
            .is_some_and(|url| url.starts_with(INLINE_PREFIX))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time.is_some_and(|expiry| expiry < now)
    }

    /// 剩余有效期描述，用于日志。
    pub fn remaining(&self, now: DateTime<Utc>) -> String {
        match self.expiry_time {
            None => "No expiry date set".to_string(),
            Some(expiry) if expiry <= now => "Expired".to_string(),
            Some(expiry) => {
                let left = expiry - now;
                format!("{} days and {} hours", left.num_days(), left.num_hours() % 24)
            }
        }
    }
}

/// 更新订阅时允许修改的字段，`None` 表示保持不变。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionPatch {
    pub name: Option<String>,
    pub source_url: Option<String>,
    pub expiry_time: Option<DateTime<Utc>>,
}
