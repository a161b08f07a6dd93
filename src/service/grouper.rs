use serde::{Deserialize, Serialize};

use crate::common::utils::decode_flags;
use crate::model::ProxyRecord;

/// 一条分组规则：名称中包含任一关键字即归入 `tag`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRule {
    pub tag: String,
    pub keywords: Vec<String>,
}

impl GroupRule {
    pub fn new(tag: &str, keywords: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.keywords.iter().any(|keyword| name.contains(keyword.as_str()))
    }
}

/// 有序规则表，先匹配的规则优先。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<GroupRule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new(vec![
            GroupRule::new("HK", &["HK", "🇭🇰", "香港", "Hong Kong"]),
            GroupRule::new("TW", &["TW", "🇹🇼", "台湾", "臺灣", "Taiwan"]),
            GroupRule::new("JP", &["JP", "🇯🇵", "日本", "Japan"]),
            GroupRule::new("SG", &["SG", "🇸🇬", "新加坡", "狮城", "Singapore"]),
            GroupRule::new("US", &["US", "🇺🇸", "美国", "United States"]),
            GroupRule::new("KR", &["KR", "🇰🇷", "韩国", "Korea"]),
        ])
    }
}

impl RuleTable {
    pub fn new(rules: Vec<GroupRule>) -> Self {
        Self { rules }
    }

    /// 配置中的规则为空时使用内置规则表
    pub fn from_config(rules: &[GroupRule]) -> Self {
        if rules.is_empty() {
            Self::default()
        } else {
            Self::new(rules.to_vec())
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.tag.as_str())
    }

    /// 返回第一个命中的标签。
    ///
    /// 名称原文不命中时，再用国旗转为国家代码后的名称匹配一次。
    pub fn classify(&self, name: &str) -> Option<&str> {
        let decoded = decode_flags(name);
        self.rules
            .iter()
            .find(|rule| rule.matches(name) || (decoded != name && rule.matches(&decoded)))
            .map(|rule| rule.tag.as_str())
    }
}

/// 按标签归类后的显示名列表，顺序与记录输入顺序一致。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buckets {
    /// 全部代理（含未命中任何规则的）
    pub all: Vec<String>,
    tagged: Vec<(String, Vec<String>)>,
}

impl Buckets {
    pub fn build<'a>(table: &RuleTable, records: impl IntoIterator<Item = &'a ProxyRecord>) -> Self {
        let mut buckets = Self {
            all: Vec::new(),
            tagged: table.tags().map(|tag| (tag.to_string(), Vec::new())).collect(),
        };
        for record in records {
            buckets.all.push(record.display_name.clone());
            if let Some(tag) = table.classify(&record.display_name) {
                if let Some((_, names)) = buckets.tagged.iter_mut().find(|(t, _)| t == tag) {
                    names.push(record.display_name.clone());
                }
            }
        }
        buckets
    }

    pub fn get(&self, tag: &str) -> &[String] {
        self.tagged
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, names)| names.as_slice())
            .unwrap_or(&[])
    }

    /// `(标签, 数量)`，用于日志与报告
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.tagged.iter().map(|(tag, names)| (tag.clone(), names.len())).collect()
    }
}
