//! # registry 模块
//!
//! 单次聚合运行内的代理注册表，负责身份去重与重名处理。
//!
//! - 身份：`id = hash(原始定义行)`，字节完全相同的定义只保留一条；
//! - 重名：名称相同但定义不同时，新条目改名为 `<原名>Renamed<N>`，
//!   `N` 为当前注册表大小加一；
//! - 注册表在每次运行开始时新建、以 `&mut` 显式传递、运行结束即丢弃，
//!   不同运行之间没有共享状态。
//!
//! 改名结果依赖已有记录，因此调用方必须按固定顺序（订阅加入分组的顺序）输入文档。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::common::utils::{clean_proxy_name, hash_hex, quote_yaml_name};
use crate::model::ProxyRecord;

/// `name:` 字段的值，允许带引号（引号内可以有逗号）
static NAME_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[{\s,])name:\s*((?:"[^"]*"|'[^']*'|[^,}\n])*)"#).unwrap()
});

/// 定义行中是否带有非空的 `name:` 字段
pub fn has_name(raw_line: &str) -> bool {
    NAME_FIELD
        .captures(raw_line.trim())
        .and_then(|c| c.get(1))
        .is_some_and(|value| !clean_proxy_name(value.as_str()).is_empty())
}

/// 单条定义的处理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Added(String),
    Renamed { id: String, from: String, to: String },
    /// 与已有记录字节相同
    Duplicate(String),
    /// 没有 `name:` 字段或名称为空，跳过
    Unnamed,
}

impl Resolution {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Added(id) | Self::Duplicate(id) | Self::Renamed { id, .. } => Some(id.as_str()),
            Self::Unnamed => None,
        }
    }
}

/// 单个文档的解析统计。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    pub total: usize,
    pub added: usize,
    pub renamed: usize,
    pub duplicates: usize,
    pub unnamed: usize,
    pub unnamed_items: Vec<String>,
}

impl DocumentStats {
    pub fn record(&mut self, raw_line: &str, resolution: &Resolution) {
        self.total += 1;
        match resolution {
            Resolution::Added(_) => self.added += 1,
            Resolution::Renamed { .. } => {
                self.added += 1;
                self.renamed += 1;
            }
            Resolution::Duplicate(_) => self.duplicates += 1,
            Resolution::Unnamed => {
                self.unnamed += 1;
                self.unnamed_items.push(raw_line.to_string());
            }
        }
    }

    pub fn merge(&mut self, other: &DocumentStats) {
        self.total += other.total;
        self.added += other.added;
        self.renamed += other.renamed;
        self.duplicates += other.duplicates;
        self.unnamed += other.unnamed;
        self.unnamed_items.extend(other.unnamed_items.iter().cloned());
    }
}

#[derive(Debug, Default)]
pub struct ProxyRegistry {
    records: Vec<ProxyRecord>,
    index: HashMap<String, usize>,
    /// 已占用的原名与显示名
    taken: HashSet<String>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ProxyRecord> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    /// 按插入顺序遍历
    pub fn records(&self) -> impl Iterator<Item = &ProxyRecord> {
        self.records.iter()
    }

    pub fn resolve(&mut self, raw_line: &str, source: &str) -> Resolution {
        let raw_line = raw_line.trim();
        let Some(value) = NAME_FIELD.captures(raw_line).and_then(|c| c.get(1)) else {
            warn!("⚠️ [{}] 代理条目缺少 name 字段: {}", source, raw_line);
            return Resolution::Unnamed;
        };
        let original_name = clean_proxy_name(value.as_str());
        if original_name.is_empty() {
            warn!("⚠️ [{}] 代理条目名称为空: {}", source, raw_line);
            return Resolution::Unnamed;
        }

        let id = hash_hex(raw_line);
        if self.index.contains_key(&id) {
            debug!("[{}] 重复定义: {}", source, original_name);
            return Resolution::Duplicate(id);
        }

        let display_name = if self.taken.contains(&original_name) {
            self.next_free_name(&original_name)
        } else {
            original_name.clone()
        };

        let raw_text = rewrite_name(raw_line, value.range(), &original_name, &display_name);
        let record = ProxyRecord {
            id: id.clone(),
            display_name: display_name.clone(),
            original_name: original_name.clone(),
            raw_text,
            source: source.to_string(),
        };

        self.taken.insert(original_name.clone());
        self.taken.insert(display_name.clone());
        self.index.insert(id.clone(), self.records.len());
        self.records.push(record);

        if display_name != original_name {
            debug!("[{}] Renamed: {} -> {}", source, original_name, display_name);
            Resolution::Renamed { id, from: original_name, to: display_name }
        } else {
            Resolution::Added(id)
        }
    }

    fn next_free_name(&self, original: &str) -> String {
        let mut n = self.records.len() + 1;
        loop {
            let candidate = format!("{}Renamed{}", original, n);
            if !self.taken.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// 把定义行中的名称值替换为显示名；未改名且无需加引号时原样返回。
fn rewrite_name(raw_line: &str, span: std::ops::Range<usize>, original: &str, display: &str) -> String {
    let value = &raw_line[span.clone()];
    let leading = value.len() - value.trim_start().len();
    let start = span.start + leading;
    let end = start + value.trim().len();
    let current = &raw_line[start..end];

    let rendered = quote_yaml_name(display);
    let already_quoted = current.starts_with(['"', '\'']);
    let needs_rewrite = display != original || (rendered.starts_with('"') && !already_quoted);
    if !needs_rewrite {
        return raw_line.to_string();
    }
    format!("{}{}{}", &raw_line[..start], rendered, &raw_line[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC_A: &[&str] = &[
        "- {name: HK-1, type: ss, server: a.example.com, port: 443}",
        "- {name: JP-1, type: ss, server: b.example.com, port: 443}",
    ];

    #[test]
    fn test_same_document_twice_collapses() {
        let mut registry = ProxyRegistry::new();
        for line in DOC_A.iter().chain(DOC_A.iter()) {
            registry.resolve(line, "a.yaml");
        }
        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.records().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["HK-1", "JP-1"]);
    }

    #[test]
    fn test_duplicate_returns_existing_id() {
        let mut registry = ProxyRegistry::new();
        let first = registry.resolve(DOC_A[0], "a.yaml");
        let second = registry.resolve(DOC_A[0], "b.yaml");
        assert_eq!(second, Resolution::Duplicate(first.id().unwrap().to_string()));
        assert_eq!(registry.get(first.id().unwrap()).unwrap().source, "a.yaml");
    }

    #[test]
    fn test_collision_renames_second_entry() {
        let mut registry = ProxyRegistry::new();
        registry.resolve("- {name: HK-1, type: ss, server: a.example.com}", "a.yaml");
        let outcome = registry.resolve("- {name: HK-1, type: ss, server: z.example.com}", "b.yaml");

        assert_eq!(registry.len(), 2);
        match outcome {
            Resolution::Renamed { from, to, .. } => {
                assert_eq!(from, "HK-1");
                assert_eq!(to, "HK-1Renamed2");
            }
            other => panic!("unexpected {:?}", other),
        }
        let renamed = registry.records().nth(1).unwrap();
        assert_eq!(renamed.raw_text, "- {name: HK-1Renamed2, type: ss, server: z.example.com}");
        assert_eq!(renamed.original_name, "HK-1");
        assert_eq!(renamed.display_name, "HK-1Renamed2");
    }

    #[test]
    fn test_renamed_id_is_hash_of_source_line() {
        let mut registry = ProxyRegistry::new();
        registry.resolve("- {name: A, type: ss, port: 1}", "a.yaml");
        let line = "- {name: A, type: ss, port: 2}";
        let outcome = registry.resolve(line, "b.yaml");
        assert_eq!(outcome.id(), Some(hash_hex(line).as_str()));
        // 再次输入同一行仍判定为重复
        assert!(matches!(registry.resolve(line, "c.yaml"), Resolution::Duplicate(_)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rename_skips_taken_names() {
        let mut registry = ProxyRegistry::new();
        registry.resolve("- {name: X, port: 1}", "a");
        registry.resolve("- {name: XRenamed3, port: 2}", "a");
        let outcome = registry.resolve("- {name: X, port: 3}", "b");
        assert!(matches!(outcome, Resolution::Renamed { to, .. } if to == "XRenamed4"));
    }

    #[test]
    fn test_unnamed_entries_are_skipped() {
        let mut registry = ProxyRegistry::new();
        let mut stats = DocumentStats::default();
        for line in ["- {type: ss, server: a}", "- {name: , type: ss}", "- {name: ok, type: ss}"] {
            let outcome = registry.resolve(line, "a");
            stats.record(line, &outcome);
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(stats.unnamed, 2);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.unnamed_items.len(), 2);
    }

    #[test]
    fn test_name_needing_quotes() {
        let mut registry = ProxyRegistry::new();
        registry.resolve("- {name: HK | 01, type: ss}", "a");
        let record = registry.records().next().unwrap();
        assert_eq!(record.display_name, "HK | 01");
        assert_eq!(record.raw_text, "- {name: \"HK | 01\", type: ss}");
    }

    #[test]
    fn test_quoted_name_with_comma() {
        let mut registry = ProxyRegistry::new();
        registry.resolve("- {name: \"HK, 01\", type: ss}", "a");
        let record = registry.records().next().unwrap();
        assert_eq!(record.original_name, "HK, 01");
        assert_eq!(record.raw_text, "- {name: \"HK, 01\", type: ss}");
    }

    #[test]
    fn test_username_field_is_not_a_name() {
        let mut registry = ProxyRegistry::new();
        let outcome = registry.resolve("- {username: u, type: http}", "a");
        assert_eq!(outcome, Resolution::Unnamed);
    }

    #[test]
    fn test_has_name() {
        assert!(has_name("- {name: a, type: ss}"));
        assert!(!has_name("- {name: , type: ss}"));
        assert!(!has_name("- {type: ss}"));
    }

    #[test]
    fn test_name_as_last_field() {
        let mut registry = ProxyRegistry::new();
        registry.resolve("- {type: ss, name: SG-1}", "a");
        assert_eq!(registry.records().next().unwrap().display_name, "SG-1");
    }
}
