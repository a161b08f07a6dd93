//! # merger 模块
//!
//! 把本次运行解析出的代理写入模板：
//!
//! 1. 用全部代理的单行定义替换模板的 `proxies:` 片段；
//! 2. 逐个处理 `proxy-groups:` 下的分组块，按分组名称匹配规则后替换其 `proxies:` 成员；
//! 3. 结果写入输出目录中带时间戳的新文件，模板本身不做任何修改。
//!
//! 任一片段缺失只跳过该部分，部分合并的文档也是有效结果。

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::utils::{clean_proxy_name, compact_timestamp, indentation, quote_yaml_name, sanitize_file_name};
use crate::error::{PipelineError, Result};
use crate::model::{MergeConfig, OutputConfig, ProxyRecord};
use crate::section::{IndentScanner, Section, SectionScanner, extend_sibling_list, join_lines};
use crate::service::document::PROXIES_KEY;
use crate::service::grouper::{Buckets, RuleTable};
use crate::service::store::{DEFAULT_GROUP, write_atomic};

pub const PROXY_GROUPS_KEY: &str = "proxy-groups";

static OUTPUT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^_(\d{14})(?:_(\d+))?\.yaml$").unwrap());

/// 合并后的文档（尚未写盘）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedDocument {
    #[serde(skip)]
    pub lines: Vec<String>,
    /// 模板中找不到而被跳过的片段
    pub missing: Vec<String>,
    pub proxy_count: usize,
    /// 成员列表被替换的分组名称
    pub updated_groups: Vec<String>,
}

impl MergedDocument {
    pub fn text(&self) -> String {
        join_lines(&self.lines)
    }
}

/// 一次写盘后的输出，缓存在内存中供 HTTP 接口读取。
#[derive(Debug, Clone, Serialize)]
pub struct MergedOutput {
    pub group: String,
    pub template: PathBuf,
    pub path: PathBuf,
    pub proxy_count: usize,
    pub missing: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub content: String,
}

pub struct TemplateMerger<S: SectionScanner = IndentScanner> {
    scanner: S,
    table: RuleTable,
    exclude_keywords: Vec<String>,
    output: OutputConfig,
}

impl TemplateMerger<IndentScanner> {
    pub fn new(table: RuleTable, merge: &MergeConfig, output: OutputConfig) -> Self {
        Self::with_scanner(IndentScanner, table, merge, output)
    }
}

impl<S: SectionScanner> TemplateMerger<S> {
    pub fn with_scanner(scanner: S, table: RuleTable, merge: &MergeConfig, output: OutputConfig) -> Self {
        Self {
            scanner,
            table,
            exclude_keywords: merge.exclude_keywords.clone(),
            output,
        }
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && name.contains(keyword.as_str()))
    }

    /// 过滤掉名称命中排除关键字的代理，并按规则分桶。
    pub fn prepare<'a>(&self, records: impl IntoIterator<Item = &'a ProxyRecord>) -> (Vec<&'a ProxyRecord>, Buckets) {
        let kept: Vec<&ProxyRecord> = records
            .into_iter()
            .filter(|record| {
                let excluded = self.is_excluded(&record.display_name);
                if excluded {
                    debug!("排除代理: {}", record.display_name);
                }
                !excluded
            })
            .collect();
        let buckets = Buckets::build(&self.table, kept.iter().copied());
        (kept, buckets)
    }

    pub fn merge(&self, template_lines: &[String], records: &[&ProxyRecord], buckets: &Buckets) -> MergedDocument {
        let mut doc = MergedDocument::default();

        let mut seen = HashSet::new();
        let proxy_lines: Vec<String> = records
            .iter()
            .filter(|record| seen.insert(record.id.as_str()))
            .map(|record| record.raw_text.clone())
            .collect();
        doc.proxy_count = proxy_lines.len();

        let mut lines = match self.find_top_level(template_lines, PROXIES_KEY) {
            Ok(section) => self.scanner.replace_section(template_lines, &section, &proxy_lines),
            Err(e) => {
                warn!("⚠️ 模板缺少 proxies 片段，跳过代理列表: {}", e);
                doc.missing.push(PROXIES_KEY.to_string());
                template_lines.to_vec()
            }
        };

        match self.find_top_level(&lines, PROXY_GROUPS_KEY) {
            Ok(section) => lines = self.merge_proxy_groups(&lines, &section, buckets, &mut doc.updated_groups),
            Err(e) => {
                warn!("⚠️ 模板缺少 proxy-groups 片段，跳过分组: {}", e);
                doc.missing.push(PROXY_GROUPS_KEY.to_string());
            }
        }

        doc.lines = lines;
        doc
    }

    /// 模板顶层片段：同名表头取缩进最小的一个，再并入同缩进的列表项。
    fn find_top_level(&self, lines: &[String], key: &str) -> Result<Section> {
        let section = self.scanner.find_top_section(lines, key)?;
        Ok(extend_sibling_list(lines, section))
    }

    fn merge_proxy_groups(&self, lines: &[String], section: &Section, buckets: &Buckets, updated: &mut Vec<String>) -> Vec<String> {
        let body = &lines[section.start..section.end];
        let is_block_start = |line: &String, indent: usize| indentation(line) == indent && line.trim_start().starts_with('-');

        let Some(block_indent) = body
            .iter()
            .filter(|line| line.trim_start().starts_with('-'))
            .map(|line| indentation(line))
            .min()
        else {
            warn!("⚠️ proxy-groups 片段为空");
            return lines.to_vec();
        };
        let starts: Vec<usize> = body
            .iter()
            .enumerate()
            .filter(|(_, line)| is_block_start(*line, block_indent))
            .map(|(i, _)| i)
            .collect();

        let mut merged = lines[..section.start].to_vec();
        merged.extend_from_slice(&body[..starts[0]]);
        for (n, &start) in starts.iter().enumerate() {
            let end = starts.get(n + 1).copied().unwrap_or(body.len());
            merged.extend(self.merge_block(&body[start..end], buckets, updated));
        }
        merged.extend_from_slice(&lines[section.end..]);
        merged
    }

    fn merge_block(&self, block: &[String], buckets: &Buckets, updated: &mut Vec<String>) -> Vec<String> {
        let first = block[0].trim_start();
        let head = first.trim_start_matches('-').trim_start();
        if head.starts_with('{') {
            debug!("跳过 flow 格式的分组: {}", first);
            return block.to_vec();
        }
        let field_indent = indentation(&block[0]) + (first.chars().count() - head.chars().count());

        let Some(name) = block_name(block, head, field_indent) else {
            debug!("分组缺少 name 字段: {}", first);
            return block.to_vec();
        };
        let section = match self.scanner.find_section(block, PROXIES_KEY) {
            Ok(section) if section.indent == field_indent => extend_sibling_list(block, section),
            _ => {
                debug!("[{}] 没有 proxies 成员列表，保持不变", name);
                return block.to_vec();
            }
        };

        let inline = inline_members(&block[section.header]);
        let current: Vec<String> = match &inline {
            Some(members) => members.clone(),
            None => section
                .lines
                .iter()
                .map(|line| clean_proxy_name(line.trim_start_matches('-')))
                .filter(|member| !member.is_empty())
                .collect(),
        };

        let members: &[String] = match self.table.classify(&name) {
            Some(tag) if !buckets.get(tag).is_empty() => buckets.get(tag),
            Some(tag) => {
                info!("[{}] 规则 {} 没有匹配的代理，使用全部代理", name, tag);
                &buckets.all
            }
            None if current.is_empty() => &buckets.all,
            None => return block.to_vec(),
        };

        let mut seen = HashSet::new();
        let rendered: Vec<String> = members
            .iter()
            .filter(|member| seen.insert(member.as_str()))
            .map(|member| format!("- {}", quote_yaml_name(member)))
            .collect();
        if rendered.is_empty() {
            warn!("⚠️ [{}] 没有可用的代理成员", name);
        }

        let mut block = block.to_vec();
        if inline.is_some() {
            let header = &block[section.header];
            let lead = &header[..header.len() - header.trim_start().len()];
            let stripped = format!("{}{}:", lead, PROXIES_KEY);
            block[section.header] = stripped;
        }
        debug!("[{}] 写入 {} 个成员", name, rendered.len());
        updated.push(name);
        self.scanner.replace_section(&block, &section, &rendered)
    }

    /// 输出文件名前缀：模板文件名，非默认分组再追加分组名。
    pub fn output_base(template_path: &Path, group: &str) -> String {
        let stem = template_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "merged".to_string());
        match sanitize_file_name(group) {
            g if group == DEFAULT_GROUP || g.is_empty() => stem,
            g => format!("{}_{}", stem, g),
        }
    }

    /// 写入 `<base>_<YYYYMMDDhhmmss>.yaml`，同一秒内重复时追加 `_<n>`，从不覆盖已有文件。
    pub fn write(&self, template_path: &Path, group: &str, doc: &MergedDocument, now: DateTime<Utc>) -> Result<PathBuf> {
        let dir = &self.output.dir;
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

        let base = Self::output_base(template_path, group);
        let stamp = compact_timestamp(now);
        let mut path = dir.join(format!("{}_{}.yaml", base, stamp));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{}_{}_{}.yaml", base, stamp, n));
            n += 1;
        }

        write_atomic(&path, doc.text().as_bytes())?;
        info!("💾 输出文件: {}", path.display());

        if self.output.keep_latest > 0 {
            self.cleanup(&base)?;
        }
        Ok(path)
    }

    /// 同一前缀只保留最新的 `keep_latest` 个输出。
    fn cleanup(&self, base: &str) -> Result<()> {
        let dir = &self.output.dir;
        let mut outputs: Vec<((String, u32), PathBuf)> = Vec::new();
        for item in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
            let path = item.map_err(|e| PipelineError::io(dir, e))?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(rest) = file_name.strip_prefix(base) else {
                continue;
            };
            if let Some(caps) = OUTPUT_SUFFIX.captures(rest) {
                let stamp = caps[1].to_string();
                let n = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
                outputs.push(((stamp, n), path));
            }
        }

        outputs.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in outputs.into_iter().skip(self.output.keep_latest) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("🗑️ 清理旧输出 {}", path.display()),
                Err(e) => warn!("⚠️ 清理旧输出 {} 失败: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

fn block_name(block: &[String], head: &str, field_indent: usize) -> Option<String> {
    std::iter::once(head)
        .chain(
            block[1..]
                .iter()
                .filter(|line| indentation(line) == field_indent)
                .map(|line| line.trim()),
        )
        .find_map(|field| field.strip_prefix("name:"))
        .map(clean_proxy_name)
        .filter(|name| !name.is_empty())
}

/// `proxies: [a, b]` 形式的行内成员；`proxies:` 与 `proxies: []` 返回 `None`。
fn inline_members(header: &str) -> Option<Vec<String>> {
    let (_, value) = header.split_once(&format!("{}:", PROXIES_KEY))?;
    let inner = value.trim().strip_prefix('[')?.strip_suffix(']')?;
    let members: Vec<String> = inner
        .split(',')
        .map(clean_proxy_name)
        .filter(|member| !member.is_empty())
        .collect();
    if members.is_empty() { None } else { Some(members) }
}
