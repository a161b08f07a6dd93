//! # section 模块
//!
//! 基于缩进的列表片段扫描器，只处理「某个键下的一段缩进列表」这一种结构。
//!
//! - [`SectionScanner::find_section`]：定位 `^\s*<key>:` 行，收集其后缩进更深的所有行；
//! - [`SectionScanner::find_top_section`]：同名表头出现多次时取缩进最小的一个；
//! - [`SectionScanner::replace_section`]：用新内容替换该片段，其余行逐字节保持不变。
//!
//! 文档按 `\n` 切分，再用 `\n` 拼接即可还原原文（包括 `\r` 与末尾换行）。

use regex::Regex;

use crate::common::utils::indentation;
use crate::error::{PipelineError, Result};

/// 一次定位得到的片段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// 片段键名
    pub key: String,
    /// 表头行下标
    pub header: usize,
    /// 表头行缩进 `D`
    pub indent: usize,
    /// 片段内容范围 `[start, end)`，`start = header + 1`
    pub start: usize,
    pub end: usize,
    /// 范围内去掉首尾空白后的非空行
    pub lines: Vec<String>,
}

impl Section {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 新内容的缩进 `D + 2`
    pub fn child_indent(&self) -> usize {
        self.indent + 2
    }
}

pub trait SectionScanner {
    /// 查找第一个匹配 `key` 的片段，找不到时返回 `SectionMissing`。
    fn find_section(&self, lines: &[String], key: &str) -> Result<Section>;

    /// 在所有匹配 `key` 的表头中取缩进最小的片段，缩进相同时取靠前的。
    /// 用于定位文档顶层的 `proxies:`，避免命中分组块里的同名成员列表。
    fn find_top_section(&self, lines: &[String], key: &str) -> Result<Section> {
        let mut best: Option<Section> = None;
        let mut offset = 0;
        while offset < lines.len() {
            let Ok(mut section) = self.find_section(&lines[offset..], key) else {
                break;
            };
            let next = offset + section.header + 1;
            section.header += offset;
            section.start += offset;
            section.end += offset;
            if best.as_ref().is_none_or(|b| section.indent < b.indent) {
                best = Some(section);
            }
            offset = next;
        }
        best.ok_or_else(|| PipelineError::SectionMissing(key.to_string()))
    }

    /// 用 `new_lines` 替换 `section` 的内容，每行重新缩进到 `D + 2`。
    fn replace_section(&self, lines: &[String], section: &Section, new_lines: &[String]) -> Vec<String>;
}

/// 纯行/缩进扫描实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct IndentScanner;

impl SectionScanner for IndentScanner {
    fn find_section(&self, lines: &[String], key: &str) -> Result<Section> {
        let pattern = Regex::new(&format!(r"^\s*{}:", regex::escape(key)))
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;

        let header = lines
            .iter()
            .position(|line| pattern.is_match(line))
            .ok_or_else(|| PipelineError::SectionMissing(key.to_string()))?;
        let indent = indentation(&lines[header]);

        let start = header + 1;
        let end = lines[start..]
            .iter()
            .position(|line| indentation(line) <= indent)
            .map_or(lines.len(), |offset| start + offset);

        let collected = lines[start..end]
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Section {
            key: key.to_string(),
            header,
            indent,
            start,
            end,
            lines: collected,
        })
    }

    fn replace_section(&self, lines: &[String], section: &Section, new_lines: &[String]) -> Vec<String> {
        let pad = " ".repeat(section.child_indent());
        let mut updated = Vec::with_capacity(lines.len() - (section.end - section.start) + new_lines.len());

        updated.extend_from_slice(&lines[..section.header]);
        let header = &lines[section.header];
        if new_lines.is_empty() {
            updated.push(header.clone());
        } else {
            updated.push(strip_inline_empty_list(header));
        }
        updated.extend(new_lines.iter().map(|line| format!("{}{}", pad, line.trim())));
        updated.extend_from_slice(&lines[section.end..]);
        updated
    }
}

/// `key: []` 下面要插入子行时去掉行内的空列表标记。
fn strip_inline_empty_list(header: &str) -> String {
    let trimmed = header.trim_end();
    match trimmed.strip_suffix("[]") {
        Some(rest) if rest.trim_end().ends_with(':') => rest.trim_end().to_string(),
        _ => header.to_string(),
    }
}

/// 列表项与表头同缩进的写法（`proxies:\n- a`）。片段为空且紧随其后的是同缩进的
/// `-` 行时，把这些列表项及其更深的续行并入片段。
pub fn extend_sibling_list(lines: &[String], mut section: Section) -> Section {
    if !section.is_empty() {
        return section;
    }
    let is_item = |line: &String| indentation(line) == section.indent && line.trim_start().starts_with('-');
    let is_continuation = |line: &String| indentation(line) > section.indent && !line.trim().is_empty();

    let mut end = section.start;
    while end < lines.len() && (is_item(&lines[end]) || (end > section.start && is_continuation(&lines[end]))) {
        end += 1;
    }
    if end > section.start {
        section.end = end;
        section.lines = lines[section.start..end]
            .iter()
            .map(|line| line.trim().to_string())
            .collect();
    }
    section
}

pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}
