//! 从订阅文档中取出代理条目。
//!
//! 订阅转换服务通常输出单行 flow 映射（`- {name: a, type: ss, ...}`），
//! 少数源会输出多行块映射，这里把块映射折叠成单行，保证每个条目都是一行。

use crate::common::utils::indentation;
use crate::error::Result;
use crate::section::{Section, SectionScanner, extend_sibling_list, split_lines};

pub const PROXIES_KEY: &str = "proxies";

/// 取出文档顶层 `proxies:` 片段中的全部条目（每个条目一行，不含缩进）。
/// 列表项与 `proxies:` 同缩进的写法同样支持。
pub fn extract_proxy_entries(scanner: &impl SectionScanner, text: &str) -> Result<Vec<String>> {
    let lines = split_lines(text);
    let section = extend_sibling_list(&lines, scanner.find_top_section(&lines, PROXIES_KEY)?);
    Ok(collect_entries(&lines, &section))
}

/// 把片段范围内的原始行按列表项分组，多行条目折叠为 flow 映射。
pub fn collect_entries(lines: &[String], section: &Section) -> Vec<String> {
    let items: Vec<(usize, &str)> = lines[section.start..section.end]
        .iter()
        .map(|line| (indentation(line), line.trim()))
        .filter(|(_, text)| !text.is_empty() && !text.starts_with('#'))
        .collect();

    let Some(item_indent) = items
        .iter()
        .filter(|(_, text)| text.starts_with('-'))
        .map(|(indent, _)| *indent)
        .min()
    else {
        return items.into_iter().map(|(_, text)| text.to_string()).collect();
    };

    let mut grouped: Vec<Vec<(usize, &str)>> = Vec::new();
    for (indent, text) in items {
        let starts_item = indent == item_indent && text.starts_with('-');
        if starts_item || grouped.is_empty() {
            grouped.push(vec![(indent, text)]);
        } else if let Some(current) = grouped.last_mut() {
            current.push((indent, text));
        }
    }

    grouped.iter().map(|entry| fold_entry(entry)).collect()
}

fn fold_entry(entry: &[(usize, &str)]) -> String {
    let (first_indent, first) = entry[0];
    if entry.len() == 1 {
        return first.to_string();
    }

    let head = first.trim_start_matches('-').trim();
    if head.starts_with('{') || (head.is_empty() && entry[1].1.starts_with('{')) {
        // 跨行的 flow 映射，直接拼接
        return entry.iter().map(|(_, text)| *text).collect::<Vec<_>>().join(" ");
    }

    let child_indent = entry
        .get(1)
        .map(|(indent, _)| *indent)
        .filter(|indent| *indent > first_indent)
        .unwrap_or(first_indent + 2);

    let mut fields: Vec<(usize, &str)> = Vec::with_capacity(entry.len());
    if !head.is_empty() {
        fields.push((child_indent, head));
    }
    fields.extend_from_slice(&entry[1..]);
    format!("- {{{}}}", render_map(&fields))
}

fn render_map(items: &[(usize, &str)]) -> String {
    let base = items[0].0;
    let mut parts = Vec::new();
    let mut i = 0;
    while i < items.len() {
        let text = items[i].1;
        let mut j = i + 1;
        while j < items.len() && items[j].0 > base {
            j += 1;
        }
        let children = &items[i + 1..j];

        match split_key_value(text) {
            Some((key, "")) if !children.is_empty() => {
                parts.push(format!("{}: {}", key, render_value(children)));
            }
            Some((key, value)) => parts.push(format!("{}: {}", key, value)),
            None => parts.push(text.to_string()),
        }
        i = j;
    }
    parts.join(", ")
}

fn render_value(children: &[(usize, &str)]) -> String {
    if !children[0].1.starts_with('-') {
        return format!("{{{}}}", render_map(children));
    }

    let base = children[0].0;
    let mut values = Vec::new();
    let mut i = 0;
    while i < children.len() {
        let head = children[i].1.trim_start_matches('-').trim();
        let mut j = i + 1;
        while j < children.len() && !(children[j].0 == base && children[j].1.starts_with('-')) {
            j += 1;
        }
        let nested = &children[i + 1..j];

        if nested.is_empty() && split_key_value(head).is_none() {
            values.push(head.to_string());
        } else {
            let nested_indent = nested.first().map_or(base + 2, |(indent, _)| *indent);
            let mut fields = vec![(nested_indent, head)];
            fields.extend_from_slice(nested);
            values.push(format!("{{{}}}", render_map(&fields)));
        }
        i = j;
    }
    format!("[{}]", values.join(", "))
}

/// `key: value` 或 `key:`；值中可以包含冒号（如 URL）。
fn split_key_value(text: &str) -> Option<(&str, &str)> {
    if let Some(key) = text.strip_suffix(':') {
        if !key.contains(": ") {
            return Some((key.trim(), ""));
        }
    }
    text.split_once(": ")
        .map(|(key, value)| (key.trim(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::IndentScanner;

    #[test]
    fn test_flow_entries_pass_through() {
        let text = "proxies:\n  - {name: a, type: ss}\n  - {name: b, type: ss}\nproxy-groups:\n";
        let entries = extract_proxy_entries(&IndentScanner, text).unwrap();
        assert_eq!(entries, vec!["- {name: a, type: ss}", "- {name: b, type: ss}"]);
    }

    #[test]
    fn test_block_entry_is_folded() {
        let text = "\
proxies:
  - name: HK-1
    type: vmess
    server: hk.example.com
    port: 443
    ws-opts:
      path: /ray
      headers:
        Host: hk.example.com
    alpn:
      - h2
      - http/1.1
  - {name: JP-1, type: ss}
rules:
";
        let entries = extract_proxy_entries(&IndentScanner, text).unwrap();
        assert_eq!(
            entries,
            vec![
                "- {name: HK-1, type: vmess, server: hk.example.com, port: 443, ws-opts: {path: /ray, headers: {Host: hk.example.com}}, alpn: [h2, http/1.1]}",
                "- {name: JP-1, type: ss}",
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let text = "proxies:\n  # comment\n  - {name: a}\n";
        let entries = extract_proxy_entries(&IndentScanner, text).unwrap();
        assert_eq!(entries, vec!["- {name: a}"]);
    }

    #[test]
    fn test_unindented_list_items() {
        let text = "proxies:\n- {name: HK-1, type: ss, server: a}\n- name: JP-1\n  type: ss\nproxy-groups:\n- name: x\n  proxies:\n  - HK-1\n";
        let entries = extract_proxy_entries(&IndentScanner, text).unwrap();
        assert_eq!(entries, vec!["- {name: HK-1, type: ss, server: a}", "- {name: JP-1, type: ss}"]);
    }

    #[test]
    fn test_top_level_proxies_after_groups() {
        let text = "proxy-groups:\n  - name: x\n    proxies:\n      - DIRECT\nproxies:\n  - {name: a}\n";
        let entries = extract_proxy_entries(&IndentScanner, text).unwrap();
        assert_eq!(entries, vec!["- {name: a}"]);
    }

    #[test]
    fn test_no_proxies_section() {
        assert!(extract_proxy_entries(&IndentScanner, "port: 1\n").is_err());
    }

    #[test]
    fn test_split_key_value() {
        assert_eq!(split_key_value("server: a.b"), Some(("server", "a.b")));
        assert_eq!(split_key_value("url: http://x:80/p"), Some(("url", "http://x:80/p")));
        assert_eq!(split_key_value("headers:"), Some(("headers", "")));
        assert_eq!(split_key_value("plain"), None);
    }
}
