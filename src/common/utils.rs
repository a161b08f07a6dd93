use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::Level;

static UNSAFE_FILE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_.-]").unwrap());
static REPEATED_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

/// 代理名称中需要加引号的字符（YAML flow 上下文）
const QUOTE_TRIGGERS: &[char] = &[
    '|', '[', ']', '{', '}', ',', ':', '#', '&', '*', '!', '%', '@', '`',
];

/// SHA-256 十六进制摘要，用于分组 id、订阅 key 与代理 id。
pub fn hash_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// 行首空白字符数量（空格与制表符都计 1）。
pub fn indentation(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// 把任意名称转换为安全的文件名：非法字符替换为下划线，合并连续下划线并去掉首尾下划线。
pub fn sanitize_file_name(name: &str) -> String {
    let replaced = UNSAFE_FILE_CHARS.replace_all(name.trim(), "_");
    let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

/// 以订阅地址的主机名作为订阅名称，`.` 替换为 `_`。
///
/// 非 http(s) 地址无法取主机名，退回到地址的哈希。
pub fn name_from_url(source: &str) -> String {
    match url::Url::parse(source) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => match parsed.host_str() {
            Some(host) => host.replace('.', "_"),
            None => hash_hex(source),
        },
        _ => hash_hex(source),
    }
}

/// `YYYYMMDDhhmmss` 形式的时间戳
pub fn compact_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// 名称包含特殊字符时加双引号。
pub fn quote_yaml_name(name: &str) -> String {
    let needs_quote = name.contains(QUOTE_TRIGGERS)
        || name.starts_with(char::is_whitespace)
        || name.ends_with(char::is_whitespace);
    if needs_quote {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        name.to_string()
    }
}

/// 去掉名称两侧成对的引号以及无效字符（U+FFFD、U+FFF9..U+FFFF、弯引号）。
pub fn clean_proxy_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| {
            trimmed
                .strip_prefix(*q)
                .and_then(|rest| rest.strip_suffix(*q))
        })
        .unwrap_or(trimmed);
    unquoted
        .chars()
        .filter(|c| !matches!(c, '\u{FFFD}' | '\u{FFF9}'..='\u{FFFF}' | '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// 把国旗 emoji（两个区域指示符）还原为两位国家代码，如 🇭🇰 → HK。
pub fn decode_flags(text: &str) -> String {
    const BASE: u32 = 0x1F1E6;
    text.chars()
        .map(|c| {
            let code = c as u32;
            if (BASE..BASE + 26).contains(&code) {
                char::from_u32('A' as u32 + code - BASE).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

// 把字符串转换成 Level，忽略大小写，不识别时返回 None
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hash_hex_stable() {
        let a = hash_hex("- {name: HK-1, type: ss}");
        let b = hash_hex("- {name: HK-1, type: ss}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_hex("- {name: HK-1, type: vmess}"));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("sub.example.com"), "sub.example.com");
        assert_eq!(sanitize_file_name("  我的 订阅!! "), "");
        assert_eq!(sanitize_file_name("a b  c"), "a_b_c");
        assert_eq!(sanitize_file_name("__x__y__"), "x_y");
    }

    #[test]
    fn test_name_from_url() {
        assert_eq!(name_from_url("https://sub.example.com/api?t=1"), "sub_example_com");
        assert_eq!(name_from_url("ftp://x"), hash_hex("ftp://x"));
        assert_eq!(name_from_url("not a url"), hash_hex("not a url"));
    }

    #[test]
    fn test_compact_timestamp() {
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(compact_timestamp(t), "20240305070809");
    }

    #[test]
    fn test_quote_yaml_name() {
        assert_eq!(quote_yaml_name("HK-1"), "HK-1");
        assert_eq!(quote_yaml_name("HK | 01"), "\"HK | 01\"");
        assert_eq!(quote_yaml_name("[VIP] JP"), "\"[VIP] JP\"");
        assert_eq!(quote_yaml_name("a\"b:"), "\"a\\\"b:\"");
    }

    #[test]
    fn test_clean_proxy_name() {
        assert_eq!(clean_proxy_name(" \"HK | 01\" "), "HK | 01");
        assert_eq!(clean_proxy_name("'JP'"), "JP");
        assert_eq!(clean_proxy_name("US\u{FFFD}01"), "US01");
        assert_eq!(clean_proxy_name("\"unbalanced"), "\"unbalanced");
    }

    #[test]
    fn test_decode_flags() {
        assert_eq!(decode_flags("🇭🇰 Premium"), "HK Premium");
        assert_eq!(decode_flags("香港 01"), "香港 01");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("Info"), Some(Level::INFO));
        assert_eq!(parse_level("verbose"), None);
    }
}
